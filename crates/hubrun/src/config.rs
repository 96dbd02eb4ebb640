//! Hub configuration.
//!
//! Plain fields round-trip through serde so a configuration can live in a JSON
//! file; the byte transformers are code and are set programmatically.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How a transport schedules delivery of inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestHandling {
    /// Messages queue up until the host calls `process_requests`.
    Manual,
    /// Every message runs on its own task.
    #[default]
    MultiThreaded,
    /// One background task handles messages in arrival order.
    SingleThreaded,
}

/// A byte-to-byte hook applied to every frame crossing the transport.
pub type Transform = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    #[serde(with = "millis")]
    pub disconnect_timeout: Duration,
    /// Omit error details from responses entirely.
    pub swallow_exceptions: bool,
    /// Replace error messages in responses with a fixed generic one.
    pub generic_error_messages: bool,
    pub request_handling: RequestHandling,
    /// Applied to inbound bytes before decoding.
    #[serde(skip)]
    pub ingress: Option<Transform>,
    /// Applied to outbound bytes after encoding.
    #[serde(skip)]
    pub egress: Option<Transform>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            swallow_exceptions: false,
            generic_error_messages: false,
            request_handling: RequestHandling::default(),
            ingress: None,
            egress: None,
        }
    }
}

impl HubConfig {
    /// Parses the plain fields from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn with_ingress(mut self, f: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.ingress = Some(Arc::new(f));
        self
    }

    pub fn with_egress(mut self, f: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.egress = Some(Arc::new(f));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::Configuration("request_timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConfig")
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("disconnect_timeout", &self.disconnect_timeout)
            .field("swallow_exceptions", &self.swallow_exceptions)
            .field("generic_error_messages", &self.generic_error_messages)
            .field("request_handling", &self.request_handling)
            .field("ingress", &self.ingress.is_some())
            .field("egress", &self.egress.is_some())
            .finish()
    }
}

mod millis {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
