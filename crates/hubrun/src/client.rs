//! # Client Hub
//!
//! Talks to exactly one server: over a `ClientTransport`, or attached in-process
//! to a `ServerHub` with no transport at all.

use std::sync::Arc;
use std::sync::Weak;

use hubwire::Optimizer;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::args::IntoArgs;
use crate::builder::ClientHubBuilder;
use crate::cancel::CancellationToken;
use crate::config::HubConfig;
use crate::error::Error;
use crate::error::Result;
use crate::hub::HubCore;
use crate::hub::HubEvent;
use crate::hub::Link;
use crate::hub::Role;
use crate::serializer::MessagePack;
use crate::serializer::Serializer;
use crate::service::Service;
use crate::transport::ClientDelegate;
use crate::transport::ClientOptions;
use crate::transport::ClientTransport;
use crate::transport::ConnectionState;
use crate::transport::DeliveryMode;
use crate::transport::TransportError;

pub struct ClientHub<S: Serializer = MessagePack> {
    core: Arc<HubCore<S>>,
    transport: Option<Arc<dyn ClientTransport>>,
}

impl ClientHub<MessagePack> {
    pub fn builder() -> ClientHubBuilder<MessagePack> {
        ClientHubBuilder::new()
    }
}

impl<S: Serializer> ClientHub<S> {
    pub(crate) fn with_transport(
        transport: Arc<dyn ClientTransport>,
        config: HubConfig,
        optimizer: Arc<Optimizer>,
    ) -> Result<Self> {
        config.validate()?;
        let options = ClientOptions {
            connect_timeout: config.connect_timeout,
            disconnect_timeout: config.disconnect_timeout,
            strategy: config.request_handling,
        };
        let core = HubCore::new(Role::Client, config, Link::Client(transport.clone()), optimizer);

        let weak = Arc::downgrade(&core);
        let delegate: Weak<dyn ClientDelegate> = weak;
        transport.init(delegate, options)?;

        Ok(Self { core, transport: Some(transport) })
    }

    pub(crate) fn attached(server: &Arc<HubCore<S>>, config: HubConfig, optimizer: Arc<Optimizer>) -> Result<Self> {
        config.validate()?;
        let core = HubCore::new(Role::Client, config, Link::Detached, optimizer);
        HubCore::attach_local(server, &core)?;
        Ok(Self { core, transport: None })
    }

    fn transport(&self) -> Result<&Arc<dyn ClientTransport>> {
        self.transport
            .as_ref()
            .ok_or_else(|| Error::Configuration("a locally attached client has no transport".into()))
    }

    pub fn config(&self) -> &HubConfig {
        self.core.config()
    }

    pub fn optimizer(&self) -> &Arc<Optimizer> {
        self.core.optimizer()
    }

    /// True when attached in-process to a server hub.
    pub fn is_local(&self) -> bool {
        self.transport.is_none()
    }

    // ---- connection ----

    pub async fn connect(&self, address: &str, port: u16, key: &str) -> Result<()> {
        self.core.check_disposed()?;
        let transport = self.transport()?;
        let timeout = self.core.config().connect_timeout;

        tokio::time::timeout(timeout, transport.connect(address, port, key))
            .await
            .map_err(|_| TransportError::Timeout)??;

        tracing::info!(%address, port, "client hub connected");
        Ok(())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.core.check_disposed()?;
        self.transport()?.disconnect()?;
        Ok(())
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.core.check_disposed().is_err() {
            return ConnectionState::Disconnected;
        }
        match &self.transport {
            Some(transport) => transport.connection_state(),
            None if self.core.has_local() => ConnectionState::Connected,
            None => ConnectionState::Disconnected,
        }
    }

    /// Runs queued inbound traffic on this thread (manual request handling).
    pub fn process_requests(&self) -> Result<()> {
        self.core.check_disposed()?;
        self.transport()?.process_requests();
        Ok(())
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<HubEvent> {
        self.core.subscribe()
    }

    // ---- registration ----

    pub fn register<T: Service>(&self, instance: Arc<T>) -> Result<()> {
        self.core.register(None, instance, None)
    }

    pub fn register_named<T: Service>(&self, name: &str, instance: Arc<T>) -> Result<()> {
        self.core.register(Some(name), instance, None)
    }

    pub fn register_as<I: ?Sized, T: Service>(&self, instance: Arc<T>) -> Result<()> {
        self.core.register(Some(std::any::type_name::<I>()), instance, None)
    }

    pub fn register_methods<T: Service>(&self, name: Option<&str>, instance: Arc<T>, methods: &[&str]) -> Result<()> {
        self.core.register(name, instance, Some(methods))
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        self.core.unregister(name)
    }

    pub fn unregister_service<T: Service>(&self) -> Result<()> {
        self.core.unregister(T::service_name())
    }

    pub fn registered_targets(&self) -> Vec<String> {
        let mut names = self.core.targets();
        names.sort();
        names
    }

    // ---- invocation ----

    pub async fn invoke_server<R, A>(&self, target: &str, method: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.core.invoke(None, target, method, &args, None).await
    }

    pub async fn invoke_server_with_cancel<R, A>(
        &self,
        target: &str,
        method: &str,
        args: A,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.core.invoke(None, target, method, &args, Some(cancel)).await
    }

    /// Blocks the calling thread until the response, timeout or disposal.
    pub fn invoke_server_blocking<R, A>(&self, target: &str, method: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.core.invoke_blocking(None, target, method, &args)
    }

    pub fn invoke_forget_server<A: IntoArgs>(&self, mode: DeliveryMode, target: &str, method: &str, args: A) -> Result<()> {
        self.core.invoke_forget(mode, None, target, method, &args)
    }

    pub fn pending_calls(&self) -> usize {
        self.core.pending_calls()
    }

    pub fn dispose(&self) -> Result<()> {
        self.core.dispose()
    }
}
