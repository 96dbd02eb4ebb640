//! # Hub Builders
//!
//! Fluent construction of server and client hubs. Validation happens in `build`.

use std::marker::PhantomData;
use std::sync::Arc;

use hubwire::Optimizer;

use crate::client::ClientHub;
use crate::config::HubConfig;
use crate::error::Error;
use crate::error::Result;
use crate::hub::HubCore;
use crate::serializer::MessagePack;
use crate::serializer::Serializer;
use crate::server::ServerHub;
use crate::transport::ClientTransport;
use crate::transport::ServerTransport;

pub struct ServerHubBuilder<S: Serializer = MessagePack> {
    transport: Option<Arc<dyn ServerTransport>>,
    config: HubConfig,
    optimizer: Option<Arc<Optimizer>>,
    _serializer: PhantomData<fn() -> S>,
}

impl ServerHubBuilder<MessagePack> {
    pub fn new() -> Self {
        Self {
            transport: None,
            config: HubConfig::default(),
            optimizer: None,
            _serializer: PhantomData,
        }
    }
}

impl Default for ServerHubBuilder<MessagePack> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> ServerHubBuilder<S> {
    pub fn use_transport(mut self, transport: impl ServerTransport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn use_shared_transport(mut self, transport: Arc<dyn ServerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_configuration(mut self, configure: impl FnOnce(&mut HubConfig)) -> Self {
        configure(&mut self.config);
        self
    }

    pub fn with_config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses a dedicated optimizer instead of `Optimizer::global()`.
    pub fn use_optimizer(mut self, optimizer: Arc<Optimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn use_serializer<T: Serializer>(self) -> ServerHubBuilder<T> {
        ServerHubBuilder {
            transport: self.transport,
            config: self.config,
            optimizer: self.optimizer,
            _serializer: PhantomData,
        }
    }

    pub fn build(self) -> Result<ServerHub<S>> {
        let transport = self
            .transport
            .ok_or_else(|| Error::Configuration("a server hub requires a transport".into()))?;
        let optimizer = self.optimizer.unwrap_or_else(Optimizer::global);
        ServerHub::from_parts(transport, self.config, optimizer)
    }
}

pub struct ClientHubBuilder<S: Serializer = MessagePack> {
    transport: Option<Arc<dyn ClientTransport>>,
    local_server: Option<Arc<HubCore<S>>>,
    config: HubConfig,
    optimizer: Option<Arc<Optimizer>>,
}

impl ClientHubBuilder<MessagePack> {
    pub fn new() -> Self {
        Self {
            transport: None,
            local_server: None,
            config: HubConfig::default(),
            optimizer: None,
        }
    }
}

impl Default for ClientHubBuilder<MessagePack> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> ClientHubBuilder<S> {
    pub fn use_transport(mut self, transport: impl ClientTransport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn use_shared_transport(mut self, transport: Arc<dyn ClientTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attaches the client in-process to `server` instead of using a transport.
    pub fn use_local_server(mut self, server: &ServerHub<S>) -> Self {
        self.local_server = Some(server.core().clone());
        self
    }

    pub fn with_configuration(mut self, configure: impl FnOnce(&mut HubConfig)) -> Self {
        configure(&mut self.config);
        self
    }

    pub fn with_config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    pub fn use_optimizer(mut self, optimizer: Arc<Optimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Switches the serializer. Drops a local server chosen earlier, since it
    /// speaks the previous one; choose the serializer first.
    pub fn use_serializer<T: Serializer>(self) -> ClientHubBuilder<T> {
        if self.local_server.is_some() {
            tracing::warn!("use_serializer after use_local_server discards the local server");
        }
        ClientHubBuilder {
            transport: self.transport,
            local_server: None,
            config: self.config,
            optimizer: self.optimizer,
        }
    }

    pub fn build(self) -> Result<ClientHub<S>> {
        let optimizer = self.optimizer.unwrap_or_else(Optimizer::global);
        match (self.transport, self.local_server) {
            (Some(_), Some(_)) => Err(Error::Configuration(
                "a client hub cannot use both a transport and a local server".into(),
            )),
            (None, None) => Err(Error::Configuration(
                "a client hub requires a transport or a local server".into(),
            )),
            (Some(transport), None) => ClientHub::with_transport(transport, self.config, optimizer),
            (None, Some(server)) => ClientHub::attached(&server, self.config, optimizer),
        }
    }
}
