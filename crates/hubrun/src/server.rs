//! # Server Hub
//!
//! Accepts many peers over a `ServerTransport`, optionally plus one client hub
//! attached in-process.

use std::sync::Arc;
use std::sync::Weak;

use hubwire::Optimizer;
use hubwire::ServiceDescriptor;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::LOCAL_PEER_ID;
use crate::args::IntoArgs;
use crate::builder::ServerHubBuilder;
use crate::cancel::CancellationToken;
use crate::config::HubConfig;
use crate::error::Result;
use crate::hub::HubCore;
use crate::hub::HubEvent;
use crate::hub::Link;
use crate::hub::Role;
use crate::serializer::MessagePack;
use crate::serializer::Serializer;
use crate::service::Service;
use crate::transport::DeliveryMode;
use crate::transport::ServerDelegate;
use crate::transport::ServerTransport;

pub struct ServerHub<S: Serializer = MessagePack> {
    core: Arc<HubCore<S>>,
    transport: Arc<dyn ServerTransport>,
}

impl ServerHub<MessagePack> {
    pub fn builder() -> ServerHubBuilder<MessagePack> {
        ServerHubBuilder::new()
    }
}

impl<S: Serializer> ServerHub<S> {
    pub(crate) fn from_parts(
        transport: Arc<dyn ServerTransport>,
        config: HubConfig,
        optimizer: Arc<Optimizer>,
    ) -> Result<Self> {
        config.validate()?;
        let strategy = config.request_handling;
        let core = HubCore::new(Role::Server, config, Link::Server(transport.clone()), optimizer);

        let weak = Arc::downgrade(&core);
        let delegate: Weak<dyn ServerDelegate> = weak;
        transport.init(delegate, strategy)?;

        tracing::debug!(?strategy, "server hub created");
        Ok(Self { core, transport })
    }

    pub(crate) fn core(&self) -> &Arc<HubCore<S>> {
        &self.core
    }

    pub fn config(&self) -> &HubConfig {
        self.core.config()
    }

    pub fn optimizer(&self) -> &Arc<Optimizer> {
        self.core.optimizer()
    }

    // ---- transport ----

    pub fn listen(&self, port: u16, key: &str) -> Result<()> {
        self.core.check_disposed()?;
        self.transport.listen(port, key)?;
        tracing::info!(port, "server hub listening");
        Ok(())
    }

    pub fn listen_on(&self, ipv4: &str, ipv6: &str, port: u16, key: &str) -> Result<()> {
        self.core.check_disposed()?;
        self.transport.listen_on(ipv4, ipv6, port, key)?;
        tracing::info!(%ipv4, %ipv6, port, "server hub listening");
        Ok(())
    }

    /// Runs queued inbound traffic on this thread (manual request handling).
    pub fn process_requests(&self) -> Result<()> {
        self.core.check_disposed()?;
        self.transport.process_requests();
        Ok(())
    }

    /// Peer connect/disconnect notifications.
    pub fn subscribe_peers(&self) -> broadcast::Receiver<HubEvent> {
        self.core.subscribe()
    }

    // ---- registration ----

    /// Registers `instance` under its service name.
    pub fn register<T: Service>(&self, instance: Arc<T>) -> Result<()> {
        self.core.register(None, instance, None)
    }

    pub fn register_named<T: Service>(&self, name: &str, instance: Arc<T>) -> Result<()> {
        self.core.register(Some(name), instance, None)
    }

    /// Registers `instance` under the name of the contract type `I`.
    pub fn register_as<I: ?Sized, T: Service>(&self, instance: Arc<T>) -> Result<()> {
        self.core.register(Some(std::any::type_name::<I>()), instance, None)
    }

    /// Registers only the listed methods of `instance`.
    pub fn register_methods<T: Service>(&self, name: Option<&str>, instance: Arc<T>, methods: &[&str]) -> Result<()> {
        self.core.register(name, instance, Some(methods))
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        self.core.unregister(name)
    }

    /// Unregisters a target that was registered under its service name.
    pub fn unregister_service<T: Service>(&self) -> Result<()> {
        self.core.unregister(T::service_name())
    }

    pub fn registered_targets(&self) -> Vec<String> {
        let mut names = self.core.targets();
        names.sort();
        names
    }

    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.core.descriptors()
    }

    // ---- invocation ----

    pub async fn invoke_client<R, A>(&self, peer_id: i32, target: &str, method: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.core.invoke(Some(peer_id), target, method, &args, None).await
    }

    pub async fn invoke_client_with_cancel<R, A>(
        &self,
        peer_id: i32,
        target: &str,
        method: &str,
        args: A,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.core.invoke(Some(peer_id), target, method, &args, Some(cancel)).await
    }

    /// Calls the attached in-process client hub.
    pub async fn invoke_local_client<R, A>(&self, target: &str, method: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.invoke_client(LOCAL_PEER_ID, target, method, args).await
    }

    /// Blocks the calling thread until the response, timeout or disposal.
    pub fn invoke_client_blocking<R, A>(&self, peer_id: i32, target: &str, method: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.core.invoke_blocking(Some(peer_id), target, method, &args)
    }

    pub fn invoke_forget_client<A: IntoArgs>(
        &self,
        mode: DeliveryMode,
        peer_id: i32,
        target: &str,
        method: &str,
        args: A,
    ) -> Result<()> {
        self.core.invoke_forget(mode, Some(peer_id), target, method, &args)
    }

    /// Fire-and-forget to every connected peer, and to the attached local client if any.
    pub fn invoke_forget_all_clients<A: IntoArgs>(&self, mode: DeliveryMode, target: &str, method: &str, args: A) -> Result<()> {
        self.core.invoke_forget(mode, None, target, method, &args)
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.core.pending_calls()
    }

    pub fn dispose(&self) -> Result<()> {
        self.core.dispose()
    }
}
