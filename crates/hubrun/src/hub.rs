//! # Hub Core
//!
//! The engine shared by server and client hubs: turns invocations into frames,
//! frames into invocations, and correlates the two.
//!
//! ## Flow
//!
//! - **Outbound**: build a `CallFrame`, allocate a call id when a response is wanted,
//!   then `route` it. Routing prefers an attached in-process hub when the
//!   destination is unspecified or the local peer id; otherwise the frame is
//!   encoded and handed to the transport.
//! - **Inbound**: bytes from the transport are decoded; calls are dispatched through
//!   the registry and answered on the same route; responses resolve pending calls.
//!
//! ## Invariants
//! - **No Locks Across Awaits**: registry and local-hub locks are held only long
//!   enough to clone an `Arc`.
//! - **Disposal is Final**: after `dispose` every operation fails with `Disposed`
//!   and every outstanding call is failed the same way.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use hubwire::CallFrame;
use hubwire::Codec;
use hubwire::Optimizer;
use hubwire::Packet;
use hubwire::ResponseFrame;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::LOCAL_PEER_ID;
use crate::args::IntoArgs;
use crate::cancel::CancellationToken;
use crate::config::HubConfig;
use crate::context::CallContext;
use crate::error::Error;
use crate::error::Result;
use crate::invoker;
use crate::pending::PendingCalls;
use crate::registry::Registry;
use crate::serializer::Serializer;
use crate::service::Service;
use crate::transport::ClientDelegate;
use crate::transport::ClientTransport;
use crate::transport::DeliveryMode;
use crate::transport::PeerInfo;
use crate::transport::ServerDelegate;
use crate::transport::ServerTransport;
use crate::transport::TransportError;

const EVENT_CAPACITY: usize = 64;

/// Connection lifecycle notifications.
#[derive(Debug, Clone)]
pub enum HubEvent {
    PeerConnected(PeerInfo),
    PeerDisconnected(PeerInfo),
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Server,
    Client,
}

pub(crate) enum Link {
    Server(Arc<dyn ServerTransport>),
    Client(Arc<dyn ClientTransport>),
    /// A client attached to an in-process server has no transport.
    Detached,
}

pub(crate) struct HubCore<S: Serializer> {
    role: Role,
    config: HubConfig,
    codec: Codec,
    registry: Registry<S>,
    pending: PendingCalls,
    link: Link,
    local: RwLock<Option<Weak<HubCore<S>>>>,
    events: broadcast::Sender<HubEvent>,
    disposed: AtomicBool,
    this: Weak<HubCore<S>>,
}

impl<S: Serializer> HubCore<S> {
    pub(crate) fn new(role: Role, config: HubConfig, link: Link, optimizer: Arc<Optimizer>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new_cyclic(|this| Self {
            role,
            config,
            codec: Codec::new(optimizer),
            registry: Registry::new(),
            pending: PendingCalls::new(),
            link,
            local: RwLock::new(None),
            events,
            disposed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Links a server and a client hub in-process, both directions at once.
    pub(crate) fn attach_local(server: &Arc<Self>, client: &Arc<Self>) -> Result<()> {
        server.check_disposed()?;
        client.check_disposed()?;

        // fixed lock order by address
        let (first, second) = match Arc::as_ptr(server) < Arc::as_ptr(client) {
            true => (server, client),
            false => (client, server),
        };
        let mut a = first.local.write().unwrap_or_else(PoisonError::into_inner);
        let mut b = second.local.write().unwrap_or_else(PoisonError::into_inner);

        let taken = |slot: &Option<Weak<Self>>| slot.as_ref().is_some_and(|w| w.strong_count() > 0);
        if taken(&a) || taken(&b) {
            return Err(Error::Configuration("a local hub is already attached".into()));
        }

        *a = Some(Arc::downgrade(second));
        *b = Some(Arc::downgrade(first));

        tracing::info!("attached local client hub to server hub");
        Ok(())
    }

    pub(crate) fn check_disposed(&self) -> Result<()> {
        match self.disposed.load(Ordering::SeqCst) {
            true => Err(Error::Disposed),
            false => Ok(()),
        }
    }

    pub(crate) fn config(&self) -> &HubConfig {
        &self.config
    }

    pub(crate) fn optimizer(&self) -> &Arc<Optimizer> {
        self.codec.optimizer()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub(crate) fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn has_local(&self) -> bool {
        self.local_hub().is_some()
    }

    fn local_hub(&self) -> Option<Arc<Self>> {
        self.local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn emit(&self, event: HubEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ---- registration ----

    pub(crate) fn register<T: Service>(&self, name: Option<&str>, instance: Arc<T>, methods: Option<&[&str]>) -> Result<()> {
        self.check_disposed()?;
        self.registry.register(name, instance, methods)
    }

    pub(crate) fn unregister(&self, name: &str) -> Result<()> {
        self.check_disposed()?;
        self.registry.unregister(name)
    }

    pub(crate) fn targets(&self) -> Vec<String> {
        self.registry.names()
    }

    pub(crate) fn descriptors(&self) -> Vec<hubwire::ServiceDescriptor> {
        self.registry.descriptors()
    }

    // ---- outbound ----

    pub(crate) async fn invoke<R, A>(
        &self,
        dest: Option<i32>,
        target: &str,
        method: &str,
        args: &A,
        cancel: Option<&CancellationToken>,
    ) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs + ?Sized,
    {
        self.check_disposed()?;
        let buffers = args.into_buffers::<S>()?;
        let raw = self.invoke_raw(dest, target, method, buffers, cancel).await?;
        decode_result::<S, R>(raw)
    }

    /// Request/response call with pre-serialized arguments.
    pub(crate) async fn invoke_raw(
        &self,
        dest: Option<i32>,
        target: &str,
        method: &str,
        args: Vec<Bytes>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Bytes>> {
        self.check_disposed()?;
        check_names(target, method)?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Configuration(
                "asynchronous invocation needs a tokio runtime; use the blocking variant".into(),
            ));
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let (call_id, rx) = self.pending.register();
        let frame = CallFrame {
            call_id: Some(call_id),
            target: target.to_owned(),
            method: method.to_owned(),
            args,
        };

        tracing::debug!(call_id, target_name = %target, %method, ?dest, "invoking");
        if let Err(e) = self.route(dest, DeliveryMode::ReliableOrdered, Packet::Call(frame)) {
            self.pending.remove(call_id);
            return Err(e);
        }

        self.pending.wait(call_id, rx, self.config.request_timeout, cancel).await
    }

    /// Request/response call that parks the current thread.
    ///
    /// Must not be called from a task on a single-threaded runtime; the response
    /// could never be processed.
    pub(crate) fn invoke_blocking<R, A>(&self, dest: Option<i32>, target: &str, method: &str, args: &A) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs + ?Sized,
    {
        self.check_disposed()?;
        check_names(target, method)?;
        let buffers = args.into_buffers::<S>()?;

        let (call_id, rx) = self.pending.register_blocking();
        let frame = CallFrame {
            call_id: Some(call_id),
            target: target.to_owned(),
            method: method.to_owned(),
            args: buffers,
        };

        tracing::debug!(call_id, target_name = %target, %method, ?dest, "invoking (blocking)");
        if let Err(e) = self.route(dest, DeliveryMode::ReliableOrdered, Packet::Call(frame)) {
            self.pending.remove(call_id);
            return Err(e);
        }

        let raw = self.pending.wait_blocking(call_id, rx, self.config.request_timeout)?;
        decode_result::<S, R>(raw)
    }

    /// Fire-and-forget call. Send failures are logged, not returned.
    pub(crate) fn invoke_forget<A>(&self, mode: DeliveryMode, dest: Option<i32>, target: &str, method: &str, args: &A) -> Result<()>
    where
        A: IntoArgs + ?Sized,
    {
        self.check_disposed()?;
        check_names(target, method)?;
        let buffers = args.into_buffers::<S>()?;

        let frame = CallFrame {
            call_id: None,
            target: target.to_owned(),
            method: method.to_owned(),
            args: buffers,
        };

        if let Err(e) = self.route(dest, mode, Packet::Call(frame)) {
            tracing::error!(target_name = %target, %method, ?dest, "Failed to send message for fire and forget: {}", e);
        }
        Ok(())
    }

    /// Delivers a packet to its destination.
    ///
    /// An attached local hub receives packets addressed to nobody in particular or
    /// to the local peer id. The network send is skipped when the packet was meant
    /// only for the local peer, or when this is a client (its only peer is local).
    fn route(&self, dest: Option<i32>, mode: DeliveryMode, packet: Packet) -> Result<()> {
        let local = match dest {
            None | Some(LOCAL_PEER_ID) => self.local_hub(),
            Some(_) => None,
        };

        if let Some(local) = local {
            let local_only = dest == Some(LOCAL_PEER_ID) || self.role == Role::Client;
            if local_only {
                dispatch_local(local, packet);
                return Ok(());
            }
            dispatch_local(local, packet.clone());
        }

        self.send_network(dest, mode, &packet)
    }

    fn send_network(&self, dest: Option<i32>, mode: DeliveryMode, packet: &Packet) -> Result<()> {
        let encoded = self.codec.encode(packet).map_err(|e| match e.is_invalid_call() {
            true => Error::InvalidCall(e.to_string()),
            false => Error::Wire(e),
        })?;
        let transformed;
        let data: &[u8] = match &self.config.egress {
            Some(egress) => {
                transformed = egress(&encoded);
                &transformed
            }
            None => &encoded,
        };

        match &self.link {
            Link::Server(transport) => transport.send(dest, mode, data)?,
            Link::Client(transport) => transport.send(mode, data)?,
            Link::Detached => return Err(TransportError::NotConnected.into()),
        }
        Ok(())
    }

    // ---- inbound ----

    pub(crate) async fn receive_bytes(&self, peer: Option<PeerInfo>, data: Vec<u8>) {
        let data = match &self.config.ingress {
            Some(ingress) => ingress(&data),
            None => data,
        };

        match self.codec.decode(Bytes::from(data)) {
            Ok(packet) => self.receive_packet(peer, packet).await,
            Err(e) => tracing::error!(?peer, "Failed to process incoming message: {}", e),
        }
    }

    pub(crate) async fn receive_packet(&self, peer: Option<PeerInfo>, packet: Packet) {
        if self.check_disposed().is_err() {
            tracing::debug!(?peer, "hub disposed; dropping inbound packet");
            return;
        }

        match packet {
            Packet::Call(call) => self.process_call(peer, call).await,
            Packet::Response(response) => self.process_response(response),
        }
    }

    async fn process_call(&self, peer: Option<PeerInfo>, call: CallFrame) {
        let CallFrame { call_id, target, method, args } = call;

        let outcome = match self.registry.lookup(&target) {
            Some(registered) => {
                let ctx = CallContext::new(peer.clone(), self.this.clone());
                invoker::invoke(&registered, &method, args, ctx).await
            }
            None if target.trim().is_empty() => {
                Err(Error::InvalidCall("Method call sent with no target.".into()))
            }
            None => Err(Error::InvalidCall(format!("Failed to find target {}", target))),
        };

        let (result, failure) = match outcome {
            Ok(result) => (result, None),
            Err(e) => (None, Some(e)),
        };

        if let Some(call_id) = call_id {
            let response = match &failure {
                Some(_) if self.config.swallow_exceptions => ResponseFrame::ok(call_id, None),
                Some(e) => ResponseFrame::err(call_id, e.clone().into_remote(self.config.generic_error_messages)),
                None => ResponseFrame::ok(call_id, result.map(Bytes::from)),
            };

            let dest = peer.as_ref().map(|p| p.peer_id);
            if let Err(e) = self.route(dest, DeliveryMode::ReliableOrdered, Packet::Response(response)) {
                tracing::error!(call_id, ?dest, "failed to send method response: {}", e);
            }
        }

        if let Some(e) = failure {
            tracing::error!(target_name = %target, %method, ?peer, "Failure executing method call request: {}", e);
        }
    }

    fn process_response(&self, response: ResponseFrame) {
        let ResponseFrame { call_id, result, error } = response;
        let outcome = match error {
            Some(remote) => Err(Error::from(remote)),
            None => Ok(result),
        };

        if !self.pending.resolve(call_id, outcome) {
            tracing::warn!(call_id, "Received unsolicited method response. Was the method cancelled?");
        }
    }

    // ---- lifecycle ----

    pub(crate) fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(Error::Disposed);
        }

        match &self.link {
            Link::Server(transport) => transport.dispose(),
            Link::Client(transport) => transport.dispose(),
            Link::Detached => {}
        }

        let local = self.local.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(local) = local.and_then(|w| w.upgrade()) {
            *local.local.write().unwrap_or_else(PoisonError::into_inner) = None;
        }

        self.pending.fail_all(|| Error::Disposed);
        tracing::info!(role = ?self.role, "hub disposed");
        Ok(())
    }
}

fn check_names(target: &str, method: &str) -> Result<()> {
    if target.trim().is_empty() {
        return Err(Error::InvalidCall("target name must not be empty".into()));
    }
    if method.trim().is_empty() {
        return Err(Error::InvalidCall("method name must not be empty".into()));
    }
    Ok(())
}

fn decode_result<S: Serializer, R: DeserializeOwned>(raw: Option<Bytes>) -> Result<R> {
    let bytes: &[u8] = raw.as_deref().unwrap_or_default();
    S::deserialize(bytes).map_err(|e| {
        Error::InvalidCall(format!(
            "Return type mismatch. Cannot convert result to {}: {}",
            std::any::type_name::<R>(),
            e
        ))
    })
}

fn dispatch_local<S: Serializer>(local: Arc<HubCore<S>>, packet: Packet) {
    let peer = PeerInfo::local();
    spawn_detached(async move { local.receive_packet(Some(peer), packet).await });
}

/// Runs a future on the current tokio runtime, or on this thread through
/// `run_inline` when there is none.
pub(crate) fn spawn_detached<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(_) => run_inline(fut.boxed()),
    }
}

thread_local! {
    /// Jobs handed to `run_inline` while an outer call on this thread is still running.
    static INLINE_JOBS: RefCell<Option<VecDeque<BoxFuture<'static, ()>>>> = const { RefCell::new(None) };
}

/// Clears this thread's inline queue, also when a job panics.
struct InlineScope;

impl Drop for InlineScope {
    fn drop(&mut self) {
        INLINE_JOBS.with(|jobs| jobs.borrow_mut().take());
    }
}

/// Runs `job` to completion on the calling thread.
///
/// Executors do not nest. A job started while another `run_inline` is active on
/// this thread (a local reply to a local call, say) is queued and run by the
/// outermost call once the current job finishes. A caller already inside some
/// other executor gets a helper thread instead.
pub(crate) fn run_inline(job: BoxFuture<'static, ()>) {
    let job = INLINE_JOBS.with(|jobs| {
        let mut jobs = jobs.borrow_mut();
        match jobs.as_mut() {
            Some(queue) => {
                queue.push_back(job);
                None
            }
            None => Some(job),
        }
    });
    let Some(job) = job else {
        return;
    };

    match futures::executor::enter() {
        Ok(enter) => drop(enter),
        Err(_) => {
            tracing::trace!("already inside an executor; running detached job on a helper thread");
            std::thread::spawn(move || run_inline(job));
            return;
        }
    }

    INLINE_JOBS.with(|jobs| *jobs.borrow_mut() = Some(VecDeque::new()));
    let _scope = InlineScope;

    futures::executor::block_on(job);
    while let Some(next) = INLINE_JOBS.with(|jobs| jobs.borrow_mut().as_mut().and_then(VecDeque::pop_front)) {
        futures::executor::block_on(next);
    }
}

#[async_trait::async_trait]
impl<S: Serializer> ServerDelegate for HubCore<S> {
    fn on_peer_connected(&self, peer: &PeerInfo) {
        tracing::info!(%peer, "peer connected");
        self.emit(HubEvent::PeerConnected(peer.clone()));
    }

    fn on_peer_disconnected(&self, peer: &PeerInfo) {
        tracing::info!(%peer, "peer disconnected");
        self.emit(HubEvent::PeerDisconnected(peer.clone()));
    }

    async fn on_data_received(&self, peer: PeerInfo, data: Vec<u8>) {
        self.receive_bytes(Some(peer), data).await
    }
}

#[async_trait::async_trait]
impl<S: Serializer> ClientDelegate for HubCore<S> {
    fn on_connected(&self) {
        tracing::info!("connected to server");
        self.emit(HubEvent::Connected);
    }

    fn on_disconnected(&self) {
        tracing::info!("disconnected from server");
        self.emit(HubEvent::Disconnected);
    }

    async fn on_data_received(&self, data: Vec<u8>) {
        self.receive_bytes(None, data).await
    }
}
