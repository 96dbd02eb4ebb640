//! In-process transport pair.
//!
//! A `MemoryServer` accepts any number of `MemoryClient`s created against it.
//! Buffers are copied, never shared, so the hubs on either side behave as if a
//! network sat between them. Used by the test suite and for embedding.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::Weak;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use futures::FutureExt;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::ClientDelegate;
use super::ClientOptions;
use super::ClientTransport;
use super::ConnectionState;
use super::DeliveryMode;
use super::PeerInfo;
use super::Result;
use super::ServerDelegate;
use super::ServerTransport;
use super::TransportError;
use crate::config::RequestHandling;
use crate::hub::run_inline;

type Job = BoxFuture<'static, ()>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs delivery jobs according to a `RequestHandling` strategy.
enum Dispatcher {
    /// Queued until `process_requests`.
    Manual(Mutex<VecDeque<Job>>),
    /// One task per delivery on the ambient runtime.
    Pool(Handle),
    /// A single worker task. Deliveries start in arrival order; a suspended
    /// one does not hold up the rest.
    Serial(mpsc::UnboundedSender<Job>),
}

impl Dispatcher {
    fn new(strategy: RequestHandling) -> Result<Self> {
        let runtime = || {
            Handle::try_current()
                .map_err(|_| TransportError::Io(format!("{:?} request handling needs a tokio runtime", strategy)))
        };

        match strategy {
            RequestHandling::Manual => Ok(Dispatcher::Manual(Mutex::new(VecDeque::new()))),
            RequestHandling::MultiThreaded => Ok(Dispatcher::Pool(runtime()?)),
            RequestHandling::SingleThreaded => {
                let handle = runtime()?;
                let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
                handle.spawn(async move {
                    // jobs start in arrival order but interleave once suspended
                    let mut in_flight = FuturesUnordered::new();
                    loop {
                        tokio::select! {
                            next = rx.recv() => match next {
                                Some(job) => in_flight.push(job),
                                None => break,
                            },
                            Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
                        }
                    }
                    while in_flight.next().await.is_some() {}
                    tracing::trace!("memory transport worker stopped");
                });
                Ok(Dispatcher::Serial(tx))
            }
        }
    }

    fn submit(&self, job: Job) {
        match self {
            Dispatcher::Manual(queue) => lock(queue).push_back(job),
            Dispatcher::Pool(handle) => {
                handle.spawn(job);
            }
            Dispatcher::Serial(tx) => {
                if tx.send(job).is_err() {
                    tracing::warn!("memory transport worker is gone; delivery dropped");
                }
            }
        }
    }

    /// Drains the manual queue on the calling thread. Other strategies have nothing queued.
    fn drain(&self) -> usize {
        let Dispatcher::Manual(queue) = self else {
            return 0;
        };

        let mut ran = 0;
        loop {
            // release the lock before running, jobs may enqueue more
            let next = lock(queue).pop_front();
            match next {
                Some(job) => {
                    run_inline(job);
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

// ---- server ----

struct ServerInner {
    delegate: RwLock<Option<Weak<dyn ServerDelegate>>>,
    dispatcher: Mutex<Option<Arc<Dispatcher>>>,
    listening: Mutex<Option<(u16, String)>>,
    peers: DashMap<i32, Arc<ClientInner>>,
    next_peer: AtomicI32,
    sent: AtomicUsize,
}

impl ServerInner {
    fn delegate(&self) -> Option<Arc<dyn ServerDelegate>> {
        self.delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        lock(&self.dispatcher).clone()
    }

    fn accept(&self, port: u16, key: &str, client: Arc<ClientInner>) -> Result<i32> {
        match &*lock(&self.listening) {
            None => return Err(TransportError::Rejected("server is not listening".into())),
            Some((p, _)) if *p != port => {
                return Err(TransportError::Rejected(format!("nothing listening on port {}", port)));
            }
            Some((_, k)) if k != key => return Err(TransportError::Rejected("connection key mismatch".into())),
            Some(_) => {}
        }

        let peer_id = self.next_peer.fetch_add(1, Ordering::SeqCst);
        self.peers.insert(peer_id, client);
        if let Some(delegate) = self.delegate() {
            delegate.on_peer_connected(&PeerInfo::new(peer_id));
        }
        Ok(peer_id)
    }

    fn drop_peer(&self, peer_id: i32) {
        if self.peers.remove(&peer_id).is_some() {
            if let Some(delegate) = self.delegate() {
                delegate.on_peer_disconnected(&PeerInfo::new(peer_id));
            }
        }
    }

    /// Hands bytes from `peer_id` to the server's delegate.
    fn deliver(&self, peer_id: i32, data: Vec<u8>) -> Result<()> {
        let dispatcher = self.dispatcher().ok_or(TransportError::Uninitialised)?;
        let Some(delegate) = self.delegate() else {
            tracing::debug!(peer_id, "server hub is gone; dropping delivery");
            return Ok(());
        };

        let peer = PeerInfo::new(peer_id);
        dispatcher.submit(async move { delegate.on_data_received(peer, data).await }.boxed());
        Ok(())
    }
}

/// Accepting side of the in-memory transport. Clones share the same server.
#[derive(Clone)]
pub struct MemoryServer {
    inner: Arc<ServerInner>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                delegate: RwLock::new(None),
                dispatcher: Mutex::new(None),
                listening: Mutex::new(None),
                peers: DashMap::new(),
                next_peer: AtomicI32::new(1),
                sent: AtomicUsize::new(0),
            }),
        }
    }

    /// A new client that can connect to this server.
    pub fn client(&self) -> MemoryClient {
        MemoryClient::new(self)
    }

    pub fn peer_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.inner.peers.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of buffers handed to peers so far, one per recipient.
    pub fn frames_sent(&self) -> usize {
        self.inner.sent.load(Ordering::SeqCst)
    }
}

impl ServerTransport for MemoryServer {
    fn init(&self, delegate: Weak<dyn ServerDelegate>, strategy: RequestHandling) -> Result<()> {
        let dispatcher = Dispatcher::new(strategy)?;
        *self.inner.delegate.write().unwrap_or_else(PoisonError::into_inner) = Some(delegate);
        *lock(&self.inner.dispatcher) = Some(Arc::new(dispatcher));
        tracing::debug!(?strategy, "memory server initialised");
        Ok(())
    }

    fn listen(&self, port: u16, key: &str) -> Result<()> {
        if self.inner.dispatcher().is_none() {
            return Err(TransportError::Uninitialised);
        }
        *lock(&self.inner.listening) = Some((port, key.to_owned()));
        tracing::info!(port, "memory server listening");
        Ok(())
    }

    fn listen_on(&self, _ipv4: &str, _ipv6: &str, port: u16, key: &str) -> Result<()> {
        self.listen(port, key)
    }

    fn send(&self, peer_id: Option<i32>, _mode: DeliveryMode, data: &[u8]) -> Result<()> {
        let recipients: Vec<Arc<ClientInner>> = match peer_id {
            Some(id) => {
                let peer = self.inner.peers.get(&id).map(|e| e.value().clone());
                vec![peer.ok_or(TransportError::UnknownPeer(id))?]
            }
            None => self.inner.peers.iter().map(|e| e.value().clone()).collect(),
        };

        let mut first_error = None;
        for client in recipients {
            match client.deliver(data.to_vec()) {
                Ok(()) => {
                    self.inner.sent.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    tracing::warn!(peer_id = ?*lock(&client.peer_id), "memory server failed to deliver: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn process_requests(&self) {
        if let Some(dispatcher) = self.inner.dispatcher() {
            let ran = dispatcher.drain();
            tracing::trace!(ran, "memory server processed requests");
        }
    }

    fn dispose(&self) {
        *lock(&self.inner.listening) = None;
        let ids: Vec<i32> = self.inner.peers.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, client)) = self.inner.peers.remove(&id) {
                client.server_closed();
            }
        }
        *lock(&self.inner.dispatcher) = None;
        tracing::debug!("memory server disposed");
    }
}

// ---- client ----

struct ClientInner {
    server: Weak<ServerInner>,
    delegate: RwLock<Option<Weak<dyn ClientDelegate>>>,
    dispatcher: Mutex<Option<Arc<Dispatcher>>>,
    state: Mutex<ConnectionState>,
    peer_id: Mutex<Option<i32>>,
}

impl ClientInner {
    fn delegate(&self) -> Option<Arc<dyn ClientDelegate>> {
        self.delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Hands bytes from the server to the client's delegate.
    fn deliver(&self, data: Vec<u8>) -> Result<()> {
        let dispatcher = lock(&self.dispatcher).clone().ok_or(TransportError::Uninitialised)?;
        let Some(delegate) = self.delegate() else {
            tracing::debug!("client hub is gone; dropping delivery");
            return Ok(());
        };

        dispatcher.submit(async move { delegate.on_data_received(data).await }.boxed());
        Ok(())
    }

    fn server_closed(&self) {
        lock(&self.peer_id).take();
        *lock(&self.state) = ConnectionState::Disconnected;
        if let Some(delegate) = self.delegate() {
            delegate.on_disconnected();
        }
    }
}

/// Connecting side of the in-memory transport.
#[derive(Clone)]
pub struct MemoryClient {
    inner: Arc<ClientInner>,
}

impl MemoryClient {
    pub fn new(server: &MemoryServer) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                server: Arc::downgrade(&server.inner),
                delegate: RwLock::new(None),
                dispatcher: Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                peer_id: Mutex::new(None),
            }),
        }
    }

    /// The id the server assigned on connect.
    pub fn peer_id(&self) -> Option<i32> {
        *lock(&self.inner.peer_id)
    }
}

#[async_trait::async_trait]
impl ClientTransport for MemoryClient {
    fn init(&self, delegate: Weak<dyn ClientDelegate>, options: ClientOptions) -> Result<()> {
        let dispatcher = Dispatcher::new(options.strategy)?;
        *self.inner.delegate.write().unwrap_or_else(PoisonError::into_inner) = Some(delegate);
        *lock(&self.inner.dispatcher) = Some(Arc::new(dispatcher));
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    async fn connect(&self, address: &str, port: u16, key: &str) -> Result<()> {
        if lock(&self.inner.dispatcher).is_none() {
            return Err(TransportError::Uninitialised);
        }
        if self.connection_state() != ConnectionState::Disconnected {
            return Err(TransportError::Io("already connected".into()));
        }

        let server = self
            .inner
            .server
            .upgrade()
            .ok_or_else(|| TransportError::ConnectionLost("server was dropped".into()))?;

        *lock(&self.inner.state) = ConnectionState::Connecting;
        tracing::debug!(%address, port, "memory client connecting");

        let peer_id = match server.accept(port, key, self.inner.clone()) {
            Ok(id) => id,
            Err(e) => {
                *lock(&self.inner.state) = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        *lock(&self.inner.peer_id) = Some(peer_id);
        *lock(&self.inner.state) = ConnectionState::Connected;
        if let Some(delegate) = self.inner.delegate() {
            delegate.on_connected();
        }
        Ok(())
    }

    fn send(&self, _mode: DeliveryMode, data: &[u8]) -> Result<()> {
        let peer_id = (*lock(&self.inner.peer_id)).ok_or(TransportError::NotConnected)?;
        let server = self
            .inner
            .server
            .upgrade()
            .ok_or_else(|| TransportError::ConnectionLost("server was dropped".into()))?;
        server.deliver(peer_id, data.to_vec())
    }

    fn disconnect(&self) -> Result<()> {
        let peer_id = lock(&self.inner.peer_id).take().ok_or(TransportError::NotConnected)?;
        if let Some(server) = self.inner.server.upgrade() {
            server.drop_peer(peer_id);
        }
        *lock(&self.inner.state) = ConnectionState::Disconnected;
        if let Some(delegate) = self.inner.delegate() {
            delegate.on_disconnected();
        }
        Ok(())
    }

    fn process_requests(&self) {
        let dispatcher = lock(&self.inner.dispatcher).clone();
        if let Some(dispatcher) = dispatcher {
            dispatcher.drain();
        }
    }

    fn dispose(&self) {
        if self.connection_state() == ConnectionState::Connected {
            // already disconnected is fine here
            let _ = self.disconnect();
        }
        *lock(&self.inner.dispatcher) = None;
    }
}
