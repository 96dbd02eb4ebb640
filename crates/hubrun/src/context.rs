//! Call-scoped context handed to every method handler.

use std::sync::Weak;

use serde::de::DeserializeOwned;

use crate::args::IntoArgs;
use crate::error::Error;
use crate::error::Result;
use crate::hub::HubCore;
use crate::serializer::Serializer;
use crate::transport::DeliveryMode;
use crate::transport::PeerInfo;

/// Who made the current call, and a way back to them.
pub struct CallContext<S: Serializer> {
    peer: Option<PeerInfo>,
    hub: Weak<HubCore<S>>,
}

impl<S: Serializer> Clone for CallContext<S> {
    fn clone(&self) -> Self {
        Self { peer: self.peer.clone(), hub: self.hub.clone() }
    }
}

impl<S: Serializer> CallContext<S> {
    pub(crate) fn new(peer: Option<PeerInfo>, hub: Weak<HubCore<S>>) -> Self {
        Self { peer, hub }
    }

    /// A context with no hub behind it, for calling handlers directly in tests.
    pub fn detached(peer: Option<PeerInfo>) -> Self {
        Self { peer, hub: Weak::new() }
    }

    /// The calling peer. `None` when a client hub receives a call from its server.
    pub fn peer(&self) -> Option<&PeerInfo> {
        self.peer.as_ref()
    }

    fn destination(&self) -> Option<i32> {
        self.peer.as_ref().map(|p| p.peer_id)
    }

    fn hub(&self) -> Result<std::sync::Arc<HubCore<S>>> {
        self.hub.upgrade().ok_or(Error::Disposed)
    }

    /// Calls a method on the peer that made the current call and waits for the result.
    pub async fn invoke_peer<R, A>(&self, target: &str, method: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        let hub = self.hub()?;
        hub.invoke(self.destination(), target, method, &args, None).await
    }

    /// Fire-and-forget call to the peer that made the current call.
    pub fn invoke_forget_peer<A: IntoArgs>(&self, mode: DeliveryMode, target: &str, method: &str, args: A) -> Result<()> {
        let hub = self.hub()?;
        hub.invoke_forget(mode, self.destination(), target, method, &args)
    }
}
