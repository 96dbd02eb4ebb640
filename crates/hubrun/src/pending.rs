//! # Pending Calls
//!
//! Correlates outbound calls with their responses.
//!
//! ## Invariants
//! - **Atomic Allocation**: the call-id counter and the table share one mutex, so
//!   allocating an id and inserting its entry is a single step.
//! - **Wrap-Around**: after `u32::MAX` the next id is `0`.
//! - **Exactly Once**: a call is resolved by whichever of response, timeout or
//!   cancellation removes its entry first. The others find nothing and only log.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::mpsc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::error::Result;

/// What a waiting caller receives: the raw result buffer, or why there is none.
pub(crate) type Outcome = Result<Option<Bytes>>;

enum Completion {
    Async(oneshot::Sender<Outcome>),
    Blocking(mpsc::SyncSender<Outcome>),
}

impl Completion {
    fn complete(self, outcome: Outcome) {
        // the waiter may have given up already; nothing to do then
        let _ = match self {
            Completion::Async(tx) => tx.send(outcome).map_err(|_| ()),
            Completion::Blocking(tx) => tx.try_send(outcome).map_err(|_| ()),
        };
    }
}

struct State {
    current: u32,
    calls: HashMap<u32, Completion>,
}

pub(crate) fn next_call_id(current: u32) -> u32 {
    if current == u32::MAX {
        0
    } else {
        current + 1
    }
}

pub(crate) struct PendingCalls {
    state: Mutex<State>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::starting_after(0)
    }

    /// The first id handed out will be `next_call_id(current)`.
    pub(crate) fn starting_after(current: u32) -> Self {
        Self {
            state: Mutex::new(State { current, calls: HashMap::new() }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, completion: Completion) -> u32 {
        let mut state = self.lock();
        let id = next_call_id(state.current);
        state.current = id;
        state.calls.insert(id, completion);
        id
    }

    pub(crate) fn register(&self) -> (u32, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (self.insert(Completion::Async(tx)), rx)
    }

    pub(crate) fn register_blocking(&self) -> (u32, mpsc::Receiver<Outcome>) {
        let (tx, rx) = mpsc::sync_channel(1);
        (self.insert(Completion::Blocking(tx)), rx)
    }

    /// Removes an entry without completing it. Returns `false` if it was already gone.
    pub(crate) fn remove(&self, call_id: u32) -> bool {
        self.lock().calls.remove(&call_id).is_some()
    }

    /// Completes the entry for `call_id`. Returns `false` for an unknown id.
    pub(crate) fn resolve(&self, call_id: u32, outcome: Outcome) -> bool {
        let completion = self.lock().calls.remove(&call_id);
        match completion {
            Some(completion) => {
                completion.complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Fails every outstanding call, e.g. on dispose.
    pub(crate) fn fail_all(&self, error: impl Fn() -> Error) {
        let drained: Vec<Completion> = self.lock().calls.drain().map(|(_, c)| c).collect();
        for completion in drained {
            completion.complete(Err(error()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().calls.len()
    }

    /// Waits for the response to `call_id`, racing the timeout and the token.
    pub(crate) async fn wait(
        &self,
        call_id: u32,
        mut rx: oneshot::Receiver<Outcome>,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Outcome {
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            outcome = &mut rx => return settle(outcome),
            _ = tokio::time::sleep(timeout) => {
                if self.remove(call_id) {
                    tracing::debug!(call_id, ?timeout, "call timed out");
                    return Err(Error::Timeout);
                }
            }
            _ = cancelled => {
                if self.remove(call_id) {
                    tracing::debug!(call_id, "call cancelled");
                    return Err(Error::Cancelled);
                }
            }
        }

        // a response claimed the entry first; its outcome is already on the way
        tracing::debug!(call_id, "response won the race; ignoring timeout or cancellation");
        settle(rx.await)
    }

    /// Blocking counterpart of `wait`, without cancellation.
    pub(crate) fn wait_blocking(&self, call_id: u32, rx: mpsc::Receiver<Outcome>, timeout: Duration) -> Outcome {
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if self.remove(call_id) {
                    tracing::debug!(call_id, ?timeout, "call timed out");
                    return Err(Error::Timeout);
                }
                tracing::debug!(call_id, "response won the race; ignoring timeout");
                rx.recv().unwrap_or_else(|_| Err(Error::Disposed))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Disposed),
        }
    }
}

fn settle(received: std::result::Result<Outcome, oneshot::error::RecvError>) -> Outcome {
    received.unwrap_or_else(|_| Err(Error::Disposed))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn ids_start_at_one() {
        let pending = PendingCalls::new();
        let (a, _ra) = pending.register();
        let (b, _rb) = pending.register_blocking();
        assert_eq!((a, b), (1, 2));
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn ids_wrap_to_zero() {
        assert_eq!(next_call_id(u32::MAX - 1), u32::MAX);
        assert_eq!(next_call_id(u32::MAX), 0);

        let pending = PendingCalls::starting_after(u32::MAX - 1);
        let (a, _ra) = pending.register();
        let (b, _rb) = pending.register();
        let (c, _rc) = pending.register();
        assert_eq!((a, b, c), (u32::MAX, 0, 1));
    }

    #[test]
    fn unknown_id_resolves_nothing() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve(99, Ok(None)));
    }

    #[tokio::test]
    async fn response_before_timeout() {
        let pending = PendingCalls::new();
        let (id, rx) = pending.register();
        assert!(pending.resolve(id, Ok(Some(Bytes::from_static(b"x")))));

        let outcome = pending.wait(id, rx, Duration::from_secs(5), None).await;
        assert_eq!(outcome.unwrap(), Some(Bytes::from_static(b"x")));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn timeout_removes_entry_and_late_response_is_ignored() {
        let pending = PendingCalls::new();
        let (id, rx) = pending.register();

        let outcome = pending.wait(id, rx, Duration::from_millis(20), None).await;
        assert_eq!(outcome, Err(Error::Timeout));
        assert_eq!(pending.len(), 0);
        assert!(!pending.resolve(id, Ok(None)));
    }

    #[tokio::test]
    async fn cancellation_wins_when_first() {
        let pending = PendingCalls::new();
        let (id, rx) = pending.register();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = pending.wait(id, rx, Duration::from_secs(5), Some(&token)).await;
        assert_eq!(outcome, Err(Error::Cancelled));
        assert!(!pending.resolve(id, Ok(None)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_response_and_timeout_resolve_once() {
        let pending = Arc::new(PendingCalls::new());

        for round in 0..200u64 {
            let (id, rx) = pending.register();
            let responder = {
                let pending = pending.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_micros(900 + round % 200)).await;
                    pending.resolve(id, Ok(None))
                })
            };

            let outcome = pending.wait(id, rx, Duration::from_millis(1), None).await;
            let delivered = responder.await.unwrap();

            match outcome {
                Ok(None) => assert!(delivered, "round {}: ok without delivery", round),
                Err(Error::Timeout) => assert!(!delivered, "round {}: delivered after timeout", round),
                other => panic!("round {}: unexpected outcome {:?}", round, other),
            }
        }
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn blocking_wait_times_out() {
        let pending = PendingCalls::new();
        let (id, rx) = pending.register_blocking();
        let outcome = pending.wait_blocking(id, rx, Duration::from_millis(20));
        assert_eq!(outcome, Err(Error::Timeout));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn blocking_wait_receives_from_other_thread() {
        let pending = Arc::new(PendingCalls::new());
        let (id, rx) = pending.register_blocking();

        let resolver = {
            let pending = pending.clone();
            std::thread::spawn(move || pending.resolve(id, Err(Error::CallFailed("no".into()))))
        };

        let outcome = pending.wait_blocking(id, rx, Duration::from_secs(5));
        assert!(resolver.join().unwrap());
        assert_eq!(outcome, Err(Error::CallFailed("no".into())));
    }

    #[tokio::test]
    async fn fail_all_on_dispose() {
        let pending = PendingCalls::new();
        let (a, ra) = pending.register();
        let (_b, rb) = pending.register_blocking();

        pending.fail_all(|| Error::Disposed);
        assert_eq!(pending.len(), 0);
        assert_eq!(pending.wait(a, ra, Duration::from_secs(1), None).await, Err(Error::Disposed));
        assert_eq!(rb.recv().unwrap(), Err(Error::Disposed));
    }
}
