//! Runs one method of a registered target and normalizes the outcome.

use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures::FutureExt;

use crate::context::CallContext;
use crate::error::Error;
use crate::error::Result;
use crate::registry::Target;
use crate::serializer::Serializer;

/// Invokes `method` on `target` with the raw argument buffers.
///
/// Unknown methods and arity mismatches are `InvalidCall`. Errors raised by the
/// method keep their kind when they are `InvalidCall` or `CallFailed`; anything
/// else, panics included, becomes `CallFailed`.
pub(crate) async fn invoke<S: Serializer>(
    target: &Target<S>,
    method: &str,
    args: Vec<Bytes>,
    ctx: CallContext<S>,
) -> Result<Option<Vec<u8>>> {
    let Some(bound) = target.method(method) else {
        return Err(Error::InvalidCall(format!("Method {} was not found.", method)));
    };

    if bound.arity != args.len() {
        return Err(Error::InvalidCall(format!(
            "Parameter count mismatch. Peer required {} but {} were supplied.",
            bound.arity,
            args.len()
        )));
    }

    // built inside the future so a panic before the first await is caught too
    let fut = async move { (bound.call)(ctx, args).await };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e @ (Error::InvalidCall(_) | Error::CallFailed(_)))) => Err(e),
        Ok(Err(other)) => Err(Error::CallFailed(format!("Unknown exception occurred. {}", other))),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "method panicked".to_owned());
            tracing::error!(target_name = %target.name, %method, "method panicked: {}", msg);
            Err(Error::CallFailed(format!("Unknown exception occurred. {}", msg)))
        }
    }
}
