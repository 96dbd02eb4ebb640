//! # Services
//!
//! A service is a type whose methods can be invoked remotely. It declares its
//! methods once, by name, through a `Methods` table:
//!
//! ```ignore
//! impl Service for Echo {
//!     fn methods<S: Serializer>() -> Methods<Self, S> {
//!         Methods::new()
//!             .method("Echo", |svc: Arc<Self>, _ctx, (text,): (String,)| async move {
//!                 Ok(svc.echo(text))
//!             })
//!     }
//! }
//! ```
//!
//! ## Invariants
//! - **No Overloads**: a name appears at most once in a table. Registration checks this.
//! - **Declared Arity**: the handler's parameter tuple fixes the argument count.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use hubwire::ServiceDescriptor;
use serde::Serialize;

use crate::args::FromArgs;
use crate::context::CallContext;
use crate::error::Result;
use crate::serializer::MessagePack;
use crate::serializer::Serializer;

/// The serialized outcome of a method: `None` for a null or void result.
pub(crate) type Reply = Result<Option<Vec<u8>>>;

pub(crate) type MethodFn<T, S> =
    Arc<dyn Fn(Arc<T>, CallContext<S>, Vec<Bytes>) -> BoxFuture<'static, Reply> + Send + Sync>;

pub(crate) struct MethodDef<T, S: Serializer> {
    pub(crate) name: String,
    pub(crate) arity: usize,
    pub(crate) call: MethodFn<T, S>,
}

/// The remotely invocable methods of `T`, bound to serializer `S`.
pub struct Methods<T, S: Serializer> {
    pub(crate) defs: Vec<MethodDef<T, S>>,
}

impl<T, S> Default for Methods<T, S>
where
    T: Send + Sync + 'static,
    S: Serializer,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> Methods<T, S>
where
    T: Send + Sync + 'static,
    S: Serializer,
{
    pub fn new() -> Self {
        Self { defs: Vec::new() }
    }

    /// Declares a method. `A` is the parameter tuple, `R` the result.
    pub fn method<A, R, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: FromArgs,
        R: Serialize + Send + 'static,
        F: Fn(Arc<T>, CallContext<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let call: MethodFn<T, S> = Arc::new(move |svc, ctx, buffers| {
            let args = match A::from_buffers::<S>(&buffers) {
                Ok(args) => args,
                Err(e) => return futures::future::ready(Err(e)).boxed(),
            };
            let fut = handler(svc, ctx, args);
            async move {
                let value = fut.await?;
                let bytes = S::serialize(&value)?;
                Ok((!bytes.is_empty()).then_some(bytes))
            }
            .boxed()
        });

        self.defs.push(MethodDef { name: name.into(), arity: A::COUNT, call });
        self
    }

    /// Method names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.defs.iter().map(|d| d.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// A type whose methods can be called by remote peers.
pub trait Service: Send + Sync + Sized + 'static {
    /// Default registration name and optimizer type name.
    fn service_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    fn methods<S: Serializer>() -> Methods<Self, S>;

    /// The service's surface, as fed to the optimizer.
    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new(Self::service_name(), Self::methods::<MessagePack>().names())
    }
}
