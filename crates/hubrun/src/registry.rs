//! # Target Registry
//!
//! Maps registration names to bound service instances.
//!
//! ## Invariants
//! - **Unique Names**: a name is registered at most once per hub.
//! - **No Overloads**: method names within a target are unique.
//! - **Snapshot Dispatch**: lookups clone an `Arc<Target>` under the read lock and
//!   release it before the method runs, so a slow method never blocks registration.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use bytes::Bytes;
use futures::future::BoxFuture;
use hubwire::ServiceDescriptor;

use crate::context::CallContext;
use crate::error::Error;
use crate::error::Result;
use crate::serializer::Serializer;
use crate::service::Reply;
use crate::service::Service;

type BoundFn<S> = Arc<dyn Fn(CallContext<S>, Vec<Bytes>) -> BoxFuture<'static, Reply> + Send + Sync>;

pub(crate) struct BoundMethod<S: Serializer> {
    pub(crate) arity: usize,
    pub(crate) call: BoundFn<S>,
}

/// A registered instance and the methods peers may call on it.
pub(crate) struct Target<S: Serializer> {
    pub(crate) name: String,
    pub(crate) type_name: &'static str,
    methods: HashMap<String, BoundMethod<S>>,
}

impl<S: Serializer> Target<S> {
    pub(crate) fn method(&self, name: &str) -> Option<&BoundMethod<S>> {
        self.methods.get(name)
    }

    pub(crate) fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

pub(crate) struct Registry<S: Serializer> {
    targets: RwLock<HashMap<String, Arc<Target<S>>>>,
}

impl<S: Serializer> Registry<S> {
    pub(crate) fn new() -> Self {
        Self { targets: RwLock::new(HashMap::new()) }
    }

    /// Registers `instance` under `name` (or its service name).
    ///
    /// With `method_names` only the listed methods are exposed; otherwise all the
    /// service declares.
    pub(crate) fn register<T: Service>(
        &self,
        name: Option<&str>,
        instance: Arc<T>,
        method_names: Option<&[&str]>,
    ) -> Result<()> {
        let name = name.unwrap_or_else(|| T::service_name());
        if name.trim().is_empty() {
            return Err(Error::Registration("target name must not be empty".into()));
        }

        let mut declared = T::methods::<S>().defs;

        let selected = match method_names {
            None => declared,
            Some(wanted) => {
                let mut seen = HashSet::new();
                if !wanted.iter().all(|w| seen.insert(*w)) {
                    return Err(overloaded(name));
                }

                let mut picked = Vec::with_capacity(wanted.len());
                for want in wanted {
                    let pos = declared.iter().position(|d| d.name == *want).ok_or_else(|| {
                        Error::Registration(format!(
                            "Cannot find method {} in {}",
                            want,
                            T::service_name()
                        ))
                    })?;
                    picked.push(declared.swap_remove(pos));
                }
                picked
            }
        };

        let mut seen = HashSet::new();
        if !selected.iter().all(|d| seen.insert(d.name.clone())) {
            return Err(overloaded(name));
        }

        let methods = selected
            .into_iter()
            .map(|def| {
                let instance = instance.clone();
                let call = def.call;
                let bound: BoundFn<S> = Arc::new(move |ctx, args| call(instance.clone(), ctx, args));
                (def.name, BoundMethod { arity: def.arity, call: bound })
            })
            .collect();

        let target = Arc::new(Target {
            name: name.to_owned(),
            type_name: T::service_name(),
            methods,
        });

        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        if targets.contains_key(name) {
            return Err(Error::Registration(format!(
                "A target with name {} has already been registered.",
                name
            )));
        }

        tracing::debug!(
            target_name = %name,
            type_name = target.type_name,
            methods = target.methods.len(),
            "registered target"
        );
        targets.insert(name.to_owned(), target);
        Ok(())
    }

    pub(crate) fn unregister(&self, name: &str) -> Result<()> {
        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        match targets.remove(name) {
            Some(_) => {
                tracing::debug!(target_name = %name, "unregistered target");
                Ok(())
            }
            None => Err(Error::Registration(format!("Target {} was never registered.", name))),
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<Target<S>>> {
        self.targets.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    /// One descriptor per registered target, keyed by registration name.
    pub(crate) fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| ServiceDescriptor::new(t.name.clone(), t.method_names()))
            .collect()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.targets.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }
}

fn overloaded(name: &str) -> Error {
    Error::Registration(format!("Overloaded methods are not supported ({}).", name))
}
