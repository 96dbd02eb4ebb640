//! # Optimizer
//!
//! Maps `(target, method)` pairs to small integer ids so that call frames can
//! carry two bytes instead of two names.
//!
//! ## Invariants
//! - **Determinism**: ids depend only on the set of descriptors. Targets are sorted
//!   by type name, methods by name, and ids are handed out from 1 in that order.
//!   Two peers built from the same descriptors agree on every id.
//! - **Snapshots**: readers clone an `Arc` of the current table. A rebuild swaps
//!   the whole table, so a reader never sees a half-built one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::RwLock;

use crate::error::Error;
use crate::error::Result;
use crate::MAX_OPTIMIZED_ID;

/// The remotely invocable surface of one service type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub type_name: String,
    pub methods: Vec<String>,
}

impl ServiceDescriptor {
    pub fn new<I, M>(type_name: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        Self {
            type_name: type_name.into(),
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }
}

/// An immutable, fully built id table.
#[derive(Debug, Default)]
pub struct OptimizationTable {
    /// `entries[id - 1]` is the pair for `id`.
    entries: Vec<(String, String)>,
    ids: HashMap<String, HashMap<String, u16>>,
}

impl OptimizationTable {
    /// Builds a table from the given descriptors.
    pub fn from_descriptors<I>(descriptors: I) -> Result<Self>
    where
        I: IntoIterator<Item = ServiceDescriptor>,
    {
        let mut descriptors: Vec<ServiceDescriptor> = descriptors.into_iter().collect();
        descriptors.sort_by(|a, b| a.type_name.cmp(&b.type_name));

        let mut table = OptimizationTable::default();
        let mut next: u16 = 1;

        for mut desc in descriptors {
            if desc.methods.is_empty() {
                continue;
            }
            desc.methods.sort();

            tracing::info!(target_name = %desc.type_name, "optimizer: added target");

            for method in desc.methods {
                if next == MAX_OPTIMIZED_ID {
                    return Err(Error::TableFull);
                }

                let by_method = table.ids.entry(desc.type_name.clone()).or_default();
                if by_method.contains_key(&method) {
                    return Err(Error::DuplicateMethod {
                        target: desc.type_name.clone(),
                        method,
                    });
                }
                by_method.insert(method.clone(), next);

                tracing::debug!(target_name = %desc.type_name, %method, id = next, "optimizer: added method");
                table.entries.push((desc.type_name.clone(), method));
                next += 1;
            }
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the id for a pair.
    pub fn id_for(&self, target: &str, method: &str) -> Result<u16> {
        self.ids
            .get(target)
            .and_then(|methods| methods.get(method))
            .copied()
            .ok_or_else(|| Error::NotOptimized {
                target: target.to_owned(),
                method: method.to_owned(),
            })
    }

    /// Returns the pair for an id.
    pub fn lookup(&self, id: u16) -> Result<(&str, &str)> {
        let index = usize::from(id).checked_sub(1);
        index
            .and_then(|i| self.entries.get(i))
            .map(|(t, m)| (t.as_str(), m.as_str()))
            .ok_or_else(|| Error::InvalidCall(format!("Cannot find method by id {}.", id)))
    }

    /// Stable 64-bit FNV-1a digest of the entries in id order.
    ///
    /// Peers can compare fingerprints out of band before enabling optimized mode.
    pub fn fingerprint(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = OFFSET;
        for (target, method) in &self.entries {
            for byte in target.bytes().chain([0]).chain(method.bytes()).chain([0]) {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(PRIME);
            }
        }
        hash
    }
}

/// A rebuildable holder for the current optimization table.
#[derive(Debug, Default)]
pub struct Optimizer {
    table: RwLock<Option<Arc<OptimizationTable>>>,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide optimizer shared by hubs that are not given their own.
    pub fn global() -> Arc<Optimizer> {
        static GLOBAL: OnceLock<Arc<Optimizer>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Optimizer::new())).clone()
    }

    /// Builds (or rebuilds) the table from the given descriptors.
    ///
    /// On failure the previous table, if any, stays in place.
    pub fn build<I>(&self, descriptors: I) -> Result<Arc<OptimizationTable>>
    where
        I: IntoIterator<Item = ServiceDescriptor>,
    {
        let table = Arc::new(OptimizationTable::from_descriptors(descriptors)?);
        let mut slot = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let rebuilt = slot.is_some();
        *slot = Some(table.clone());

        tracing::info!(methods = table.len(), rebuilt, "optimizer: table built");
        Ok(table)
    }

    /// Drops the current table; frames go back to carrying names.
    pub fn clear(&self) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_built(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Returns the current table, if one has been built.
    pub fn snapshot(&self) -> Option<Arc<OptimizationTable>> {
        self.table.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn id_for(&self, target: &str, method: &str) -> Result<u16> {
        match self.snapshot() {
            Some(table) => table.id_for(target, method),
            None => Err(Error::NotOptimized {
                target: target.to_owned(),
                method: method.to_owned(),
            }),
        }
    }

    pub fn lookup(&self, id: u16) -> Result<(String, String)> {
        let table = self.snapshot().ok_or_else(not_enabled)?;
        let (target, method) = table.lookup(id)?;
        Ok((target.to_owned(), method.to_owned()))
    }
}

pub(crate) fn not_enabled() -> Error {
    Error::InvalidCall("The target peer does not have optimization enabled.".into())
}
