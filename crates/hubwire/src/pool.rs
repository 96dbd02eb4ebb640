//! Reusable encode buffers, one free list per frame kind.
//!
//! Buffers are cleared before they go back on the list; a rented buffer is always
//! empty. Pooling never affects what is written, only how often we allocate.

use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

/// Most buffers kept per kind; extra returns are dropped.
pub const MAX_POOLED: usize = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Call,
    Response,
}

#[derive(Debug, Default)]
struct FreeLists {
    call: Mutex<Vec<Vec<u8>>>,
    response: Mutex<Vec<Vec<u8>>>,
}

impl FreeLists {
    fn list(&self, kind: FrameKind) -> &Mutex<Vec<Vec<u8>>> {
        match kind {
            FrameKind::Call => &self.call,
            FrameKind::Response => &self.response,
        }
    }
}

/// Cheap to clone; clones share the same free lists.
#[derive(Debug, Clone, Default)]
pub struct FramePool {
    lists: Arc<FreeLists>,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes an empty buffer for a frame of the given kind.
    pub fn rent(&self, kind: FrameKind) -> PooledBuf {
        let buf = self
            .lists
            .list(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();

        PooledBuf { buf, kind, pool: self.clone() }
    }

    /// Number of idle buffers of the given kind.
    pub fn idle(&self, kind: FrameKind) -> usize {
        self.lists.list(kind).lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn recycle(&self, kind: FrameKind, mut buf: Vec<u8>) {
        buf.clear();
        let mut list = self.lists.list(kind).lock().unwrap_or_else(PoisonError::into_inner);
        if list.len() < MAX_POOLED {
            list.push(buf);
        }
    }
}

/// A rented buffer; goes back to its pool on drop.
#[derive(Debug)]
pub struct PooledBuf {
    buf: Vec<u8>,
    kind: FrameKind,
    pool: FramePool,
}

impl PooledBuf {
    pub fn kind(&self) -> FrameKind {
        self.kind
    }
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.recycle(self.kind, buf);
    }
}
