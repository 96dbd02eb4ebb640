//! # Hubwire
//!
//! The binary packet format spoken between hubs.
//!
//! ## Format
//!
//! - **Call**: `[Flags: 1b][CallId: 4b?][Target][Args*]`
//! - **Response**: `[Flags: 1b][CallId: 4b][Result?][Message?]`
//! - **Target**: either `[Len: 1b][Name][Len: 1b][Method]` or `[Id: 2b]` when optimized.
//! - **Blobs**: `[Len: 4b][Data: Len]`, repeated until the buffer ends.
//!
//! All integers are Little-Endian.

pub mod cursor;
pub mod error;
pub mod flag;
pub mod frame;
pub mod optimizer;
pub mod pool;

#[cfg(test)]
mod tests;

pub use error::Error;
pub use error::Result;
pub use flag::Flags;
pub use frame::CallFrame;
pub use frame::Codec;
pub use frame::ErrorKind;
pub use frame::Packet;
pub use frame::RemoteError;
pub use frame::ResponseFrame;
pub use optimizer::OptimizationTable;
pub use optimizer::Optimizer;
pub use optimizer::ServiceDescriptor;
pub use pool::FrameKind;
pub use pool::FramePool;

/// Longest target or method name the non-optimized encoding can carry.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// First id the optimizer refuses to hand out.
pub const MAX_OPTIMIZED_ID: u16 = u16::MAX - 1;
