//! # Protocol Frames
//!
//! Defines the two packets exchanged between hubs: method calls and method
//! responses.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on short or malformed data.
//! - **Single Outcome**: A response carries exactly one of `NO_EXCEPTION`, `INVALID_CALL`
//!   or `CALL_FAILED`. Any other combination is a protocol violation.
//! - **Implicit Arity**: Arguments run to the end of the buffer; their count is never written.

use std::sync::Arc;

use bytes::Bytes;

use crate::cursor;
use crate::cursor::Reader;
use crate::error::Error;
use crate::error::Result;
use crate::flag::Flags;
use crate::optimizer::not_enabled;
use crate::optimizer::OptimizationTable;
use crate::optimizer::Optimizer;
use crate::pool::FrameKind;
use crate::pool::FramePool;
use crate::pool::PooledBuf;

/// A request to run `target.method(args...)` on the receiving hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    /// `None` marks a fire-and-forget call.
    pub call_id: Option<u32>,
    pub target: String,
    pub method: String,
    /// One independently serialized buffer per parameter.
    pub args: Vec<Bytes>,
}

/// Which side of the call was at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The call could not be dispatched (unknown target, method, arity or argument type).
    InvalidCall,
    /// The method ran and failed.
    CallFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn invalid_call(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::InvalidCall, message: message.into() }
    }

    pub fn call_failed(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::CallFailed, message: message.into() }
    }
}

/// The answer to a `CallFrame` that carried a call id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub call_id: u32,
    /// `None` for a void or null result.
    pub result: Option<Bytes>,
    pub error: Option<RemoteError>,
}

impl ResponseFrame {
    pub fn ok(call_id: u32, result: Option<Bytes>) -> Self {
        Self { call_id, result, error: None }
    }

    pub fn err(call_id: u32, error: RemoteError) -> Self {
        Self { call_id, result: None, error: Some(error) }
    }
}

/// Any frame that can appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Call(CallFrame),
    Response(ResponseFrame),
}

impl Packet {
    pub fn kind(&self) -> FrameKind {
        match self {
            Packet::Call(_) => FrameKind::Call,
            Packet::Response(_) => FrameKind::Response,
        }
    }

    /// Appends the encoded packet to `out`.
    ///
    /// Calls use the optimized target encoding whenever a table is supplied.
    pub fn encode(&self, table: Option<&OptimizationTable>, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Packet::Call(call) => encode_call(call, table, out),
            Packet::Response(response) => encode_response(response, out),
        }
    }

    /// Decodes a packet. Argument and result buffers are views into `data`.
    pub fn decode(data: Bytes, table: Option<&OptimizationTable>) -> Result<Packet> {
        let mut r = Reader::new(data);
        let flags = Flags::from_bits(r.read_u8()?);

        if flags.contains(Flags::METHOD_CALL) {
            decode_call(flags, &mut r, table).map(Packet::Call)
        } else if flags.contains(Flags::METHOD_RESPONSE) {
            decode_response(flags, &mut r).map(Packet::Response)
        } else {
            Err(Error::ProtocolViolation(format!("unknown frame type {:?}", flags)))
        }
    }
}

fn encode_call(call: &CallFrame, table: Option<&OptimizationTable>, out: &mut Vec<u8>) -> Result<()> {
    let mut flags = Flags::METHOD_CALL;
    if table.is_some() {
        flags |= Flags::OPTIMIZED;
    }
    if call.call_id.is_none() {
        flags |= Flags::NO_CALL_ID;
    }

    out.push(flags.bits());

    if let Some(id) = call.call_id {
        cursor::write_u32(out, id);
    }

    match table {
        Some(table) => cursor::write_u16(out, table.id_for(&call.target, &call.method)?),
        None => {
            cursor::write_name(out, &call.target)?;
            cursor::write_name(out, &call.method)?;
        }
    }

    for arg in &call.args {
        cursor::write_blob(out, arg)?;
    }
    Ok(())
}

fn decode_call(flags: Flags, r: &mut Reader, table: Option<&OptimizationTable>) -> Result<CallFrame> {
    let call_id = match flags.contains(Flags::NO_CALL_ID) {
        true => None,
        false => Some(r.read_u32()?),
    };

    let (target, method) = if flags.contains(Flags::OPTIMIZED) {
        let table = table.ok_or_else(not_enabled)?;
        let (target, method) = table.lookup(r.read_u16()?)?;
        (target.to_owned(), method.to_owned())
    } else {
        (r.read_name()?, r.read_name()?)
    };

    let mut args = Vec::new();
    while !r.is_empty() {
        args.push(r.read_blob()?);
    }

    Ok(CallFrame { call_id, target, method, args })
}

fn encode_response(response: &ResponseFrame, out: &mut Vec<u8>) -> Result<()> {
    let mut flags = Flags::METHOD_RESPONSE;
    flags |= match &response.error {
        None => Flags::NO_EXCEPTION,
        Some(RemoteError { kind: ErrorKind::InvalidCall, .. }) => Flags::INVALID_CALL,
        Some(RemoteError { kind: ErrorKind::CallFailed, .. }) => Flags::CALL_FAILED,
    };
    if response.result.is_none() {
        flags |= Flags::NO_RESULT;
    }

    out.push(flags.bits());
    cursor::write_u32(out, response.call_id);

    if let Some(result) = &response.result {
        cursor::write_blob(out, result)?;
    }
    if let Some(error) = &response.error {
        cursor::write_blob(out, error.message.as_bytes())?;
    }
    Ok(())
}

fn decode_response(flags: Flags, r: &mut Reader) -> Result<ResponseFrame> {
    let kind = match flags.outcome() {
        Flags::NO_EXCEPTION => None,
        Flags::INVALID_CALL => Some(ErrorKind::InvalidCall),
        Flags::CALL_FAILED => Some(ErrorKind::CallFailed),
        other => {
            return Err(Error::ProtocolViolation(format!(
                "response must carry exactly one outcome, found {:?}",
                other
            )));
        }
    };

    let call_id = r.read_u32()?;

    let result = match flags.contains(Flags::NO_RESULT) {
        true => None,
        false => Some(r.read_blob()?),
    };

    let error = match kind {
        Some(kind) => Some(RemoteError { kind, message: r.read_text()? }),
        None => None,
    };

    if !r.is_empty() {
        return Err(Error::ProtocolViolation(format!(
            "{} trailing bytes after response",
            r.remaining()
        )));
    }

    Ok(ResponseFrame { call_id, result, error })
}

/// Encodes and decodes packets against a shared optimizer, reusing buffers.
#[derive(Debug, Clone)]
pub struct Codec {
    optimizer: Arc<Optimizer>,
    pool: FramePool,
}

impl Codec {
    pub fn new(optimizer: Arc<Optimizer>) -> Self {
        Self { optimizer, pool: FramePool::new() }
    }

    pub fn optimizer(&self) -> &Arc<Optimizer> {
        &self.optimizer
    }

    /// Encodes into a pooled buffer; the buffer returns to the pool when dropped.
    pub fn encode(&self, packet: &Packet) -> Result<PooledBuf> {
        let table = self.optimizer.snapshot();
        let mut buf = self.pool.rent(packet.kind());
        packet.encode(table.as_deref(), &mut buf)?;
        Ok(buf)
    }

    pub fn decode(&self, data: Bytes) -> Result<Packet> {
        let table = self.optimizer.snapshot();
        Packet::decode(data, table.as_deref())
    }
}
