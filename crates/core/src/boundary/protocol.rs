//! Wire encoding for the two monitor request kinds.
//!
//! The channel to the privileged monitor is identified by a
//! file-descriptor-like handle; each request is a fixed 12-byte
//! little-endian frame: a 4-byte opcode followed by an 8-byte payload.
//! `LIB_ENTER` carries the return address of the call into the wrapped
//! function; `LIB_EXIT` carries no payload, and the monitor's reply is the
//! 8-byte resume address, written back into the caller's slot. Transport
//! and the monitor's policy are external concerns.

use thiserror::Error;

use crate::model::Addr;

pub const OP_LIB_ENTER: u32 = 0x10;
pub const OP_LIB_EXIT: u32 = 0x11;

/// Frame size of every request: opcode + payload.
pub const FRAME_LEN: usize = 12;

/// File-descriptor-like identity of an open monitoring channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorHandle(pub i32);

/// Decoded monitor request, for channel implementations and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorRequest {
    Enter { return_address: Addr },
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame too short: {0} bytes, expected {FRAME_LEN}")]
    ShortFrame(usize),
    #[error("unknown opcode {0:#x}")]
    BadOpcode(u32),
}

pub fn encode_enter(return_address: Addr) -> [u8; FRAME_LEN] {
    encode(OP_LIB_ENTER, return_address)
}

pub fn encode_exit() -> [u8; FRAME_LEN] {
    encode(OP_LIB_EXIT, 0)
}

fn encode(opcode: u32, payload: u64) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&opcode.to_le_bytes());
    frame[4..].copy_from_slice(&payload.to_le_bytes());
    frame
}

pub fn decode(frame: &[u8]) -> Result<MonitorRequest, ProtocolError> {
    if frame.len() < FRAME_LEN {
        return Err(ProtocolError::ShortFrame(frame.len()));
    }
    let mut opcode = [0u8; 4];
    opcode.copy_from_slice(&frame[..4]);
    let mut payload = [0u8; 8];
    payload.copy_from_slice(&frame[4..FRAME_LEN]);
    match u32::from_le_bytes(opcode) {
        OP_LIB_ENTER => Ok(MonitorRequest::Enter { return_address: u64::from_le_bytes(payload) }),
        OP_LIB_EXIT => Ok(MonitorRequest::Exit),
        other => Err(ProtocolError::BadOpcode(other)),
    }
}

/// Decode the monitor's reply to a `LIB_EXIT` request: the resume address.
pub fn decode_resume(reply: &[u8]) -> Result<Addr, ProtocolError> {
    if reply.len() < 8 {
        return Err(ProtocolError::ShortFrame(reply.len()));
    }
    let mut payload = [0u8; 8];
    payload.copy_from_slice(&reply[..8]);
    Ok(u64::from_le_bytes(payload))
}
