//! Codec error types.

use std::io;

use thiserror::Error;

/// A violation of the MQTT 3.1.1 wire format.
///
/// Every variant maps to a malformed packet: the bytes on the wire cannot be
/// a valid packet, so the connection they arrived on is no longer usable.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unknown packet type: {0}")]
    InvalidPacketType(u8),

    #[error("invalid QoS: {0}")]
    InvalidQos(u8),

    #[error("invalid remaining length")]
    InvalidRemainingLength,

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("invalid protocol name: {0:?}")]
    InvalidProtocolName(String),

    #[error("unsupported protocol level: {0}")]
    UnsupportedProtocolLevel(u8),

    #[error("invalid connect flags: {0:#04x}")]
    InvalidConnectFlags(u8),

    #[error("invalid connect return code: {0}")]
    InvalidReturnCode(u8),

    #[error("truncated body: need {needed} bytes, {available} available")]
    TruncatedBody { needed: usize, available: usize },

    #[error("unread bytes remaining: {0}")]
    TrailingBytes(usize),

    #[error("field of {0} bytes exceeds the 65535 byte limit")]
    FieldTooLong(usize),

    #[error("packet body of {0} bytes exceeds the maximum remaining length")]
    PacketTooLarge(usize),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),
}

/// Codec error: an I/O failure on the underlying stream or a wire-format
/// violation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, Error>;
