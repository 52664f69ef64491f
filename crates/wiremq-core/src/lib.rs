//! wiremq-core - MQTT 3.1.1 wire-format codec.
//!
//! This crate provides the byte-exact packet codec shared by everything that
//! speaks MQTT 3.1.1: the packet model, the wire-level primitives, the
//! variable-length remaining-length field, and a framed encoder/decoder pair
//! over async byte streams.
//!
//! The crate knows nothing about sessions or sockets; the session engine in
//! `wiremq-client` drives a [`FrameEncoder`]/[`FrameDecoder`] pair over a
//! stream the caller opened.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod packet;
pub mod varint;
pub mod wire;

pub use codec::{FrameDecoder, FrameEncoder};
pub use error::{Error, ProtocolError, Result};
pub use packet::*;
