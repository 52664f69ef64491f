//! Wire-level primitives: the atoms every packet body is built from.
//!
//! The encoder side appends onto a plain byte vector; the decoder side reads
//! from the streaming [`ReadBuffer`] and additionally tracks `remaining`, the
//! number of bytes the current packet body still owes. Every read checks
//! `remaining` first, so a bounded field can never run past the packet
//! boundary into the next packet.

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::buffer::ReadBuffer;
use crate::error::{ProtocolError, Result};

/// Fields with a u16 length prefix cannot exceed this.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Append-only encoder for a packet body.
pub struct BodyEncoder<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> BodyEncoder<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    /// One flags byte.
    pub fn bits(&mut self, c: u8) {
        self.buf.push(c);
    }

    /// Big-endian 16-bit integer.
    pub fn integer(&mut self, n: u16) {
        self.buf.extend_from_slice(&n.to_be_bytes());
    }

    /// Length-prefixed byte array.
    pub fn bytes(&mut self, b: &[u8]) -> Result<()> {
        if b.len() > MAX_FIELD_LEN {
            return Err(ProtocolError::FieldTooLong(b.len()).into());
        }
        self.integer(b.len() as u16);
        self.buf.extend_from_slice(b);
        Ok(())
    }

    /// Length-prefixed UTF-8 string. Validity is guaranteed by `&str`.
    pub fn string(&mut self, s: &str) -> Result<()> {
        self.bytes(s.as_bytes())
    }

    /// Raw payload tail, no length prefix. At most one per packet, last.
    pub fn payload(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }
}

/// Decoder for one packet body.
pub struct BodyReader<'a, R> {
    buf: &'a mut ReadBuffer<R>,
    remaining: usize,
}

impl<'a, R: AsyncRead + Unpin> BodyReader<'a, R> {
    pub fn new(buf: &'a mut ReadBuffer<R>, remaining: usize) -> Self {
        Self { buf, remaining }
    }

    /// Bytes the current packet body still owes.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn take(&mut self, n: usize) -> Result<()> {
        if self.remaining < n {
            return Err(ProtocolError::TruncatedBody {
                needed: n,
                available: self.remaining,
            }
            .into());
        }
        self.remaining -= n;
        Ok(())
    }

    /// One flags byte.
    pub async fn bits(&mut self) -> Result<u8> {
        self.take(1)?;
        Ok(self.buf.byte().await?)
    }

    /// Big-endian 16-bit integer.
    pub async fn integer(&mut self) -> Result<u16> {
        self.take(2)?;
        let b = self.buf.bytes(2).await?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Length-prefixed byte array, copied out of the reused buffer.
    pub async fn bytes(&mut self) -> Result<Vec<u8>> {
        let n = self.integer().await? as usize;
        self.take(n)?;
        Ok(self.buf.bytes(n).await?.to_vec())
    }

    /// Length-prefixed UTF-8 string.
    pub async fn string(&mut self) -> Result<String> {
        let b = self.bytes().await?;
        String::from_utf8(b).map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    /// The rest of the body as a raw payload, copied out.
    pub async fn payload(&mut self) -> Result<Bytes> {
        let n = self.remaining;
        self.take(n)?;
        Ok(Bytes::copy_from_slice(self.buf.bytes(n).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn reader(bytes: &[u8]) -> ReadBuffer<&[u8]> {
        ReadBuffer::new(bytes)
    }

    #[tokio::test]
    async fn atoms_roundtrip() {
        let mut body = Vec::new();
        let mut enc = BodyEncoder::new(&mut body);
        enc.bits(0x42);
        enc.integer(0x1234);
        enc.bytes(b"ab").unwrap();
        enc.string("topic").unwrap();
        enc.payload(b"tail");

        let len = body.len();
        let mut buf = reader(&body);
        let mut dec = BodyReader::new(&mut buf, len);
        assert_eq!(dec.bits().await.unwrap(), 0x42);
        assert_eq!(dec.integer().await.unwrap(), 0x1234);
        assert_eq!(dec.bytes().await.unwrap(), b"ab");
        assert_eq!(dec.string().await.unwrap(), "topic");
        assert_eq!(dec.payload().await.unwrap().as_ref(), b"tail");
        assert_eq!(dec.remaining(), 0);
    }

    #[tokio::test]
    async fn reads_past_the_body_are_truncation() {
        let bytes = [0x00u8, 0x05];
        let mut buf = reader(&bytes);
        // Body claims one byte; the u16 length prefix alone needs two.
        let mut dec = BodyReader::new(&mut buf, 1);
        let err = dec.integer().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::TruncatedBody {
                needed: 2,
                available: 1
            })
        ));
    }

    #[tokio::test]
    async fn length_prefix_larger_than_body_is_truncation() {
        // Prefix says 5 bytes but the body only owes 3 more.
        let bytes = [0x00u8, 0x05, b'a', b'b', b'c'];
        let mut buf = reader(&bytes);
        let mut dec = BodyReader::new(&mut buf, 5);
        assert!(matches!(
            dec.bytes().await.unwrap_err(),
            Error::Protocol(ProtocolError::TruncatedBody { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_is_rejected() {
        let bytes = [0x00u8, 0x02, 0xC3, 0x28];
        let mut buf = reader(&bytes);
        let mut dec = BodyReader::new(&mut buf, 4);
        assert!(matches!(
            dec.string().await.unwrap_err(),
            Error::Protocol(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn oversize_field_is_rejected_on_encode() {
        let big = vec![0u8; MAX_FIELD_LEN + 1];
        let mut body = Vec::new();
        let mut enc = BodyEncoder::new(&mut body);
        assert!(matches!(
            enc.bytes(&big).unwrap_err(),
            Error::Protocol(ProtocolError::FieldTooLong(_))
        ));
    }

    #[tokio::test]
    async fn decoded_strings_survive_buffer_reuse() {
        let mut body = Vec::new();
        let mut enc = BodyEncoder::new(&mut body);
        enc.string("first").unwrap();
        enc.string("second").unwrap();

        let len = body.len();
        let mut buf = reader(&body);
        let mut dec = BodyReader::new(&mut buf, len);
        let first = dec.string().await.unwrap();
        let second = dec.string().await.unwrap();
        assert_eq!(first, "first");
        assert_eq!(second, "second");
    }
}
