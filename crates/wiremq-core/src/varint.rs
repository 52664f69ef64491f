//! Variable byte integer encoding for the MQTT "remaining length" field.
//!
//! The encoding uses 7 bits per byte for the value, little-endian by byte,
//! with the high bit indicating that more bytes follow:
//! - 0..=127: 1 byte
//! - 128..=16383: 2 bytes
//! - 16384..=2097151: 3 bytes
//! - 2097152..=268435455: 4 bytes

use tokio::io::AsyncRead;

use crate::buffer::ReadBuffer;
use crate::error::{ProtocolError, Result};

/// Largest value a remaining-length field can carry.
pub const MAX: usize = 268_435_455;

/// Append `value` to the buffer. Returns the number of bytes written.
///
/// `value` must not exceed [`MAX`]; callers check before encoding.
pub fn encode_to_vec(mut value: usize, buf: &mut Vec<u8>) -> usize {
    debug_assert!(value <= MAX);
    let start = buf.len();
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    buf.len() - start
}

/// Number of bytes needed to encode `value`.
pub fn encoded_len(mut value: usize) -> usize {
    let mut len = 0;
    loop {
        len += 1;
        value /= 128;
        if value == 0 {
            break;
        }
    }
    len
}

/// Read a variable byte integer from the stream.
///
/// Fails with [`ProtocolError::InvalidRemainingLength`] when a fourth byte
/// still carries the continuation bit.
pub async fn read<R: AsyncRead + Unpin>(buf: &mut ReadBuffer<R>) -> Result<usize> {
    let mut multiplier = 1usize;
    let mut value = 0usize;
    loop {
        let byte = buf.byte().await?;
        value += ((byte & 0x7F) as usize) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
        if multiplier > 128 * 128 * 128 {
            return Err(ProtocolError::InvalidRemainingLength.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    async fn decode(bytes: &[u8]) -> Result<usize> {
        let mut buf = ReadBuffer::new(bytes);
        read(&mut buf).await
    }

    #[tokio::test]
    async fn decodes_boundary_values() {
        for (bytes, want) in [
            (&[0x00][..], 0),
            (&[0x7F][..], 127),
            (&[0x80, 0x01][..], 128),
            (&[0xC1, 0x02][..], 321),
            (&[0xFF, 0x7F][..], 16_383),
            (&[0x80, 0x80, 0x01][..], 16_384),
            (&[0xFF, 0xFF, 0x7F][..], 2_097_151),
            (&[0x80, 0x80, 0x80, 0x01][..], 2_097_152),
            (&[0xFF, 0xFF, 0xFF, 0x7F][..], MAX),
        ] {
            assert_eq!(decode(bytes).await.unwrap(), want);
        }
    }

    #[tokio::test]
    async fn rejects_a_fifth_continuation_byte() {
        let err = decode(&[0x80, 0x80, 0x80, 0x80, 0x01]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::InvalidRemainingLength)
        ));
    }

    #[test]
    fn encodes_boundary_values() {
        let mut buf = Vec::new();
        assert_eq!(encode_to_vec(0, &mut buf), 1);
        assert_eq!(buf, [0x00]);

        buf.clear();
        assert_eq!(encode_to_vec(321, &mut buf), 2);
        assert_eq!(buf, [0xC1, 0x02]);

        buf.clear();
        assert_eq!(encode_to_vec(MAX, &mut buf), 4);
        assert_eq!(buf, [0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn encoded_len_matches_the_thresholds() {
        assert_eq!(encoded_len(0), 1);
        assert_eq!(encoded_len(127), 1);
        assert_eq!(encoded_len(128), 2);
        assert_eq!(encoded_len(16_383), 2);
        assert_eq!(encoded_len(16_384), 3);
        assert_eq!(encoded_len(2_097_151), 3);
        assert_eq!(encoded_len(2_097_152), 4);
        assert_eq!(encoded_len(MAX), 4);
    }

    #[tokio::test]
    async fn roundtrip() {
        for value in [0, 1, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, MAX] {
            let mut buf = Vec::new();
            let written = encode_to_vec(value, &mut buf);
            assert_eq!(written, encoded_len(value));
            assert_eq!(decode(&buf).await.unwrap(), value);
        }
    }
}
