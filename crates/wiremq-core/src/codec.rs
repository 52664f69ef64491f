//! Framed packet stream: fixed header + remaining length + body.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::buffer::ReadBuffer;
use crate::error::{ProtocolError, Result};
use crate::packet::Packet;
use crate::varint;
use crate::wire::{BodyEncoder, BodyReader};

/// Encodes packets onto an async byte sink.
///
/// The body and frame scratch vectors are reused across packets, and every
/// packet goes out in a single write call so bytes of two packets can never
/// interleave on the wire.
pub struct FrameEncoder<W> {
    writer: W,
    frame: Vec<u8>,
    body: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frame: Vec::with_capacity(4096),
            body: Vec::with_capacity(4096),
        }
    }

    /// Encode one packet and write it out.
    pub async fn encode(&mut self, packet: &Packet) -> Result<()> {
        self.body.clear();
        packet.encode_body(&mut BodyEncoder::new(&mut self.body))?;
        if self.body.len() > varint::MAX {
            return Err(ProtocolError::PacketTooLarge(self.body.len()).into());
        }

        self.frame.clear();
        self.frame.push(packet.fixed_header());
        varint::encode_to_vec(self.body.len(), &mut self.frame);
        self.frame.extend_from_slice(&self.body);

        self.writer.write_all(&self.frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut the sink down, flushing buffered bytes and signalling the peer.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Decodes packets from an async byte source.
pub struct FrameDecoder<R> {
    buf: ReadBuffer<R>,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            buf: ReadBuffer::new(reader),
        }
    }

    /// Decode the next packet from the stream.
    ///
    /// The whole body is buffered before body decode starts, so bounded
    /// reads inside the body can never cross into the next packet.
    pub async fn decode(&mut self) -> Result<Packet> {
        let header = self.buf.byte().await?;
        let remaining = varint::read(&mut self.buf).await?;
        self.buf.grow(remaining).await?;

        let mut body = BodyReader::new(&mut self.buf, remaining);
        let packet = Packet::decode_body(header, &mut body).await?;
        if body.remaining() != 0 {
            return Err(ProtocolError::TrailingBytes(body.remaining()).into());
        }
        Ok(packet)
    }
}
