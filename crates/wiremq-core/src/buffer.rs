//! Streaming read buffer over an async byte source.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Initial allocation; packets smaller than this never reallocate.
const INITIAL_CAPACITY: usize = 4096;

/// A growable, slide-compacting read buffer.
///
/// Keeps a single contiguous region with a read cursor (`off`) and a filled
/// cursor (`end`). [`ReadBuffer::grow`] guarantees that at least `n` readable
/// bytes are buffered on return, reading from the source as needed, so the
/// decoder can take bounded slices without partial-read handling.
pub struct ReadBuffer<R> {
    reader: R,
    buf: Vec<u8>,
    off: usize,
    end: usize,
}

impl<R: AsyncRead + Unpin> ReadBuffer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            off: 0,
            end: 0,
        }
    }

    /// Number of readable bytes currently buffered.
    pub fn available(&self) -> usize {
        self.end - self.off
    }

    /// Consume and return a single byte.
    pub async fn byte(&mut self) -> io::Result<u8> {
        self.grow(1).await?;
        let c = self.buf[self.off];
        self.off += 1;
        Ok(c)
    }

    /// Consume and return `n` bytes.
    ///
    /// The slice is only valid until the next `grow`, which may move or
    /// overwrite the underlying storage. Callers that keep the bytes must
    /// copy them out.
    pub async fn bytes(&mut self, n: usize) -> io::Result<&[u8]> {
        self.grow(n).await?;
        let v = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(v)
    }

    /// Ensure at least `n` readable bytes are buffered.
    ///
    /// A source that reports end-of-stream before `n` bytes arrive surfaces
    /// as [`io::ErrorKind::UnexpectedEof`].
    pub async fn grow(&mut self, n: usize) -> io::Result<()> {
        if n <= self.end - self.off {
            return Ok(());
        }

        // Reallocate when the whole buffer is too small, otherwise slide the
        // unread tail to the front to make room behind `end`.
        if n > self.buf.len() {
            let capacity = n.max(self.buf.len() * 2).max(INITIAL_CAPACITY);
            let mut next = vec![0u8; capacity];
            let unread = self.end - self.off;
            next[..unread].copy_from_slice(&self.buf[self.off..self.end]);
            self.buf = next;
            self.off = 0;
            self.end = unread;
        } else if n > self.buf.len() - self.off {
            self.buf.copy_within(self.off..self.end, 0);
            self.end -= self.off;
            self.off = 0;
        }

        while self.end - self.off < n {
            let read = self.reader.read(&mut self.buf[self.end..]).await?;
            if read == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            self.end += read;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;

    /// Delivers its data `chunk` bytes at a time to exercise the grow loop.
    struct ChunkReader {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl ChunkReader {
        fn new(data: impl Into<Vec<u8>>, chunk: usize) -> Self {
            Self {
                data: data.into(),
                pos: 0,
                chunk,
            }
        }
    }

    impl AsyncRead for ChunkReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let n = self
                .chunk
                .min(self.data.len() - self.pos)
                .min(buf.remaining());
            let pos = self.pos;
            buf.put_slice(&self.data[pos..pos + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn byte_and_bytes_return_the_input_sequence() {
        let mut buf = ReadBuffer::new(ChunkReader::new(&b"12345"[..], 2));
        assert_eq!(buf.byte().await.unwrap(), b'1');
        assert_eq!(buf.bytes(4).await.unwrap(), b"2345");
    }

    #[tokio::test]
    async fn eof_is_unexpected() {
        let mut buf = ReadBuffer::new(ChunkReader::new(&b"1"[..], 1));
        assert_eq!(buf.byte().await.unwrap(), b'1');
        let err = buf.byte().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn grow_compacts_and_reallocates() {
        // Larger than the initial capacity so both the reallocation and the
        // compaction paths run.
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut buf = ReadBuffer::new(ChunkReader::new(data.clone(), 700));

        let mut out = Vec::new();
        out.push(buf.byte().await.unwrap());
        out.extend_from_slice(buf.bytes(3000).await.unwrap());
        out.extend_from_slice(buf.bytes(9000).await.unwrap());
        while out.len() < data.len() {
            out.push(buf.byte().await.unwrap());
        }
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn copied_bytes_survive_later_grows() {
        let data = b"aaaabbbbccccdddd".to_vec();
        let mut buf = ReadBuffer::new(ChunkReader::new(data, 4));
        let first = buf.bytes(4).await.unwrap().to_vec();
        // Force enough churn to move the storage.
        let _ = buf.bytes(8).await.unwrap();
        let _ = buf.bytes(4).await.unwrap();
        assert_eq!(first, b"aaaa");
    }
}
