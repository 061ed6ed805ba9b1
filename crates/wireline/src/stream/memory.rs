//! Growable in-memory binary stream.

use bytes::Bytes;

use super::{BinaryInputStream, BinaryOutputStream, ByteOrder};
use crate::error::{NetError, Result};

/// An in-memory stream that is both a byte source and a byte sink.
///
/// Writes append to the backing buffer; reads advance a head cursor over it.
/// [`rewind`](Self::rewind) moves the head back to the start, so a stream can
/// be written and then read back in place.
pub struct MemoryStream {
    order: ByteOrder,
    data: Vec<u8>,
    head: usize,
}

impl MemoryStream {
    /// Create an empty stream with the given byte order.
    pub fn new(order: ByteOrder) -> Self {
        Self {
            order,
            data: Vec::new(),
            head: 0,
        }
    }

    /// Create a stream positioned at the start of `data`.
    pub fn from_bytes(data: impl Into<Vec<u8>>, order: ByteOrder) -> Self {
        Self {
            order,
            data: data.into(),
            head: 0,
        }
    }

    /// Bytes left between the head and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.head
    }

    /// Total length of the backing buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the backing buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Move the read head back to the start of the buffer.
    pub fn rewind(&mut self) {
        self.head = 0;
    }

    /// The whole backing buffer, independent of the read head.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the stream, returning the backing buffer.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.data)
    }
}

impl BinaryInputStream for MemoryStream {
    fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        if n > self.remaining() {
            return Err(NetError::Protocol(format!(
                "requested {n} bytes with only {} remaining",
                self.remaining()
            )));
        }
        let out = Bytes::copy_from_slice(&self.data[self.head..self.head + n]);
        self.head += n;
        Ok(out)
    }
}

impl BinaryOutputStream for MemoryStream {
    fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.data.extend_from_slice(buf);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStream")
            .field("order", &self.order)
            .field("len", &self.data.len())
            .field("head", &self.head)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_exact_never_short_reads() {
        let mut stream = MemoryStream::from_bytes(vec![1, 2, 3], ByteOrder::Native);
        assert_eq!(stream.read_exact(2).unwrap().as_ref(), &[1, 2]);
        assert_eq!(stream.remaining(), 1);

        // Asking for more than remains fails and consumes nothing.
        assert!(matches!(stream.read_exact(2), Err(NetError::Protocol(_))));
        assert_eq!(stream.remaining(), 1);
        assert_eq!(stream.read_exact(1).unwrap().as_ref(), &[3]);
    }

    #[test]
    fn write_then_rewind_then_read() {
        let mut stream = MemoryStream::new(ByteOrder::Native);
        stream.write(b"hello").unwrap();
        stream.write(b" world").unwrap();
        stream.rewind();
        assert_eq!(stream.read_exact(11).unwrap().as_ref(), b"hello world");
        assert_eq!(stream.into_bytes().as_ref(), b"hello world");
    }
}
