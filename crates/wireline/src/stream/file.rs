//! File-backed binary streams.
//!
//! Used for persisted datagram captures and test fixtures; socket traffic
//! never goes through these.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bytes::Bytes;

use super::{BinaryInputStream, BinaryOutputStream, ByteOrder};
use crate::error::{NetError, Result};

/// A binary stream reading from or appending to a file.
pub struct FileStream {
    file: File,
    order: ByteOrder,
}

impl FileStream {
    /// Open an existing file for reading.
    pub fn open(path: impl AsRef<Path>, order: ByteOrder) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file, order })
    }

    /// Create (or truncate) a file for writing.
    pub fn create(path: impl AsRef<Path>, order: ByteOrder) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self { file, order })
    }
}

impl BinaryInputStream for FileStream {
    fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; n];
        self.file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                NetError::truncated("file stream")
            } else {
                NetError::from(e)
            }
        })?;
        Ok(Bytes::from(buf))
    }
}

impl BinaryOutputStream for FileStream {
    fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ReadScalar, WriteScalar};

    #[test]
    fn round_trip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.bin");

        let mut out = FileStream::create(&path, ByteOrder::Big).unwrap();
        out.write_scalar(0xabcdu16).unwrap();
        out.write(b"payload").unwrap();
        drop(out);

        let mut input = FileStream::open(&path, ByteOrder::Big).unwrap();
        assert_eq!(input.read_scalar::<u16>().unwrap(), 0xabcd);
        assert_eq!(input.read_exact(7).unwrap().as_ref(), b"payload");
        assert!(matches!(
            input.read_exact(1),
            Err(NetError::Protocol(_))
        ));
    }
}
