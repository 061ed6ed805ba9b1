//! Binary stream abstraction.
//!
//! A stream is a byte source ([`BinaryInputStream`]) or sink
//! ([`BinaryOutputStream`]) with a [`ByteOrder`] fixed for its lifetime.
//! Typed scalar access comes from the blanket [`ReadScalar`] /
//! [`WriteScalar`] extension traits, which apply the stream's byte order to
//! every fixed-width integer and to floats via their same-width integer bit
//! pattern.
//!
//! [`MemoryStream`] backs in-memory framing (the TLV codec's accumulating
//! buffers); [`FileStream`] backs persisted datagrams and test fixtures.

mod file;
mod memory;

pub use file::FileStream;
pub use memory::MemoryStream;

use bytes::Bytes;

use crate::error::{NetError, Result};

/// Byte order of a stream, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// The host's native byte order.
    #[default]
    Native,
    /// Big-endian (network order).
    Big,
    /// Little-endian.
    Little,
}

/// A byte source with a declared byte order.
pub trait BinaryInputStream {
    /// The stream's byte order.
    fn byte_order(&self) -> ByteOrder;

    /// Read exactly `n` bytes.
    ///
    /// There are no short reads: a stream that cannot supply `n` bytes fails
    /// with [`NetError::Protocol`].
    fn read_exact(&mut self, n: usize) -> Result<Bytes>;
}

/// A byte sink with a declared byte order.
pub trait BinaryOutputStream {
    /// The stream's byte order.
    fn byte_order(&self) -> ByteOrder;

    /// Append `buf` to the stream.
    fn write(&mut self, buf: &[u8]) -> Result<()>;
}

/// A fixed-width value with an endian-aware wire encoding.
pub trait Scalar: Sized + Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Decode from exactly [`Self::WIDTH`] bytes; `None` on a width mismatch.
    fn from_bytes(order: ByteOrder, bytes: &[u8]) -> Option<Self>;

    /// Encode in the given byte order.
    fn to_bytes(self, order: ByteOrder) -> Vec<u8>;
}

macro_rules! impl_scalar_for_int {
    ($($t:ty),* $(,)?) => {$(
        impl Scalar for $t {
            const WIDTH: usize = size_of::<$t>();

            fn from_bytes(order: ByteOrder, bytes: &[u8]) -> Option<Self> {
                let bytes: [u8; size_of::<$t>()] = bytes.try_into().ok()?;
                Some(match order {
                    ByteOrder::Native => <$t>::from_ne_bytes(bytes),
                    ByteOrder::Big => <$t>::from_be_bytes(bytes),
                    ByteOrder::Little => <$t>::from_le_bytes(bytes),
                })
            }

            fn to_bytes(self, order: ByteOrder) -> Vec<u8> {
                match order {
                    ByteOrder::Native => self.to_ne_bytes().to_vec(),
                    ByteOrder::Big => self.to_be_bytes().to_vec(),
                    ByteOrder::Little => self.to_le_bytes().to_vec(),
                }
            }
        }
    )*};
}

impl_scalar_for_int!(u8, u16, u32, u64, i8, i16, i32, i64);

// Floats are transported as their same-width integer bit pattern.

impl Scalar for f32 {
    const WIDTH: usize = 4;

    fn from_bytes(order: ByteOrder, bytes: &[u8]) -> Option<Self> {
        u32::from_bytes(order, bytes).map(f32::from_bits)
    }

    fn to_bytes(self, order: ByteOrder) -> Vec<u8> {
        self.to_bits().to_bytes(order)
    }
}

impl Scalar for f64 {
    const WIDTH: usize = 8;

    fn from_bytes(order: ByteOrder, bytes: &[u8]) -> Option<Self> {
        u64::from_bytes(order, bytes).map(f64::from_bits)
    }

    fn to_bytes(self, order: ByteOrder) -> Vec<u8> {
        self.to_bits().to_bytes(order)
    }
}

/// Typed scalar reads for any [`BinaryInputStream`].
pub trait ReadScalar {
    /// Read one scalar in the stream's byte order.
    fn read_scalar<T: Scalar>(&mut self) -> Result<T>;
}

impl<S: BinaryInputStream + ?Sized> ReadScalar for S {
    fn read_scalar<T: Scalar>(&mut self) -> Result<T> {
        let order = self.byte_order();
        let bytes = self.read_exact(T::WIDTH)?;
        T::from_bytes(order, &bytes)
            .ok_or_else(|| NetError::Protocol(format!("scalar width mismatch ({} bytes)", T::WIDTH)))
    }
}

/// Typed scalar writes for any [`BinaryOutputStream`].
pub trait WriteScalar {
    /// Write one scalar in the stream's byte order.
    fn write_scalar<T: Scalar>(&mut self, value: T) -> Result<()>;
}

impl<S: BinaryOutputStream + ?Sized> WriteScalar for S {
    fn write_scalar<T: Scalar>(&mut self, value: T) -> Result<()> {
        let order = self.byte_order();
        self.write(&value.to_bytes(order))
    }
}
