//! Type-length-value record framing.
//!
//! A [`TlvRecord`] is `type ++ length ++ payload`, with the type and length
//! widths chosen by the two type parameters and both integers encoded in the
//! carrying stream's byte order. Records decode either from a
//! [`BinaryInputStream`] (where missing bytes are a hard protocol error) or
//! from an accumulating buffer (where missing bytes mean "no record yet" and
//! nothing is consumed).
//!
//! # Example
//!
//! ```
//! use wireline::stream::ByteOrder;
//! use wireline::tlv::TlvRecord;
//!
//! let record = TlvRecord::<u16, u16>::new(100, &b"Hello world"[..]).unwrap();
//! let wire = record.encode(ByteOrder::Big).unwrap();
//! let (decoded, consumed) = TlvRecord::<u16, u16>::decode(&wire, ByteOrder::Big).unwrap();
//! assert_eq!(consumed, wire.len());
//! assert_eq!(decoded, record);
//! ```

use std::marker::PhantomData;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{NetError, Result};
use crate::stream::{
    BinaryInputStream, BinaryOutputStream, ByteOrder, MemoryStream, ReadScalar, Scalar,
    WriteScalar,
};

/// Unsigned integer usable as a TLV length field.
pub trait TlvLength: Scalar {
    /// Widen to a byte count; `None` when the value does not fit in `usize`
    /// on this target.
    fn to_usize(self) -> Option<usize>;

    /// Narrow from a byte count; `None` when the count does not fit.
    fn from_usize(n: usize) -> Option<Self>;
}

macro_rules! impl_tlv_length {
    ($($t:ty),* $(,)?) => {$(
        impl TlvLength for $t {
            fn to_usize(self) -> Option<usize> {
                usize::try_from(self).ok()
            }

            fn from_usize(n: usize) -> Option<Self> {
                Self::try_from(n).ok()
            }
        }
    )*};
}

impl_tlv_length!(u8, u16, u32, u64);

/// A type-length-value record.
///
/// `T` is the integer carrying the record type, `L` the unsigned integer
/// carrying the payload length. Immutable once constructed; equality is
/// structural.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlvRecord<T, L> {
    kind: T,
    payload: Bytes,
    _length: PhantomData<L>,
}

impl<T: Scalar, L: TlvLength> TlvRecord<T, L> {
    /// Create a record, validating that the payload length is representable
    /// in `L`.
    pub fn new(kind: T, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if L::from_usize(payload.len()).is_none() {
            return Err(NetError::Protocol(format!(
                "payload of {} bytes exceeds the {}-bit length field",
                payload.len(),
                L::WIDTH * 8
            )));
        }
        Ok(Self {
            kind,
            payload,
            _length: PhantomData,
        })
    }

    /// The record type.
    pub fn kind(&self) -> T {
        self.kind
    }

    /// The record payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Serialize to `stream`: type, length, payload.
    pub fn write_to<S: BinaryOutputStream + ?Sized>(&self, stream: &mut S) -> Result<()> {
        stream.write_scalar(self.kind)?;
        // The length was validated at construction.
        let length = L::from_usize(self.payload.len()).ok_or_else(|| {
            NetError::Protocol("payload grew past the length field".to_string())
        })?;
        stream.write_scalar(length)?;
        stream.write(&self.payload)
    }

    /// Serialize to a fresh buffer in the given byte order.
    pub fn encode(&self, order: ByteOrder) -> Result<Bytes> {
        let mut stream = MemoryStream::new(order);
        self.write_to(&mut stream)?;
        Ok(stream.into_bytes())
    }

    /// Decode one record from `stream`.
    ///
    /// A stream that cannot supply the header or the full payload fails with
    /// [`NetError::Protocol`] (truncated record).
    pub fn read_from<S: BinaryInputStream + ?Sized>(stream: &mut S) -> Result<Self> {
        let kind: T = stream.read_scalar()?;
        let length: L = stream.read_scalar()?;
        let length = length
            .to_usize()
            .ok_or_else(|| NetError::Protocol("length field exceeds addressable memory".to_string()))?;
        let payload = stream.read_exact(length)?;
        Self::new(kind, payload)
    }

    /// Attempt to decode one record from the front of `buf`.
    ///
    /// Returns the record and the number of bytes it occupied, or `None` when
    /// `buf` does not yet hold a complete record. `buf` is never consumed;
    /// callers accumulate more bytes and retry.
    pub fn decode(buf: &[u8], order: ByteOrder) -> Option<(Self, usize)> {
        let header = T::WIDTH + L::WIDTH;
        if buf.len() < header {
            return None;
        }

        let kind = T::from_bytes(order, &buf[..T::WIDTH])?;
        let length = L::from_bytes(order, &buf[T::WIDTH..header])?.to_usize()?;
        // A claimed length near usize::MAX must stay "no record yet", not
        // overflow the total.
        let total = header.checked_add(length)?;
        if buf.len() < total {
            return None;
        }

        let record = Self {
            kind,
            payload: Bytes::copy_from_slice(&buf[header..total]),
            _length: PhantomData,
        };
        Some((record, total))
    }

    /// Drain every complete record from the front of `buf`, in order.
    ///
    /// The unconsumed remainder (an incomplete trailing record, or nothing)
    /// is left in `buf`.
    pub fn read_multiple(buf: &mut BytesMut, order: ByteOrder) -> Vec<Self> {
        let mut records = Vec::new();
        while let Some((record, consumed)) = Self::decode(buf, order) {
            buf.advance(consumed);
            records.push(record);
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Record = TlvRecord<u16, u16>;

    #[test]
    fn encode_decode_round_trip() {
        let record = Record::new(100, &b"Hello world"[..]).unwrap();
        let wire = record.encode(ByteOrder::Big).unwrap();

        // type (2) ++ length (2) ++ payload
        assert_eq!(&wire[..2], &100u16.to_be_bytes());
        assert_eq!(&wire[2..4], &11u16.to_be_bytes());
        assert_eq!(&wire[4..], b"Hello world");

        let (decoded, consumed) = Record::decode(&wire, ByteOrder::Big).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(decoded.kind(), 100);
        assert_eq!(decoded.payload().as_ref(), b"Hello world");
        assert_eq!(decoded, record);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; 256];
        assert!(matches!(
            TlvRecord::<u8, u8>::new(1, payload),
            Err(NetError::Protocol(_))
        ));
        // 255 bytes is the largest u8-length payload.
        assert!(TlvRecord::<u8, u8>::new(1, vec![0u8; 255]).is_ok());
    }

    #[test]
    fn stream_decode_fails_on_truncation() {
        let record = Record::new(7, &b"abcdef"[..]).unwrap();
        let wire = record.encode(ByteOrder::Big).unwrap();

        let mut truncated = MemoryStream::from_bytes(&wire[..wire.len() - 1], ByteOrder::Big);
        assert!(matches!(
            Record::read_from(&mut truncated),
            Err(NetError::Protocol(_))
        ));

        let mut whole = MemoryStream::from_bytes(&wire[..], ByteOrder::Big);
        assert_eq!(Record::read_from(&mut whole).unwrap(), record);
    }

    #[test]
    fn partial_decode_is_never_destructive() {
        let record = Record::new(42, &b"partial"[..]).unwrap();
        let wire = record.encode(ByteOrder::Big).unwrap();

        // Every strict prefix yields "no record yet"...
        for cut in 0..wire.len() {
            assert!(Record::decode(&wire[..cut], ByteOrder::Big).is_none());
        }

        // ...and concatenating the rest afterwards still parses.
        let mut buf = BytesMut::from(&wire[..3]);
        assert!(Record::read_multiple(&mut buf, ByteOrder::Big).is_empty());
        assert_eq!(buf.len(), 3);
        buf.extend_from_slice(&wire[3..]);
        let records = Record::read_multiple(&mut buf, ByteOrder::Big);
        assert_eq!(records, vec![record]);
        assert!(buf.is_empty());
    }

    #[test]
    fn read_multiple_preserves_order_and_remainder() {
        let records: Vec<Record> = (0..5)
            .map(|i| Record::new(i, format!("payload-{i}").into_bytes()).unwrap())
            .collect();

        let mut buf = BytesMut::new();
        for record in &records {
            buf.extend_from_slice(&record.encode(ByteOrder::Little).unwrap());
        }

        let decoded = Record::read_multiple(&mut buf, ByteOrder::Little);
        assert_eq!(decoded, records);
        assert!(buf.is_empty());

        // With a trailing partial record, the partial bytes stay put.
        for record in &records {
            buf.extend_from_slice(&record.encode(ByteOrder::Little).unwrap());
        }
        buf.extend_from_slice(&[9, 9]);
        let decoded = Record::read_multiple(&mut buf, ByteOrder::Little);
        assert_eq!(decoded.len(), 5);
        assert_eq!(buf.as_ref(), &[9, 9]);
    }

    #[test]
    fn absurd_length_claims_are_not_records() {
        // A complete header whose claimed length can never be satisfied.
        let mut wire = Vec::new();
        wire.extend_from_slice(&1u16.to_be_bytes());
        wire.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(TlvRecord::<u16, u64>::decode(&wire, ByteOrder::Big).is_none());

        // More payload bytes do not change the answer.
        wire.extend_from_slice(b"junk");
        assert!(TlvRecord::<u16, u64>::decode(&wire, ByteOrder::Big).is_none());

        // The accumulating path leaves the buffer untouched.
        let mut buf = BytesMut::from(&wire[..]);
        assert!(TlvRecord::<u16, u64>::read_multiple(&mut buf, ByteOrder::Big).is_empty());
        assert_eq!(buf.len(), wire.len());
    }

    #[test]
    fn zero_length_payload_round_trips() {
        let record = Record::new(1, Bytes::new()).unwrap();
        let wire = record.encode(ByteOrder::Big).unwrap();
        assert_eq!(wire.len(), 4);
        let (decoded, consumed) = Record::decode(&wire, ByteOrder::Big).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(decoded, record);
    }
}
