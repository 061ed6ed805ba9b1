//! Received datagrams and their persisted envelope form.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{NetError, Result};
use crate::stream::{BinaryInputStream, BinaryOutputStream};

/// One received (or replayed) datagram.
#[derive(Clone, Debug, PartialEq)]
pub struct Datagram {
    /// The payload.
    pub data: Bytes,
    /// The sender.
    pub from: Address,
    /// Receive time, seconds since the Unix epoch.
    pub timestamp: f64,
}

/// Envelope metadata, serialized as JSON.
#[derive(Serialize, Deserialize)]
struct Metadata {
    address: String,
    port: Option<u16>,
    timestamp: f64,
}

impl Datagram {
    /// Wrap a freshly received payload, timestamped now.
    pub fn new(data: impl Into<Bytes>, from: Address) -> Self {
        let timestamp = chrono::Utc::now().timestamp_micros() as f64 / 1e6;
        Self {
            data: data.into(),
            from,
            timestamp,
        }
    }

    /// Serialize as an envelope record:
    /// `[i32 json-length][json metadata][i32 payload-length][payload]`.
    ///
    /// Both length prefixes are big-endian regardless of the stream's
    /// declared byte order, so persisted captures are portable.
    pub fn write_to<S: BinaryOutputStream + ?Sized>(&self, stream: &mut S) -> Result<()> {
        let metadata = serde_json::to_vec(&Metadata {
            address: self.from.ip().to_string(),
            port: self.from.port(),
            timestamp: self.timestamp,
        })?;

        stream.write(&envelope_length(metadata.len())?.to_be_bytes())?;
        stream.write(&metadata)?;
        stream.write(&envelope_length(self.data.len())?.to_be_bytes())?;
        stream.write(&self.data)
    }

    /// Deserialize one envelope record.
    pub fn read_from<S: BinaryInputStream + ?Sized>(stream: &mut S) -> Result<Self> {
        let metadata_len = read_length(stream)?;
        let metadata: Metadata = serde_json::from_slice(&stream.read_exact(metadata_len)?)?;

        let from = Address::parse(&metadata.address, metadata.port, None)?;

        let payload_len = read_length(stream)?;
        let data = stream.read_exact(payload_len)?;

        Ok(Self {
            data,
            from,
            timestamp: metadata.timestamp,
        })
    }
}

fn envelope_length(len: usize) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| NetError::Protocol(format!("envelope section of {len} bytes too large")))
}

fn read_length<S: BinaryInputStream + ?Sized>(stream: &mut S) -> Result<usize> {
    let bytes = stream.read_exact(4)?;
    let array: [u8; 4] = bytes
        .as_ref()
        .try_into()
        .map_err(|_| NetError::truncated("datagram envelope"))?;
    let len = i32::from_be_bytes(array);
    if len < 0 {
        return Err(NetError::Protocol(format!(
            "negative envelope length {len}"
        )));
    }
    Ok(len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ByteOrder, MemoryStream};

    fn sample() -> Datagram {
        Datagram {
            data: Bytes::from_static(b"ping"),
            from: "10.0.0.7:9999".parse().unwrap(),
            timestamp: 1_700_000_000.25,
        }
    }

    #[test]
    fn envelope_round_trip() {
        let datagram = sample();
        let mut stream = MemoryStream::new(ByteOrder::Big);
        datagram.write_to(&mut stream).unwrap();

        stream.rewind();
        let back = Datagram::read_from(&mut stream).unwrap();
        assert_eq!(back, datagram);
        assert_eq!(stream.remaining(), 0);
    }

    #[test]
    fn lengths_are_big_endian_even_on_little_endian_streams() {
        let datagram = sample();

        let mut big = MemoryStream::new(ByteOrder::Big);
        datagram.write_to(&mut big).unwrap();
        let mut little = MemoryStream::new(ByteOrder::Little);
        datagram.write_to(&mut little).unwrap();
        assert_eq!(big.as_slice(), little.as_slice());

        little.rewind();
        assert_eq!(Datagram::read_from(&mut little).unwrap(), datagram);
    }

    #[test]
    fn negative_length_is_a_protocol_error() {
        let mut stream = MemoryStream::new(ByteOrder::Big);
        stream.write(&(-1i32).to_be_bytes()).unwrap();
        stream.write(b"junk").unwrap();
        stream.rewind();
        assert!(matches!(
            Datagram::read_from(&mut stream),
            Err(NetError::Protocol(_))
        ));
    }

    #[test]
    fn truncated_envelope_is_a_protocol_error() {
        let datagram = sample();
        let mut stream = MemoryStream::new(ByteOrder::Big);
        datagram.write_to(&mut stream).unwrap();
        let bytes = stream.into_bytes();

        let mut cut = MemoryStream::from_bytes(&bytes[..bytes.len() - 2], ByteOrder::Big);
        assert!(matches!(
            Datagram::read_from(&mut cut),
            Err(NetError::Protocol(_))
        ));
    }

    #[test]
    fn portless_sender_round_trips() {
        let datagram = Datagram {
            data: Bytes::from_static(b"x"),
            from: Address::parse("192.168.0.1", None, None).unwrap(),
            timestamp: 12.5,
        };
        let mut stream = MemoryStream::new(ByteOrder::Big);
        datagram.write_to(&mut stream).unwrap();
        stream.rewind();
        assert_eq!(Datagram::read_from(&mut stream).unwrap(), datagram);
    }
}
