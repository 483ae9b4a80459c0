//! Git pkt-line format implementation.
//!
//! Every line in the git wire protocol is prefixed with a 4-character hex
//! length that counts the prefix itself, or is one of the special packets
//! ("0000" flush, "0001" delimiter, "0002" response end).

use crate::Service;
use bytes::Bytes;
#[cfg(any(test, feature = "decode"))]
use crate::{GitError, Result};

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
    /// Delimiter packet (0001).
    Delimiter,
    /// Response-end packet (0002).
    ResponseEnd,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Creates a data packet from bytes.
    #[cfg(any(test, feature = "decode"))]
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Data(data) => {
                let len = data.len() + 4; // 4 bytes for the length prefix
                let mut result = format!("{:04x}", len).into_bytes();
                result.extend_from_slice(data);
                result
            }
            Self::Flush => b"0000".to_vec(),
            Self::Delimiter => b"0001".to_vec(),
            Self::ResponseEnd => b"0002".to_vec(),
        }
    }

    /// Returns true if this is a flush packet.
    #[cfg(any(test, feature = "decode"))]
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for special packets.
    #[cfg(any(test, feature = "decode"))]
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the data as a string, trimming any trailing newline.
    #[cfg(any(test, feature = "decode"))]
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }
}

/// Builds the frame that opens an `info/refs` response:
/// `<len>` `# service=<name>` `\n` followed by a flush packet.
///
/// Clients read exactly `<len>` bytes, so the single newline is counted in the
/// prefix and no other byte may be added.
pub fn service_advertisement(service: Service) -> Bytes {
    Bytes::from(announcement(&format!("# service={}", service.as_str())))
}

fn announcement(payload: &str) -> Vec<u8> {
    let mut line = String::with_capacity(payload.len() + 1);
    line.push_str(payload);
    line.push('\n');

    let mut frame = PktLine::from_string(&line).encode();
    frame.extend_from_slice(&PktLine::Flush.encode());
    frame
}

/// Decodes a pkt-line stream, one packet per [`read`](Self::read).
///
/// Only built for tests and with the `decode` feature; the server never
/// parses what git writes.
#[cfg(any(test, feature = "decode"))]
pub struct PktLineReader<R> {
    inner: R,
}

#[cfg(any(test, feature = "decode"))]
impl<R: std::io::Read> PktLineReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next packet, or `None` at a clean end of input.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        let mut prefix = [0u8; 4];
        if let Err(e) = self.inner.read_exact(&mut prefix) {
            return match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Ok(None),
                _ => Err(e.into()),
            };
        }

        let packet = match parse_length(&prefix)? {
            0 => PktLine::Flush,
            1 => PktLine::Delimiter,
            2 => PktLine::ResponseEnd,
            3 => return Err(GitError::InvalidPktLine("length 3 is reserved".to_string())),
            len => {
                let mut data = vec![0u8; len - 4];
                self.inner.read_exact(&mut data)?;
                PktLine::Data(data)
            }
        };
        Ok(Some(packet))
    }

    /// Reads packets up to the next flush packet or the end of input.
    pub fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut packets = Vec::new();
        while let Some(packet) = self.read()? {
            if packet.is_flush() {
                break;
            }
            packets.push(packet);
        }
        Ok(packets)
    }
}

/// Four hex digits, nothing else: no sign, no whitespace.
#[cfg(any(test, feature = "decode"))]
fn parse_length(prefix: &[u8; 4]) -> Result<usize> {
    prefix.iter().try_fold(0usize, |len, byte| {
        let digit = char::from(*byte)
            .to_digit(16)
            .ok_or_else(|| GitError::InvalidPktLine(format!("bad length prefix {prefix:?}")))?;
        Ok(len * 16 + digit as usize)
    })
}
