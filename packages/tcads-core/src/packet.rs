//! The ADS packet: an [`AdsHeader`] plus its command data, carried inside an
//! [`AmsFrame`] on the wire.
//!
//! This is the seam between the raw frame I/O in [`crate::io`] and the typed
//! ADS commands built on top of it. [`encode_packet`] and [`decode_packet`]
//! convert between a [`Packet`] and the bytes that follow the AMS/TCP header;
//! [`read_packet`]/[`write_packet`] do the same directly against an async
//! stream, reusing [`crate::io::tokio::AmsReader`]/[`AmsWriter`] for the
//! framing.

use crate::ads::header::ADS_HEADER_LEN;
use crate::ads::{AdsHeader, AdsHeaderError};
use crate::ams::AmsCommand;
use crate::io::AmsFrame;
use crate::io::tokio::{AmsReader, AmsWriter};
use std::marker::Unpin;
use tokio::io::{self, AsyncRead, AsyncWriteExt};

/// Errors that can occur while decoding a [`Packet`] from raw bytes.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    /// Fewer bytes were supplied than the 32-byte ADS header requires.
    #[error("buffer too short for ADS header: expected at least {expected} bytes, got {got}")]
    ShortHeader { expected: usize, got: usize },

    /// The header's `length` field disagreed with the amount of data that
    /// followed it.
    #[error("ADS header length mismatch: header declares {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    /// The 32-byte header itself failed to parse.
    #[error(transparent)]
    Header(#[from] AdsHeaderError),
}

/// A decoded ADS packet: the 32-byte [`AdsHeader`] plus its command data.
///
/// This is the payload of an [`AmsFrame`] whose
/// [`AmsCommand`](crate::ams::AmsCommand) is [`AmsCommand::AdsCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: AdsHeader,
    data: Vec<u8>,
}

impl Packet {
    /// Builds a packet from a header and its command data.
    ///
    /// The header's `length` field is not consulted; use [`Packet::header`]
    /// together with [`AdsHeader::length`] if you need to assert
    /// consistency, or go through [`decode_packet`] which enforces it.
    pub fn new(header: AdsHeader, data: impl Into<Vec<u8>>) -> Self {
        Self {
            header,
            data: data.into(),
        }
    }

    /// The ADS header.
    pub fn header(&self) -> &AdsHeader {
        &self.header
    }

    /// The command data that follows the header.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Splits the packet into its header and data.
    pub fn into_parts(self) -> (AdsHeader, Vec<u8>) {
        (self.header, self.data)
    }
}

/// Serialises a packet into the bytes that follow the AMS/TCP header:
/// the 32-byte ADS header followed by its command data.
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ADS_HEADER_LEN + packet.data.len());
    buf.extend_from_slice(&packet.header.to_bytes());
    buf.extend_from_slice(&packet.data);
    buf
}

/// Parses a packet out of the bytes that follow the AMS/TCP header.
///
/// Validates that `bytes` is at least [`ADS_HEADER_LEN`] long and that the
/// header's declared `length` matches the number of bytes left over.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, FormatError> {
    if bytes.len() < ADS_HEADER_LEN {
        return Err(FormatError::ShortHeader {
            expected: ADS_HEADER_LEN,
            got: bytes.len(),
        });
    }

    let header = AdsHeader::try_from_slice(&bytes[..ADS_HEADER_LEN])?;
    let data = &bytes[ADS_HEADER_LEN..];

    if header.length() as usize != data.len() {
        return Err(FormatError::LengthMismatch {
            expected: header.length() as usize,
            got: data.len(),
        });
    }

    Ok(Packet::new(header, data))
}

/// Wraps a packet in an [`AmsFrame`] carrying [`AmsCommand::AdsCommand`].
pub fn packet_to_frame(packet: &Packet) -> AmsFrame {
    AmsFrame::new(AmsCommand::AdsCommand, encode_packet(packet))
}

/// Extracts a packet from an [`AmsFrame`]'s payload.
pub fn packet_from_frame(frame: &AmsFrame) -> Result<Packet, FormatError> {
    decode_packet(frame.payload())
}

/// Reads one ADS packet from the stream, via [`AmsReader::read_frame`].
///
/// Returns an [`io::Error`] of kind [`io::ErrorKind::InvalidData`] if the
/// frame's payload does not decode into a well-formed packet.
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut AmsReader<R>,
) -> io::Result<Packet> {
    let frame = reader.read_frame().await?;
    packet_from_frame(&frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes one ADS packet to the stream, via [`AmsWriter::write_frame`].
pub async fn write_packet<W: AsyncWriteExt + Unpin>(
    writer: &mut AmsWriter<W>,
    packet: &Packet,
) -> io::Result<()> {
    writer.write_frame(&packet_to_frame(packet)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::{AdsCommand, AdsReturnCode, StateFlag};
    use crate::ams::{AmsAddr, AmsNetId};
    use tokio_test::io::Builder;

    fn sample_header(length: u32) -> AdsHeader {
        AdsHeader::new(
            AmsAddr::new(AmsNetId::new(192, 168, 0, 1, 1, 1), 851),
            AmsAddr::new(AmsNetId::new(10, 10, 10, 10, 1, 1), 30000),
            AdsCommand::AdsRead,
            StateFlag::tcp_ads_request(),
            length,
            AdsReturnCode::Ok,
            42,
        )
    }

    #[test]
    fn encode_decode_roundtrip() {
        let packet = Packet::new(sample_header(4), vec![1, 2, 3, 4]);
        let bytes = encode_packet(&packet);
        let decoded = decode_packet(&bytes).expect("should decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn decode_rejects_short_header() {
        let err = decode_packet(&[0u8; ADS_HEADER_LEN - 1]).unwrap_err();
        assert_eq!(
            err,
            FormatError::ShortHeader {
                expected: ADS_HEADER_LEN,
                got: ADS_HEADER_LEN - 1
            }
        );
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let packet = Packet::new(sample_header(4), vec![1, 2, 3, 4]);
        let mut bytes = encode_packet(&packet);
        bytes.push(0xFF); // trailing byte the header didn't account for

        let err = decode_packet(&bytes).unwrap_err();
        assert_eq!(
            err,
            FormatError::LengthMismatch {
                expected: 4,
                got: 5
            }
        );
    }

    #[test]
    fn frame_roundtrip() {
        let packet = Packet::new(sample_header(2), vec![0xAA, 0xBB]);
        let frame = packet_to_frame(&packet);

        assert_eq!(frame.header().command(), AmsCommand::AdsCommand);
        let decoded = packet_from_frame(&frame).expect("should decode");
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn read_packet_from_stream() {
        let packet = Packet::new(sample_header(4), vec![9, 9, 9, 9]);
        let frame = packet_to_frame(&packet);

        let mut mock = Builder::new().read(&frame.to_vec()).build();
        let mut reader = AmsReader::new(&mut mock);

        let decoded = read_packet(&mut reader).await.expect("should read");
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn write_packet_to_stream() {
        let packet = Packet::new(sample_header(2), vec![1, 2]);
        let frame = packet_to_frame(&packet);

        let mut mock = Builder::new().write(&frame.to_vec()).build();
        let mut writer = AmsWriter::new(&mut mock);

        write_packet(&mut writer, &packet).await.expect("should write");
    }
}
