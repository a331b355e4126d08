use rand::Rng;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PAYLOAD_SIZE: usize = 1024;
pub const PACKET_SIZE: usize = PAYLOAD_SIZE + 12;
pub const PROTOCOL_VERSION: u16 = 2;

const VERSION_OFFSET: usize = 0;
const TYPE_OFFSET: usize = 2;
const CRC_OFFSET: usize = 4;
const STATUS_OFFSET: usize = 8;
const PAYLOAD_OFFSET: usize = 10;
const PADDING_OFFSET: usize = PAYLOAD_OFFSET + PAYLOAD_SIZE;

static CRC32_TABLE: [u32; 256] = crc32_table();

const fn crc32_table() -> [u32; 256] {
    let mut table = [0_u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

pub fn crc32(data: &[u8]) -> u32 {
    let crc = data.iter().fold(0xFFFF_FFFF_u32, |crc, &b| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(b)) & 0xFF) as usize]
    });
    crc ^ 0xFFFF_FFFF
}

#[derive(Debug, Error)]
pub enum NrpeError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("short read: peer closed the connection mid-packet")]
    ShortRead,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unsupported nrpe protocol version {0}")]
    UnsupportedVersion(u16),
    #[error("protocol mismatch: expected packet type {expected}, got {actual}")]
    TypeMismatch { expected: u16, actual: u16 },
    #[error("checksum mismatch: packet carries {expected:#010x}, computed {actual:#010x}")]
    Checksum { expected: u32, actual: u32 },
    #[error("invalid request: payload is not nul-terminated")]
    MissingTerminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Query = 1,
    Response = 2,
}

impl PacketType {
    pub fn code(self) -> u16 {
        self as u16
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    buf: [u8; PACKET_SIZE],
}

impl Packet {
    /// Builds a v2 packet. Payloads longer than 1023 bytes are truncated so
    /// the terminating NUL always fits.
    pub fn build(packet_type: PacketType, status_code: u16, payload: &[u8]) -> Self {
        let mut buf = [0_u8; PACKET_SIZE];
        buf[VERSION_OFFSET..TYPE_OFFSET].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        buf[TYPE_OFFSET..CRC_OFFSET].copy_from_slice(&packet_type.code().to_be_bytes());
        buf[STATUS_OFFSET..PAYLOAD_OFFSET].copy_from_slice(&status_code.to_be_bytes());
        let len = payload.len().min(PAYLOAD_SIZE - 1);
        buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + len].copy_from_slice(&payload[..len]);
        rand::thread_rng().fill(&mut buf[PADDING_OFFSET..]);

        let mut packet = Self { buf };
        let crc = packet.compute_crc32();
        packet.buf[CRC_OFFSET..STATUS_OFFSET].copy_from_slice(&crc.to_be_bytes());
        packet
    }

    pub fn query(command: &str) -> Self {
        Self::build(PacketType::Query, 0, command.as_bytes())
    }

    pub fn response(status_code: u16, output: &str) -> Self {
        Self::build(PacketType::Response, status_code, output.as_bytes())
    }

    pub fn from_bytes(buf: [u8; PACKET_SIZE]) -> Self {
        Self { buf }
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.buf
    }

    pub fn version(&self) -> u16 {
        be_u16(&self.buf, VERSION_OFFSET)
    }

    pub fn packet_type(&self) -> u16 {
        be_u16(&self.buf, TYPE_OFFSET)
    }

    pub fn crc32(&self) -> u32 {
        let mut bytes = [0_u8; 4];
        bytes.copy_from_slice(&self.buf[CRC_OFFSET..STATUS_OFFSET]);
        u32::from_be_bytes(bytes)
    }

    pub fn status_code(&self) -> u16 {
        be_u16(&self.buf, STATUS_OFFSET)
    }

    fn payload_region(&self) -> &[u8] {
        &self.buf[PAYLOAD_OFFSET..PADDING_OFFSET]
    }

    pub fn payload(&self) -> &[u8] {
        let region = self.payload_region();
        let end = region.iter().position(|&b| b == 0).unwrap_or(region.len());
        &region[..end]
    }

    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(self.payload()).into_owned()
    }

    pub fn compute_crc32(&self) -> u32 {
        let mut copy = self.buf;
        copy[CRC_OFFSET..STATUS_OFFSET].fill(0);
        crc32(&copy)
    }

    pub fn verify(&self, expected: PacketType) -> Result<(), NrpeError> {
        let version = self.version();
        if version != PROTOCOL_VERSION {
            return Err(NrpeError::UnsupportedVersion(version));
        }
        let actual_type = self.packet_type();
        if actual_type != expected.code() {
            return Err(NrpeError::TypeMismatch {
                expected: expected.code(),
                actual: actual_type,
            });
        }
        let computed = self.compute_crc32();
        if computed != self.crc32() {
            return Err(NrpeError::Checksum {
                expected: self.crc32(),
                actual: computed,
            });
        }
        if !self.payload_region().contains(&0) {
            return Err(NrpeError::MissingTerminator);
        }
        Ok(())
    }

    /// Reads one full frame. v3 frames are rejected after the version field
    /// since their layout differs.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, NrpeError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0_u8; PACKET_SIZE];
        reader
            .read_exact(&mut buf[..TYPE_OFFSET])
            .await
            .map_err(read_error)?;
        let version = be_u16(&buf, VERSION_OFFSET);
        if version == 3 {
            return Err(NrpeError::UnsupportedVersion(version));
        }
        reader
            .read_exact(&mut buf[TYPE_OFFSET..])
            .await
            .map_err(read_error)?;
        Ok(Self::from_bytes(buf))
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), NrpeError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("version", &self.version())
            .field("packet_type", &self.packet_type())
            .field("crc32", &format_args!("{:#010x}", self.crc32()))
            .field("status_code", &self.status_code())
            .field("payload", &self.payload_str())
            .finish()
    }
}

fn be_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn read_error(err: io::Error) -> NrpeError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        NrpeError::ShortRead
    } else {
        NrpeError::Io(err)
    }
}

pub fn encode_command(command: &str, args: &[String]) -> String {
    let mut payload = command.to_string();
    for arg in args {
        payload.push('!');
        payload.push_str(arg);
    }
    payload
}

pub fn decode_command(payload: &str) -> (String, Vec<String>) {
    let mut fields = payload.split('!');
    let command = fields.next().unwrap_or_default().to_string();
    (command, fields.map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_reference_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn build_then_verify_round_trip() {
        let args = vec!["warn=load > 80".to_string(), "time=5m".to_string()];
        let payload = encode_command("check_cpu", &args);
        let packet = Packet::build(PacketType::Query, 0, payload.as_bytes());

        assert_eq!(packet.as_bytes().len(), PACKET_SIZE);
        assert_eq!(packet.version(), 2);
        assert_eq!(packet.packet_type(), 1);
        packet.verify(PacketType::Query).expect("verify");

        let (command, decoded) = decode_command(&packet.payload_str());
        assert_eq!(command, "check_cpu");
        assert_eq!(decoded, args);
    }

    #[test]
    fn layout_is_big_endian() {
        let packet = Packet::response(2, "CRITICAL");
        let bytes = packet.as_bytes();
        assert_eq!(&bytes[0..2], &[0, 2]);
        assert_eq!(&bytes[2..4], &[0, 2]);
        assert_eq!(&bytes[8..10], &[0, 2]);
        assert_eq!(&bytes[10..18], b"CRITICAL");
        assert_eq!(bytes[18], 0);
        assert_eq!(
            u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            packet.compute_crc32()
        );
    }

    #[test]
    fn oversized_payload_is_truncated() {
        for len in [1023, 1024, 5000] {
            let payload = vec![b'x'; len];
            let packet = Packet::build(PacketType::Response, 0, &payload);
            assert_eq!(packet.payload().len(), 1023);
            assert_eq!(packet.as_bytes()[PADDING_OFFSET - 1], 0);
            packet.verify(PacketType::Response).expect("verify");
        }
    }

    #[test]
    fn any_flipped_bit_breaks_the_checksum() {
        let packet = Packet::query("check_uptime!warn=uptime < 1h");
        for byte in STATUS_OFFSET..PACKET_SIZE {
            for bit in 0..8 {
                let mut raw = *packet.as_bytes();
                raw[byte] ^= 1 << bit;
                let corrupted = Packet::from_bytes(raw);
                assert!(
                    matches!(
                        corrupted.verify(PacketType::Query),
                        Err(NrpeError::Checksum { .. })
                    ),
                    "byte {byte} bit {bit}"
                );
            }
        }
    }

    #[test]
    fn header_corruption_is_detected() {
        let packet = Packet::query("check_cpu");
        let mut raw = *packet.as_bytes();
        raw[1] = 3;
        assert!(matches!(
            Packet::from_bytes(raw).verify(PacketType::Query),
            Err(NrpeError::UnsupportedVersion(3))
        ));

        let mut raw = *packet.as_bytes();
        raw[3] ^= 0x04;
        assert!(Packet::from_bytes(raw).verify(PacketType::Query).is_err());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let packet = Packet::response(0, "OK");
        assert!(matches!(
            packet.verify(PacketType::Query),
            Err(NrpeError::TypeMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let mut raw = [0_u8; PACKET_SIZE];
        raw[1] = 2;
        raw[3] = 1;
        raw[PAYLOAD_OFFSET..PADDING_OFFSET].fill(b'a');
        let crc = Packet::from_bytes(raw).compute_crc32();
        raw[CRC_OFFSET..STATUS_OFFSET].copy_from_slice(&crc.to_be_bytes());
        assert!(matches!(
            Packet::from_bytes(raw).verify(PacketType::Query),
            Err(NrpeError::MissingTerminator)
        ));
    }

    #[tokio::test]
    async fn read_and_write_whole_frames() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let packet = Packet::query("check_cpu!time=1m");
        packet.write_to(&mut client).await.expect("write");
        let received = Packet::read_from(&mut server).await.expect("read");
        assert_eq!(received, packet);
    }

    #[tokio::test]
    async fn short_read_is_fatal() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let packet = Packet::query("check_cpu");
        tokio::io::AsyncWriteExt::write_all(&mut client, &packet.as_bytes()[..500])
            .await
            .expect("write");
        drop(client);
        assert!(matches!(
            Packet::read_from(&mut server).await,
            Err(NrpeError::ShortRead)
        ));
    }

    #[tokio::test]
    async fn version_three_is_rejected_early() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0, 3, 0, 1])
            .await
            .expect("write");
        assert!(matches!(
            Packet::read_from(&mut server).await,
            Err(NrpeError::UnsupportedVersion(3))
        ));
    }
}
