//! Wire protocol: framing and message types.
//!
//! ## Frame Format
//!
//! ```text
//! ┌────────────────┬────────────────┬─────────────────────┐
//! │      Type       │  Payload Len   │       Payload        │
//! │     4 bytes      │    4 bytes     │   (variable length)  │
//! └────────────────┴────────────────┴─────────────────────┘
//! ```
//!
//! Both header fields are big-endian `u32`. There is no magic number or
//! version byte: the header is exactly 8 bytes. Every message type's
//! payload is JSON except [`MessageType::FileData`], whose payload is
//! binary: a big-endian `u32` chunk index followed by the chunk's bytes.

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Frame header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Message types, with their exact wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    /// Joiner → host: offer a pair code to start a session.
    PairRequest = 1,
    /// Host → joiner: pairing succeeded.
    PairAccept = 2,
    /// Host → joiner: pairing failed.
    PairReject = 3,
    /// Sender → receiver: metadata describing an incoming file.
    FileInfo = 4,
    /// Sender → receiver: one chunk of file data (binary).
    FileData = 5,
    /// Receiver → sender: acknowledge a single chunk.
    FileAck = 6,
    /// Either side: report a transfer-level error.
    FileError = 7,
    /// Either side: orderly session teardown.
    Disconnect = 8,
    /// Peer → peer: ask for a listing of shareable files. Decodable but
    /// never originated by any component yet.
    FileListRequest = 9,
    /// Peer → peer: reply to [`MessageType::FileListRequest`]. Decodable
    /// but never originated by any component yet.
    FileListResponse = 10,
    /// Receiver → sender: acknowledge a batch of chunks.
    FileAckBatch = 11,
    /// Receiver → sender: resume an interrupted transfer.
    FileResume = 12,
    /// Sender → receiver: which chunks remain after a resume request.
    FileResumeOk = 13,
    /// Either side: a transfer finished, successfully or not.
    FileComplete = 14,
    /// Either side: liveness probe.
    Heartbeat = 15,
    /// Joiner → host: re-establish a session as an already-trusted device.
    Reconnect = 16,
}

impl MessageType {
    /// Parse a message type from its wire value.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::PairRequest),
            2 => Some(Self::PairAccept),
            3 => Some(Self::PairReject),
            4 => Some(Self::FileInfo),
            5 => Some(Self::FileData),
            6 => Some(Self::FileAck),
            7 => Some(Self::FileError),
            8 => Some(Self::Disconnect),
            9 => Some(Self::FileListRequest),
            10 => Some(Self::FileListResponse),
            11 => Some(Self::FileAckBatch),
            12 => Some(Self::FileResume),
            13 => Some(Self::FileResumeOk),
            14 => Some(Self::FileComplete),
            15 => Some(Self::Heartbeat),
            16 => Some(Self::Reconnect),
            _ => None,
        }
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// The message type.
    pub message_type: MessageType,
    /// Payload length in bytes.
    pub payload_len: u32,
}

impl FrameHeader {
    /// Encode the header to its 8-byte wire representation.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&(self.message_type as u32).to_be_bytes());
        buf[4..8].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Decode a header from its 8-byte wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the type code is unknown or the
    /// payload length exceeds `max_payload`.
    pub fn decode(buf: &[u8; HEADER_SIZE], max_payload: u32) -> Result<Self> {
        let type_code = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let message_type = MessageType::from_u32(type_code)
            .ok_or_else(|| Error::MalformedFrame(format!("unknown message type {type_code}")))?;
        let payload_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if payload_len > max_payload {
            return Err(Error::PayloadTooLarge {
                size: payload_len,
                limit: max_payload,
            });
        }
        Ok(Self {
            message_type,
            payload_len,
        })
    }
}

/// `PairRequest` payload: `{pair_code, hostname}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRequestPayload {
    /// The pair code the joiner believes is current.
    pub pair_code: String,
    /// The joiner's hostname, for display.
    pub hostname: String,
}

/// `PairAccept` payload: `{hostname}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairAcceptPayload {
    /// The accepting peer's hostname.
    pub hostname: String,
}

/// `PairReject` payload: `{reason}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRejectPayload {
    /// Human-readable rejection reason.
    pub reason: String,
}

/// `FileInfo` payload: `{filename, filesize, hash, is_folder}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfoPayload {
    /// The file's (or archived folder's) display name.
    pub filename: String,
    /// Total size in bytes.
    pub filesize: u64,
    /// MD5 hash of the complete file, hex-encoded.
    pub hash: String,
    /// Whether this file is a zip archive of a folder.
    pub is_folder: bool,
}

/// `FileAck` payload: `{chunk_index, success}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAckPayload {
    /// The acknowledged chunk index.
    pub chunk_index: u32,
    /// Whether the chunk was accepted.
    pub success: bool,
}

/// `FileError` payload: `{error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileErrorPayload {
    /// Human-readable error description.
    pub error: String,
}

/// `Disconnect` payload: `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisconnectPayload {}

/// `FileAckBatch` payload: `{chunk_indices}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAckBatchPayload {
    /// Chunk indices being acknowledged together.
    pub chunk_indices: Vec<u32>,
}

/// `FileResume` payload: `{file_hash, received_chunks, device_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResumePayload {
    /// The MD5 hash identifying the transfer being resumed.
    pub file_hash: String,
    /// Chunk indices the receiver already has on disk.
    pub received_chunks: Vec<u32>,
    /// The requesting device's identity.
    pub device_id: String,
}

/// `FileResumeOk` payload: `{file_hash, needed_chunks}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResumeOkPayload {
    /// The MD5 hash identifying the transfer being resumed.
    pub file_hash: String,
    /// Chunk indices the sender will (re)transmit.
    pub needed_chunks: Vec<u32>,
}

/// `FileComplete` payload: `{file_hash, success}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCompletePayload {
    /// The MD5 hash identifying the completed transfer.
    pub file_hash: String,
    /// Whether the transfer finished successfully.
    pub success: bool,
}

/// `Heartbeat` payload: `{timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Unix timestamp (seconds) at time of send.
    pub timestamp: i64,
}

/// `Reconnect` payload: `{device_id, hostname}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPayload {
    /// The reconnecting device's identity.
    pub device_id: String,
    /// The reconnecting device's hostname.
    pub hostname: String,
}

/// `FileListRequest` payload: `{}`. Reserved: no component originates this
/// message, but it must decode cleanly if a peer sends it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileListRequestPayload {}

/// `FileListResponse` payload: `{files}`. Reserved, see
/// [`FileListRequestPayload`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileListResponsePayload {
    /// Listed file names.
    pub files: Vec<String>,
}

/// A decoded frame with its typed payload.
#[derive(Debug, Clone)]
pub enum Message {
    /// See [`PairRequestPayload`].
    PairRequest(PairRequestPayload),
    /// See [`PairAcceptPayload`].
    PairAccept(PairAcceptPayload),
    /// See [`PairRejectPayload`].
    PairReject(PairRejectPayload),
    /// See [`FileInfoPayload`].
    FileInfo(FileInfoPayload),
    /// Binary chunk payload: `(chunk_index, bytes)`.
    FileData(u32, Vec<u8>),
    /// See [`FileAckPayload`].
    FileAck(FileAckPayload),
    /// See [`FileErrorPayload`].
    FileError(FileErrorPayload),
    /// See [`DisconnectPayload`].
    Disconnect(DisconnectPayload),
    /// See [`FileAckBatchPayload`].
    FileAckBatch(FileAckBatchPayload),
    /// See [`FileResumePayload`].
    FileResume(FileResumePayload),
    /// See [`FileResumeOkPayload`].
    FileResumeOk(FileResumeOkPayload),
    /// See [`FileCompletePayload`].
    FileComplete(FileCompletePayload),
    /// See [`HeartbeatPayload`].
    Heartbeat(HeartbeatPayload),
    /// See [`ReconnectPayload`].
    Reconnect(ReconnectPayload),
    /// See [`FileListRequestPayload`]. Reserved, never originated.
    FileListRequest(FileListRequestPayload),
    /// See [`FileListResponsePayload`]. Reserved, never originated.
    FileListResponse(FileListResponsePayload),
}

impl Message {
    /// The wire [`MessageType`] this message encodes as.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::PairRequest(_) => MessageType::PairRequest,
            Self::PairAccept(_) => MessageType::PairAccept,
            Self::PairReject(_) => MessageType::PairReject,
            Self::FileInfo(_) => MessageType::FileInfo,
            Self::FileData(..) => MessageType::FileData,
            Self::FileAck(_) => MessageType::FileAck,
            Self::FileError(_) => MessageType::FileError,
            Self::Disconnect(_) => MessageType::Disconnect,
            Self::FileAckBatch(_) => MessageType::FileAckBatch,
            Self::FileResume(_) => MessageType::FileResume,
            Self::FileResumeOk(_) => MessageType::FileResumeOk,
            Self::FileComplete(_) => MessageType::FileComplete,
            Self::Heartbeat(_) => MessageType::Heartbeat,
            Self::Reconnect(_) => MessageType::Reconnect,
            Self::FileListRequest(_) => MessageType::FileListRequest,
            Self::FileListResponse(_) => MessageType::FileListResponse,
        }
    }

    /// Encode this message's payload bytes (JSON, or raw for `FileData`).
    fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            Self::FileData(chunk_index, bytes) => Ok(encode_file_data(*chunk_index, bytes)),
            Self::PairRequest(p) => Ok(serde_json::to_vec(p)?),
            Self::PairAccept(p) => Ok(serde_json::to_vec(p)?),
            Self::PairReject(p) => Ok(serde_json::to_vec(p)?),
            Self::FileInfo(p) => Ok(serde_json::to_vec(p)?),
            Self::FileAck(p) => Ok(serde_json::to_vec(p)?),
            Self::FileError(p) => Ok(serde_json::to_vec(p)?),
            Self::Disconnect(p) => Ok(serde_json::to_vec(p)?),
            Self::FileAckBatch(p) => Ok(serde_json::to_vec(p)?),
            Self::FileResume(p) => Ok(serde_json::to_vec(p)?),
            Self::FileResumeOk(p) => Ok(serde_json::to_vec(p)?),
            Self::FileComplete(p) => Ok(serde_json::to_vec(p)?),
            Self::Heartbeat(p) => Ok(serde_json::to_vec(p)?),
            Self::Reconnect(p) => Ok(serde_json::to_vec(p)?),
            Self::FileListRequest(p) => Ok(serde_json::to_vec(p)?),
            Self::FileListResponse(p) => Ok(serde_json::to_vec(p)?),
        }
    }

    /// Decode a message from its wire type and payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if a JSON-typed payload fails to
    /// parse, or if a `FileData` payload is shorter than 4 bytes.
    pub fn decode(message_type: MessageType, payload: &[u8]) -> Result<Self> {
        Ok(match message_type {
            MessageType::FileData => {
                let (chunk_index, bytes) = decode_file_data(payload)?;
                Self::FileData(chunk_index, bytes)
            }
            MessageType::PairRequest => Self::PairRequest(decode_json(payload)?),
            MessageType::PairAccept => Self::PairAccept(decode_json(payload)?),
            MessageType::PairReject => Self::PairReject(decode_json(payload)?),
            MessageType::FileInfo => Self::FileInfo(decode_json(payload)?),
            MessageType::FileAck => Self::FileAck(decode_json(payload)?),
            MessageType::FileError => Self::FileError(decode_json(payload)?),
            MessageType::Disconnect => Self::Disconnect(decode_json(payload)?),
            MessageType::FileAckBatch => Self::FileAckBatch(decode_json(payload)?),
            MessageType::FileResume => Self::FileResume(decode_json(payload)?),
            MessageType::FileResumeOk => Self::FileResumeOk(decode_json(payload)?),
            MessageType::FileComplete => Self::FileComplete(decode_json(payload)?),
            MessageType::Heartbeat => Self::Heartbeat(decode_json(payload)?),
            MessageType::Reconnect => Self::Reconnect(decode_json(payload)?),
            MessageType::FileListRequest => Self::FileListRequest(decode_json(payload)?),
            MessageType::FileListResponse => Self::FileListResponse(decode_json(payload)?),
        })
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| Error::MalformedFrame(e.to_string()))
}

/// Encode a `FileData` payload: `[chunk_index:u32 BE][bytes]`.
#[must_use]
pub fn encode_file_data(chunk_index: u32, bytes: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + bytes.len());
    buf.extend_from_slice(&chunk_index.to_be_bytes());
    buf.extend_from_slice(bytes);
    buf
}

/// Decode a `FileData` payload into `(chunk_index, bytes)`.
///
/// # Errors
///
/// Returns [`Error::MalformedFrame`] if `payload` is shorter than 4 bytes.
pub fn decode_file_data(payload: &[u8]) -> Result<(u32, Vec<u8>)> {
    if payload.len() < 4 {
        return Err(Error::MalformedFrame(
            "FileData payload shorter than 4 bytes".to_string(),
        ));
    }
    let chunk_index = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok((chunk_index, payload[4..].to_vec()))
}

/// Read one complete frame from `reader`, buffering greedily.
///
/// # Errors
///
/// Returns [`Error::MalformedFrame`] on header corruption, an oversized
/// payload, or a JSON parse failure; propagates the underlying I/O error
/// on a read failure.
pub async fn read_frame<R>(reader: &mut R, max_payload: u32) -> Result<Message>
where
    R: tokio::io::AsyncReadExt + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;
    let header = FrameHeader::decode(&header_buf, max_payload)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    if header.payload_len > 0 {
        reader.read_exact(&mut payload).await?;
    }

    Message::decode(header.message_type, &payload)
}

/// Write one complete frame to `writer`.
///
/// # Errors
///
/// Propagates the underlying I/O error on a write failure, or a JSON
/// encoding error (which should not occur for well-formed payloads).
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: tokio::io::AsyncWriteExt + Unpin,
{
    let payload = message.encode_payload()?;
    #[allow(clippy::cast_possible_truncation)]
    let header = FrameHeader {
        message_type: message.message_type(),
        payload_len: payload.len() as u32,
    };

    writer.write_all(&header.encode()).await?;
    if !payload.is_empty() {
        writer.write_all(&payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Read one complete frame from `reader`, aborting with [`Error::Timeout`]
/// if it does not arrive within `duration`.
///
/// # Errors
///
/// Returns [`Error::Timeout`] on expiry; otherwise see [`read_frame`].
pub async fn read_frame_with_timeout<R>(
    reader: &mut R,
    max_payload: u32,
    duration: std::time::Duration,
) -> Result<Message>
where
    R: tokio::io::AsyncReadExt + Unpin,
{
    timeout(duration, read_frame(reader, max_payload))
        .await
        .map_err(|_| Error::Timeout(duration.as_secs()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = FrameHeader {
            message_type: MessageType::Heartbeat,
            payload_len: 42,
        };
        let encoded = header.encode();
        let decoded = FrameHeader::decode(&encoded, 1024).unwrap();
        assert_eq!(decoded.message_type, MessageType::Heartbeat);
        assert_eq!(decoded.payload_len, 42);
    }

    #[test]
    fn header_decode_rejects_unknown_type() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&99u32.to_be_bytes());
        assert!(FrameHeader::decode(&buf, 1024).is_err());
    }

    #[test]
    fn header_decode_rejects_oversized_payload() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&(MessageType::FileInfo as u32).to_be_bytes());
        buf[4..8].copy_from_slice(&1000u32.to_be_bytes());
        let err = FrameHeader::decode(&buf, 64).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
    }

    #[test]
    fn file_data_round_trips() {
        let encoded = encode_file_data(7, b"hello");
        let (index, bytes) = decode_file_data(&encoded).unwrap();
        assert_eq!(index, 7);
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn file_data_decode_rejects_short_payload() {
        assert!(decode_file_data(&[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn read_write_frame_round_trips_json_message() {
        let mut buffer = Vec::new();
        let message = Message::PairRequest(PairRequestPayload {
            pair_code: "A1B2C3".to_string(),
            hostname: "joiner-host".to_string(),
        });
        write_frame(&mut buffer, &message).await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let read_back = read_frame(&mut cursor, 1024).await.unwrap();
        match read_back {
            Message::PairRequest(p) => {
                assert_eq!(p.pair_code, "A1B2C3");
                assert_eq!(p.hostname, "joiner-host");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_write_frame_round_trips_file_data() {
        let mut buffer = Vec::new();
        let message = Message::FileData(3, b"chunk-bytes".to_vec());
        write_frame(&mut buffer, &message).await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let read_back = read_frame(&mut cursor, 1024).await.unwrap();
        match read_back {
            Message::FileData(index, bytes) => {
                assert_eq!(index, 3);
                assert_eq!(bytes, b"chunk-bytes");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_frame_with_timeout_expires_on_a_stalled_reader() {
        struct NeverReadyReader;

        impl tokio::io::AsyncRead for NeverReadyReader {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Pending
            }
        }

        let mut reader = NeverReadyReader;
        let result =
            read_frame_with_timeout(&mut reader, 1024, std::time::Duration::from_millis(50)).await;

        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn malformed_json_payload_is_malformed_frame() {
        let err = Message::decode(MessageType::FileInfo, b"not json").unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }
}
