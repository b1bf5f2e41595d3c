//! Wire protocol for zone links
//!
//! Every message is a 4-byte big-endian length followed by a postcard body.
//! A data session is `Hello`, `Welcome`, then `Record`/`Ack` pairs, closed
//! by `Done`. A probe session is `Probe` answered by `ProbeAck`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use segnet_core::Record;

use crate::error::{TransportError, TransportResult};

/// Maximum message size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Variant tag plus the varints of `seq` and the payload length, worst case
const RECORD_OVERHEAD: usize = 5 + 10 + 10;

/// Largest payload a single `Record` frame is guaranteed to carry
pub const MAX_RECORD_PAYLOAD: usize = MAX_MESSAGE_SIZE - RECORD_OVERHEAD;

/// Whether `record` can be sent over a link at all
pub fn fits_frame(record: &Record) -> bool {
    record.len() <= MAX_RECORD_PAYLOAD
}

/// Messages exchanged over one link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Opens a data session for one rule
    Hello {
        source: String,
        destination: String,
        port: u16,
    },

    /// The listener admitted the session
    Welcome,

    /// One payload unit
    Record { seq: u64, payload: Bytes },

    /// The receiving zone took the record with this seq
    Ack { seq: u64 },

    /// Segmentation probe, never carries payload
    Probe { id: u64 },

    ProbeAck { id: u64 },

    /// Graceful end of a data session
    Done,
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "hello",
            WireMessage::Welcome => "welcome",
            WireMessage::Record { .. } => "record",
            WireMessage::Ack { .. } => "ack",
            WireMessage::Probe { .. } => "probe",
            WireMessage::ProbeAck { .. } => "probe_ack",
            WireMessage::Done => "done",
        }
    }
}

impl From<&Record> for WireMessage {
    fn from(record: &Record) -> Self {
        WireMessage::Record {
            seq: record.seq,
            payload: record.payload.clone(),
        }
    }
}

/// Frame a message for transmission
pub fn frame_message(msg: &WireMessage) -> Result<Bytes, FramingError> {
    let serialized =
        postcard::to_allocvec(msg).map_err(|e| FramingError::Serialization(e.to_string()))?;

    if serialized.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge {
            size: serialized.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let len = serialized.len() as u32;
    let mut framed = Vec::with_capacity(4 + serialized.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&serialized);

    Ok(Bytes::from(framed))
}

/// Write one framed message
pub async fn write_message<W>(writer: &mut W, msg: &WireMessage) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = frame_message(msg)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message
///
/// Returns `None` if the peer closed the stream on a frame boundary.
pub async fn read_message<R>(reader: &mut R) -> TransportResult<Option<WireMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        }
        .into());
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::StreamClosed
        } else {
            e.into()
        }
    })?;

    let msg = postcard::from_bytes(&body).map_err(|e| FramingError::Deserialization(e.to_string()))?;
    Ok(Some(msg))
}

/// Errors that can occur during message framing
#[derive(Debug, Clone, thiserror::Error)]
pub enum FramingError {
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}
