//! Coordinator/participant protocol
//!
//! This module defines the messages exchanged between the coordinator and
//! participant clients. Messages are serialized with MessagePack (rmp-serde)
//! for a compact binary format with full serde feature support.
//!
//! # Message Flow
//!
//! ```text
//! Participant                    Coordinator
//!     |                              |
//!     |------ CONTRIBUTE(image) ---->|
//!     |<----- CONTRIBUTE_ACK --------|
//!     |                              |
//!     |------ FETCH_AGGREGATE ------>|
//!     |<----- AGGREGATE(image) ------|   (or ERROR, retryable while the
//!     |                              |    round is still filling up)
//! ```
//!
//! An operator client may additionally send RESET to clear the round.
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// Coordinator and participants must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum accepted message size (length prefix sanity check)
///
/// Contributions are single grayscale BMPs; anything near this limit is a
/// corrupt or hostile frame.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Protocol message
///
/// All messages exchanged between the coordinator and participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Contribution message (Participant → Coordinator)
    ///
    /// Carries one participant's grayscale BMP for the current round.
    Contribute(ContributeMessage),

    /// Contribution acknowledgment (Coordinator → Participant)
    ContributeAck(ContributeAckMessage),

    /// Aggregate request (Participant → Coordinator)
    FetchAggregate(FetchAggregateMessage),

    /// Aggregate response (Coordinator → Participant)
    ///
    /// Carries the pixel-wise mean of all contributions as BMP bytes.
    Aggregate(AggregateMessage),

    /// Round reset (Operator → Coordinator)
    ///
    /// Clears all stored contributions so a new round can begin.
    Reset,

    /// Reset acknowledgment (Coordinator → Operator)
    ResetAck,

    /// Error message (Coordinator → Participant)
    ///
    /// `retryable` marks transient conditions (round still filling up);
    /// participants may poll again. Non-retryable errors should be surfaced
    /// to the operator.
    Error(ErrorMessage),
}

/// Contribution message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributeMessage {
    /// Protocol version (must match)
    pub protocol_version: u32,

    /// Participant identifier (hostname by default)
    pub participant_id: String,

    /// Raw BMP bytes of the participant's local image
    pub image: Vec<u8>,
}

/// Contribution acknowledgment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributeAckMessage {
    /// Whether the contribution was stored
    pub accepted: bool,

    /// Contributions stored so far this round (including this one)
    pub contributions: usize,
}

/// Aggregate request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchAggregateMessage {
    /// Protocol version (must match)
    pub protocol_version: u32,

    /// Requesting participant identifier (for coordinator logs)
    pub participant_id: String,
}

/// Aggregate response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMessage {
    /// Raw BMP bytes of the averaged image
    pub image: Vec<u8>,

    /// Number of contributions included in the mean
    pub contributions: usize,
}

/// Error message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error description
    pub error: String,

    /// Whether the requester may retry later
    pub retryable: bool,
}

/// Serialize a message to bytes
///
/// Uses MessagePack and prepends a 4-byte length field for framing.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg).context("Failed to serialize message")?;

    let msg_len = msg_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Deserialize a message from bytes
///
/// Expects a 4-byte length prefix followed by a MessagePack message.
///
/// # Returns
///
/// Returns (message, bytes_consumed) where bytes_consumed includes the
/// length prefix.
pub fn deserialize_message(buf: &[u8]) -> Result<(Message, usize)> {
    if buf.len() < 4 {
        anyhow::bail!(
            "Buffer too small for message length (need 4 bytes, got {})",
            buf.len()
        );
    }

    let msg_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + msg_len {
        anyhow::bail!(
            "Incomplete message (need {} bytes, got {})",
            4 + msg_len,
            buf.len()
        );
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + msg_len])
        .context("Failed to deserialize message")?;

    Ok((msg, 4 + msg_len))
}

/// Read a complete message from a TCP stream
///
/// Reads the length prefix, then reads the complete message body.
pub async fn read_message(stream: &mut tokio::net::TcpStream) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read message length")?;

    let msg_len = u32::from_le_bytes(len_buf) as usize;

    if msg_len > MAX_MESSAGE_SIZE {
        anyhow::bail!(
            "Message too large: {} bytes (max {})",
            msg_len,
            MAX_MESSAGE_SIZE
        );
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream
        .read_exact(&mut msg_buf)
        .await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf).context("Failed to deserialize message")?;

    Ok(msg)
}

/// Write a message to a TCP stream
///
/// Serializes the message with length prefix and flushes immediately.
pub async fn write_message(stream: &mut tokio::net::TcpStream, msg: &Message) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let framed = serialize_message(msg)?;

    stream
        .write_all(&framed)
        .await
        .context("Failed to write message")?;

    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize_contribute() {
        let msg = Message::Contribute(ContributeMessage {
            protocol_version: PROTOCOL_VERSION,
            participant_id: "site-1".to_string(),
            image: vec![0x42, 0x4D, 0x00, 0x01],
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, consumed) = deserialize_message(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());

        match deserialized {
            Message::Contribute(contribute) => {
                assert_eq!(contribute.protocol_version, PROTOCOL_VERSION);
                assert_eq!(contribute.participant_id, "site-1");
                assert_eq!(contribute.image, vec![0x42, 0x4D, 0x00, 0x01]);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_serialize_deserialize_ack() {
        let msg = Message::ContributeAck(ContributeAckMessage {
            accepted: true,
            contributions: 3,
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, _) = deserialize_message(&bytes).unwrap();

        match deserialized {
            Message::ContributeAck(ack) => {
                assert!(ack.accepted);
                assert_eq!(ack.contributions, 3);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_serialize_deserialize_reset() {
        let bytes = serialize_message(&Message::Reset).unwrap();
        let (deserialized, consumed) = deserialize_message(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());
        assert!(matches!(deserialized, Message::Reset));
    }

    #[test]
    fn test_serialize_deserialize_error() {
        let msg = Message::Error(ErrorMessage {
            error: "round incomplete: 2 of 3 contributions received".to_string(),
            retryable: true,
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, _) = deserialize_message(&bytes).unwrap();

        match deserialized {
            Message::Error(err) => {
                assert!(err.retryable);
                assert!(err.error.contains("round incomplete"));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_message_framing() {
        let msg = Message::Reset;
        let bytes = serialize_message(&msg).unwrap();

        // Check length prefix
        assert!(bytes.len() >= 4);
        let msg_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + msg_len);
    }

    #[test]
    fn test_deserialize_truncated_buffer() {
        let bytes = serialize_message(&Message::Reset).unwrap();
        assert!(deserialize_message(&bytes[..2]).is_err());
        assert!(deserialize_message(&bytes[..bytes.len() - 1]).is_err());
    }
}
