//! Transfer protocol wire frames
//!
//! Frames exchanged over an established connection:
//! - Introduction: announces the attachments about to be sent
//! - ConnectionResponse: remote accept/reject decision
//! - Cancel: sender gave up, receiver should drop partial payloads
//!
//! Encoded as `[type][len][payload]` with a postcard payload. The format is
//! symmetric between peers of this implementation; it is not a cross-vendor
//! compatibility surface.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::protocol::types::{TextKind, WifiSecurityType};

/// Frame header size in bytes: 1 byte type + 4 byte length.
const FRAME_HEADER_LEN: usize = 5;

/// Frame type byte for wire format
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Introduction = 0x01,
    ConnectionResponse = 0x02,
    Cancel = 0x03,
}

impl TryFrom<u8> for FrameType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::Introduction),
            0x02 => Ok(FrameType::ConnectionResponse),
            0x03 => Ok(FrameType::Cancel),
            _ => Err(()),
        }
    }
}

/// Announced metadata for one text attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMetadata {
    pub id: i64,
    pub title: String,
    pub kind: TextKind,
    pub size: u64,
    /// Payload that will carry this attachment's bytes
    pub payload_id: i64,
}

/// Announced metadata for one file attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: i64,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub payload_id: i64,
}

/// Announced metadata for one Wi-Fi credentials attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiCredentialsMetadata {
    pub id: i64,
    pub ssid: String,
    pub security_type: WifiSecurityType,
    pub payload_id: i64,
}

/// First frame of a transfer: everything the sender intends to send,
/// in transmission order (texts, files, Wi-Fi credentials)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntroductionFrame {
    pub text_metadata: Vec<TextMetadata>,
    pub file_metadata: Vec<FileMetadata>,
    pub wifi_credentials_metadata: Vec<WifiCredentialsMetadata>,
    /// Ask the receiver to start the transfer on accept
    pub start_transfer: bool,
}

/// Remote side's decision on an announced transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Accept,
    Reject,
    NotEnoughSpace,
    UnsupportedAttachmentType,
    TimedOut,
    Unknown,
}

/// Accept/reject frame answering an introduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionResponseFrame {
    pub status: ResponseStatus,
}

/// Payload body of a Wi-Fi credentials attachment
///
/// The ssid and security type travel in the introduction frame; the secret
/// itself only travels inside the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub password: String,
    pub hidden_ssid: bool,
}

impl WifiCredentials {
    pub fn to_bytes(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_structured_payload(bytes)
    }
}

/// A protocol frame exchanged over a connection
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Introduction(IntroductionFrame),
    ConnectionResponse(ConnectionResponseFrame),
    Cancel,
}

impl Frame {
    /// Encode for transmission as `[type][len][payload]`
    pub fn encode(&self) -> Vec<u8> {
        let (frame_type, payload) = match self {
            Frame::Introduction(frame) => (
                FrameType::Introduction,
                postcard::to_allocvec(frame).expect("serialization should not fail"),
            ),
            Frame::ConnectionResponse(frame) => (
                FrameType::ConnectionResponse,
                postcard::to_allocvec(frame).expect("serialization should not fail"),
            ),
            Frame::Cancel => (FrameType::Cancel, Vec::new()),
        };
        encode_frame(frame_type as u8, &payload)
    }

    /// Decode a frame, requiring the bytes to contain exactly one frame
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(DecodeError::TooShort);
        }
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let total_len = FRAME_HEADER_LEN
            .checked_add(len)
            .ok_or(DecodeError::InvalidFormat)?;
        if bytes.len() < total_len {
            return Err(DecodeError::TooShort);
        }
        if bytes.len() != total_len {
            return Err(DecodeError::InvalidFormat);
        }

        let frame_type = FrameType::try_from(bytes[0])
            .map_err(|_| DecodeError::UnknownType(bytes[0]))?;
        let payload = &bytes[FRAME_HEADER_LEN..total_len];

        match frame_type {
            FrameType::Introduction => {
                Ok(Frame::Introduction(decode_structured_payload(payload)?))
            }
            FrameType::ConnectionResponse => {
                Ok(Frame::ConnectionResponse(decode_structured_payload(payload)?))
            }
            FrameType::Cancel => {
                if !payload.is_empty() {
                    return Err(DecodeError::InvalidFormat);
                }
                Ok(Frame::Cancel)
            }
        }
    }
}

fn encode_frame(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    bytes.push(frame_type);
    bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn decode_structured_payload<T>(payload: &[u8]) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
{
    let (frame, rest) = postcard::take_from_bytes::<T>(payload)
        .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;
    if !rest.is_empty() {
        return Err(DecodeError::InvalidPayload(format!(
            "trailing payload bytes: {}",
            rest.len()
        )));
    }
    Ok(frame)
}

/// Error decoding a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Invalid format
    InvalidFormat,
    /// Frame too short
    TooShort,
    /// Unknown frame type
    UnknownType(u8),
    /// Invalid payload
    InvalidPayload(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidFormat => write!(f, "invalid frame format"),
            DecodeError::TooShort => write!(f, "frame too short"),
            DecodeError::UnknownType(t) => write!(f, "unknown frame type: 0x{:02x}", t),
            DecodeError::InvalidPayload(e) => write!(f, "invalid payload: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_introduction() -> IntroductionFrame {
        IntroductionFrame {
            text_metadata: vec![TextMetadata {
                id: 1,
                title: "note".to_string(),
                kind: TextKind::Text,
                size: 4,
                payload_id: 100,
            }],
            file_metadata: vec![FileMetadata {
                id: 2,
                name: "photo.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                size: 1024,
                payload_id: 200,
            }],
            wifi_credentials_metadata: vec![WifiCredentialsMetadata {
                id: 3,
                ssid: "cafe".to_string(),
                security_type: WifiSecurityType::WpaPsk,
                payload_id: 300,
            }],
            start_transfer: true,
        }
    }

    #[test]
    fn test_introduction_roundtrip() {
        let frame = Frame::Introduction(sample_introduction());
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();

        match decoded {
            Frame::Introduction(intro) => {
                assert_eq!(intro.text_metadata.len(), 1);
                assert_eq!(intro.text_metadata[0].payload_id, 100);
                assert_eq!(intro.file_metadata[0].name, "photo.jpg");
                assert_eq!(intro.wifi_credentials_metadata[0].ssid, "cafe");
                assert!(intro.start_transfer);
            }
            _ => panic!("expected Introduction"),
        }
    }

    #[test]
    fn test_introduction_preserves_order() {
        let mut intro = IntroductionFrame::default();
        for i in 0..4 {
            intro.text_metadata.push(TextMetadata {
                id: i,
                title: format!("t{}", i),
                kind: TextKind::Text,
                size: 1,
                payload_id: 1000 + i,
            });
        }

        let encoded = Frame::Introduction(intro).encode();
        match Frame::decode(&encoded).unwrap() {
            Frame::Introduction(decoded) => {
                let ids: Vec<i64> = decoded.text_metadata.iter().map(|t| t.payload_id).collect();
                assert_eq!(ids, vec![1000, 1001, 1002, 1003]);
            }
            _ => panic!("expected Introduction"),
        }
    }

    #[test]
    fn test_connection_response_roundtrip() {
        for status in [
            ResponseStatus::Accept,
            ResponseStatus::Reject,
            ResponseStatus::NotEnoughSpace,
            ResponseStatus::UnsupportedAttachmentType,
            ResponseStatus::TimedOut,
            ResponseStatus::Unknown,
        ] {
            let encoded = Frame::ConnectionResponse(ConnectionResponseFrame { status }).encode();
            match Frame::decode(&encoded).unwrap() {
                Frame::ConnectionResponse(frame) => assert_eq!(frame.status, status),
                _ => panic!("expected ConnectionResponse"),
            }
        }
    }

    #[test]
    fn test_cancel_roundtrip() {
        let encoded = Frame::Cancel.encode();
        assert_eq!(Frame::decode(&encoded).unwrap(), Frame::Cancel);
    }

    #[test]
    fn test_decode_error_too_short() {
        let result = Frame::decode(&[0x01, 0, 0]);
        assert!(matches!(result, Err(DecodeError::TooShort)));
    }

    #[test]
    fn test_decode_error_unknown_type() {
        let bytes = vec![0xFF, 0, 0, 0, 0];
        let result = Frame::decode(&bytes);
        assert!(matches!(result, Err(DecodeError::UnknownType(0xFF))));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut encoded = Frame::Cancel.encode();
        encoded.push(0xAB);
        let result = Frame::decode(&encoded);
        assert!(matches!(result, Err(DecodeError::InvalidFormat)));
    }

    #[test]
    fn test_decode_error_truncated_payload() {
        let mut bytes = vec![0x01u8];
        bytes.extend_from_slice(&100u32.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 10]);
        let result = Frame::decode(&bytes);
        assert!(matches!(result, Err(DecodeError::TooShort)));
    }

    #[test]
    fn test_wifi_credentials_roundtrip() {
        let creds = WifiCredentials { password: "hunter2".to_string(), hidden_ssid: true };
        let bytes = creds.to_bytes();
        let decoded = WifiCredentials::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, creds);
    }
}
