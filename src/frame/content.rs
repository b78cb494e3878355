//! Content-type sub-encoding.
//!
//! The first decrypted byte selects the content type; the remainder follows
//! a fixed, reversible per-type layout. Rekey envelopes (0x05) ride inside
//! ordinary encrypted frames so the relay cannot tell them from chat.

use crate::core::{
    InputError, CONTENT_TYPE_IMAGE, CONTENT_TYPE_REKEY, CONTENT_TYPE_SYSTEM, CONTENT_TYPE_TEXT,
    CONTENT_TYPE_VIDEO,
};

/// Content type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContentType {
    /// UTF-8 text message.
    Text = CONTENT_TYPE_TEXT,
    /// Image bytes (encoding opaque to the protocol).
    Image = CONTENT_TYPE_IMAGE,
    /// UTF-8 system notice.
    System = CONTENT_TYPE_SYSTEM,
    /// Video bytes (encoding opaque to the protocol).
    Video = CONTENT_TYPE_VIDEO,
    /// Serialized rekey envelope.
    Rekey = CONTENT_TYPE_REKEY,
}

impl ContentType {
    /// Parse a content type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            CONTENT_TYPE_TEXT => Some(Self::Text),
            CONTENT_TYPE_IMAGE => Some(Self::Image),
            CONTENT_TYPE_SYSTEM => Some(Self::System),
            CONTENT_TYPE_VIDEO => Some(Self::Video),
            CONTENT_TYPE_REKEY => Some(Self::Rekey),
            _ => None,
        }
    }

    /// The wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded application payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Text message.
    Text(String),
    /// Image bytes.
    Image(Vec<u8>),
    /// System notice.
    System(String),
    /// Video bytes.
    Video(Vec<u8>),
    /// JSON-serialized rekey envelope; opened by the rekey engine, never
    /// surfaced to the application.
    Rekey(Vec<u8>),
}

impl Content {
    /// The content type of this payload.
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Text(_) => ContentType::Text,
            Self::Image(_) => ContentType::Image,
            Self::System(_) => ContentType::System,
            Self::Video(_) => ContentType::Video,
            Self::Rekey(_) => ContentType::Rekey,
        }
    }

    /// Encode as `type_byte || body`.
    pub fn encode(&self) -> Vec<u8> {
        let body: &[u8] = match self {
            Self::Text(s) | Self::System(s) => s.as_bytes(),
            Self::Image(b) | Self::Video(b) | Self::Rekey(b) => b,
        };
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(self.content_type().as_byte());
        out.extend_from_slice(body);
        out
    }

    /// Decode from `type_byte || body`.
    ///
    /// # Errors
    /// `InvalidContent` on an empty buffer, unknown type byte, or invalid
    /// UTF-8 in a text-bearing type.
    pub fn decode(bytes: &[u8]) -> Result<Self, InputError> {
        let (&type_byte, body) = bytes.split_first().ok_or(InputError::InvalidContent)?;
        let content_type = ContentType::from_byte(type_byte).ok_or(InputError::InvalidContent)?;
        match content_type {
            ContentType::Text => String::from_utf8(body.to_vec())
                .map(Self::Text)
                .map_err(|_| InputError::InvalidContent),
            ContentType::System => String::from_utf8(body.to_vec())
                .map(Self::System)
                .map_err(|_| InputError::InvalidContent),
            ContentType::Image => Ok(Self::Image(body.to_vec())),
            ContentType::Video => Ok(Self::Video(body.to_vec())),
            ContentType::Rekey => Ok(Self::Rekey(body.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_bytes() {
        for (byte, ty) in [
            (0x01, ContentType::Text),
            (0x02, ContentType::Image),
            (0x03, ContentType::System),
            (0x04, ContentType::Video),
            (0x05, ContentType::Rekey),
        ] {
            assert_eq!(ContentType::from_byte(byte), Some(ty));
            assert_eq!(ty.as_byte(), byte);
        }
        assert_eq!(ContentType::from_byte(0x00), None);
        assert_eq!(ContentType::from_byte(0x06), None);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let cases = [
            Content::Text("hello".into()),
            Content::Image(vec![0xFF, 0xD8, 0xFF]),
            Content::System("alice joined".into()),
            Content::Video(vec![0x00, 0x00, 0x01]),
            Content::Rekey(br#"{"kind":"offer"}"#.to_vec()),
        ];
        for content in cases {
            let encoded = content.encode();
            assert_eq!(Content::decode(&encoded).unwrap(), content);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Content::decode(&[]).is_err());
        assert!(Content::decode(&[0x07, 0x01]).is_err());
        // Invalid UTF-8 in a text payload
        assert!(Content::decode(&[0x01, 0xFF, 0xFE]).is_err());
    }
}
