//! Packet value type

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::channel::error::ChannelError;

/// Message kind, carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// UTF-8 string
    Text,
    /// Opaque bytes
    Binary,
    /// UTF-8 encoded JSON object
    Structured,
}

impl MessageKind {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            MessageKind::Text => 0,
            MessageKind::Binary => 1,
            MessageKind::Structured => 2,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Result<Self, ChannelError> {
        match byte {
            0 => Ok(MessageKind::Text),
            1 => Ok(MessageKind::Binary),
            2 => Ok(MessageKind::Structured),
            other => Err(ChannelError::UnknownKind(other)),
        }
    }
}

/// A tagged message on one logical channel. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    channel: String,
    kind: MessageKind,
    payload: Bytes,
}

impl Packet {
    pub fn new(channel: impl Into<String>, kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            kind,
            payload: payload.into(),
        }
    }

    pub fn text(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(channel, MessageKind::Text, Bytes::from(text.into()))
    }

    pub fn binary(channel: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(channel, MessageKind::Binary, data)
    }

    /// Serialize `value` as a Structured (JSON) packet
    pub fn structured<T: Serialize>(
        channel: impl Into<String>,
        value: &T,
    ) -> Result<Self, ChannelError> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::new(channel, MessageKind::Structured, json))
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn as_text(&self) -> Result<&str, ChannelError> {
        self.expect_kind(MessageKind::Text)?;
        std::str::from_utf8(&self.payload)
            .map_err(|e| ChannelError::MalformedFrame(format!("text payload is not UTF-8: {}", e)))
    }

    /// Deserialize a Structured payload
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, ChannelError> {
        self.expect_kind(MessageKind::Structured)?;
        Ok(serde_json::from_slice(&self.payload)?)
    }

    fn expect_kind(&self, expected: MessageKind) -> Result<(), ChannelError> {
        if self.kind != expected {
            return Err(ChannelError::UnexpectedKind {
                expected,
                actual: self.kind,
            });
        }
        Ok(())
    }
}
