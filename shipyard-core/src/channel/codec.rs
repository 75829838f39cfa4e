//! Wire framing
//!
//! Each frame is length-prefixed (4 bytes, big endian) and laid out as:
//!
//! ```text
//! +------+-------------+----------------+---------+
//! | kind | channel len | channel (utf8) | payload |
//! |  u8  |   u16 BE    |                |   ...   |
//! +------+-------------+----------------+---------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::channel::error::ChannelError;
use crate::channel::packet::{MessageKind, Packet};

/// Upper bound on a single frame (artifact chunks travel over HTTP, not here)
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 3;

#[derive(Debug)]
pub struct PacketCodec {
    frames: LengthDelimitedCodec,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
        }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, ChannelError> {
        let Some(mut frame) = self.frames.decode(src)? else {
            return Ok(None);
        };

        if frame.len() < HEADER_LEN {
            return Err(ChannelError::MalformedFrame(format!(
                "frame of {} bytes is shorter than the header",
                frame.len()
            )));
        }

        let kind = MessageKind::from_byte(frame.get_u8())?;
        let channel_len = frame.get_u16() as usize;
        if frame.len() < channel_len {
            return Err(ChannelError::MalformedFrame(format!(
                "channel name length {} exceeds remaining {} bytes",
                channel_len,
                frame.len()
            )));
        }

        let channel = frame.split_to(channel_len);
        let channel = String::from_utf8(channel.to_vec())
            .map_err(|e| ChannelError::MalformedFrame(format!("channel name: {}", e)))?;

        Ok(Some(Packet::new(channel, kind, frame.freeze())))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ChannelError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), ChannelError> {
        let channel = packet.channel().as_bytes();
        let channel_len = u16::try_from(channel.len()).map_err(|_| {
            ChannelError::MalformedFrame(format!("channel name too long: {} bytes", channel.len()))
        })?;

        let mut frame = BytesMut::with_capacity(HEADER_LEN + channel.len() + packet.payload().len());
        frame.put_u8(packet.kind().to_byte());
        frame.put_u16(channel_len);
        frame.put_slice(channel);
        frame.put_slice(packet.payload());

        self.frames.encode(frame.freeze(), dst)?;
        Ok(())
    }
}
