//! Length-prefixed framing for gossip messages
//!
//! Frame layout: magic (4) + big-endian payload length (4) + JSON payload.
//!
//! Decoding stops at the frame boundary and yields the raw payload. Parsing
//! it into a [`Message`] is left to the reader, so one bad payload never
//! poisons the stream; only a broken header does.

use crate::network::message::{Message, MAGIC, MAX_MESSAGE_SIZE};
use crate::network::peer::NetworkError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 8;

/// Message codec for length-prefixed framing
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item.to_bytes()?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(NetworkError::FrameTooLarge(data.len()));
        }

        dst.reserve(HEADER_LEN + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = BytesMut;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least header
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        if src[..4] != MAGIC {
            return Err(NetworkError::InvalidMessage("invalid magic bytes".to_string()));
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(NetworkError::FrameTooLarge(len));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::Payload;

    #[test]
    fn test_message_codec() {
        let mut codec = MessageCodec;
        let msg = Message::start(6001, Payload::BroadcastNewNode(vec![6001, 6002]));

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(&buf[..4], &MAGIC);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Message::from_bytes(&frame).unwrap(), msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = MessageCodec;
        let mut full = BytesMut::new();
        codec
            .encode(Message::start(1, Payload::RequestBlockchain), &mut full)
            .unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 1..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_bad_payload_leaves_stream_aligned() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32(2);
        buf.put_slice(b"{}");
        codec
            .encode(Message::start(6001, Payload::RequestBlockchain), &mut buf)
            .unwrap();

        let bad = codec.decode(&mut buf).unwrap().unwrap();
        assert!(Message::from_bytes(&bad).is_err());

        let good = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Message::from_bytes(&good).unwrap().origin_port, 6001);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bad_magic_is_error() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::from(&b"XXXX\0\0\0\x02{}"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(NetworkError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_oversized_length_is_error() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32(u32::MAX);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(NetworkError::FrameTooLarge(_))
        ));
    }
}
