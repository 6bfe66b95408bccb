//! Framed codec for agent communication.
//!
//! Uses LengthDelimitedCodec for framing (4-byte big-endian prefix) +
//! serde_json for the body. Works over any AsyncRead/AsyncWrite.

use std::io;

use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::protocol::Message;

/// Largest frame body accepted from the agent.
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Codec that frames [`Message`]s with a length prefix and serializes with JSON.
///
/// Framing failures are `io::Error`s and end the stream. A frame that arrives
/// intact but does not hold a valid message is yielded as `Some(Err(_))` so a
/// single bad body never tears down the connection.
pub struct MessageCodec {
    inner: LengthDelimitedCodec,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .big_endian()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Result<Message, serde_json::Error>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                tracing::trace!(frame_size_bytes = bytes.len(), "Decoded frame");
                Ok(Some(serde_json::from_slice(&bytes)))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(operate = %item.operate, json_size_bytes = json.len(), "Encoding frame");
        self.inner.encode(Bytes::from(json), dst)
    }
}
