//! `tokio-util` codec over the core `<length>#<json>` framing.

use bytes::BytesMut;
use hashwire_core::frame::{encode_packet, Decoded, FrameDecoder, FrameError};
use hashwire_core::Packet;
use tokio_util::codec::{Decoder, Encoder};

/// Errors surfaced through `FramedRead` / `FramedWrite`.
///
/// Any of these ends the framed stream; per-frame payload errors travel
/// inside the decoded item instead.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("failed to encode packet: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Codec yielding one [`Decoded`] per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec {
    decoder: FrameDecoder,
}

impl WireCodec {
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(max_frame_length),
        }
    }
}

impl Decoder for WireCodec {
    type Item = Decoded;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.decoder.decode(src)?)
    }
}

impl Encoder<Packet> for WireCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_packet(&item, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use hashwire_core::Message;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FramedWrite::new(client, WireCodec::default());
        let mut reader = FramedRead::new(server, WireCodec::default());

        let message = Message::new("USER.GET_PROFILE", json!({"user": {"id": "u1"}}))
            .unwrap()
            .with_id("1");
        writer.send(Packet::Request(message.clone())).await.unwrap();

        let decoded = reader.next().await.unwrap().unwrap().unwrap();
        assert_eq!(decoded, Packet::Request(message));
    }

    #[tokio::test]
    async fn payload_error_does_not_end_stream() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut reader = FramedRead::new(server, WireCodec::default());

        client
            .write_all(br#"3#{{{29#{"pattern":"A.B","data":null}"#)
            .await
            .unwrap();

        let first = reader.next().await.unwrap().unwrap();
        assert!(first.is_err());
        let second = reader.next().await.unwrap().unwrap().unwrap();
        assert!(matches!(second, Packet::Request(m) if m.pattern == "A.B"));
    }

    #[tokio::test]
    async fn invalid_prefix_ends_stream_with_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FramedRead::new(server, WireCodec::default());

        client.write_all(b"abc#{}").await.unwrap();

        let err = reader.next().await.unwrap().unwrap_err();
        assert!(matches!(err, CodecError::Frame(FrameError::InvalidLength { .. })));
    }
}
