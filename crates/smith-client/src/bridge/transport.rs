//! Agent socket transport.
//!
//! The agent listens on a filesystem socket; the probe is always the
//! connecting side. Access control is left to the socket file's permissions.

use std::io;
use std::path::Path;

use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::MessageCodec;

pub type MessageReader = FramedRead<OwnedReadHalf, MessageCodec>;
pub type MessageWriter = FramedWrite<OwnedWriteHalf, MessageCodec>;

/// Connect to the agent and split the stream into framed halves.
pub async fn connect(path: &Path) -> io::Result<(MessageReader, MessageWriter)> {
    tracing::trace!(path = %path.display(), "Connecting to agent socket");
    let stream = UnixStream::connect(path).await?;
    Ok(split(stream))
}

pub fn split(stream: UnixStream) -> (MessageReader, MessageWriter) {
    let (read_half, write_half) = stream.into_split();
    (
        FramedRead::new(read_half, MessageCodec::new()),
        FramedWrite::new(write_half, MessageCodec::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{Message, Operate};
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = connect(&dir.path().join("absent.sock")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn framed_halves_exchange_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let (mut reader, mut writer) = connect(&path).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (mut agent_reader, mut agent_writer) = split(stream);

        writer
            .send(Message::new(Operate::Heartbeat, json!({"filter": ""})))
            .await
            .unwrap();
        let received = agent_reader.next().await.unwrap().unwrap().unwrap();
        assert_eq!(received.operate, Operate::Heartbeat);

        agent_writer
            .send(Message::new(Operate::Config, json!({"config": "x"})))
            .await
            .unwrap();
        let received = reader.next().await.unwrap().unwrap().unwrap();
        assert_eq!(received.data, json!({"config": "x"}));
    }
}
