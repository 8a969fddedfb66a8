//! Plumbing shared by both ends of a connection.

use crate::error::Result;

use std::io;

use bytes::{Bytes, BytesMut};
use futures::SinkExt;
use rxp_protocol::{Message, MessageCodec};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{BytesCodec, Encoder, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a message was not queued.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message does not fit the codec's limits.
    #[error("cannot encode message: {0}")]
    Encode(#[from] io::Error),
    /// The writer is gone.
    #[error("connection closed")]
    Closed,
}

/// Sending side of a connection.
///
/// Messages are encoded before they are queued, so the writer only ever
/// sees complete, valid frames and a message that cannot be framed fails
/// on its own without touching the stream.
#[derive(Clone, Debug)]
pub struct Outbound {
    frames: mpsc::UnboundedSender<Bytes>,
    codec: MessageCodec,
}

impl Outbound {
    /// Creates the sender and the queue [`write_frames`] drains.
    pub fn channel(codec: MessageCodec) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (frames, queued) = mpsc::unbounded_channel();
        (Self { frames, codec }, queued)
    }

    /// Encodes `message` into one frame.
    pub fn encode(&self, message: Message) -> io::Result<Bytes> {
        let mut codec = self.codec;
        let mut frame = BytesMut::new();
        codec.encode(message, &mut frame)?;
        Ok(frame.freeze())
    }

    /// Queues an encoded frame.
    pub fn queue(&self, frame: Bytes) -> std::result::Result<(), SendError> {
        self.frames.send(frame).map_err(|_| SendError::Closed)
    }

    /// Encodes and queues `message`.
    pub fn send(&self, message: Message) -> std::result::Result<(), SendError> {
        let frame = self.encode(message)?;
        self.queue(frame)
    }
}

/// Splits `stream` into a message reader and a raw frame writer.
pub fn split<S>(
    stream: S,
    codec: MessageCodec,
) -> (
    FramedRead<ReadHalf<S>, MessageCodec>,
    FramedWrite<WriteHalf<S>, BytesCodec>,
)
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    (
        FramedRead::new(reader, codec),
        FramedWrite::new(writer, BytesCodec::new()),
    )
}

/// Sole owner of the write half: sends queued frames one at a time until
/// the queue closes or `closing` fires, then fires `closing` itself.
pub async fn write_frames<W>(
    mut sink: FramedWrite<W, BytesCodec>,
    mut queued: mpsc::UnboundedReceiver<Bytes>,
    closing: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = loop {
        let frame = tokio::select! {
            () = closing.cancelled() => break Ok(()),
            frame = queued.recv() => match frame {
                Some(frame) => frame,
                None => break Ok(()),
            },
        };

        if let Err(err) = sink.send(frame).await {
            break Err(err.into());
        }
    };

    debug!("writer stopped");
    closing.cancel();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rxp_name::ResourceName;
    use rxp_protocol::{Data, Request};

    fn create(size: usize) -> Message {
        Request::Create {
            resource: ResourceName::parse("a/b").unwrap(),
            data: Data::new("text/plain", vec![b'x'; size]),
        }
        .into()
    }

    #[test]
    fn test_oversized_message_is_rejected_before_queueing() {
        let codec = MessageCodec::new().with_max_frame_size(128);
        let (outbound, mut queued) = Outbound::channel(codec);

        assert!(matches!(
            outbound.send(create(1024)),
            Err(SendError::Encode(_))
        ));
        assert!(queued.try_recv().is_err());

        outbound.send(create(8)).unwrap();
        assert!(queued.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_writer_sends_whole_frames() {
        let (local, remote) = tokio::io::duplex(1024);
        let (_frames, sink) = split(local, MessageCodec::new());
        let (mut reader, _sink) = split(remote, MessageCodec::new());
        let (outbound, queued) = Outbound::channel(MessageCodec::new());
        let closing = CancellationToken::new();
        let writer = tokio::spawn(write_frames(sink, queued, closing.clone()));

        outbound.send(create(8)).unwrap();
        outbound.send(Request::Ping.into()).unwrap();

        assert_eq!(reader.next().await.unwrap().unwrap(), create(8));
        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            Message::from(Request::Ping)
        );

        drop(outbound);
        writer.await.unwrap().unwrap();
        assert!(closing.is_cancelled());
    }
}
