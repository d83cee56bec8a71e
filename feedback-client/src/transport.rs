//! Stream framing over tokio: read one length-prefixed JSON frame, write one frame.

use feedback_core::wire::{self, FrameDecodeError, FrameEncodeError, LEN_SIZE};
use feedback_core::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Error reading a frame from the socket.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// Peer closed before a new frame header completed.
    #[error("connection closed")]
    Closed,
    /// Peer closed in the middle of a frame body.
    #[error("connection closed mid-frame ({read} of {expected} bytes)")]
    Truncated { read: usize, expected: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameDecodeError),
}

impl ReadError {
    /// Whether the connection must be dropped. Only a skippable frame error keeps it alive.
    pub fn is_fatal(&self) -> bool {
        match self {
            ReadError::Frame(e) => e.is_fatal(),
            _ => true,
        }
    }

    /// Peer went away cleanly, as opposed to protocol corruption or an I/O fault.
    pub fn is_closed(&self) -> bool {
        matches!(self, ReadError::Closed)
    }
}

/// Read exactly one frame. Partial reads are looped until the frame is complete.
/// Oversized or zero lengths are rejected before any body byte is read.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_SIZE];
    let mut filled = 0;
    while filled < LEN_SIZE {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            return Err(ReadError::Closed);
        }
        filled += n;
    }
    let len = wire::parse_len(len_buf)?;

    let mut body = vec![0u8; len];
    let mut read = 0;
    while read < len {
        let n = reader.read(&mut body[read..]).await?;
        if n == 0 {
            return Err(ReadError::Truncated { read, expected: len });
        }
        read += n;
    }
    Ok(wire::parse_body(&body)?)
}

/// Encode and write one frame, then flush.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<(), WriteError>
where
    W: AsyncWrite + Unpin,
{
    let frame = wire::encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedback_core::wire::{encode_frame, MAX_FRAME_LEN};
    use feedback_core::ChatMessage;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Reader that hands out at most one byte per poll.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.pos < self.data.len() && buf.remaining() > 0 {
                let b = self.data[self.pos];
                buf.put_slice(&[b]);
                self.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    fn sample() -> Message {
        Message::NewMessage(ChatMessage {
            id: "carol_0badf00d".into(),
            username: "carol".into(),
            content: Some("scanner flagged my build tool".into()),
            read_by_count: 1,
            total_users: 2,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn one_byte_at_a_time_matches_one_shot() {
        let frame = encode_frame(&sample()).unwrap();
        let mut slow = Trickle {
            data: frame.clone(),
            pos: 0,
        };
        let mut fast = &frame[..];
        let a = read_frame(&mut slow).await.unwrap();
        let b = read_frame(&mut fast).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, sample());
    }

    #[tokio::test]
    async fn empty_stream_is_closed_not_error() {
        let mut empty: &[u8] = &[];
        let err = read_frame(&mut empty).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn eof_inside_header_is_closed() {
        let mut short: &[u8] = &[0, 0];
        assert!(read_frame(&mut short).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn eof_inside_body_is_truncated() {
        let frame = encode_frame(&sample()).unwrap();
        let mut cut = &frame[..frame.len() - 3];
        let err = read_frame(&mut cut).await.unwrap_err();
        assert!(matches!(err, ReadError::Truncated { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn oversized_declared_length_reads_no_body() {
        let mut data = (MAX_FRAME_LEN + 1).to_be_bytes().to_vec();
        data.extend_from_slice(b"{\"type\":\"ping\"}");
        let mut reader = &data[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, ReadError::Frame(FrameDecodeError::TooLarge(_))));
        // Body bytes are still unread.
        assert_eq!(reader.len(), 15);
    }

    #[tokio::test]
    async fn unsupported_type_is_not_fatal_and_stream_continues() {
        let body = br#"{"type":"typing"}"#;
        let mut data = (body.len() as u32).to_be_bytes().to_vec();
        data.extend_from_slice(body);
        data.extend_from_slice(&encode_frame(&Message::Pong).unwrap());
        let mut reader = &data[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(read_frame(&mut reader).await.unwrap(), Message::Pong);
    }

    #[tokio::test]
    async fn write_then_read_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1);
        let msg = sample();
        let expected = msg.clone();
        let writer = tokio::spawn(async move { write_frame(&mut a, &msg).await });
        let got = read_frame(&mut b).await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(got, expected);
    }
}
