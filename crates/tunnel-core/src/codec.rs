//! Length-prefixed JSON framing for the tunnel control protocol.
//!
//! Wire format: `[4-byte big-endian length][N bytes of UTF-8 JSON envelope]`.
//! Header-first framing tolerates coalesced TCP reads; malformed JSON inside
//! a well-framed body is skipped rather than fatal, so one bad payload does
//! not tear down a control channel.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::error::{TunnelError, TunnelResult};
use crate::message::Envelope;

/// Length of the frame header, in bytes.
pub const HEADER_LEN: usize = 4;

/// Safety ceiling on a single frame's body length. The protocol's payloads
/// are small JSON envelopes; this only guards against a corrupt or hostile
/// length prefix.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Encode one envelope into a length-prefixed frame.
pub fn encode_one(envelope: &Envelope) -> TunnelResult<Vec<u8>> {
    let body = serde_json::to_vec(envelope).map_err(|e| TunnelError::Other(e.to_string()))?;
    let len = body.len() as u32;
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Encode one envelope and write it to `writer` in a single call.
pub async fn write_one<W: AsyncWrite + Unpin>(writer: &mut W, envelope: &Envelope) -> TunnelResult<()> {
    let frame = encode_one(envelope)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Read exactly one frame from `reader` and decode it.
///
/// Fails with an IO error on short read or closed stream, and with
/// [`TunnelError::MalformedFrame`] when the body isn't valid JSON. Exactly
/// one frame is consumed from `reader` on success.
pub async fn decode_one<R: AsyncRead + Unpin>(reader: &mut R) -> TunnelResult<Envelope> {
    let body = read_frame_body(reader).await?;
    parse_body(&body)
}

async fn read_frame_body<R: AsyncRead + Unpin>(reader: &mut R) -> TunnelResult<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(TunnelError::FrameTooLarge(len, MAX_FRAME_LEN));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

fn parse_body(body: &[u8]) -> TunnelResult<Envelope> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;
    envelope.validate()?;
    Ok(envelope)
}

/// A restartable-per-reader source of decoded envelopes.
///
/// Call [`FrameStream::next`] in a loop; it yields `Some(envelope)` for each
/// well-framed, well-formed message, silently skipping (and logging) frames
/// whose body isn't valid JSON or fails validation, and returns `None` once
/// the underlying reader errors or reaches EOF — a framing error terminates
/// the whole sequence rather than just the one frame.
pub struct FrameStream<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> FrameStream<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Yield the next valid envelope, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Envelope> {
        loop {
            let body = match read_frame_body(&mut self.reader).await {
                Ok(body) => body,
                Err(_) => return None,
            };
            match parse_body(&body) {
                Ok(envelope) => return Some(envelope),
                Err(e) => {
                    warn!(error = %e, "skipping malformed frame body");
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ConnType, Operation};
    use std::io::Cursor;

    fn sample(data: &str) -> Envelope {
        Envelope::new("", ConnType::Control, Operation::Register, 0, "", data)
    }

    #[tokio::test]
    async fn round_trip_single() {
        let env = sample("hello");
        let frame = encode_one(&env).unwrap();
        let mut cursor = Cursor::new(frame);
        let decoded = decode_one(&mut cursor).await.unwrap();
        assert_eq!(decoded, env);
    }

    #[tokio::test]
    async fn header_len_matches_body_len() {
        let env = sample("payload");
        let frame = encode_one(&env).unwrap();
        let declared = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(declared, frame.len() - HEADER_LEN);
    }

    #[tokio::test]
    async fn frame_stream_yields_concatenated_envelopes_in_order() {
        let envs = vec![sample("a"), sample("b"), sample("c")];
        let mut bytes = Vec::new();
        for e in &envs {
            bytes.extend(encode_one(e).unwrap());
        }
        let mut stream = FrameStream::new(Cursor::new(bytes));
        for expected in &envs {
            let got = stream.next().await.unwrap();
            assert_eq!(&got, expected);
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn frame_stream_skips_malformed_body_and_continues() {
        let good = sample("after-bad");
        let mut bytes = Vec::new();
        // A well-framed but non-JSON body.
        let junk = b"not json".to_vec();
        bytes.extend((junk.len() as u32).to_be_bytes());
        bytes.extend(junk);
        bytes.extend(encode_one(&good).unwrap());

        let mut stream = FrameStream::new(Cursor::new(bytes));
        let got = stream.next().await.unwrap();
        assert_eq!(got, good);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend((MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        let err = decode_one(&mut cursor).await.unwrap_err();
        assert!(matches!(err, TunnelError::FrameTooLarge(_, _)));
    }

    #[tokio::test]
    async fn short_read_is_io_error() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0]);
        let err = decode_one(&mut cursor).await.unwrap_err();
        assert!(matches!(err, TunnelError::Io(_)));
    }
}
