//! Message framing: one JSON object per line, capped at [`MAX_FRAME_LEN`] bytes.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::Endpoint;
use crate::error::{ProtocolError, WireError};
use crate::shamir::Share;

pub const MAX_FRAME_LEN: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Trigger token; `callback` is set only in the push topology.
    Request {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        callback: Option<Endpoint>,
    },
    Share {
        share: Share,
    },
    /// Reconstructed secret, hex encoded.
    Secret {
        value: String,
    },
    Forwarded {
        dispatched: usize,
    },
    Failure {
        cause: Failure,
    },
}

/// Why a retrieval failed, carried back to the requester without losing its kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    QuorumTimeout {
        accepted: usize,
        threshold: usize,
        elapsed_ms: u64,
    },
    QuorumUnreachable {
        accepted: usize,
        pending: usize,
        threshold: usize,
    },
    Other {
        reason: String,
    },
}

impl From<&ProtocolError> for Failure {
    fn from(err: &ProtocolError) -> Self {
        match *err {
            ProtocolError::QuorumTimeout {
                accepted,
                threshold,
                elapsed,
            } => Failure::QuorumTimeout {
                accepted,
                threshold,
                elapsed_ms: elapsed.as_millis() as u64,
            },
            ProtocolError::QuorumUnreachable {
                accepted,
                pending,
                threshold,
            } => Failure::QuorumUnreachable {
                accepted,
                pending,
                threshold,
            },
            ref other => Failure::Other {
                reason: other.to_string(),
            },
        }
    }
}

impl From<Failure> for ProtocolError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::QuorumTimeout {
                accepted,
                threshold,
                elapsed_ms,
            } => ProtocolError::QuorumTimeout {
                accepted,
                threshold,
                elapsed: Duration::from_millis(elapsed_ms),
            },
            Failure::QuorumUnreachable {
                accepted,
                pending,
                threshold,
            } => ProtocolError::QuorumUnreachable {
                accepted,
                pending,
                threshold,
            },
            Failure::Other { reason } => ProtocolError::Remote(reason),
        }
    }
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request { .. } => "request",
            Message::Share { .. } => "share",
            Message::Secret { .. } => "secret",
            Message::Forwarded { .. } => "forwarded",
            Message::Failure { .. } => "failure",
        }
    }

    pub fn into_share(self) -> Result<Share, WireError> {
        match self {
            Message::Share { share } => Ok(share),
            other => Err(WireError::Unexpected {
                expected: "share",
                got: other.kind(),
            }),
        }
    }
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = serde_json::to_vec(message)?;
    if frame.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge { max: MAX_FRAME_LEN });
    }
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R>(reader: &mut R) -> Result<Message, WireError>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::new();
    (&mut *reader)
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_until(b'\n', &mut frame)
        .await?;

    if frame.last() != Some(&b'\n') {
        if frame.len() > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge { max: MAX_FRAME_LEN });
        }
        return Err(WireError::Closed);
    }
    frame.pop();
    Ok(serde_json::from_slice(&frame)?)
}

/// A framed TCP connection between two roles.
pub struct Connection {
    stream: BufReader<TcpStream>,
    peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer,
        }
    }

    pub async fn connect(endpoint: Endpoint, timeout: Duration) -> Result<Self, WireError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(endpoint.addr()))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        Ok(Self::new(stream, endpoint.addr()))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), WireError> {
        write_message(&mut self.stream, message).await
    }

    pub async fn recv(&mut self) -> Result<Message, WireError> {
        read_message(&mut self.stream).await
    }

    /// Writes bytes as-is, bypassing message encoding.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Waits until the peer closes its side, discarding anything it sends.
    pub async fn drain_until_closed(&mut self) {
        let mut sink = [0u8; 256];
        while let Ok(n) = self.stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    }
}
