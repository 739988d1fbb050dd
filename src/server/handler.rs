//! Per-Connection Request Handler
//!
//! Runs on a pool worker for the lifetime of one client connection:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                Main Loop                     │
//! │                                              │
//! │  read bytes ─▶ parse RESP2 frame ─▶ decode   │
//! │  operation ─▶ storage call ─▶ write reply    │
//! │                                              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Commands on one connection are processed and answered strictly in receipt
//! order. A malformed RESP2 frame drops the connection (resynchronization is
//! undefined); a well-framed but invalid operation answers `-ERR <msg>` and
//! keeps serving. Every socket read and write is bounded by the configured
//! idle timeout, so a successful write always grants the peer a fresh
//! timeout budget.

use crate::config::RedisConfig;
use crate::protocol::{Op, ParseError, RespParser, RespValue};
use crate::storage::StorageService;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Slack allowed past `max_message_size` for framing overhead
const BUFFER_SLACK: usize = 1024;

/// A connection as it travels through the worker pool.
pub struct ClientConn {
    pub stream: TcpStream,
    pub addr: SocketAddr,
}

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),

    #[error("connection timed out")]
    TimedOut,

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("read buffer limit exceeded")]
    BufferFull,
}

/// Serves the RESP2 command surface over accepted connections.
pub struct RedisHandler {
    storage: Arc<StorageService>,
    max_message_size: usize,
    timeout: Option<Duration>,
}

impl RedisHandler {
    pub fn new(storage: Arc<StorageService>, cfg: &RedisConfig) -> Self {
        let timeout = match cfg.timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            storage,
            max_message_size: cfg.max_message_size,
            timeout,
        }
    }

    /// Runs the read-execute-respond loop until the client disconnects or an
    /// error ends the connection.
    pub async fn serve(&self, conn: ClientConn) -> Result<(), ConnectionError> {
        let ClientConn { stream, addr } = conn;
        let mut stream = BufWriter::new(stream);
        let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);
        let mut parser = RespParser::with_max_message_size(self.max_message_size);

        debug!(client = %addr, "client connected");

        loop {
            // Drain every complete frame already buffered before reading
            // more; pipelined commands are answered in order.
            while let Some((value, consumed)) = parser.parse(&buffer)? {
                buffer.advance(consumed);

                let response = match Op::from_value(value) {
                    Ok(op) => {
                        trace!(client = %addr, op = %op.kind(), "processing operation");
                        self.dispatch(op).await
                    }
                    // Well-framed but invalid operation: answer and continue.
                    Err(e) => RespValue::error(format!("ERR {}", e)),
                };

                self.write_response(&mut stream, addr, &response).await?;
            }

            if self.max_message_size > 0 && buffer.len() > self.max_message_size + BUFFER_SLACK {
                return Err(ConnectionError::BufferFull);
            }

            let n = self.read_more(&mut stream, addr, &mut buffer).await?;
            if n == 0 {
                if buffer.is_empty() {
                    debug!(client = %addr, "client disconnected");
                    return Ok(());
                }
                return Err(ConnectionError::UnexpectedEof);
            }
        }
    }

    /// Executes one operation against the storage service.
    async fn dispatch(&self, op: Op) -> RespValue {
        match op {
            Op::Get { key } => self.storage.get(&key).await,
            Op::Set { key, value } => match self.storage.set(key, value).await {
                Ok(()) => RespValue::ok(),
                Err(e) => RespValue::error(format!("ERR {}", e)),
            },
            Op::Delete { key } => match self.storage.delete(key).await {
                Ok(()) => RespValue::ok(),
                Err(e) => RespValue::error(format!("ERR {}", e)),
            },
            Op::Ping => RespValue::pong(),
        }
    }

    async fn read_more(
        &self,
        stream: &mut BufWriter<TcpStream>,
        addr: SocketAddr,
        buffer: &mut BytesMut,
    ) -> Result<usize, ConnectionError> {
        if buffer.capacity() - buffer.len() < 1024 {
            buffer.reserve(4096);
        }

        let read = stream.get_mut().read_buf(buffer);
        let n = match self.timeout {
            Some(t) => match tokio::time::timeout(t, read).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(client = %addr, "connection timed out during read");
                    return Err(ConnectionError::TimedOut);
                }
            },
            None => read.await?,
        };

        trace!(client = %addr, bytes = n, "read data");
        Ok(n)
    }

    async fn write_response(
        &self,
        stream: &mut BufWriter<TcpStream>,
        addr: SocketAddr,
        response: &RespValue,
    ) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        let write = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        };

        match self.timeout {
            Some(t) => match tokio::time::timeout(t, write).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(client = %addr, "connection timed out during write");
                    return Err(ConnectionError::TimedOut);
                }
            },
            None => write.await?,
        }

        trace!(client = %addr, bytes = bytes.len(), "sent response");
        Ok(())
    }
}
