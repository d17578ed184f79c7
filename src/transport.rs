//! Framed socket I/O.
//!
//! The transport owns the TCP stream and speaks in whole protocol frames:
//! `send` writes one fully framed frontend message, `receive` returns one
//! complete backend message. A malformed frame (insane declared length, or
//! EOF before the declared payload arrives) fails the transport permanently;
//! no partial-frame recovery is attempted.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;

use crate::error::{PgError, PgResult};
use crate::protocol::{BackendMessage, FrontendMessage};

/// Sane upper bound on a single frame. The length field is a signed 32-bit
/// integer, but nothing this driver consumes legitimately approaches it.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// A framed, buffered connection to the server.
pub struct Transport {
    reader: BufReader<tokio::io::ReadHalf<TcpStream>>,
    writer: BufWriter<tokio::io::WriteHalf<TcpStream>>,
    /// Accumulates incoming bytes until at least one whole frame is present.
    read_buffer: BytesMut,
    /// Set on the first framing or I/O failure; everything after fails fast.
    broken: bool,
}

impl Transport {
    /// Open a TCP connection to the server. Nagle is disabled since the
    /// protocol is strictly request/response per statement.
    pub async fn connect(host: &str, port: u16) -> PgResult<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr).await.map_err(PgError::Io)?;
        stream.set_nodelay(true).map_err(PgError::Io)?;

        let (read_half, write_half) = tokio::io::split(stream);

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            read_buffer: BytesMut::with_capacity(32768),
            broken: false,
        })
    }

    /// Write one framed message and flush it to the socket.
    pub async fn send<M: FrontendMessage>(&mut self, msg: &M) -> PgResult<()> {
        self.buffer(msg).await?;
        self.flush().await
    }

    /// Write one framed message without flushing, so a statement's
    /// Parse..Sync sequence goes out in a single flush.
    pub async fn buffer<M: FrontendMessage>(&mut self, msg: &M) -> PgResult<()> {
        self.check_usable()?;
        let encoded = msg.encode();
        if let Err(e) = self.writer.write_all(&encoded).await {
            self.broken = true;
            return Err(PgError::Io(e));
        }
        Ok(())
    }

    /// Flush buffered messages to the socket.
    pub async fn flush(&mut self) -> PgResult<()> {
        self.check_usable()?;
        if let Err(e) = self.writer.flush().await {
            self.broken = true;
            return Err(PgError::Io(e));
        }
        Ok(())
    }

    /// Suspend until one complete frame is available and decode it.
    pub async fn receive(&mut self) -> PgResult<BackendMessage> {
        self.check_usable()?;

        loop {
            if self.read_buffer.len() >= 5 {
                let declared = i32::from_be_bytes([
                    self.read_buffer[1],
                    self.read_buffer[2],
                    self.read_buffer[3],
                    self.read_buffer[4],
                ]);

                // Length counts itself plus the payload, never the tag.
                if declared < 4 || declared as usize > MAX_MESSAGE_LEN {
                    self.broken = true;
                    return Err(PgError::Protocol(format!(
                        "frame declares insane length {}",
                        declared
                    )));
                }

                let total_len = 1 + declared as usize;
                if self.read_buffer.len() >= total_len {
                    let frame = self.read_buffer.split_to(total_len);
                    return BackendMessage::decode(&mut Bytes::from(frame)).map_err(|e| {
                        self.broken = true;
                        e
                    });
                }
            }

            let mut buf = [0u8; 4096];
            let n = match self.reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.broken = true;
                    return Err(PgError::Io(e));
                }
            };

            if n == 0 {
                // Stream closed mid-frame (or while waiting for one).
                self.broken = true;
                return Err(PgError::ConnectionClosed);
            }

            self.read_buffer.extend_from_slice(&buf[..n]);
        }
    }

    /// Sever the socket. All pending and future operations fail.
    pub async fn close(&mut self) {
        self.broken = true;
        let _ = self.writer.shutdown().await;
    }

    fn check_usable(&self) -> PgResult<()> {
        if self.broken {
            Err(PgError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}
