//! NetBIOS Session Service framing for SMB2 over TCP.
//!
//! Each message is prefixed with a 4-byte big-endian length.
//! The top byte is the message type (0x00 = session message).
//!
//! MS-SMB2 Section 2.1: Transport

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Error, Result};

/// Maximum frame size we'll accept (8 MB).
pub const MAX_FRAME_SIZE: u32 = 8 * 1024 * 1024;

/// Read a single NetBIOS-framed SMB2 message from the stream.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;

    // First byte is type (0 = session message), bytes 1-3 are length
    let len = u32::from_be_bytes(len_buf) & 0x00FF_FFFF;

    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", len),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write a single NetBIOS-framed SMB2 message to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Frame too large: {} bytes", data.len()),
        ));
    }
    stream.write_all(&(data.len() as u32).to_be_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

/// Receiving half of a transport: yields whole SMB2 messages.
pub trait FrameReader: Send {
    fn read_frame(&mut self) -> BoxFuture<'_, io::Result<Vec<u8>>>;
}

/// Sending half of a transport.
pub trait FrameWriter: Send {
    fn write_frame<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Close the sending direction; the peer sees end-of-stream.
    fn shutdown(&mut self) -> BoxFuture<'_, io::Result<()>>;
}

/// A byte pipe to an SMB2 server that can be split for a background reader.
pub trait Transport: Send {
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);
}

/// Any tokio byte stream (a `TcpStream`, a `DuplexStream` in tests...).
pub struct StreamTransport<S> {
    stream: S,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        StreamTransport { stream }
    }
}

struct StreamReader<S>(ReadHalf<S>);
struct StreamWriter<S>(WriteHalf<S>);

impl<S> FrameReader for StreamReader<S>
where
    S: AsyncRead + Send,
{
    fn read_frame(&mut self) -> BoxFuture<'_, io::Result<Vec<u8>>> {
        read_frame(&mut self.0).boxed()
    }
}

impl<S> FrameWriter for StreamWriter<S>
where
    S: AsyncWrite + Send,
{
    fn write_frame<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        write_frame(&mut self.0, data).boxed()
    }

    fn shutdown(&mut self) -> BoxFuture<'_, io::Result<()>> {
        AsyncWriteExt::shutdown(&mut self.0).boxed()
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (r, w) = tokio::io::split(self.stream);
        (Box::new(StreamReader(r)), Box::new(StreamWriter(w)))
    }
}

/// Open a TCP connection, bounded by `timeout`.
pub async fn connect_tcp(addr: SocketAddr, timeout: Duration) -> Result<StreamTransport<TcpStream>> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout(timeout))?
        .map_err(|e| Error::Connection(format!("connect to {}: {}", addr, e)))?;
    stream.set_nodelay(true)?;
    debug!("TCP connection established to {}", addr);
    Ok(StreamTransport::new(stream))
}
