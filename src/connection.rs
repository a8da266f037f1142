//! Framed TCP connection
//!
//! `FramedConnection` owns one live TCP stream and moves text frames over it.
//! It is not `Clone`: exactly one owner drives the stream, and
//! ownership moves from the listener (or connector) to whoever takes it next.
//!
//! Closing goes through a `CloseHandle`, which any task may hold. Firing it
//! wakes a pending `receive()` or `send()` on the owning task, which is how a
//! blocked reader gets unblocked from elsewhere.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::error::{AppError, AppResult};
use crate::frame::{FrameReader, FrameWriter};

/// Shared close signal for a connection (or any other stoppable loop)
///
/// Closing is idempotent; every clone observes the same state.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
        }
    }

    /// Fire the close signal
    ///
    /// Returns true only for the call that actually closed it.
    pub fn close(&self) -> bool {
        !self.signal.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.signal.borrow()
    }

    pub(crate) fn subscribe(&self) -> CloseSignal {
        CloseSignal {
            rx: self.signal.subscribe(),
        }
    }
}

impl Default for CloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a `CloseHandle`
#[derive(Debug, Clone)]
pub(crate) struct CloseSignal {
    rx: watch::Receiver<bool>,
}

impl CloseSignal {
    pub(crate) fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle has been closed
    pub(crate) async fn closed(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Every handle is gone, so nobody can close us any more.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Read side of a framed connection
#[derive(Debug)]
pub struct FramedReadHalf {
    frames: FrameReader<OwnedReadHalf>,
    closed: CloseSignal,
}

impl FramedReadHalf {
    /// Wait for the next complete frame
    ///
    /// `Ok(None)` means the stream ended: graceful peer shutdown, a
    /// zero-length frame, or a local close.
    pub async fn receive(&mut self) -> AppResult<Option<String>> {
        if self.closed.is_closed() {
            return Ok(None);
        }

        tokio::select! {
            biased;
            () = self.closed.closed() => Ok(None),
            frame = self.frames.read_frame() => frame,
        }
    }
}

/// Write side of a framed connection
#[derive(Debug)]
pub struct FramedWriteHalf {
    frames: FrameWriter<OwnedWriteHalf>,
    closed: CloseSignal,
    shut_down: bool,
}

impl FramedWriteHalf {
    /// Write one full frame
    ///
    /// Fails with `ConnectionClosed` if the connection is closed before or
    /// during the write.
    pub async fn send(&mut self, text: &str) -> AppResult<()> {
        if self.closed.is_closed() || self.shut_down {
            return Err(AppError::ConnectionClosed);
        }

        tokio::select! {
            biased;
            () = self.closed.closed() => Err(AppError::ConnectionClosed),
            result = self.frames.write_frame(text) => result,
        }
    }

    /// Shut down the write direction; repeated calls do nothing
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        // The peer may already be gone; nothing left to report.
        let _ = self.frames.shutdown().await;
    }
}

/// A live TCP stream carrying length-prefixed text frames
#[derive(Debug)]
pub struct FramedConnection {
    reader: FramedReadHalf,
    writer: FramedWriteHalf,
    peer_addr: SocketAddr,
    closer: CloseHandle,
}

impl FramedConnection {
    /// Take ownership of a connected stream
    pub fn new(stream: TcpStream, max_frame_size: u32) -> AppResult<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let closer = CloseHandle::new();
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FramedReadHalf {
                frames: FrameReader::new(read_half, max_frame_size),
                closed: closer.subscribe(),
            },
            writer: FramedWriteHalf {
                frames: FrameWriter::new(write_half, max_frame_size),
                closed: closer.subscribe(),
                shut_down: false,
            },
            peer_addr,
            closer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&mut self, text: &str) -> AppResult<()> {
        self.writer.send(text).await
    }

    pub async fn receive(&mut self) -> AppResult<Option<String>> {
        self.reader.receive().await
    }

    /// Handle that closes this connection from any task
    pub fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Close the connection
    ///
    /// Idempotent. Pending reads and writes are woken; the OS handle is
    /// released once the connection is dropped.
    pub async fn close(&mut self) {
        self.closer.close();
        self.writer.shutdown().await;
    }

    /// Split into independently owned halves plus the shared close handle
    pub fn into_parts(self) -> (FramedReadHalf, FramedWriteHalf, CloseHandle) {
        (self.reader, self.writer, self.closer)
    }
}
