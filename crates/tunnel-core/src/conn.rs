//! Connection wrapper: read-deadline injection and an idempotent close hook.
//!
//! Composition, not inheritance — the original embeds `net.Conn` to inherit
//! its surface; here the wrapper holds a `TcpStream` and forwards the
//! `AsyncRead`/`AsyncWrite` methods it needs explicitly, plus an explicit
//! close-hook registration API instead of a destructor-driven cleanup
//! chain.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::Sleep;

/// Called exactly once, the first time [`Conn::close`] succeeds.
pub type CloseHook = Box<dyn FnOnce() + Send>;

/// Wraps a [`TcpStream`] with an optional re-armed read deadline and a
/// one-shot close hook.
///
/// The server sets a 60-second read timeout on control connections to
/// detect dead peers via heartbeat absence; data connections carry no
/// timeout (`read_timeout: None`) since they must tolerate arbitrary idle
/// user traffic.
pub struct Conn {
    stream: TcpStream,
    read_timeout: Option<Duration>,
    sleep: Option<Pin<Box<Sleep>>>,
    close_hook: Mutex<Option<CloseHook>>,
    closed: AtomicBool,
}

impl Conn {
    pub fn new(stream: TcpStream, read_timeout: Option<Duration>) -> Self {
        Self {
            stream,
            read_timeout,
            sleep: None,
            close_hook: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Replace the close hook. Has no effect once the connection has
    /// already closed.
    pub fn set_close_hook(&self, hook: CloseHook) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        *self.close_hook.lock().unwrap() = Some(hook);
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }

    /// Idempotent close: the first call shuts down the socket and invokes
    /// the close hook (if any); later calls are no-ops returning success.
    pub async fn close(&mut self) -> std::io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // A write/shutdown on an already-dead socket is treated as success
        // (the peer is gone and will be cleaned up through other means),
        // not retried or surfaced.
        let _ = AsyncWriteExt::shutdown(&mut self.stream).await;
        if let Some(hook) = self.close_hook.lock().unwrap().take() {
            hook();
        }
        Ok(())
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if let Some(timeout) = this.read_timeout {
            let sleep = this
                .sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
            if sleep.as_mut().poll(cx).is_ready() {
                this.sleep = None;
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "read timed out",
                )));
            }
        }
        match Pin::new(&mut this.stream).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.sleep = None;
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
