//! Bidirectional copy between two byte streams, with cascading close.
//!
//! Spawns two concurrent copiers (A→B and B→A). When either copier finishes
//! (EOF or error), it signals the other through a shared [`Notify`] and
//! shuts down its own write half; the other copier observes the signal on
//! its next read attempt and unwinds the same way. Mirrors `core.Forward`
//! in the original implementation, adapted to cooperative cancellation
//! since Rust's split read/write halves can't be force-closed out from
//! under a task blocked in a concurrent read the way a shared `net.Conn`
//! can in the original.

use std::sync::Arc;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::debug;

use crate::bufpool;

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Splice `a` and `b` together until either side's copy direction ends,
/// then tear down both. Returns once both copy tasks have exited.
pub async fn splice<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (a_read, a_write) = split(a);
    let (b_read, b_write) = split(b);
    let done = Arc::new(Notify::new());

    let h1 = tokio::spawn(copy_cancelable(a_read, b_write, done.clone()));
    let h2 = tokio::spawn(copy_cancelable(b_read, a_write, done));

    let _ = tokio::join!(h1, h2);
    debug!("splice ended");
}

/// Copy `from` → `to` until EOF, error, or a cancellation signal from the
/// other direction; in every case, shut `to` down exactly once before
/// returning and wake the other direction so it unwinds too.
async fn copy_cancelable<R, W>(mut from: R, mut to: W, done: Arc<Notify>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = bufpool::get(COPY_BUF_SIZE);
    loop {
        tokio::select! {
            biased;
            _ = done.notified() => break,
            result = from.read(&mut buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if to.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    done.notify_waiters();
    let _ = to.shutdown().await;
    bufpool::put(buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept, connect) = tokio::join!(listener.accept(), connect);
        (accept.unwrap().0, connect.unwrap())
    }

    #[tokio::test]
    async fn splice_bridges_both_directions() {
        let (user_a, mut user_b) = loopback_pair().await;
        let (svc_a, mut svc_b) = loopback_pair().await;

        tokio::spawn(splice(user_a, svc_a));

        user_b.write_all(b"hello\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = svc_b.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello\n");

        svc_b.write_all(b"world\n").await.unwrap();
        let n = user_b.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world\n");
    }

    #[tokio::test]
    async fn splice_ends_both_directions_when_one_side_closes() {
        let (user_a, user_b) = loopback_pair().await;
        let (svc_a, mut svc_b) = loopback_pair().await;

        let handle = tokio::spawn(splice(user_a, svc_a));

        drop(user_b);
        let mut buf = [0u8; 16];
        // The other direction observes EOF once splice shuts its half down.
        let n = svc_b.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        handle.await.unwrap();
    }
}
