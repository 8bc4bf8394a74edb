//! Thin TCP socket primitives.
//!
//! Exists to give the control/forward subsystem a narrow seam to depend on
//! so splice and the connection wrapper are written against
//! `tokio::io::{AsyncRead, AsyncWrite}` rather than directly against
//! `TcpStream`. Mirrors `pkg/core/tcp` in the original implementation.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{TunnelError, TunnelResult};

/// Connect timeout used by [`dial`], matching the original's `DialTimeout`.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind a TCP listener on `ip:port`. Callers map the error to the
/// `BindFailed` kind (it's returned as-is here since the caller usually
/// needs to attach extra context, e.g. an error code).
pub async fn bind(ip: &str, port: u16) -> TunnelResult<TcpListener> {
    TcpListener::bind((ip, port))
        .await
        .map_err(|e| TunnelError::BindFailed(format!("{ip}:{port}: {e}")))
}

/// Connect to `ip:port` with a bounded timeout.
pub async fn dial(ip: &str, port: u16) -> TunnelResult<TcpStream> {
    match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((ip, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TunnelError::DialFailed(format!("{ip}:{port}: {e}"))),
        Err(_) => Err(TunnelError::DialFailed(format!(
            "{ip}:{port}: timed out after {:?}",
            DIAL_TIMEOUT
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_then_dial_connects() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await });
        let stream = dial("127.0.0.1", port).await.unwrap();
        let (accepted, _) = accept.await.unwrap().unwrap();
        assert_eq!(
            stream.local_addr().unwrap(),
            accepted.peer_addr().unwrap()
        );
    }

    #[tokio::test]
    async fn dial_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = dial("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, TunnelError::DialFailed(_)));
    }
}
