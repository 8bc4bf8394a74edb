//! Public per-service TCP listener, one per `CREATE_FORWARD_SERVER` request.
//!
//! Mirrors `ForwardServ` in the original implementation: accepts user
//! connections in a loop, records each one under its remote-address string
//! (fID), and notifies the owning client's control connection so it can
//! dial in a paired data connection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use tunnel_core::{bind, ConnType, CreateConnData, Envelope, Operation, TunnelResult};

use crate::records::ClientRecord;

/// A forward listener's public TCP accept loop and queued-connection
/// registry.
pub struct ForwardListener {
    port: u16,
    client_id: String,
    server_id: String,
    queued: Mutex<HashMap<String, TcpStream>>,
    cancel_tx: mpsc::Sender<()>,
}

impl ForwardListener {
    /// Bind `ip:port` and spawn its accept loop.
    ///
    /// Accepted connections are recorded under their remote address
    /// **before** the `CREATE_FORWARD_CONN` notification is sent to the
    /// client, so the client's reply can never race the enqueue.
    pub async fn bind_and_run(
        ip: &str,
        port: u16,
        client_id: String,
        server_id: String,
        client_record: Arc<ClientRecord<mpsc::UnboundedSender<Envelope>>>,
    ) -> TunnelResult<Arc<Self>> {
        let tcp_listener = bind(ip, port).await?;
        let actual_port = tcp_listener.local_addr().map(|a| a.port()).unwrap_or(port);
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>(1);
        let this = Arc::new(Self {
            port: actual_port,
            client_id: client_id.clone(),
            server_id: server_id.clone(),
            queued: Mutex::new(HashMap::new()),
            cancel_tx,
        });
        info!(port = actual_port, client_id = %client_id, server_id = %server_id, "forward listener bound");
        let accept_this = this.clone();
        tokio::spawn(async move {
            accept_this.accept_loop(tcp_listener, cancel_rx, client_record).await;
        });
        Ok(this)
    }

    async fn accept_loop(
        &self,
        tcp_listener: tokio::net::TcpListener,
        mut cancel_rx: mpsc::Receiver<()>,
        client_record: Arc<ClientRecord<mpsc::UnboundedSender<Envelope>>>,
    ) {
        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    debug!(port = self.port, "forward listener accept loop cancelled");
                    break;
                }
                result = tcp_listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let forward_id = peer_addr.to_string();
                            info!(port = self.port, forward_id = %forward_id, "inbound user connection");
                            self.queued.lock().await.insert(forward_id.clone(), stream);
                            self.notify_client(&client_record, forward_id).await;
                        }
                        Err(e) => {
                            warn!(port = self.port, error = %e, "forward listener accept failed");
                            break;
                        }
                    }
                }
            }
        }
        self.clear().await;
    }

    async fn notify_client(
        &self,
        client_record: &ClientRecord<mpsc::UnboundedSender<Envelope>>,
        forward_id: String,
    ) {
        let Ok(data) = CreateConnData::new(self.port.to_string(), forward_id).to_json() else {
            warn!(port = self.port, "failed to encode CreateConnData");
            return;
        };
        let envelope = Envelope::new(
            self.client_id.clone(),
            ConnType::Control,
            Operation::CreateForwardConn,
            0,
            "",
            data,
        );
        match client_record.get(&self.client_id).await {
            Ok(sender) => {
                if sender.send(envelope).is_err() {
                    warn!(client_id = %self.client_id, "control connection channel closed");
                }
            }
            Err(e) => warn!(client_id = %self.client_id, error = %e, "client record lookup failed"),
        }
    }

    /// Take the queued connection for `forward_id`, if still present.
    pub async fn take(&self, forward_id: &str) -> Option<TcpStream> {
        self.queued.lock().await.remove(forward_id)
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the listener's accept loop and every queued, never-claimed
    /// user connection.
    pub async fn close(&self) {
        let _ = self.cancel_tx.send(()).await;
    }

    async fn clear(&self) {
        self.queued.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream as TokioTcpStream;

    #[tokio::test]
    async fn accepts_and_queues_connections_then_notifies_owner() {
        let client_record = Arc::new(ClientRecord::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        client_record.add("client-1".to_string(), tx).await;

        let listener = ForwardListener::bind_and_run(
            "127.0.0.1",
            0,
            "client-1".to_string(),
            "server-1".to_string(),
            client_record,
        )
        .await
        .unwrap();

        let conn = TokioTcpStream::connect(("127.0.0.1", listener.port()))
            .await
            .unwrap();
        let expected_fid = conn.local_addr().unwrap().to_string();

        let envelope = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.client_id, "client-1");
        assert_eq!(envelope.operation, Operation::CreateForwardConn);
        let data = CreateConnData::from_json(&envelope.data).unwrap();
        assert_eq!(data.forward_server_id, listener.port().to_string());
        assert_eq!(data.forward_id, expected_fid);

        assert!(listener.take(&expected_fid).await.is_some());
        assert!(listener.take(&expected_fid).await.is_none());
    }

    #[tokio::test]
    async fn close_ends_accept_loop_and_clears_queue() {
        let client_record = Arc::new(ClientRecord::new());
        let (tx, _rx) = mpsc::unbounded_channel::<Envelope>();
        client_record.add("client-1".to_string(), tx).await;

        let listener = ForwardListener::bind_and_run(
            "127.0.0.1",
            0,
            "client-1".to_string(),
            "server-1".to_string(),
            client_record,
        )
        .await
        .unwrap();
        let port = listener.port();

        listener.close().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(TokioTcpStream::connect(("127.0.0.1", port)).await.is_err());
    }
}
