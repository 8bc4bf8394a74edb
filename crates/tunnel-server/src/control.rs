//! Control server: accepts clients, dispatches protocol operations, wires
//! user connections to their paired data connections.
//!
//! Mirrors `ControlServ` in the original implementation. Every accepted TCP
//! connection runs the per-connection state machine from spec §4.5: NEW,
//! then CTRL or FWD_WAIT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};
use tunnel_core::{
    bind, decode_one, splice, write_one, ConnType, Conn, CreateConnData, Envelope, FrameStream,
    Operation, TunnelError, TunnelResult,
};
use uuid::Uuid;

use crate::listener::ForwardListener;
use crate::records::{ClientRecord, ControlRecord};

/// Read deadline on control connections: a client that misses two
/// heartbeat cadences (60s) is considered dead.
const CONTROL_READ_TIMEOUT: Duration = Duration::from_secs(60);

type EnvelopeSender = mpsc::UnboundedSender<Envelope>;

/// Shared server state plus the listening socket's accept loop.
pub struct ControlServer {
    ip: String,
    client_record: Arc<ClientRecord<EnvelopeSender>>,
    control_record: Arc<ControlRecord>,
}

impl ControlServer {
    pub fn new(ip: String) -> Arc<Self> {
        Arc::new(Self {
            ip,
            client_record: Arc::new(ClientRecord::new()),
            control_record: Arc::new(ControlRecord::new()),
        })
    }

    /// Bind the control port and accept connections until the listener
    /// errors or this future is dropped (e.g. raced against a shutdown
    /// signal by the caller).
    pub async fn run(self: Arc<Self>, port: u16) -> TunnelResult<()> {
        let listener = bind(&self.ip, port).await?;
        info!(ip = %self.ip, port, "control server listening");
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let this = self.clone();
                    tokio::spawn(
                        async move { this.handle_conn(stream, peer_addr).await }
                            .instrument(info_span!("control_conn", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    warn!(error = %e, "control server accept failed");
                    return Err(TunnelError::Io(e));
                }
            }
        }
    }

    async fn handle_conn(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        info!(peer = %peer_addr, "connection accepted");
        let mut conn = Conn::new(stream, Some(CONTROL_READ_TIMEOUT));

        loop {
            let envelope = match decode_one(&mut conn).await {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "connection closed before registration");
                    return;
                }
            };
            if envelope.operation != Operation::Register
                || !matches!(envelope.conn_type, ConnType::Control | ConnType::Forward)
            {
                warn!(?envelope.operation, ?envelope.conn_type, "ignoring non-register frame in NEW state");
                continue;
            }

            let client_id = Uuid::new_v4().to_string();
            let reply = Envelope::new(
                client_id.clone(),
                envelope.conn_type,
                Operation::Register,
                0,
                "",
                "",
            );
            if write_one(&mut conn, &reply).await.is_err() {
                return;
            }
            info!(client_id = %client_id, conn_type = ?envelope.conn_type, "registered");

            match envelope.conn_type {
                ConnType::Control => {
                    self.run_control(conn, client_id).await;
                }
                ConnType::Forward => {
                    self.run_forward_wait(conn, client_id).await;
                }
            }
            return;
        }
    }

    /// CTRL state: dispatch every subsequent frame by operation until the
    /// stream ends, then cascade cleanup of this client's records.
    async fn run_control(&self, conn: Conn, mut client_id: String) {
        let (read_half, write_half) = tokio::io::split(conn);
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        self.client_record.add(client_id.clone(), tx.clone()).await;

        let writer = tokio::spawn(async move {
            let mut write_half = write_half;
            while let Some(envelope) = rx.recv().await {
                if write_one(&mut write_half, &envelope).await.is_err() {
                    break;
                }
            }
        });

        let mut stream = FrameStream::new(read_half);
        while let Some(envelope) = stream.next().await {
            match envelope.operation {
                Operation::Register => {
                    // Edge case: treat as a fresh registration.
                    let new_id = Uuid::new_v4().to_string();
                    let reply = Envelope::new(
                        new_id.clone(),
                        ConnType::Control,
                        Operation::Register,
                        0,
                        "",
                        "",
                    );
                    self.client_record.add(new_id.clone(), tx.clone()).await;
                    client_id = new_id;
                    let _ = tx.send(reply);
                }
                Operation::CreateForwardServer => {
                    self.handle_create_forward_server(&client_id, &envelope, &tx)
                        .await;
                }
                Operation::Heartbeat => {
                    let reply = Envelope::new(
                        envelope.client_id.clone(),
                        envelope.conn_type,
                        Operation::Heartbeat,
                        0,
                        "",
                        "",
                    );
                    let _ = tx.send(reply);
                }
                Operation::CreateForwardConn => {
                    // Only valid over FORWARD connections; ignored here.
                    warn!(client_id = %client_id, "CREATE_FORWARD_CONN ignored on control connection");
                }
            }
        }

        self.client_record.del(&client_id).await;
        self.control_record.del(&client_id).await;
        drop(tx);
        let _ = writer.await;
        info!(client_id = %client_id, "control connection closed");
    }

    async fn handle_create_forward_server(
        &self,
        client_id: &str,
        envelope: &Envelope,
        tx: &EnvelopeSender,
    ) {
        let requested_data = envelope.data.clone();
        let (error, error_info) = match self.try_create_forward_server(client_id, &requested_data).await {
            Ok(()) => (0, String::new()),
            Err((code, msg)) => (code, msg),
        };
        let reply = Envelope::new(
            client_id.to_string(),
            ConnType::Control,
            Operation::CreateForwardServer,
            error,
            error_info,
            requested_data,
        );
        let _ = tx.send(reply);
    }

    /// Returns `Ok(())` on success, or `Err((error_code, error_info))` using
    /// the codes from spec §4.5: 1 = bad integer, 2 = port out of range,
    /// 3 = bind failure.
    async fn try_create_forward_server(
        &self,
        client_id: &str,
        data: &str,
    ) -> Result<(), (i32, String)> {
        let requested: i64 = data
            .parse::<i64>()
            .map_err(|_| (1, format!("{data} is not a valid port integer")))?;
        let port = u16::try_from(requested)
            .map_err(|_| (2, format!("{requested} is out of the valid port range")))?;

        let server_id = Uuid::new_v4().to_string();
        let listener = ForwardListener::bind_and_run(
            &self.ip,
            port,
            client_id.to_string(),
            server_id.clone(),
            self.client_record.clone(),
        )
        .await
        .map_err(|e| (3, e.to_string()))?;

        // The control record is keyed by the decimal port string, not the
        // listener's internal serverID: that's the value the client gets
        // back in CREATE_FORWARD_CONN (`forward_server_id`) and echoes
        // verbatim on its own FORWARD connection, so the lookup on the way
        // back in must use the same string.
        let actual_port = listener.port().to_string();
        self.control_record
            .add(client_id, &actual_port, listener.clone())
            .await;
        info!(client_id = %client_id, port, server_id = %server_id, "forward server created");
        Ok(())
    }

    /// FWD_WAIT state: accept exactly one `CREATE_FORWARD_CONN` over a
    /// FORWARD connection, then splice it to its queued user connection.
    async fn run_forward_wait(&self, mut conn: Conn, client_id: String) {
        loop {
            let envelope = match decode_one(&mut conn).await {
                Ok(e) => e,
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, "forward connection closed before data handoff");
                    return;
                }
            };
            if envelope.operation != Operation::CreateForwardConn
                || envelope.conn_type != ConnType::Forward
            {
                continue;
            }

            let data = match CreateConnData::from_json(&envelope.data) {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "malformed CreateConnData on forward connection");
                    return;
                }
            };
            let listener = match self.control_record.get_by_server_id(&data.forward_server_id).await
            {
                Ok(l) => l,
                Err(e) => {
                    warn!(error = %e, "forward connection references unknown serverID");
                    return;
                }
            };
            let user_conn = match listener.take(&data.forward_id).await {
                Some(c) => c,
                None => {
                    warn!(forward_id = %data.forward_id, "no queued user connection for forwardID");
                    return;
                }
            };
            info!(client_id = %client_id, forward_id = %data.forward_id, "splicing user connection");
            splice(conn, user_conn).await;
            return;
        }
    }
}
