//! Control client: dials the server, registers configured services, and
//! spawns forward-client workers on demand.
//!
//! Mirrors `ControlClient` in the original implementation. The outer
//! supervisor loop never gives up: dial failures and stream termination
//! both fall back to a fresh dial after a short sleep.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};
use tunnel_core::{dial, write_one, ConnType, CreateConnData, Envelope, FrameStream, Operation, TunnelResult};

use crate::config::ServiceConfig;
use crate::forward_client;

const DIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CREATE_SERVER_RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct ControlClient {
    server_ip: String,
    control_port: u16,
    services: Vec<ServiceConfig>,
}

impl ControlClient {
    pub fn new(server_ip: String, control_port: u16, services: Vec<ServiceConfig>) -> Self {
        Self {
            server_ip,
            control_port,
            services,
        }
    }

    /// Runs forever: dial, register, serve, and on any disconnect sleep and
    /// redial. Returns only if cancelled from the outside (e.g. a signal
    /// handler racing this future in a `tokio::select!`).
    pub async fn run(&self) {
        loop {
            match dial(&self.server_ip, self.control_port).await {
                Ok(stream) => {
                    info!(ip = %self.server_ip, port = self.control_port, "connected to server");
                    if let Err(e) = self.run_session(stream).await {
                        warn!(error = %e, "control session ended");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "dial failed, retrying");
                }
            }
            sleep(DIAL_RETRY_DELAY).await;
        }
    }

    async fn run_session(&self, stream: tokio::net::TcpStream) -> TunnelResult<()> {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

        let writer = tokio::spawn(async move {
            let mut write_half = write_half;
            while let Some(envelope) = rx.recv().await {
                if write_one(&mut write_half, &envelope).await.is_err() {
                    break;
                }
            }
        });

        let mut stream_reader = FrameStream::new(read_half);

        let register = Envelope::new("", ConnType::Control, Operation::Register, 0, "", "");
        if tx.send(register).is_err() {
            return Ok(());
        }

        let reply = match stream_reader.next().await {
            Some(e) if e.operation == Operation::Register => e,
            Some(_) => {
                warn!("expected REGISTER reply, got something else");
                drop(tx);
                let _ = writer.await;
                return Ok(());
            }
            None => {
                drop(tx);
                let _ = writer.await;
                return Ok(());
            }
        };
        let client_id = reply.client_id;
        info!(client_id = %client_id, "registered with server");

        for service in &self.services {
            let envelope = Envelope::new(
                client_id.clone(),
                ConnType::Control,
                Operation::CreateForwardServer,
                0,
                "",
                service.forward_port.to_string(),
            );
            let _ = tx.send(envelope);
        }

        let heartbeat_tx = tx.clone();
        let heartbeat_client_id = client_id.clone();
        let heartbeat_task = tokio::spawn(async move {
            loop {
                sleep(HEARTBEAT_INTERVAL).await;
                let envelope = Envelope::new(
                    heartbeat_client_id.clone(),
                    ConnType::Control,
                    Operation::Heartbeat,
                    0,
                    "",
                    "",
                );
                if heartbeat_tx.send(envelope).is_err() {
                    break;
                }
            }
        });

        // Retry timers for failed CREATE_FORWARD_SERVER requests: tracked so
        // they can be cancelled on teardown instead of firing into a dead
        // session (spec: "Under stream closure, retries are abandoned").
        let mut retry_tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        while let Some(envelope) = stream_reader.next().await {
            if !envelope.client_id.is_empty() && envelope.client_id != client_id {
                warn!(got = %envelope.client_id, want = %client_id, "clientID mismatch, ignoring");
                continue;
            }
            match envelope.operation {
                Operation::Register => {
                    warn!("unexpected REGISTER on an established control connection");
                }
                Operation::CreateForwardServer => {
                    if let Some(retry) = self.handle_create_forward_server_reply(&envelope, &tx) {
                        retry_tasks.push(retry);
                    }
                }
                Operation::CreateForwardConn => {
                    self.spawn_forward_worker(&envelope);
                }
                Operation::Heartbeat => {
                    // Acked by the server; our own 30s timer drives the next send.
                }
            }
        }

        heartbeat_task.abort();
        for retry in retry_tasks {
            retry.abort();
        }
        drop(tx);
        let _ = writer.await;
        Ok(())
    }

    fn handle_create_forward_server_reply(
        &self,
        envelope: &Envelope,
        tx: &mpsc::UnboundedSender<Envelope>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if envelope.error == 0 {
            info!(data = %envelope.data, "forward server created");
            return None;
        }
        warn!(data = %envelope.data, error_info = %envelope.error_info, "forward server creation failed, retrying in 30s");
        let retry_tx = tx.clone();
        let client_id = envelope.client_id.clone();
        let data = envelope.data.clone();
        Some(tokio::spawn(async move {
            sleep(CREATE_SERVER_RETRY_DELAY).await;
            let envelope = Envelope::new(client_id, ConnType::Control, Operation::CreateForwardServer, 0, "", data);
            let _ = retry_tx.send(envelope);
        }))
    }

    fn spawn_forward_worker(&self, envelope: &Envelope) {
        let data = match CreateConnData::from_json(&envelope.data) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "malformed CreateConnData in CREATE_FORWARD_CONN");
                return;
            }
        };
        let Some(service) = self.find_service(&data.forward_server_id) else {
            warn!(forward_server_id = %data.forward_server_id, "no local service configured for this forward port");
            return;
        };
        let service = service.clone();
        let server_ip = self.server_ip.clone();
        let server_port = self.control_port;
        tokio::spawn(async move {
            if let Err(e) = forward_client::run(
                &service.ip,
                service.port,
                &server_ip,
                server_port,
                data.forward_server_id,
                data.forward_id,
            )
            .await
            {
                warn!(error = %e, "forward worker failed");
            }
        });
    }

    fn find_service(&self, forward_port_decimal: &str) -> Option<&ServiceConfig> {
        let forward_port: u16 = forward_port_decimal.parse().ok()?;
        self.services.iter().find(|s| s.forward_port == forward_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_core::decode_one;

    fn service(ip: &str, port: u16, forward_port: u16) -> ServiceConfig {
        ServiceConfig {
            ip: ip.to_string(),
            port,
            forward_port,
        }
    }

    #[test]
    fn finds_service_by_decimal_forward_port() {
        let client = ControlClient::new(
            "1.2.3.4".to_string(),
            7000,
            vec![service("127.0.0.1", 22, 2222), service("127.0.0.1", 80, 8080)],
        );
        assert!(client.find_service("2222").is_some());
        assert!(client.find_service("9999").is_none());
        assert!(client.find_service("not-a-port").is_none());
    }

    #[tokio::test]
    async fn run_session_registers_then_returns_on_server_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let register = decode_one(&mut conn).await.unwrap();
            assert_eq!(register.operation, Operation::Register);
            let reply = Envelope::new(
                "11111111-1111-1111-1111-111111111111",
                ConnType::Control,
                Operation::Register,
                0,
                "",
                "",
            );
            write_one(&mut conn, &reply).await.unwrap();
            // Drain the CREATE_FORWARD_SERVER request the client sends next,
            // then close to end the session deterministically.
            let _ = decode_one(&mut conn).await;
        });

        let client = ControlClient::new(
            "127.0.0.1".to_string(),
            addr.port(),
            vec![service("127.0.0.1", 22, 2222)],
        );
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), client.run_session(stream)).await;
        assert!(result.is_ok());
        server_task.await.unwrap();
    }
}
