//! Forward-client worker: bridges one forwarded user session.
//!
//! Mirrors `ForwardClient` in the original implementation. Transient: dials
//! the local service and a fresh data connection to the server, completes
//! the FORWARD registration handshake, then splices the two.

use tunnel_core::{decode_one, dial, splice, write_one, ConnType, CreateConnData, Envelope, Operation, TunnelError, TunnelResult};
use tracing::info;

/// Run one forward session to completion. `server_id` is the decimal
/// forward port as the server sent it; echoed back verbatim so the server
/// can look up the right listener.
pub async fn run(
    local_ip: &str,
    local_port: u16,
    server_ip: &str,
    server_port: u16,
    server_id: String,
    forward_id: String,
) -> TunnelResult<()> {
    let local_conn = dial(local_ip, local_port).await?;
    let mut server_conn = dial(server_ip, server_port).await?;

    let register = Envelope::new("", ConnType::Forward, Operation::Register, 0, "", "");
    write_one(&mut server_conn, &register).await?;

    let reply = loop {
        let envelope = decode_one(&mut server_conn).await?;
        if envelope.operation == Operation::Register {
            break envelope;
        }
    };
    let client_id = reply.client_id;

    let data = CreateConnData::new(server_id, forward_id.clone()).to_json()?;
    let create = Envelope::new(
        client_id,
        ConnType::Forward,
        Operation::CreateForwardConn,
        0,
        "",
        data,
    );
    write_one(&mut server_conn, &create).await?;

    info!(forward_id = %forward_id, "forward session established");
    splice(local_conn, server_conn).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn completes_handshake_and_bridges_bytes() {
        let local_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = local_listener.local_addr().unwrap();
        let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_listener.local_addr().unwrap();

        let local_task = tokio::spawn(async move {
            let (mut conn, _) = local_listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(&buf).await.unwrap();
        });

        let server_task = tokio::spawn(async move {
            let (mut conn, _) = server_listener.accept().await.unwrap();
            let register = decode_one(&mut conn).await.unwrap();
            assert_eq!(register.operation, Operation::Register);
            assert_eq!(register.conn_type, ConnType::Forward);
            let reply = Envelope::new("client-id-1234567890123456789012345", ConnType::Forward, Operation::Register, 0, "", "");
            write_one(&mut conn, &reply).await.unwrap();

            let create = decode_one(&mut conn).await.unwrap();
            assert_eq!(create.operation, Operation::CreateForwardConn);
            let data = CreateConnData::from_json(&create.data).unwrap();
            assert_eq!(data.forward_server_id, "2222");
            assert_eq!(data.forward_id, "fid-1");

            conn.write_all(b"hello").await.unwrap();
            let mut buf = [0u8; 5];
            conn.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
        });

        run(
            "127.0.0.1",
            local_addr.port(),
            "127.0.0.1",
            server_addr.port(),
            "2222".to_string(),
            "fid-1".to_string(),
        )
        .await
        .unwrap();

        local_task.await.unwrap();
        server_task.await.unwrap();
    }
}
