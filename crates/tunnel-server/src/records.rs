//! Server-side registries: clientID → control connection, and
//! clientID → owned serverIDs → forward listener.
//!
//! Mirrors `ClientRecord`/`ControlRecord` in the original implementation;
//! `tokio::sync::RwLock` stands in for the original's `sync.RWMutex`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tunnel_core::{TunnelError, TunnelResult};

use crate::listener::ForwardListener;

/// clientID → control connection writer half.
///
/// The "connection" stored here is whatever the control server needs to
/// push unsolicited frames to a client (a `mpsc::Sender` of encoded
/// frames); see `control.rs` for the concrete type.
pub struct ClientRecord<C> {
    clients: RwLock<HashMap<String, C>>,
}

impl<C: Clone> ClientRecord<C> {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Last REGISTER wins: overwrites any prior entry for `client_id`.
    pub async fn add(&self, client_id: String, conn: C) {
        self.clients.write().await.insert(client_id, conn);
    }

    pub async fn get(&self, client_id: &str) -> TunnelResult<C> {
        self.clients
            .read()
            .await
            .get(client_id)
            .cloned()
            .ok_or_else(|| TunnelError::NotFound(format!("clientRecord not has {client_id}")))
    }

    /// Removes the entry. Does not close or otherwise affect the
    /// connection — the connection wrapper's close hook is what calls this.
    pub async fn del(&self, client_id: &str) {
        self.clients.write().await.remove(client_id);
    }
}

/// clientID → [serverIDs it owns], serverID → forward listener.
///
/// Invariant: every serverID appearing in `client_server` is present in
/// `server_map`, until [`ControlRecord::del`] removes both together.
pub struct ControlRecord {
    client_server: RwLock<HashMap<String, Vec<String>>>,
    server_map: RwLock<HashMap<String, Arc<ForwardListener>>>,
}

impl ControlRecord {
    pub fn new() -> Self {
        Self {
            client_server: RwLock::new(HashMap::new()),
            server_map: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_by_server_id(&self, server_id: &str) -> TunnelResult<Arc<ForwardListener>> {
        self.server_map
            .read()
            .await
            .get(server_id)
            .cloned()
            .ok_or_else(|| {
                TunnelError::NotFound(format!("serverID {server_id} not found in ControlRecord"))
            })
    }

    pub async fn add(&self, client_id: &str, server_id: &str, listener: Arc<ForwardListener>) {
        self.client_server
            .write()
            .await
            .entry(client_id.to_string())
            .or_default()
            .push(server_id.to_string());
        self.server_map
            .write()
            .await
            .insert(server_id.to_string(), listener);
    }

    /// For every serverID owned by `client_id`, close its listener and
    /// remove both map entries. Closes are initiated but not awaited to
    /// completion here.
    pub async fn del(&self, client_id: &str) {
        let server_ids = self.client_server.write().await.remove(client_id);
        let Some(server_ids) = server_ids else {
            return;
        };
        let mut server_map = self.server_map.write().await;
        for server_id in server_ids {
            if let Some(listener) = server_map.remove(&server_id) {
                tokio::spawn(async move { listener.close().await });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_record_add_get_del() {
        let record: ClientRecord<u32> = ClientRecord::new();
        record.add("abc".to_string(), 42).await;
        assert_eq!(record.get("abc").await.unwrap(), 42);
        record.del("abc").await;
        assert!(record.get("abc").await.is_err());
    }

    #[tokio::test]
    async fn client_record_last_register_wins() {
        let record: ClientRecord<u32> = ClientRecord::new();
        record.add("abc".to_string(), 1).await;
        record.add("abc".to_string(), 2).await;
        assert_eq!(record.get("abc").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn control_record_get_by_server_id_missing_is_not_found() {
        let record = ControlRecord::new();
        let err = record.get_by_server_id("nope").await.unwrap_err();
        assert!(matches!(err, TunnelError::NotFound(_)));
    }
}
