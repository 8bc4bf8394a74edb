//! The wire message envelope and its payload types.
//!
//! This is the sole on-wire form for the control protocol: every frame the
//! codec emits or consumes carries exactly one [`Envelope`].

use serde::{Deserialize, Serialize};

use crate::error::{TunnelError, TunnelResult};

/// Length of a UUID string in its canonical hyphenated form.
pub const UUID_LEN: usize = 36;

/// Which class of TCP connection an envelope was sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnType {
    #[serde(rename = "CONTROL")]
    Control,
    #[serde(rename = "FORWARD")]
    Forward,
}

/// Protocol operations carried by an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "REGISTER")]
    Register,
    #[serde(rename = "CREATE_FORWARD_CONN")]
    CreateForwardConn,
    #[serde(rename = "CREATE_FORWARD_SERVER")]
    CreateForwardServer,
    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
}

/// The message envelope exchanged between client and server.
///
/// Field names and casing match the wire contract exactly (`clientID`,
/// `conn_type`, `operation`, `error`, `error_info`, `data`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub conn_type: ConnType,
    pub operation: Operation,
    pub error: i32,
    pub error_info: String,
    pub data: String,
}

impl Envelope {
    pub fn new(
        client_id: impl Into<String>,
        conn_type: ConnType,
        operation: Operation,
        error: i32,
        error_info: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            conn_type,
            operation,
            error,
            error_info: error_info.into(),
            data: data.into(),
        }
    }

    /// Validate field-level invariants: `clientID` is either empty (not yet
    /// assigned) or exactly [`UUID_LEN`] characters. `conn_type` and
    /// `operation` are already restricted to known literals by their enum
    /// types, so there is nothing further to check there.
    pub fn validate(&self) -> TunnelResult<()> {
        if !self.client_id.is_empty() && self.client_id.len() != UUID_LEN {
            return Err(TunnelError::InvalidMessage(format!(
                "clientID {} is not {} characters",
                self.client_id, UUID_LEN
            )));
        }
        Ok(())
    }
}

/// Payload carried inside [`Envelope::data`] for `CREATE_FORWARD_CONN`.
///
/// `forward_server_id` is the public port (decimal) on server→client
/// messages and the opaque serverID on client→server messages;
/// `forward_id` is the queued user connection's remote-address string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConnData {
    pub forward_server_id: String,
    pub forward_id: String,
}

impl CreateConnData {
    pub fn new(forward_server_id: impl Into<String>, forward_id: impl Into<String>) -> Self {
        Self {
            forward_server_id: forward_server_id.into(),
            forward_id: forward_id.into(),
        }
    }

    pub fn validate(&self) -> TunnelResult<()> {
        if self.forward_server_id.is_empty() {
            return Err(TunnelError::InvalidMessage(
                "forward_server_id is empty".into(),
            ));
        }
        if self.forward_id.is_empty() {
            return Err(TunnelError::InvalidMessage("forward_id is empty".into()));
        }
        Ok(())
    }

    pub fn to_json(&self) -> TunnelResult<String> {
        serde_json::to_string(self).map_err(|e| TunnelError::Other(e.to_string()))
    }

    pub fn from_json(s: &str) -> TunnelResult<Self> {
        let data: Self =
            serde_json::from_str(s).map_err(|e| TunnelError::InvalidMessage(e.to_string()))?;
        data.validate()?;
        Ok(data)
    }
}
