//! tunnel-core: shared protocol library for the reverse TCP tunnel.
//!
//! Provides the wire envelope and payload types, the length-prefixed JSON
//! codec, a connection wrapper with re-armed read deadlines and an
//! idempotent close hook, a size-classed buffer pool, and the bidirectional
//! splice used to bridge a forward connection to its user connection.

pub mod bufpool;
pub mod codec;
pub mod conn;
pub mod error;
pub mod message;
pub mod splice;
pub mod tcp;

pub use codec::{decode_one, encode_one, write_one, FrameStream, HEADER_LEN, MAX_FRAME_LEN};
pub use conn::{CloseHook, Conn};
pub use error::{TunnelError, TunnelResult};
pub use message::{ConnType, CreateConnData, Envelope, Operation, UUID_LEN};
pub use splice::splice;
pub use tcp::{bind, dial, DIAL_TIMEOUT};
