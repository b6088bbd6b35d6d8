//! Backend-side MySQL protocol engine: wire codec, auth driver, connection
//! state machine/reactor contract, session-command reassembler, and pool
//! re-use adapter for a multiplexing database proxy. See `SPEC_FULL.md` at
//! the workspace root for the full component design.

pub mod auth;
pub mod change_user;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod resultset;
pub mod router;
pub mod sescmd;
pub mod server;
pub mod session;

pub use config::EngineConfig;
pub use connection::BackendConnection;
pub use error::EngineError;
