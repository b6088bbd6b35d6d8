//! §6 "Router contract": the external component that chooses destination
//! backends and consumes `clientReply`. Grounded on the teacher's
//! `ProxyServer`/`CmdHandler` trait shape in `server/mod.rs` and
//! `server/cmd_handler.rs`, but with the signatures this spec names.

use async_trait::async_trait;
use bitflags::bitflags;

bitflags! {
    /// Router capability bitset influencing §4.3.a reassembly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RouterCapabilities: u32 {
        const STMT_OUTPUT       = 0b0001;
        const CONTIGUOUS_OUTPUT = 0b0010;
        const RESULTSET_OUTPUT  = 0b0100;
        const NO_RSESSION       = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    ReplyClient,
    NewConnection,
}

/// `Router` is the injectable destination for completed replies and the
/// handler of record for connection-level failures (§7 propagation policy:
/// "no kind is retried inside the engine; all recovery is delegated to the
/// router via handleError").
#[async_trait]
pub trait Router: Send + Sync {
    fn capabilities(&self) -> RouterCapabilities;

    /// Delivers one completed reply buffer to the session's client side.
    async fn client_reply(&self, session_id: u64, buffer: &[u8]);

    /// Returns `true` if the router recovered (e.g. rerouted to a spare
    /// backend); `false` means the caller should mark the session stopping.
    async fn handle_error(&self, session_id: u64, err_buffer: &[u8], action: ErrorAction) -> bool;
}

/// A router with no sibling backends to reroute to and no special output
/// shaping requirements; used in tests and as a minimal default.
pub struct NullRouter;

#[async_trait]
impl Router for NullRouter {
    fn capabilities(&self) -> RouterCapabilities {
        RouterCapabilities::CONTIGUOUS_OUTPUT
    }

    async fn client_reply(&self, _session_id: u64, _buffer: &[u8]) {}

    async fn handle_error(&self, _session_id: u64, _err_buffer: &[u8], _action: ErrorAction) -> bool {
        false
    }
}
