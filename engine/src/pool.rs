//! §4.5 Pool re-use adapter + the `deadpool` manager backing it, grounded on
//! the teacher's `backend/pool/pooled_conn_mgr.rs` and `backend/pool/mod.rs`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deadpool::managed;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::connection::BackendConnection;
use crate::error::EngineError;
use crate::router::Router;
use crate::server::ServerConfig;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub initial_size: u32,
    pub max_size: u32,
    pub time_to_idle_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 5,
            max_size: 50,
            time_to_idle_secs: 3600,
        }
    }
}

/// Fixed credentials a pool authenticates new physical connections with.
/// The per-client identity swap on checkout happens afterwards via
/// `PoolReuseAdapter`, not here.
#[derive(Clone)]
pub struct PoolCredentials {
    pub user: String,
    pub password_sha1: Option<[u8; 20]>,
    pub db: Option<String>,
}

pub struct BackendPoolManager {
    /// Shared with every `BackendConnection` this manager creates (§7 "put
    /// the server into maintenance mode"), so a host-blocked auth failure on
    /// one connection is visible to the whole pool.
    server: Arc<Mutex<ServerConfig>>,
    credentials: PoolCredentials,
    authenticator: Arc<dyn Authenticator>,
    router: Arc<dyn Router>,
}

impl BackendPoolManager {
    pub fn new(
        server: ServerConfig,
        credentials: PoolCredentials,
        authenticator: Arc<dyn Authenticator>,
        router: Arc<dyn Router>,
    ) -> Self {
        Self {
            server: Arc::new(Mutex::new(server)),
            credentials,
            authenticator,
            router,
        }
    }
}

#[async_trait]
impl managed::Manager for BackendPoolManager {
    type Type = BackendConnection<tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf>;
    type Error = EngineError;

    async fn create(&self) -> Result<Self::Type, EngineError> {
        let addr = self.server.lock().unwrap().addr();
        let stream = TcpStream::connect(addr).await.map_err(|_| EngineError::SocketError)?;
        stream.set_nodelay(true).ok();
        let (rh, wh) = stream.into_split();

        let mut conn = BackendConnection::new(
            rh,
            wh,
            self.authenticator.clone(),
            self.router.clone(),
            0,
            self.credentials.user.clone(),
            self.credentials.password_sha1,
            self.credentials.db.clone(),
        );
        conn.set_server(self.server.clone());
        conn.run_auth_to_completion().await?;
        common::metrics::record_pool_miss();
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _metrics: &managed::Metrics,
    ) -> managed::RecycleResult<EngineError> {
        // §5 "shared resources" contract: only a connection that left the
        // engine COMPLETE, with no stored query, no ignore_reply, and empty
        // queues is eligible to go back into the pool.
        if !conn.ready_for_pool() {
            warn!("refusing to recycle backend connection not in pool-ready state");
            return Err(managed::RecycleError::Message(
                "connection not pool-ready".into(),
            ));
        }
        conn.was_persistent = true;
        common::metrics::record_pool_hit();
        debug!("recycled backend connection for pool reuse");
        Ok(())
    }
}

/// §4.5 pool re-use adapter. Runs on the first client write observed after
/// a connection is drawn from the idle pool.
pub struct PoolReuseAdapter;

impl PoolReuseAdapter {
    /// Returns the bytes to actually write to the backend (the synthetic
    /// `COM_CHANGE_USER`), or `None` if the write should be dropped/silently
    /// accepted per §4.5 steps 1-2.
    pub fn on_first_write(
        conn: &mut BackendConnection<impl tokio::io::AsyncRead + Unpin, impl tokio::io::AsyncWrite + Unpin>,
        first_write: Vec<u8>,
        user: &str,
        password_sha1: Option<&[u8]>,
        db: Option<&str>,
        charset: u16,
    ) -> Option<Vec<u8>> {
        use crate::auth::driver::AuthState;

        if !conn.polling || conn.auth_state() != AuthState::Complete {
            conn.was_persistent = false;
            return None;
        }

        if is_com_quit(&first_write) {
            conn.was_persistent = false;
            return None;
        }

        conn.stored_query = None;
        let password_sha1 = password_sha1.and_then(|p| {
            let mut fixed = [0u8; 20];
            if p.len() == 20 {
                fixed.copy_from_slice(p);
                Some(fixed)
            } else {
                None
            }
        });
        let change_user =
            conn.begin_change_user(user.to_string(), password_sha1, db.map(String::from), charset);
        conn.stored_query = Some(first_write);
        conn.was_persistent = false;
        Some(change_user)
    }
}

pub fn is_com_quit(buf: &[u8]) -> bool {
    buf.get(4) == Some(&(crate::protocol::mysql::constants::CommandCode::ComQuit as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn com_quit_detection_checks_command_byte_after_header() {
        let mut pkt = vec![1, 0, 0, 0];
        pkt.push(crate::protocol::mysql::constants::CommandCode::ComQuit as u8);
        assert!(is_com_quit(&pkt));
        pkt[4] = crate::protocol::mysql::constants::CommandCode::ComQuery as u8;
        assert!(!is_com_quit(&pkt));
    }
}
