//! §3 "Server": external; host/port/display name, mutable status bitset, and
//! pool configuration. Grounded on the teacher's `BackendInstance`, trimmed
//! of the multi-tenant routing fields this engine doesn't consume.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ServerStatus: u32 {
        const RUNNING     = 0b0001;
        const MAINTENANCE = 0b0010;
        const DOWN        = 0b0100;
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub display_name: String,
    pub status: ServerStatus,
    /// §6 "persistpoolmax > 0 enables pool mode".
    pub persist_pool_max: u32,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16, display_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            display_name: display_name.into(),
            status: ServerStatus::RUNNING,
            persist_pool_max: 0,
        }
    }

    pub fn pool_mode_active(&self) -> bool {
        self.persist_pool_max > 0
    }

    pub fn mark_maintenance(&mut self) {
        self.status.insert(ServerStatus::MAINTENANCE);
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
