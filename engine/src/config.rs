//! Ambient configuration (§1.1), grounded on the teacher's
//! `ProxyServerArgs` clap layout, trimmed to the knobs this engine owns:
//! pool sizing, connect timeout, default collation, and the TLS toggle.

use clap::Parser;

use crate::pool::PoolConfig;
use crate::protocol::mysql::charset::DEFAULT_COLLATION_ID;

#[derive(Parser, Debug, Clone)]
#[clap(name = "mysql-backend-engine", about = "backend-side MySQL protocol engine")]
pub struct EngineConfig {
    #[clap(long, default_value_t = 5)]
    pub pool_initial_size: u32,
    #[clap(long, default_value_t = 50)]
    pub pool_max_size: u32,
    #[clap(long, default_value_t = 3600)]
    pub pool_time_to_idle_secs: u64,
    #[clap(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,
    #[clap(long, default_value_t = DEFAULT_COLLATION_ID)]
    pub default_collation_id: u8,
    #[clap(long, default_value_t = false)]
    pub tls: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_initial_size: 5,
            pool_max_size: 50,
            pool_time_to_idle_secs: 3600,
            connect_timeout_ms: 5000,
            default_collation_id: DEFAULT_COLLATION_ID,
            tls: false,
        }
    }
}

impl EngineConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            initial_size: self.pool_initial_size,
            max_size: self.pool_max_size,
            time_to_idle_secs: self.pool_time_to_idle_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_teacher_shaped_pool_sizing() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.pool_initial_size, 5);
        assert_eq!(cfg.pool_max_size, 50);
    }
}
