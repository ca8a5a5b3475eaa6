use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// Which ledger client the binary talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerType {
    /// Ethereum JSON-RPC node with an unlocked sender account.
    JsonRpc,
    /// Log submissions and pretend they were included.
    Noop,
}

/// Base configuration for the app, read from flags or the environment.
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "pharmproof", version, about)]
pub struct BaseConfig {
    /// Address the HTTP API binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: String,

    /// Path for persistent storage (RocksDB).
    #[arg(long, env = "STORAGE_PATH", default_value = "./data")]
    pub storage_path: String,

    /// Poll cycles before a delivery times out.
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 60)]
    pub max_attempts: u32,

    /// Seconds between confirmation polls; must be at least 1.
    #[arg(
        long,
        env = "POLL_INTERVAL_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_secs: u64,

    /// Bound on a single confirmation endpoint query.
    #[arg(long, env = "QUERY_TIMEOUT_MS", default_value_t = 5000)]
    pub query_timeout_ms: u64,

    /// Bound on a single ledger submission, inclusion included.
    #[arg(long, env = "LEDGER_TIMEOUT_SECS", default_value_t = 120)]
    pub ledger_timeout_secs: u64,

    #[arg(long, env = "LEDGER", value_enum, default_value_t = LedgerType::Noop)]
    pub ledger: LedgerType,

    /// JSON-RPC endpoint of the ledger node.
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: Option<String>,

    /// Address of the delivery registry contract.
    #[arg(long, env = "CONTRACT_ADDRESS")]
    pub contract_address: Option<String>,

    /// Unlocked account the node sends transactions from.
    #[arg(long, env = "SENDER_ADDRESS")]
    pub sender_address: Option<String>,

    /// Interval between transaction receipt lookups.
    #[arg(long, env = "RECEIPT_POLL_MS", default_value_t = 1000)]
    pub receipt_poll_ms: u64,
}

impl Default for BaseConfig {
    fn default() -> Self {
        BaseConfig {
            bind_addr: "0.0.0.0:3000".to_string(),
            storage_path: "./data".to_string(),
            max_attempts: 60,
            poll_interval_secs: 60,
            query_timeout_ms: 5000,
            ledger_timeout_secs: 120,
            ledger: LedgerType::Noop,
            rpc_url: None,
            contract_address: None,
            sender_address: None,
            receipt_poll_ms: 1000,
        }
    }
}

/// Timing knobs of the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub query_timeout: Duration,
    pub ledger_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig::from(&BaseConfig::default())
    }
}

impl From<&BaseConfig> for ReconcilerConfig {
    fn from(config: &BaseConfig) -> Self {
        ReconcilerConfig {
            max_attempts: config.max_attempts,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            query_timeout: Duration::from_millis(config.query_timeout_ms),
            ledger_timeout: Duration::from_secs(config.ledger_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let parsed = BaseConfig::try_parse_from(["pharmproof"]).unwrap();
        let default = BaseConfig::default();
        assert_eq!(parsed.bind_addr, default.bind_addr);
        assert_eq!(parsed.max_attempts, 60);
        assert_eq!(parsed.poll_interval_secs, 60);
        assert_eq!(parsed.query_timeout_ms, 5000);
        assert_eq!(parsed.ledger, LedgerType::Noop);
    }

    #[test]
    fn test_flags_override_defaults() {
        let parsed = BaseConfig::try_parse_from([
            "pharmproof",
            "--max-attempts",
            "3",
            "--ledger",
            "json-rpc",
            "--rpc-url",
            "http://127.0.0.1:8545",
        ])
        .unwrap();
        assert_eq!(parsed.max_attempts, 3);
        assert_eq!(parsed.ledger, LedgerType::JsonRpc);
        assert_eq!(parsed.rpc_url.as_deref(), Some("http://127.0.0.1:8545"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = BaseConfig::try_parse_from(["pharmproof", "--poll-interval-secs", "0"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let parsed =
            BaseConfig::try_parse_from(["pharmproof", "--poll-interval-secs", "1"]).unwrap();
        assert_eq!(parsed.poll_interval_secs, 1);
    }

    #[test]
    fn test_reconciler_config_durations() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.max_attempts, 60);
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.query_timeout, Duration::from_secs(5));
        assert_eq!(config.ledger_timeout, Duration::from_secs(120));
    }
}
