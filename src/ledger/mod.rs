// Coin ledger - per-user balances over interchangeable backends

pub mod memory;
pub mod remote;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{expand_home, LedgerConfig};
use crate::db::SqlLedger;
use memory::MemoryLedger;
use remote::RemoteLedger;

static USER_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_:@-]{1,128}$").expect("valid user id regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: String,
    pub coins: u64,
    pub last_updated: DateTime<Utc>,
}

impl UserBalance {
    pub fn new(user_id: &str, coins: u64) -> Self {
        Self {
            user_id: user_id.to_string(),
            coins,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    Memory,
    Sqlite,
    Remote,
}

impl LedgerBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerBackend::Memory => "memory",
            LedgerBackend::Sqlite => "sqlite",
            LedgerBackend::Remote => "remote",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("insufficient coins for {user_id}: balance {balance}, change {delta}")]
    InsufficientCoins {
        user_id: String,
        balance: u64,
        delta: i64,
    },

    #[error("coin balance overflow for {0}")]
    Overflow(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("remote store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote store returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("corrupt balance record for {user_id}: {reason}")]
    Corrupt { user_id: String, reason: String },

    #[error("write conflict on {0} persisted after retries")]
    Conflict(String),
}

pub fn validate_user_id(user_id: &str) -> Result<(), LedgerError> {
    if USER_ID_PATTERN.is_match(user_id) {
        Ok(())
    } else {
        Err(LedgerError::InvalidUserId(user_id.to_string()))
    }
}

/// Apply a signed change to a balance, keeping it within `0..=i64::MAX`
pub fn apply_delta(user_id: &str, balance: u64, delta: i64) -> Result<u64, LedgerError> {
    let next = balance as i128 + delta as i128;
    if next < 0 {
        return Err(LedgerError::InsufficientCoins {
            user_id: user_id.to_string(),
            balance,
            delta,
        });
    }
    if next > i64::MAX as i128 {
        return Err(LedgerError::Overflow(user_id.to_string()));
    }
    Ok(next as u64)
}

/// Reject set values that the SQL backend could not store
pub fn check_storable(user_id: &str, coins: u64) -> Result<(), LedgerError> {
    if coins > i64::MAX as u64 {
        return Err(LedgerError::Overflow(user_id.to_string()));
    }
    Ok(())
}

/// The ledger selected at startup
pub enum CoinLedger {
    Memory(MemoryLedger),
    Sql(SqlLedger),
    Remote(RemoteLedger),
}

impl CoinLedger {
    pub fn from_config(config: &LedgerConfig) -> anyhow::Result<Self> {
        let ledger = match config.backend {
            LedgerBackend::Memory => CoinLedger::Memory(MemoryLedger::new(config.default_balance)),
            LedgerBackend::Sqlite => {
                let path = expand_home(&config.sqlite_path);
                CoinLedger::Sql(SqlLedger::open(&path, config.default_balance)?)
            }
            LedgerBackend::Remote => {
                if config.remote.base_url.trim().is_empty() {
                    anyhow::bail!("ledger.remote.base-url is required for the remote backend");
                }
                CoinLedger::Remote(RemoteLedger::new(&config.remote, config.default_balance))
            }
        };

        tracing::info!(
            "Coin ledger ready: backend={}, default_balance={}",
            ledger.backend().as_str(),
            config.default_balance
        );
        Ok(ledger)
    }

    pub fn backend(&self) -> LedgerBackend {
        match self {
            CoinLedger::Memory(_) => LedgerBackend::Memory,
            CoinLedger::Sql(_) => LedgerBackend::Sqlite,
            CoinLedger::Remote(_) => LedgerBackend::Remote,
        }
    }

    /// Read a balance, creating it with the default balance on first access
    pub async fn get(&self, user_id: &str) -> Result<UserBalance, LedgerError> {
        validate_user_id(user_id)?;
        match self {
            CoinLedger::Memory(m) => Ok(m.get(user_id)),
            CoinLedger::Sql(s) => s.get(user_id),
            CoinLedger::Remote(r) => r.get(user_id).await,
        }
    }

    pub async fn set(&self, user_id: &str, coins: u64) -> Result<UserBalance, LedgerError> {
        validate_user_id(user_id)?;
        check_storable(user_id, coins)?;
        let balance = match self {
            CoinLedger::Memory(m) => Ok(m.set(user_id, coins)),
            CoinLedger::Sql(s) => s.set(user_id, coins),
            CoinLedger::Remote(r) => r.set(user_id, coins).await,
        }?;
        tracing::debug!("Set coins for {} to {}", user_id, balance.coins);
        Ok(balance)
    }

    pub async fn increment(&self, user_id: &str, delta: i64) -> Result<UserBalance, LedgerError> {
        validate_user_id(user_id)?;
        let balance = match self {
            CoinLedger::Memory(m) => m.increment(user_id, delta),
            CoinLedger::Sql(s) => s.increment(user_id, delta),
            CoinLedger::Remote(r) => r.increment(user_id, delta).await,
        }?;
        tracing::debug!("Incremented coins for {} by {} -> {}", user_id, delta, balance.coins);
        Ok(balance)
    }
}
