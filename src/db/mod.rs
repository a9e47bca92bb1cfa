// SQLite coin ledger

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;

use crate::ledger::{apply_delta, LedgerError, UserBalance};

pub struct SqlLedger {
    default_balance: u64,
    conn: Mutex<Connection>,
}

impl SqlLedger {
    /// Open (or create) the database file and make sure the table exists
    pub fn open(db_path: &Path, default_balance: u64) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        init_schema(&conn)?;

        tracing::info!("SQLite ledger initialized at {:?}", db_path);
        Ok(Self::with_connection(conn, default_balance))
    }

    pub fn in_memory(default_balance: u64) -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self::with_connection(conn, default_balance))
    }

    fn with_connection(conn: Connection, default_balance: u64) -> Self {
        Self {
            default_balance,
            conn: Mutex::new(conn),
        }
    }

    pub fn get(&self, user_id: &str) -> Result<UserBalance, LedgerError> {
        let conn = self.conn.lock();

        if let Some(balance) = select_balance(&conn, user_id)? {
            return Ok(balance);
        }

        let balance = UserBalance::new(user_id, self.default_balance);
        // A concurrent creator wins; re-read whatever is stored
        conn.execute(
            "INSERT OR IGNORE INTO coin_balances (user_id, coins, last_updated)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![
                user_id,
                to_sql_coins(user_id, balance.coins)?,
                balance.last_updated.timestamp_millis()
            ],
        )?;

        tracing::debug!("Created coin balance for {}", user_id);
        select_balance(&conn, user_id)?.ok_or_else(|| LedgerError::Corrupt {
            user_id: user_id.to_string(),
            reason: "row missing after insert".to_string(),
        })
    }

    pub fn set(&self, user_id: &str, coins: u64) -> Result<UserBalance, LedgerError> {
        let conn = self.conn.lock();
        let balance = UserBalance::new(user_id, coins);

        conn.execute(
            "INSERT OR REPLACE INTO coin_balances (user_id, coins, last_updated)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![
                user_id,
                to_sql_coins(user_id, coins)?,
                balance.last_updated.timestamp_millis()
            ],
        )?;

        Ok(balance)
    }

    pub fn increment(&self, user_id: &str, delta: i64) -> Result<UserBalance, LedgerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = select_balance(&tx, user_id)?
            .map(|b| b.coins)
            .unwrap_or(self.default_balance);
        let coins = apply_delta(user_id, current, delta)?;
        let balance = UserBalance::new(user_id, coins);

        tx.execute(
            "INSERT OR REPLACE INTO coin_balances (user_id, coins, last_updated)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![
                user_id,
                to_sql_coins(user_id, coins)?,
                balance.last_updated.timestamp_millis()
            ],
        )?;
        tx.commit()?;

        Ok(balance)
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS coin_balances (
            user_id TEXT PRIMARY KEY,
            coins INTEGER NOT NULL CHECK (coins >= 0),
            last_updated INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn select_balance(conn: &Connection, user_id: &str) -> Result<Option<UserBalance>, LedgerError> {
    let row = conn
        .query_row(
            "SELECT coins, last_updated FROM coin_balances WHERE user_id = ?1",
            [user_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;

    let Some((coins, millis)) = row else {
        return Ok(None);
    };

    let coins = u64::try_from(coins).map_err(|_| LedgerError::Corrupt {
        user_id: user_id.to_string(),
        reason: format!("negative balance {}", coins),
    })?;
    let last_updated = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        LedgerError::Corrupt {
            user_id: user_id.to_string(),
            reason: format!("bad timestamp {}", millis),
        }
    })?;

    Ok(Some(UserBalance {
        user_id: user_id.to_string(),
        coins,
        last_updated,
    }))
}

fn to_sql_coins(user_id: &str, coins: u64) -> Result<i64, LedgerError> {
    i64::try_from(coins).map_err(|_| LedgerError::Overflow(user_id.to_string()))
}
