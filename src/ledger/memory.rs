// In-process coin ledger

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{apply_delta, LedgerError, UserBalance};

pub struct MemoryLedger {
    default_balance: u64,
    balances: RwLock<HashMap<String, UserBalance>>,
}

impl MemoryLedger {
    pub fn new(default_balance: u64) -> Self {
        Self {
            default_balance,
            balances: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, user_id: &str) -> UserBalance {
        if let Some(balance) = self.balances.read().get(user_id) {
            return balance.clone();
        }

        // Another writer may have created it between the two locks
        self.balances
            .write()
            .entry(user_id.to_string())
            .or_insert_with(|| UserBalance::new(user_id, self.default_balance))
            .clone()
    }

    pub fn set(&self, user_id: &str, coins: u64) -> UserBalance {
        let balance = UserBalance::new(user_id, coins);
        self.balances
            .write()
            .insert(user_id.to_string(), balance.clone());
        balance
    }

    pub fn increment(&self, user_id: &str, delta: i64) -> Result<UserBalance, LedgerError> {
        let mut balances = self.balances.write();
        let entry = balances
            .entry(user_id.to_string())
            .or_insert_with(|| UserBalance::new(user_id, self.default_balance));

        entry.coins = apply_delta(user_id, entry.coins, delta)?;
        entry.last_updated = Utc::now();
        Ok(entry.clone())
    }
}
