// Remote JSON document ledger (Firebase Realtime Database REST layout)
//
// One document per user at `{base_url}/{collection}/{user_id}.json`.
// Writes that depend on a read are conditional on the document's ETag.

use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{apply_delta, LedgerError, UserBalance};
use crate::config::RemoteStoreConfig;

const MAX_WRITE_ATTEMPTS: usize = 5;

#[derive(Debug, Serialize, Deserialize)]
struct BalanceDocument {
    coins: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
}

enum WriteOutcome {
    Written,
    Conflict,
}

pub struct RemoteLedger {
    http_client: reqwest::Client,
    base_url: String,
    collection: String,
    auth_token: Option<String>,
    default_balance: u64,
}

impl RemoteLedger {
    pub fn new(config: &RemoteStoreConfig, default_balance: u64) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            collection: config.collection.trim_matches('/').to_string(),
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
            default_balance,
        }
    }

    fn document_url(&self, user_id: &str) -> String {
        format!(
            "{}/{}/{}.json",
            self.base_url,
            self.collection,
            urlencoding::encode(user_id)
        )
    }

    fn request(&self, method: Method, user_id: &str) -> RequestBuilder {
        let req = self
            .http_client
            .request(method, self.document_url(user_id))
            .header("Accept", "application/json");
        match &self.auth_token {
            Some(token) => req.query(&[("auth", token.as_str())]),
            None => req,
        }
    }

    /// Fetch the document and its ETag
    async fn fetch(&self, user_id: &str) -> Result<(Option<UserBalance>, Option<String>), LedgerError> {
        let response = self
            .request(Method::GET, user_id)
            .header("X-Firebase-ETag", "true")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let etag = response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body: Value = response.json().await?;

        Ok((parse_document(user_id, body)?, etag))
    }

    async fn write(
        &self,
        balance: &UserBalance,
        etag: Option<&str>,
    ) -> Result<WriteOutcome, LedgerError> {
        let coins = i64::try_from(balance.coins)
            .map_err(|_| LedgerError::Overflow(balance.user_id.clone()))?;
        let document = BalanceDocument {
            coins,
            last_updated: Some(balance.last_updated),
        };

        let mut req = self.request(Method::PUT, &balance.user_id).json(&document);
        if let Some(etag) = etag {
            req = req.header("if-match", etag);
        }

        let response = req.send().await?;
        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED {
            return Ok(WriteOutcome::Conflict);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        Ok(WriteOutcome::Written)
    }

    pub async fn get(&self, user_id: &str) -> Result<UserBalance, LedgerError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let (existing, etag) = self.fetch(user_id).await?;
            if let Some(balance) = existing {
                return Ok(balance);
            }

            let balance = UserBalance::new(user_id, self.default_balance);
            match self.write(&balance, etag.as_deref()).await? {
                WriteOutcome::Written => {
                    tracing::debug!("Created remote coin document for {}", user_id);
                    return Ok(balance);
                }
                WriteOutcome::Conflict => continue,
            }
        }

        Err(LedgerError::Conflict(user_id.to_string()))
    }

    pub async fn set(&self, user_id: &str, coins: u64) -> Result<UserBalance, LedgerError> {
        let balance = UserBalance::new(user_id, coins);
        match self.write(&balance, None).await? {
            WriteOutcome::Written => Ok(balance),
            WriteOutcome::Conflict => Err(LedgerError::Conflict(user_id.to_string())),
        }
    }

    pub async fn increment(&self, user_id: &str, delta: i64) -> Result<UserBalance, LedgerError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (existing, etag) = self.fetch(user_id).await?;
            let current = existing.map(|b| b.coins).unwrap_or(self.default_balance);
            let balance = UserBalance::new(user_id, apply_delta(user_id, current, delta)?);

            match self.write(&balance, etag.as_deref()).await? {
                WriteOutcome::Written => return Ok(balance),
                WriteOutcome::Conflict => {
                    tracing::debug!(
                        "Remote increment conflict for {} (attempt {}/{})",
                        user_id,
                        attempt,
                        MAX_WRITE_ATTEMPTS
                    );
                }
            }
        }

        tracing::warn!("Giving up on remote increment for {}", user_id);
        Err(LedgerError::Conflict(user_id.to_string()))
    }
}

fn parse_document(user_id: &str, body: Value) -> Result<Option<UserBalance>, LedgerError> {
    if body.is_null() {
        return Ok(None);
    }

    let document: BalanceDocument =
        serde_json::from_value(body).map_err(|e| LedgerError::Corrupt {
            user_id: user_id.to_string(),
            reason: e.to_string(),
        })?;
    let coins = u64::try_from(document.coins).map_err(|_| LedgerError::Corrupt {
        user_id: user_id.to_string(),
        reason: format!("negative balance {}", document.coins),
    })?;

    Ok(Some(UserBalance {
        user_id: user_id.to_string(),
        coins,
        last_updated: document.last_updated.unwrap_or_else(Utc::now),
    }))
}
