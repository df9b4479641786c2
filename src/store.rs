//! Account, credential and summary persistence.
//!
//! The [`Store`] trait is the seam a database-backed adapter would implement.
//! [`MemoryStore`] is the in-process implementation; it keeps every record
//! behind one mutex so a usage increment and its summary insert commit
//! together or not at all.

use crate::crypto::{generate_api_token, EncryptionKey};
use crate::error::NutgrafError;
use crate::prompt::{SummaryFormat, SummaryLength, SummaryTone};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Stored summaries keep at most this much of the source text.
pub const ORIGINAL_TEXT_CAP: usize = 10_000;
/// Monthly call allowance for new accounts.
pub const DEFAULT_CALLS_LIMIT: u32 = 1_000;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: u64,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub api_token: String,
    /// Sealed with the server [`EncryptionKey`]; never stored in the clear.
    pub encrypted_openai_key: Option<String>,
    pub encrypted_anthropic_key: Option<String>,
    pub calls_made: u32,
    pub calls_limit: u32,
    pub default_length: SummaryLength,
    pub default_tone: SummaryTone,
    pub default_format: SummaryFormat,
    pub default_model: String,
}

#[derive(Debug, Clone)]
pub struct SummaryRecord {
    pub id: u64,
    pub user_id: u64,
    pub title: String,
    pub url: Option<String>,
    /// Truncated to [`ORIGINAL_TEXT_CAP`] characters on insert.
    pub original_text: String,
    pub summary_text: String,
    pub word_count: usize,
    pub length: SummaryLength,
    pub tone: SummaryTone,
    pub format: SummaryFormat,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// A summary awaiting persistence; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewSummary {
    pub title: String,
    pub url: Option<String>,
    pub original_text: String,
    pub summary_text: String,
    pub word_count: usize,
    pub length: SummaryLength,
    pub tone: SummaryTone,
    pub format: SummaryFormat,
    pub model: String,
}

/// Quota snapshot reported back to callers.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct UsageQuota {
    pub calls_made: u32,
    pub calls_limit: u32,
    pub calls_remaining: u32,
    pub percentage_used: f64,
}

impl UsageQuota {
    pub fn from_counts(calls_made: u32, calls_limit: u32) -> Self {
        let percentage_used = if calls_limit == 0 {
            100.0
        } else {
            f64::from(calls_made) / f64::from(calls_limit) * 100.0
        };
        Self {
            calls_made,
            calls_limit,
            calls_remaining: calls_limit.saturating_sub(calls_made),
            percentage_used,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.calls_made >= self.calls_limit
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve an API token to its owning user, if any.
    async fn find_principal_by_token(&self, token: &str) -> Option<UserRecord>;

    async fn find_user(&self, user_id: u64) -> Option<UserRecord>;

    /// Charge one call against the user's quota and, in the same transaction,
    /// persist the summary if one is supplied. The quota check and increment
    /// are a single atomic step: a user at the limit is never charged, and a
    /// failed insert never leaves a dangling increment.
    async fn commit_usage(
        &self,
        user_id: u64,
        summary: Option<NewSummary>,
    ) -> Result<(UsageQuota, Option<u64>), NutgrafError>;
}

#[derive(Default)]
struct Inner {
    users: HashMap<u64, UserRecord>,
    tokens: HashMap<String, u64>,
    summaries: HashMap<u64, SummaryRecord>,
    next_user_id: u64,
    next_summary_id: u64,
}

/// In-memory store. All state lives behind one mutex; see module docs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account with a freshly minted API token and default
    /// generation preferences. Returns the record including its token.
    pub fn create_user(&self, email: &str) -> UserRecord {
        let mut inner = self.inner.lock().expect("store poisoned");
        inner.next_user_id += 1;
        let id = inner.next_user_id;
        let api_token = generate_api_token();

        let record = UserRecord {
            id,
            email: email.to_string(),
            created_at: Utc::now(),
            is_active: true,
            api_token: api_token.clone(),
            encrypted_openai_key: None,
            encrypted_anthropic_key: None,
            calls_made: 0,
            calls_limit: DEFAULT_CALLS_LIMIT,
            default_length: SummaryLength::Standard,
            default_tone: SummaryTone::Neutral,
            default_format: SummaryFormat::Prose,
            default_model: "gpt-3.5-turbo".to_string(),
        };

        inner.tokens.insert(api_token, id);
        inner.users.insert(id, record.clone());
        debug!(user_id = id, "created account");
        record
    }

    /// Seal and attach provider credentials to an account.
    pub fn set_credentials(
        &self,
        user_id: u64,
        key: &EncryptionKey,
        openai_key: Option<&str>,
        anthropic_key: Option<&str>,
    ) -> Result<(), NutgrafError> {
        let encrypted_openai = openai_key.map(|k| key.encrypt(k)).transpose()?;
        let encrypted_anthropic = anthropic_key.map(|k| key.encrypt(k)).transpose()?;

        let mut inner = self.inner.lock().expect("store poisoned");
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| NutgrafError::PersistenceError(format!("No such user: {}", user_id)))?;
        if encrypted_openai.is_some() {
            user.encrypted_openai_key = encrypted_openai;
        }
        if encrypted_anthropic.is_some() {
            user.encrypted_anthropic_key = encrypted_anthropic;
        }
        Ok(())
    }

    pub fn set_active(&self, user_id: u64, active: bool) {
        let mut inner = self.inner.lock().expect("store poisoned");
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.is_active = active;
        }
    }

    pub fn set_quota(&self, user_id: u64, calls_made: u32, calls_limit: u32) {
        let mut inner = self.inner.lock().expect("store poisoned");
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.calls_made = calls_made;
            user.calls_limit = calls_limit;
        }
    }

    pub fn set_default_settings(
        &self,
        user_id: u64,
        length: SummaryLength,
        tone: SummaryTone,
        format: SummaryFormat,
        model: &str,
    ) {
        let mut inner = self.inner.lock().expect("store poisoned");
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.default_length = length;
            user.default_tone = tone;
            user.default_format = format;
            user.default_model = model.to_string();
        }
    }

    pub fn get_summary(&self, summary_id: u64) -> Option<SummaryRecord> {
        let inner = self.inner.lock().expect("store poisoned");
        inner.summaries.get(&summary_id).cloned()
    }

    pub fn summary_count(&self, user_id: u64) -> usize {
        let inner = self.inner.lock().expect("store poisoned");
        inner
            .summaries
            .values()
            .filter(|s| s.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_principal_by_token(&self, token: &str) -> Option<UserRecord> {
        let inner = self.inner.lock().expect("store poisoned");
        let id = inner.tokens.get(token)?;
        inner.users.get(id).cloned()
    }

    async fn find_user(&self, user_id: u64) -> Option<UserRecord> {
        let inner = self.inner.lock().expect("store poisoned");
        inner.users.get(&user_id).cloned()
    }

    async fn commit_usage(
        &self,
        user_id: u64,
        summary: Option<NewSummary>,
    ) -> Result<(UsageQuota, Option<u64>), NutgrafError> {
        let mut inner = self.inner.lock().expect("store poisoned");

        let user = inner
            .users
            .get(&user_id)
            .ok_or_else(|| NutgrafError::PersistenceError(format!("No such user: {}", user_id)))?;

        // Re-check under the lock; the guard's earlier check may be stale by
        // the time the pipeline finishes.
        if user.calls_made >= user.calls_limit {
            return Err(NutgrafError::QuotaExceeded);
        }
        let (calls_made, calls_limit) = (user.calls_made + 1, user.calls_limit);

        let summary_id = match summary {
            Some(new) => {
                inner.next_summary_id += 1;
                let id = inner.next_summary_id;
                let mut original_text = new.original_text;
                if original_text.len() > ORIGINAL_TEXT_CAP {
                    let mut cut = ORIGINAL_TEXT_CAP;
                    while !original_text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    original_text.truncate(cut);
                }
                inner.summaries.insert(
                    id,
                    SummaryRecord {
                        id,
                        user_id,
                        title: new.title,
                        url: new.url,
                        original_text,
                        summary_text: new.summary_text,
                        word_count: new.word_count,
                        length: new.length,
                        tone: new.tone,
                        format: new.format,
                        model: new.model,
                        created_at: Utc::now(),
                    },
                );
                Some(id)
            }
            None => None,
        };

        // The increment lands last so an insert error above (none today, but
        // an adapter may have them) cannot strand a charge.
        let user = inner.users.get_mut(&user_id).expect("user checked above");
        user.calls_made = calls_made;

        Ok((UsageQuota::from_counts(calls_made, calls_limit), summary_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::SummarySettings;
    use std::sync::Arc;

    fn new_summary(text: &str) -> NewSummary {
        let settings = SummarySettings::default();
        NewSummary {
            title: "Test".to_string(),
            url: Some("https://example.com/a".to_string()),
            original_text: text.to_string(),
            summary_text: "A summary.".to_string(),
            word_count: 2,
            length: settings.length,
            tone: settings.tone,
            format: settings.format,
            model: settings.model,
        }
    }

    #[tokio::test]
    async fn test_token_lookup() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com");

        let found = store.find_principal_by_token(&user.api_token).await.unwrap();
        assert_eq!(found.id, user.id);
        assert!(store.find_principal_by_token("ng_bogus").await.is_none());
    }

    #[tokio::test]
    async fn test_commit_usage_increments_and_saves() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com");

        let (quota, id) = store
            .commit_usage(user.id, Some(new_summary("original")))
            .await
            .unwrap();

        assert_eq!(quota.calls_made, 1);
        assert_eq!(quota.calls_remaining, DEFAULT_CALLS_LIMIT - 1);
        let saved = store.get_summary(id.unwrap()).unwrap();
        assert_eq!(saved.user_id, user.id);
        assert_eq!(saved.summary_text, "A summary.");
    }

    #[tokio::test]
    async fn test_commit_usage_without_summary_stores_nothing() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com");

        let (quota, id) = store.commit_usage(user.id, None).await.unwrap();

        assert_eq!(quota.calls_made, 1);
        assert!(id.is_none());
        assert_eq!(store.summary_count(user.id), 0);
    }

    #[tokio::test]
    async fn test_commit_usage_at_limit_charges_nothing() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com");
        store.set_quota(user.id, 5, 5);

        let err = store
            .commit_usage(user.id, Some(new_summary("original")))
            .await
            .unwrap_err();

        assert!(matches!(err, NutgrafError::QuotaExceeded));
        assert_eq!(store.find_user(user.id).await.unwrap().calls_made, 5);
        assert_eq!(store.summary_count(user.id), 0);
    }

    #[tokio::test]
    async fn test_original_text_is_truncated() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com");
        let long = "x".repeat(ORIGINAL_TEXT_CAP + 500);

        let (_, id) = store
            .commit_usage(user.id, Some(new_summary(&long)))
            .await
            .unwrap();

        let saved = store.get_summary(id.unwrap()).unwrap();
        assert_eq!(saved.original_text.len(), ORIGINAL_TEXT_CAP);
    }

    #[tokio::test]
    async fn test_concurrent_commits_never_exceed_the_limit() {
        let store = Arc::new(MemoryStore::new());
        let user = store.create_user("a@example.com");
        store.set_quota(user.id, 0, 10);

        let mut handles = Vec::new();
        for _ in 0..25 {
            let store = store.clone();
            let user_id = user.id;
            handles.push(tokio::spawn(async move {
                store.commit_usage(user_id, None).await
            }));
        }

        let mut ok = 0;
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(NutgrafError::QuotaExceeded) => exhausted += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(ok, 10);
        assert_eq!(exhausted, 15);
        assert_eq!(store.find_user(user.id).await.unwrap().calls_made, 10);
    }

    #[tokio::test]
    async fn test_credentials_round_trip_through_encryption() {
        let store = MemoryStore::new();
        let key = EncryptionKey::generate();
        let user = store.create_user("a@example.com");

        store
            .set_credentials(user.id, &key, Some("sk-abc"), Some("sk-ant-xyz"))
            .unwrap();

        let user = store.find_user(user.id).await.unwrap();
        let sealed = user.encrypted_openai_key.unwrap();
        assert_ne!(sealed, "sk-abc");
        assert_eq!(key.decrypt(&sealed).unwrap(), "sk-abc");
        assert_eq!(
            key.decrypt(&user.encrypted_anthropic_key.unwrap()).unwrap(),
            "sk-ant-xyz"
        );
    }
}
