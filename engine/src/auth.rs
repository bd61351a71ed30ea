//! Auth binder - resolves credentials to a user-scoped fact store.
//!
//! Accounts and API keys are ordinary facts under the reserved partition
//! `__auth__`: one fact per account in the `users` namespace (fieldName is
//! the username) and one per key in the `keys` namespace (fieldName is the
//! key token, which makes lookup-by-key a point read on the field index).
//! Registration, key issuance and revocation are all plain fact writes;
//! authentication volume is bounded, so no extra indexes exist.

use crate::codec::{rfc3339_nanos, rfc3339_nanos_opt};
use crate::error::{Error, Result};
use crate::fact::{DataType, Fact};
use crate::kv::KvStore;
use crate::store::{FactStore, QueryOptions};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Reserved partition holding auth metadata. User ids are uuids, so no
/// tenant can collide with it.
pub const AUTH_USER: &str = "__auth__";

const USERS_NAMESPACE: &str = "users";
const KEYS_NAMESPACE: &str = "keys";
const KEY_PREFIX: &str = "nb_";

const BAD_CREDENTIALS: &str = "unknown username or password";

/// Stored account record (the `value` of a `users` fact).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRecord {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    #[serde(with = "rfc3339_nanos")]
    created_at: DateTime<Utc>,
}

/// Stored API-key record (the `value` of a `keys` fact).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyRecord {
    id: String,
    user_id: String,
    name: String,
    #[serde(with = "rfc3339_nanos")]
    created_at: DateTime<Utc>,
    #[serde(default, with = "rfc3339_nanos_opt")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    revoked: bool,
}

/// A logged-in account plus a freshly minted API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub username: String,
    pub email: String,
    pub api_key: String,
}

/// A newly issued key; the token is only ever shown here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedKey {
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(with = "rfc3339_nanos_opt")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Key metadata, as listed; the token itself is not repeated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyInfo {
    pub id: String,
    pub name: String,
    #[serde(with = "rfc3339_nanos")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "rfc3339_nanos_opt")]
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

/// The resolved caller behind an API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

fn validate_username(username: &str) -> Result<()> {
    let ok = !username.is_empty()
        && username.len() <= 255
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(Error::InvalidArgument(format!(
            "username {username:?} must match [A-Za-z0-9_-]{{1,255}}"
        )));
    }
    Ok(())
}

fn decode_record<T: serde::de::DeserializeOwned>(fact: &Fact, what: &str) -> Result<T> {
    serde_json::from_str(&fact.value)
        .map_err(|e| Error::InvalidArgument(format!("malformed {what} record: {e}")))
}

/// Resolves inbound credentials and hands out user-bound [`FactStore`]s.
#[derive(Clone)]
pub struct AuthBinder {
    kv: Arc<dyn KvStore>,
}

impl AuthBinder {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// A fact store scoped to the given tenant.
    pub fn bind(&self, user_id: &str) -> FactStore {
        FactStore::new(self.kv.clone(), user_id)
    }

    fn auth_store(&self) -> FactStore {
        FactStore::new(self.kv.clone(), AUTH_USER)
    }

    /// Create an account and mint its first API key.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<Session> {
        validate_username(username)?;
        if email.is_empty() {
            return Err(Error::InvalidArgument("email must not be empty".into()));
        }
        if password.is_empty() {
            return Err(Error::InvalidArgument("password must not be empty".into()));
        }
        if let Some(existing) = self.account_fact(username).await? {
            if existing.is_live() {
                return Err(Error::Conflict(format!("username {username:?} is taken")));
            }
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::InvalidArgument(format!("password: {e}")))?
            .to_string();

        let account = AccountRecord {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            created_at: Utc::now(),
        };
        self.write_record(USERS_NAMESPACE, username, &account.id, &account)
            .await?;

        let key = self.issue_key(&account.id, "default", None).await?;
        Ok(Session {
            id: account.id,
            username: account.username,
            email: account.email,
            api_key: key.key,
        })
    }

    /// Verify credentials and mint a fresh API key.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let fact = self
            .account_fact(username)
            .await?
            .filter(Fact::is_live)
            .ok_or_else(|| Error::Unauthenticated(BAD_CREDENTIALS.into()))?;
        let account: AccountRecord = decode_record(&fact, "account")?;

        let parsed = PasswordHash::new(&account.password_hash)
            .map_err(|_| Error::Unauthenticated(BAD_CREDENTIALS.into()))?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Err(Error::Unauthenticated(BAD_CREDENTIALS.into()));
        }

        let key = self.issue_key(&account.id, "login", None).await?;
        Ok(Session {
            id: account.id,
            username: account.username,
            email: account.email,
            api_key: key.key,
        })
    }

    /// Mint a key for a user; `ttl_seconds` bounds its lifetime.
    pub async fn issue_key(
        &self,
        user_id: &str,
        name: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<IssuedKey> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("key name must not be empty".into()));
        }
        let expires_at = match ttl_seconds {
            Some(secs) if secs <= 0 => {
                return Err(Error::InvalidArgument(
                    "key duration must be positive".into(),
                ));
            }
            Some(secs) => Some(Utc::now() + Duration::seconds(secs)),
            None => None,
        };

        let token = format!("{KEY_PREFIX}{}", Uuid::new_v4().simple());
        let record = KeyRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
            expires_at,
            revoked: false,
        };
        self.write_record(KEYS_NAMESPACE, &token, &record.id, &record)
            .await?;

        Ok(IssuedKey {
            id: record.id,
            key: token,
            name: record.name,
            expires_at: record.expires_at,
        })
    }

    /// Keys owned by a user, revoked ones included.
    pub async fn list_keys(&self, user_id: &str) -> Result<Vec<ApiKeyInfo>> {
        let facts = self
            .auth_store()
            .snapshot_at(Some(KEYS_NAMESPACE), Utc::now())
            .await?;
        let mut keys = Vec::new();
        for fact in facts {
            let record: KeyRecord = match decode_record(&fact, "key") {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(%err, "skipping malformed key record");
                    continue;
                }
            };
            if record.user_id == user_id {
                keys.push(ApiKeyInfo {
                    id: record.id,
                    name: record.name,
                    created_at: record.created_at,
                    expires_at: record.expires_at,
                    revoked: record.revoked,
                });
            }
        }
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(keys)
    }

    /// Append a revoked version of the key record.
    pub async fn revoke_key(&self, user_id: &str, key_id: &str) -> Result<()> {
        let facts = self
            .auth_store()
            .snapshot_at(Some(KEYS_NAMESPACE), Utc::now())
            .await?;
        for fact in facts {
            let Ok(mut record) = decode_record::<KeyRecord>(&fact, "key") else {
                continue;
            };
            if record.id == key_id && record.user_id == user_id {
                record.revoked = true;
                return self
                    .write_record(KEYS_NAMESPACE, &fact.field_name, &record.id, &record)
                    .await;
            }
        }
        Err(Error::NotFound(format!("API key {key_id}")))
    }

    /// Resolve an API key to its owning user.
    pub async fn resolve_key(&self, token: &str) -> Result<Identity> {
        let page = self
            .auth_store()
            .query_by_field(
                KEYS_NAMESPACE,
                token,
                QueryOptions {
                    descending: true,
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await?;
        let fact = page
            .facts
            .into_iter()
            .next()
            .filter(Fact::is_live)
            .ok_or_else(|| Error::Unauthenticated("invalid API key".into()))?;

        let record: KeyRecord = decode_record(&fact, "key")?;
        if record.revoked {
            return Err(Error::Unauthenticated("API key revoked".into()));
        }
        if record.expires_at.is_some_and(|at| at < Utc::now()) {
            return Err(Error::Unauthenticated("API key expired".into()));
        }
        Ok(Identity {
            user_id: record.user_id,
        })
    }

    async fn account_fact(&self, username: &str) -> Result<Option<Fact>> {
        let page = self
            .auth_store()
            .query_by_field(
                USERS_NAMESPACE,
                username,
                QueryOptions {
                    descending: true,
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await?;
        Ok(page.facts.into_iter().next())
    }

    async fn write_record<T: Serialize>(
        &self,
        namespace: &str,
        field_name: &str,
        id: &str,
        record: &T,
    ) -> Result<()> {
        let value = serde_json::to_string(record)
            .map_err(|e| Error::InvalidArgument(format!("record encode: {e}")))?;
        self.auth_store()
            .put_fact(Fact::new(id, namespace, field_name, DataType::Json, value))
            .await?;
        Ok(())
    }
}
