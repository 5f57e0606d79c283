//! Plain-data shapes for the durable session record.
//!
//! Runtime sessions carry values resolved from code (the identity badge).
//! Only the fields below ever reach storage, and a record read back is
//! either accepted whole or rejected whole.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{normalize_email, Account, Credential, IdentityClass, Session, SessionKey};
use crate::error::StorageError;

/// Bumped whenever the persisted shape changes incompatibly.
pub const SESSION_TABLE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedSession {
    pub session_key: String,
    pub identity_class: IdentityClass,
    pub account: Account,
    pub credential: String,
    pub last_active_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for PersistedSession {
    fn from(session: &Session) -> Self {
        Self {
            session_key: session.key.as_str().to_string(),
            identity_class: session.identity_class,
            account: session.account.clone(),
            credential: session.credential.expose().to_string(),
            last_active_at: session.last_active_at,
            created_at: session.created_at,
        }
    }
}

impl TryFrom<PersistedSession> for Session {
    type Error = StorageError;

    fn try_from(record: PersistedSession) -> Result<Self, Self::Error> {
        let email = normalize_email(&record.account.email);
        if email.is_empty() || !email.contains('@') {
            return Err(StorageError::Invalid(format!(
                "session {} has no usable email",
                record.session_key
            )));
        }

        let credential = Credential::new(record.credential);
        if credential.is_empty() {
            return Err(StorageError::Invalid(format!(
                "session {} has an empty credential",
                record.session_key
            )));
        }

        let key = SessionKey::derive(record.identity_class, &email);
        if key.as_str() != record.session_key {
            return Err(StorageError::Invalid(format!(
                "session key {} does not match its identity ({})",
                record.session_key, key
            )));
        }

        Ok(Session {
            key,
            identity_class: record.identity_class,
            account: record.account,
            credential,
            last_active_at: record.last_active_at,
            created_at: record.created_at,
            badge: record.identity_class.badge(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedSessionTable {
    pub version: u32,
    pub sessions: Vec<PersistedSession>,
}

impl PersistedSessionTable {
    pub fn from_sessions<'a>(sessions: impl IntoIterator<Item = &'a Session>) -> Self {
        Self {
            version: SESSION_TABLE_VERSION,
            sessions: sessions.into_iter().map(PersistedSession::from).collect(),
        }
    }

    /// Parse and validate a stored record. Any bad entry rejects the table.
    pub fn parse(raw: &str) -> Result<BTreeMap<SessionKey, Session>, StorageError> {
        let table: PersistedSessionTable = serde_json::from_str(raw)?;
        table.into_sessions()
    }

    pub fn into_sessions(self) -> Result<BTreeMap<SessionKey, Session>, StorageError> {
        if self.version != SESSION_TABLE_VERSION {
            return Err(StorageError::Invalid(format!(
                "unsupported session table version {}",
                self.version
            )));
        }

        let mut table = BTreeMap::new();
        for record in self.sessions {
            let session = Session::try_from(record)?;
            if table.contains_key(&session.key) {
                return Err(StorageError::Invalid(format!(
                    "duplicate session key {}",
                    session.key
                )));
            }
            table.insert(session.key.clone(), session);
        }
        Ok(table)
    }

    pub fn to_json(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(email: &str) -> Session {
        Session::new(
            IdentityClass::Admin,
            Account {
                id: "42".to_string(),
                email: email.to_string(),
                name: "Ada".to_string(),
                role: "owner".to_string(),
            },
            Credential::new("tok"),
        )
    }

    #[test]
    fn test_persisted_shape_has_no_ui_artifacts() {
        let json = PersistedSessionTable::from_sessions([&session("a@x.com")])
            .to_json()
            .unwrap();
        assert!(!json.contains("badge"));
        assert!(!json.contains("shield"));
        assert!(json.contains("\"credential\": \"tok\""));
    }

    #[test]
    fn test_parse_restores_sessions() {
        let original = session("a@x.com");
        let json = PersistedSessionTable::from_sessions([&original]).to_json().unwrap();

        let table = PersistedSessionTable::parse(&json).unwrap();
        assert_eq!(table.get("admin:a@x.com"), Some(&original));
    }

    #[test]
    fn test_unknown_fields_reject_record() {
        let raw = r#"{"version":1,"sessions":[],"icon":"<svg/>"}"#;
        assert!(PersistedSessionTable::parse(raw).is_err());
    }

    #[test]
    fn test_one_bad_entry_rejects_whole_table() {
        let good = PersistedSession::from(&session("a@x.com"));
        let mut bad = PersistedSession::from(&session("b@x.com"));
        bad.credential = "  ".to_string();

        let table = PersistedSessionTable {
            version: SESSION_TABLE_VERSION,
            sessions: vec![good, bad],
        };
        assert!(matches!(table.into_sessions(), Err(StorageError::Invalid(_))));
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let mut record = PersistedSession::from(&session("a@x.com"));
        record.session_key = "user:a@x.com".to_string();
        assert!(Session::try_from(record).is_err());
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let table = PersistedSessionTable {
            version: SESSION_TABLE_VERSION + 1,
            sessions: vec![],
        };
        assert!(table.into_sessions().is_err());
    }
}
