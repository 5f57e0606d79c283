use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of identity a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityClass {
    Admin,
    User,
    Guest,
}

impl IdentityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityClass::Admin => "admin",
            IdentityClass::User => "user",
            IdentityClass::Guest => "guest",
        }
    }

    /// Display artifact for this class. Resolved in code on demand and
    /// never persisted.
    pub fn badge(&self) -> IdentityBadge {
        match self {
            IdentityClass::Admin => IdentityBadge {
                label: "Administrator",
                icon: "shield",
            },
            IdentityClass::User => IdentityBadge {
                label: "User",
                icon: "person",
            },
            IdentityClass::Guest => IdentityBadge {
                label: "Guest",
                icon: "eye",
            },
        }
    }
}

impl fmt::Display for IdentityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" | "administrator" => Ok(IdentityClass::Admin),
            "user" => Ok(IdentityClass::User),
            "guest" => Ok(IdentityClass::Guest),
            other => Err(format!("unknown identity class: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityBadge {
    pub label: &'static str,
    pub icon: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
}

impl Account {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }
}

/// Normalized form of an email used for session identity.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Bearer credential. Debug output is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// `<class>:<normalized email>`, unique per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn derive(class: IdentityClass, email: &str) -> Self {
        Self(format!("{}:{}", class.as_str(), normalize_email(email)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Runtime view of one authenticated identity.
///
/// Deliberately not `Serialize`: durable storage goes through
/// `PersistedSession`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub key: SessionKey,
    pub identity_class: IdentityClass,
    pub account: Account,
    pub credential: Credential,
    pub last_active_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub badge: IdentityBadge,
}

impl Session {
    pub fn new(identity_class: IdentityClass, account: Account, credential: Credential) -> Self {
        let now = Utc::now();
        Self {
            key: SessionKey::derive(identity_class, &account.email),
            identity_class,
            account,
            credential,
            last_active_at: now,
            created_at: now,
            badge: identity_class.badge(),
        }
    }

    /// Name to show in a session picker, falling back to the email.
    pub fn display_name(&self) -> &str {
        if self.account.name.trim().is_empty() {
            &self.account.email
        } else {
            &self.account.name
        }
    }
}
