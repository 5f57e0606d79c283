use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::model::{normalize_email, Account, Credential, IdentityClass, Session, SessionKey};
use super::persisted::PersistedSessionTable;
use super::storage::SessionStorage;
use crate::error::SessionError;
use crate::events::{EventBus, SessionEvent};

/// Table and active pointer live under one lock so that removing the
/// active session and re-pointing happen together.
#[derive(Default)]
struct SessionState {
    table: BTreeMap<SessionKey, Session>,
    active: Option<SessionKey>,
    /// Whether the persisted table has been read into `table` yet.
    loaded: bool,
}

impl SessionState {
    /// Most recently active session, ties broken by key order.
    fn most_recent(&self) -> Option<SessionKey> {
        self.table
            .values()
            .max_by(|a, b| {
                a.last_active_at
                    .cmp(&b.last_active_at)
                    .then_with(|| b.key.cmp(&a.key))
            })
            .map(|s| s.key.clone())
    }
}

/// Keyed collection of concurrently held sessions.
///
/// Every mutation is written to storage before the call returns. A failed
/// write is logged and the in-memory table stays authoritative. The
/// persisted table is read before the first access, so using the store
/// before boot never overwrites saved sessions.
pub struct SessionStore {
    state: Mutex<SessionState>,
    storage: Arc<dyn SessionStorage>,
    events: EventBus<SessionEvent>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            storage,
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.events
    }

    pub fn storage(&self) -> &dyn SessionStorage {
        self.storage.as_ref()
    }

    /// Store a session for this identity, replacing any previous one.
    /// The first session in an empty table becomes active.
    pub fn login(
        &self,
        identity_class: IdentityClass,
        account: Account,
        credential: impl Into<Credential>,
    ) -> Result<SessionKey, SessionError> {
        let credential = credential.into();
        let email = normalize_email(&account.email);
        if email.is_empty() {
            return Err(SessionError::InvalidAccount("email is required".to_string()));
        }
        // Must match what a restore will accept
        if !email.contains('@') {
            return Err(SessionError::InvalidAccount(format!("not an email address: {}", email)));
        }
        if credential.is_empty() {
            return Err(SessionError::InvalidAccount("credential is empty".to_string()));
        }

        let session = Session::new(identity_class, account, credential);
        let key = session.key.clone();

        let mut state = self.lock_loaded();
        let replaced = state.table.insert(key.clone(), session).is_some();
        let activated = state.active.is_none();
        if activated {
            state.active = Some(key.clone());
        }
        self.persist(&state);
        drop(state);

        info!(session = %key, replaced, activated, "Session logged in");
        self.events.publish(SessionEvent::LoggedIn {
            key: key.to_string(),
        });
        if activated {
            self.events.publish(SessionEvent::Switched {
                key: key.to_string(),
            });
        }
        Ok(key)
    }

    /// Remove one session. Unknown keys are a no-op returning false.
    pub fn logout(&self, key: &str) -> bool {
        let mut state = self.lock_loaded();
        if state.table.remove(key).is_none() {
            debug!(session = %key, "Logout for unknown session ignored");
            return false;
        }

        let was_active = state.active.as_ref().map(|k| k.as_str()) == Some(key);
        let repointed = if was_active {
            state.active = state.most_recent();
            state.active.clone()
        } else {
            None
        };
        self.persist(&state);
        drop(state);

        info!(session = %key, was_active, "Session logged out");
        self.events.publish(SessionEvent::LoggedOut {
            key: key.to_string(),
        });
        if let Some(next) = repointed {
            self.events.publish(SessionEvent::Switched {
                key: next.to_string(),
            });
        }
        true
    }

    /// Remove every session and the persisted record.
    pub fn logout_all(&self) {
        let mut state = self.state.lock();
        let count = state.table.len();
        state.table.clear();
        state.active = None;
        state.loaded = true;
        if let Err(e) = self.storage.clear() {
            warn!(error = %e, "Failed to clear persisted sessions");
        }
        drop(state);

        info!(count, "All sessions logged out");
        self.events.publish(SessionEvent::LoggedOutAll);
    }

    /// All sessions, most recently active first.
    pub fn all(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.lock_loaded().table.values().cloned().collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        sessions
    }

    pub fn get(&self, key: &str) -> Option<Session> {
        self.lock_loaded().table.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_loaded().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn active(&self) -> Option<Session> {
        let state = self.lock_loaded();
        state
            .active
            .as_ref()
            .and_then(|key| state.table.get(key))
            .cloned()
    }

    /// Point at `key` and bump its activity time. None if `key` is unknown.
    pub(crate) fn activate(&self, key: &str) -> Option<Session> {
        let mut state = self.lock_loaded();
        let session = state.table.get_mut(key)?;
        session.last_active_at = Utc::now();
        let session = session.clone();
        state.active = Some(session.key.clone());
        self.persist(&state);
        drop(state);

        debug!(session = %key, "Active session switched");
        self.events.publish(SessionEvent::Switched {
            key: key.to_string(),
        });
        Some(session)
    }

    /// Load the persisted table if nothing has yet, prune sessions idle
    /// since before `idle_cutoff`, and point at the most recent one.
    pub(crate) fn restore(&self, idle_cutoff: Option<DateTime<Utc>>) -> Option<Session> {
        let mut state = self.lock_loaded();

        let mut pruned = 0;
        if let Some(cutoff) = idle_cutoff {
            let before = state.table.len();
            state.table.retain(|_, session| session.last_active_at >= cutoff);
            pruned = before - state.table.len();
        }

        state.active = state.most_recent();
        if pruned > 0 {
            self.persist(&state);
        }
        let count = state.table.len();
        let active = state.active.as_ref().and_then(|key| state.table.get(key)).cloned();
        drop(state);

        info!(count, pruned, active = ?active.as_ref().map(|s| s.key.as_str()), "Sessions restored");
        self.events.publish(SessionEvent::Restored { count });
        active
    }

    /// Lock the state, reading the persisted table first if needed.
    fn lock_loaded(&self) -> MutexGuard<'_, SessionState> {
        let mut state = self.state.lock();
        if !state.loaded {
            state.table = self.load_table();
            state.active = state.most_recent();
            state.loaded = true;
            debug!(count = state.table.len(), "Persisted sessions loaded");
        }
        state
    }

    /// Unreadable or invalid records yield an empty table.
    fn load_table(&self) -> BTreeMap<SessionKey, Session> {
        match self.storage.load() {
            Ok(Some(raw)) => match PersistedSessionTable::parse(&raw) {
                Ok(table) => table,
                Err(e) => {
                    warn!(error = %e, "Discarding persisted sessions");
                    BTreeMap::new()
                }
            },
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(error = %e, storage = %self.storage.describe(), "Failed to read persisted sessions");
                BTreeMap::new()
            }
        }
    }

    fn persist(&self, state: &SessionState) {
        let record = PersistedSessionTable::from_sessions(state.table.values()).to_json();
        let result = record.and_then(|json| self.storage.save(&json));
        if let Err(e) = result {
            warn!(error = %e, storage = %self.storage.describe(), "Failed to persist sessions, keeping in-memory state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::persisted::PersistedSession;
    use crate::session::storage::MemoryStorage;
    use chrono::Duration;

    fn store() -> (SessionStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (SessionStore::new(storage.clone()), storage)
    }

    fn persisted(class: IdentityClass, email: &str, last_active_at: DateTime<Utc>) -> PersistedSession {
        PersistedSession {
            session_key: SessionKey::derive(class, email).to_string(),
            identity_class: class,
            account: Account::with_email(email),
            credential: format!("tok-{}", email),
            last_active_at,
            created_at: last_active_at,
        }
    }

    #[test]
    fn test_login_twice_keeps_one_session() {
        let (store, _) = store();
        let k1 = store
            .login(IdentityClass::Admin, Account::with_email("a@x.com"), "t1")
            .unwrap();
        let k2 = store
            .login(IdentityClass::Admin, Account::with_email("a@x.com"), "t2")
            .unwrap();

        assert_eq!(k1, k2);
        let all = store.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].credential.expose(), "t2");
    }

    #[test]
    fn test_login_rejects_missing_email_or_credential() {
        let (store, storage) = store();
        assert!(matches!(
            store.login(IdentityClass::User, Account::with_email("  "), "tok"),
            Err(SessionError::InvalidAccount(_))
        ));
        assert!(matches!(
            store.login(IdentityClass::User, Account::with_email("nobody"), "tok"),
            Err(SessionError::InvalidAccount(_))
        ));
        assert!(matches!(
            store.login(IdentityClass::User, Account::with_email("u@x.com"), ""),
            Err(SessionError::InvalidAccount(_))
        ));
        assert!(store.is_empty());
        assert!(storage.record().is_none());
    }

    #[test]
    fn test_every_mutation_is_persisted() {
        let (store, storage) = store();
        let key = store
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok")
            .unwrap();

        let table = PersistedSessionTable::parse(&storage.record().unwrap()).unwrap();
        assert!(table.contains_key(key.as_str()));

        assert!(store.logout(key.as_str()));
        let table = PersistedSessionTable::parse(&storage.record().unwrap()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_logout_unknown_key_is_noop() {
        let (store, _) = store();
        store
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok")
            .unwrap();
        assert!(!store.logout("admin:nobody@x.com"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_logout_all_clears_record() {
        let (store, storage) = store();
        store
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok")
            .unwrap();
        store
            .login(IdentityClass::Admin, Account::with_email("a@x.com"), "tok")
            .unwrap();

        store.logout_all();
        assert!(store.is_empty());
        assert!(store.active().is_none());
        assert!(storage.record().is_none());
    }

    #[test]
    fn test_first_login_becomes_active_second_does_not() {
        let (store, _) = store();
        let user = store
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok")
            .unwrap();
        store
            .login(IdentityClass::Admin, Account::with_email("a@x.com"), "tok")
            .unwrap();
        assert_eq!(store.active().unwrap().key, user);
    }

    #[test]
    fn test_logout_active_repoints_to_most_recent() {
        let now = Utc::now();
        let record = PersistedSessionTable {
            version: crate::session::persisted::SESSION_TABLE_VERSION,
            sessions: vec![
                persisted(IdentityClass::User, "old@x.com", now - Duration::hours(3)),
                persisted(IdentityClass::User, "mid@x.com", now - Duration::hours(2)),
                persisted(IdentityClass::Admin, "new@x.com", now - Duration::hours(1)),
            ],
        };
        let storage = Arc::new(MemoryStorage::with_record(record.to_json().unwrap()));
        let store = SessionStore::new(storage);

        let active = store.restore(None).unwrap();
        assert_eq!(active.key.as_str(), "admin:new@x.com");

        assert!(store.logout("admin:new@x.com"));
        assert_eq!(store.active().unwrap().key.as_str(), "user:mid@x.com");

        // Logging out a non-active session leaves the pointer alone
        assert!(store.logout("user:old@x.com"));
        assert_eq!(store.active().unwrap().key.as_str(), "user:mid@x.com");

        assert!(store.logout("user:mid@x.com"));
        assert!(store.active().is_none());
    }

    #[test]
    fn test_restore_discards_corrupt_record() {
        let storage = Arc::new(MemoryStorage::with_record("{not json"));
        let store = SessionStore::new(storage);
        assert!(store.restore(None).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_prunes_idle_sessions() {
        let now = Utc::now();
        let record = PersistedSessionTable {
            version: crate::session::persisted::SESSION_TABLE_VERSION,
            sessions: vec![
                persisted(IdentityClass::User, "stale@x.com", now - Duration::days(40)),
                persisted(IdentityClass::User, "recent@x.com", now - Duration::days(1)),
            ],
        };
        let storage = Arc::new(MemoryStorage::with_record(record.to_json().unwrap()));
        let store = SessionStore::new(storage.clone());

        store.restore(Some(now - Duration::days(30)));
        assert_eq!(store.len(), 1);
        assert!(store.get("user:recent@x.com").is_some());

        // Pruning is written back
        let table = PersistedSessionTable::parse(&storage.record().unwrap()).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_login_before_restore_keeps_saved_sessions() {
        let now = Utc::now();
        let record = PersistedSessionTable {
            version: crate::session::persisted::SESSION_TABLE_VERSION,
            sessions: vec![persisted(IdentityClass::Admin, "a@x.com", now - Duration::hours(1))],
        };
        let storage = Arc::new(MemoryStorage::with_record(record.to_json().unwrap()));
        let store = SessionStore::new(storage.clone());

        let user = store
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok")
            .unwrap();
        assert_eq!(store.len(), 2);
        // The saved session was already active
        assert_eq!(store.active().unwrap().key.as_str(), "admin:a@x.com");

        let table = PersistedSessionTable::parse(&storage.record().unwrap()).unwrap();
        assert!(table.contains_key("admin:a@x.com"));
        assert!(table.contains_key(user.as_str()));

        // Boot afterwards does not reload over the new login
        store.restore(None);
        assert_eq!(store.len(), 2);
        assert!(store.get(user.as_str()).is_some());
    }

    #[test]
    fn test_write_failure_keeps_memory_authoritative() {
        let (store, storage) = store();
        storage.set_fail_writes(true);

        let key = store
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok")
            .unwrap();
        assert_eq!(store.get(key.as_str()).unwrap().credential.expose(), "tok");
        assert!(storage.record().is_none());
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let (store, _) = store();
        let mut rx = store.events().subscribe();
        let key = store
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok")
            .unwrap();
        store.logout(key.as_str());

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::LoggedIn { key: key.to_string() });
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Switched { key: key.to_string() });
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::LoggedOut { key: key.to_string() });
    }
}
