use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::model::{Credential, Session, SessionKey};
use super::store::SessionStore;
use crate::events::SessionEvent;

/// Chooses which session's credential the rest of the app sees.
///
/// Clone is cheap; clones share the store.
#[derive(Clone)]
pub struct Switchboard {
    store: Arc<SessionStore>,
    booted: Arc<AtomicBool>,
}

impl Switchboard {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            booted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Load persisted sessions and activate the most recently used one.
    /// Runs once; later calls only report the current active session.
    /// A window reaching back past the earliest representable time prunes
    /// nothing.
    pub fn on_boot(&self, max_idle: Option<chrono::TimeDelta>) -> Option<Session> {
        if self.booted.swap(true, Ordering::AcqRel) {
            warn!("Session boot requested twice, ignoring");
            return self.active();
        }
        let cutoff = max_idle.and_then(|idle| Utc::now().checked_sub_signed(idle));
        self.store.restore(cutoff)
    }

    pub fn active(&self) -> Option<Session> {
        self.store.active()
    }

    pub fn active_key(&self) -> Option<SessionKey> {
        self.active().map(|s| s.key)
    }

    /// Bearer credential of the active session, the only value other
    /// components should read from here.
    pub fn active_credential(&self) -> Option<Credential> {
        self.active().map(|s| s.credential)
    }

    /// Make `key` active. Unknown keys are a no-op returning false.
    pub fn switch_to(&self, key: &str) -> bool {
        match self.store.activate(key) {
            Some(_) => true,
            None => {
                debug!(session = %key, "Switch to unknown session ignored");
                false
            }
        }
    }

    pub fn logout(&self, key: &str) -> bool {
        self.store.logout(key)
    }

    pub fn logout_all(&self) {
        self.store.logout_all()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.events().subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{Account, IdentityClass};
    use crate::session::persisted::{PersistedSession, PersistedSessionTable, SESSION_TABLE_VERSION};
    use crate::session::storage::{JsonFileStorage, MemoryStorage};
    use chrono::{DateTime, Duration};

    fn switchboard() -> Switchboard {
        Switchboard::new(Arc::new(SessionStore::new(Arc::new(MemoryStorage::new()))))
    }

    fn persisted(email: &str, last_active_at: DateTime<Utc>) -> PersistedSession {
        PersistedSession {
            session_key: SessionKey::derive(IdentityClass::User, email).to_string(),
            identity_class: IdentityClass::User,
            account: Account::with_email(email),
            credential: format!("tok-{}", email),
            last_active_at,
            created_at: last_active_at,
        }
    }

    #[test]
    fn test_login_switch_logout_scenario() {
        let board = switchboard();
        let key = board
            .store()
            .login(IdentityClass::User, Account::with_email("t@test.com"), "tok1")
            .unwrap();

        assert!(board.switch_to(key.as_str()));
        assert_eq!(board.active_credential().unwrap().expose(), "tok1");

        assert!(board.logout(key.as_str()));
        assert!(board.active().is_none());
    }

    #[test]
    fn test_switch_to_unknown_is_noop() {
        let board = switchboard();
        let key = board
            .store()
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok")
            .unwrap();

        assert!(!board.switch_to("admin:ghost@x.com"));
        assert_eq!(board.active_key(), Some(key));
    }

    #[test]
    fn test_switch_bumps_last_active() {
        let board = switchboard();
        let user = board
            .store()
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok-u")
            .unwrap();
        let admin = board
            .store()
            .login(IdentityClass::Admin, Account::with_email("a@x.com"), "tok-a")
            .unwrap();
        assert_eq!(board.active_key(), Some(user));

        let before = board.store().get(admin.as_str()).unwrap().last_active_at;
        assert!(board.switch_to(admin.as_str()));
        let after = board.store().get(admin.as_str()).unwrap().last_active_at;

        assert!(after >= before);
        assert_eq!(board.active_credential().unwrap().expose(), "tok-a");
    }

    #[test]
    fn test_boot_selects_newest_and_repoints_on_logout() {
        let now = Utc::now();
        let record = PersistedSessionTable {
            version: SESSION_TABLE_VERSION,
            sessions: vec![
                persisted("a@x.com", now - Duration::minutes(30)),
                persisted("b@x.com", now - Duration::minutes(5)),
            ],
        };
        let storage = Arc::new(MemoryStorage::with_record(record.to_json().unwrap()));
        let board = Switchboard::new(Arc::new(SessionStore::new(storage)));

        let active = board.on_boot(None).unwrap();
        assert_eq!(active.key.as_str(), "user:b@x.com");

        assert!(board.logout("user:b@x.com"));
        assert_eq!(board.active_key().unwrap().as_str(), "user:a@x.com");
    }

    #[test]
    fn test_boot_with_huge_idle_window_keeps_sessions() {
        let now = Utc::now();
        let record = PersistedSessionTable {
            version: SESSION_TABLE_VERSION,
            sessions: vec![persisted("a@x.com", now - Duration::days(400))],
        };
        let storage = Arc::new(MemoryStorage::with_record(record.to_json().unwrap()));
        let board = Switchboard::new(Arc::new(SessionStore::new(storage)));

        let window = Duration::try_days(200_000_000);
        assert!(window.is_some());
        let active = board.on_boot(window).unwrap();
        assert_eq!(active.key.as_str(), "user:a@x.com");
    }

    #[test]
    fn test_boot_runs_once() {
        let storage = Arc::new(MemoryStorage::new());
        let board = Switchboard::new(Arc::new(SessionStore::new(storage.clone())));
        assert!(board.on_boot(None).is_none());

        board
            .store()
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok")
            .unwrap();
        // A second boot must not reload and wipe the live table
        assert!(board.on_boot(None).is_some());
        assert_eq!(board.store().len(), 1);
    }

    #[test]
    fn test_sessions_survive_restart_with_file_storage() {
        let dir = tempfile::tempdir().unwrap();

        let first = Switchboard::new(Arc::new(SessionStore::new(Arc::new(
            JsonFileStorage::in_dir(dir.path()),
        ))));
        first.on_boot(None);
        let user = first
            .store()
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok-u")
            .unwrap();
        let admin = first
            .store()
            .login(IdentityClass::Admin, Account::with_email("a@x.com"), "tok-a")
            .unwrap();
        assert!(first.switch_to(admin.as_str()));
        drop(first);

        let second = Switchboard::new(Arc::new(SessionStore::new(Arc::new(
            JsonFileStorage::in_dir(dir.path()),
        ))));
        let active = second.on_boot(None).unwrap();
        assert_eq!(active.key, admin);
        assert_eq!(active.badge, IdentityClass::Admin.badge());
        assert!(second.store().get(user.as_str()).is_some());
    }

    #[tokio::test]
    async fn test_subscribers_see_switches() {
        let board = switchboard();
        let u = board
            .store()
            .login(IdentityClass::User, Account::with_email("u@x.com"), "tok")
            .unwrap();
        let a = board
            .store()
            .login(IdentityClass::Admin, Account::with_email("a@x.com"), "tok")
            .unwrap();

        let mut rx = board.subscribe();
        board.switch_to(a.as_str());
        board.switch_to(u.as_str());

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Switched { key: a.to_string() });
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Switched { key: u.to_string() });
    }
}
