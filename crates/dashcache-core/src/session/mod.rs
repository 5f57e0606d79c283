//! Multi-identity session management.
//!
//! This module provides:
//! - `SessionStore`: keyed table of concurrently held sessions
//! - `Switchboard`: which session is active, boot-time restore
//! - `SessionStorage`: durable backends (JSON file, OS keychain, memory)
//!
//! Sessions persist across restarts; the persisted form is plain data only.

pub mod model;
pub mod persisted;
pub mod storage;
pub mod store;
pub mod switchboard;

pub use model::{Account, Credential, IdentityBadge, IdentityClass, Session, SessionKey};
pub use persisted::{PersistedSession, PersistedSessionTable};
pub use storage::{JsonFileStorage, KeyringStorage, MemoryStorage, SessionStorage};
pub use store::SessionStore;
pub use switchboard::Switchboard;
