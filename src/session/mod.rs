// ABOUTME: Session module — conversation state, eviction, persistence backends, and the store.
// ABOUTME: Everything that reads or mutates stored history lives here.

pub mod eviction;
pub mod persistence;
pub mod store;
pub mod types;

pub use eviction::{Budget, EvictionPolicy, MIN_RETAINED_TURNS, SizeStrategy, session_size};
pub use persistence::{FileBackend, MemoryBackend, SessionBackend};
pub use store::{DEFAULT_SYSTEM_MESSAGE, SaveRetry, SessionStore};
pub use types::{Role, Session, Turn};
