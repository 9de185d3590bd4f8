pub mod config;
pub mod error;
pub mod events;
pub mod store;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use events::{DomainEvent, EventBus, EventKind, NoticeLevel, Subscription};
pub use store::{InMemoryStore, KeyValueStore};
pub use types::*;
