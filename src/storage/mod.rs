//! Storage: the in-memory backend and the audit-stamping session on top of
//! any `DataStore`

pub mod in_memory;
pub mod session;

pub use in_memory::InMemoryStore;
pub use session::{Flush, FlushFailure, Session};
