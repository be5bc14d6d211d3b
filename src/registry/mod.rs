// Position registry - in-memory view of what this process considers open
pub mod matching;
pub mod operations;
pub mod state;
pub mod sync;
pub mod types;

pub use state::PositionRegistry;
pub use types::{CloseTarget, EntryKey, SyncResult, TrackedPosition};
