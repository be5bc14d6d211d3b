// State snapshot - durable checkpoint of the believed operational state
pub mod store;
pub mod types;

pub use store::StateSnapshotStore;
pub use types::{SnapshotTrade, StateSnapshot};
