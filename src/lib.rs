pub mod autosave;
pub mod backend;
pub mod commands;
pub mod events;
pub mod logging;
pub mod models;
pub mod remote;
pub mod state;
pub mod storage;
pub mod timefmt;
pub mod tree;
pub mod views;

pub use backend::{Backend, BackendError, Persistence};
pub use state::{DataStore, StoreError, SyncState};
pub use storage::LocalStore;
