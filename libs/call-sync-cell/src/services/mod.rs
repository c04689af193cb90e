pub mod provider;
pub mod worker;

pub use provider::{CallProvider, RetellClient};
pub use worker::{CallSyncWorker, SyncSettings};
