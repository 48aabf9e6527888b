//! dashsync controller: keeps one list screen (query, page, selection,
//! counters) in sync with a remote collection.

#![forbid(unsafe_code)]

pub mod bulk;
pub mod controller;
pub mod fetch;
pub mod scheduler;
pub mod selection;
pub mod stats;
pub mod view;

pub use bulk::{BulkAction, BulkRun, BulkStrategy, Eligibility, Partition};
pub use controller::{RetryPath, SurfacedError, SyncController, SyncError, SyncUpdate};
pub use fetch::{LoadKind, LoadPhase};
pub use scheduler::ChangeKind;
pub use stats::StatsView;
pub use view::{ViewHandle, ViewState};
