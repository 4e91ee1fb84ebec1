pub mod archive;
pub mod comparator;
pub mod engine;
pub mod executor;
pub mod reconciler;
pub mod report;
pub mod scanner;
pub mod stats;

pub use archive::ArchiveDispatcher;
pub use comparator::{CompareMethod, FileComparator, FileRelation};
pub use engine::{SyncConfig, SyncEngine};
pub use executor::WorkerPool;
pub use reconciler::DeletionReconciler;
pub use report::{format_bytes, format_duration, SyncReport};
pub use scanner::{BrokenLinkPolicy, FileScanner, ScanConfig};
pub use stats::{RunStats, StatsSnapshot};
