//! Source remotes and the sync engine that mirrors them.
//!
//! Several source remotes (cloud drives, local folders) are mirrored one-way
//! into subfolders of a single destination remote using `rclone`.
//!
//! # Architecture
//!
//! - **registry**: configured sources and their subfolder metadata
//! - **runner**: runs one external command and classifies the outcome
//! - **rclone**: command vocabulary, destination path layout, listing parser
//! - **transcript**: append-only run log with injectable sinks
//! - **reconcile**: purges destination folders with no matching source
//! - **mirror**: `rclone sync` per source, failures isolated
//! - **sync**: the orchestrator tying the above together
//! - **status**: per-source last-run status on disk
//! - **interactive**: confirmation before a destructive run
//!
//! # Destination layout
//!
//! ```text
//! {destination}:{bucket}/user/{destination}/{source}
//! ```
//!
//! # Syncing
//!
//! ```rust,ignore
//! use cloud_mirror::sources::{SyncOrchestrator, TokioRunner};
//!
//! let orchestrator = SyncOrchestrator::new(TokioRunner::new());
//! let report = orchestrator.execute_sync(options).await;
//! if !report.success {
//!     eprintln!("{}", report.transcript);
//! }
//! ```

pub mod interactive;
pub mod mirror;
pub mod rclone;
pub mod reconcile;
pub mod registry;
pub mod runner;
pub mod status;
pub mod sync;
pub mod transcript;

pub use mirror::{MirrorExecutor, MirrorResult};
pub use rclone::{Destination, Rclone, source_path};
pub use reconcile::{PurgeResult, ReconcileReport, Reconciler};
pub use registry::{
    MetadataMap, ProviderKind, RESERVED_SOURCE_NAME, RemoteMetadata, ScopeKind, SourceRemote,
};
pub use runner::{CommandLine, CommandRunner, ProcessError, ProcessOutput, TokioRunner};
pub use status::{SourceSyncInfo, SyncResult, SyncStatus};
pub use sync::{CancelFlag, SetupError, SyncOrchestrator, SyncRunOptions, SyncRunReport};
pub use transcript::{FileSink, TracingSink, Transcript, TranscriptSink};
