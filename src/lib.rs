//! Embedded personal memory engine: hybrid lexical/semantic/graph
//! search, tiered compression, and Bayesian preference learning over a
//! local SQLite store, partitioned by profile.
//!
//! See [`orchestrator::Orchestrator`] for the single entry point most
//! callers want; the component modules (`store`, `search`, `graph`,
//! `learner`, `compressor`) are public for callers who need direct
//! access to one piece without the rate-limit/trust gate.

pub mod compressor;
pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod learner;
pub mod orchestrator;
pub mod search;
pub mod store;
pub mod tokenizer;

pub use compressor::{CompressionReport, Compressor};
pub use config::Config;
pub use error::{ErrorKind, Result};
pub use event::{Event, EventBus, EventType};
pub use graph::{ClusterSummary, GraphEngine, GraphStats};
pub use learner::{LearnedPattern, PatternLearner};
pub use orchestrator::{CancellationToken, Caller, Orchestrator};
pub use search::hybrid::SearchHit;
pub use search::{FusionStrategy, SearchEngine};
pub use store::{ArchiveRecord, ColdStorageRecord, ListFilters, Memory, MemoryUpdate, NewMemory, ProfileManager, ProfileMeta, SortBy, Store, Tier, DEFAULT_PROFILE};

/// Convenience re-exports for the common case: open an `Orchestrator`
/// and call its methods.
pub mod prelude {
    pub use crate::{
        CancellationToken, Caller, ClusterSummary, CompressionReport, Compressor, Config,
        ErrorKind, Event, EventBus, EventType, FusionStrategy, GraphEngine, GraphStats,
        LearnedPattern, ListFilters, Memory, MemoryUpdate, NewMemory, Orchestrator,
        PatternLearner, ProfileManager, ProfileMeta, Result, SearchEngine, SearchHit, SortBy,
        Store, Tier, DEFAULT_PROFILE,
    };
}
