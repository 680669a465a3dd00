//! NEON-SOUL synthesis engine.
//!
//! Turns raw text blocks into a small set of identity axioms:
//! signals are extracted and classified, clustered into principles, checked
//! for tensions, and compressed under the anti-echo-chamber rule and the
//! cognitive load cap. The [`CycleManager`] wraps one such pass with locking,
//! mode selection and an all-or-nothing commit.
//!
//! Zero filesystem or network I/O: persistence and model access come in
//! through the [`Persistence`] and [`Capability`] traits.

pub mod axiom;
pub mod capability;
pub mod compressor;
pub mod config;
pub mod constants;
pub mod cycle;
pub mod embedding;
pub mod export;
pub mod extractor;
pub mod persistence;
pub mod principle;
pub mod principle_store;
pub mod reflection;
pub mod report;
pub mod scoring;
pub mod signal;
pub mod tension;
pub mod time;
pub mod tokenizer;

pub use axiom::{Axiom, BlockReason, CanonicalForms, DerivedFrom, ProvenanceSummary};
pub use capability::{
    Capability, CapabilityError, FixtureProvider, LexicalProvider, ReliableCapability,
    RetryPolicy,
};
pub use compressor::{CompressionMetrics, CompressionOutcome, Compressor, compression_ratio};
pub use config::{ConfigError, SynthesisConfig};
pub use cycle::{
    CycleError, CycleManager, CycleMode, CycleOutcome, CycleState, RunOptions, content_delta,
    decide_mode,
};
pub use embedding::{Embedder, EmbeddingCache};
pub use export::{EXPORT_VERSION, ExportDocument, export_json, import_json};
pub use extractor::{ExtractionOutcome, ExtractorOptions, SignalExtractor};
pub use persistence::{
    LockAcquisition, MemoryPersistence, Persistence, PersistenceError, PersistenceResult,
    RunArtifacts,
};
pub use principle::{Principle, SignalRef};
pub use principle_store::{AddOutcome, MergeReport, PrincipleStore};
pub use reflection::{ReflectionInput, ReflectionLoop, ReflectionOutput};
pub use report::{DegradationCounter, DegradationCounts, RunReport, RunStatus};
pub use scoring::{Centrality, CentralityThresholds, MultiplicativeScoring, ScoringStrategy};
pub use signal::{Dimension, Elicitation, Importance, Signal, SourceBlock, SourceCategory, Stance};
pub use tension::{AttachMode, Severity, Tension, TensionDetector, attach_tensions};
