/// Minimum similarity for a signal to reinforce an existing principle.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.85;

/// Minimum similarity for two principles to be merged.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.92;

/// Normalised strength at or above which a principle is foundational.
pub const DEFAULT_FOUNDATIONAL_THRESHOLD: f64 = 0.5;

/// Normalised strength at or above which a principle is core.
pub const DEFAULT_CORE_THRESHOLD: f64 = 0.2;

/// Summed signal weight at which a principle's strength reaches 1.0.
pub const DEFAULT_CENTRALITY_SATURATION: f64 = 10.0;

/// Minimum nCount for a principle to be considered for promotion.
pub const DEFAULT_N_THRESHOLD: usize = 3;

/// Cognitive load cap: maximum promoted axioms per run.
pub const DEFAULT_COGNITIVE_LOAD_CAP: usize = 25;

/// Upper bound on the quadratic tension comparison set.
pub const DEFAULT_TENSION_MAX_CANDIDATES: usize = 25;

/// Parallel classification calls per extraction batch.
pub const DEFAULT_CONCURRENCY: i64 = 4;

/// Share of new source content that forces a full resynthesis.
pub const DEFAULT_RESYNTHESIS_DELTA: f64 = 0.30;

/// Accumulated new high-severity tensions that force a full resynthesis.
pub const DEFAULT_CONTRADICTION_LIMIT: u32 = 2;

/// Runs retained in the store for baseline comparison.
pub const DEFAULT_KEEP_RUNS: usize = 5;

/// Retries after the first capability attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Per-call capability timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Base delay between capability retries.
pub const DEFAULT_BACKOFF_MS: u64 = 250;

/// Floor applied to denominators of ratio metrics.
pub const RATIO_FLOOR: f64 = 1.0;

/// Version tag written into cycle state; a mismatch forces resynthesis.
pub const STATE_SCHEMA_VERSION: u32 = 1;
