//! File-backed persistence for the synthesis engine: per-workspace SQLite
//! run artifacts, the atomic cycle-state file and the cross-process run lock.

pub mod error;
pub mod lock;
pub mod schema;
pub mod state;
pub mod store;
pub mod workspace;

pub use error::{Result, StoreError};
pub use store::SoulDb;
pub use workspace::{
    CONFIG_FILE, DATA_DIR_ENV, WorkspacePaths, WorkspaceStore, default_data_dir, load_config,
    resolve_workspace_id, sanitize_name,
};
