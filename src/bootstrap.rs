//! Bootstrap helpers for olas-operate.
//!
//! Bootstrap env vars are read from disk so that the backend and RPC
//! endpoints are known before any settings file is read.
//!
//! File: `~/.olas-operate/.env` (standard dotenvy format)

use std::path::PathBuf;

/// Base directory for all operator-local state: `~/.olas-operate`.
pub fn operate_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".olas-operate")
}

/// Path to the operator `.env` file: `~/.olas-operate/.env`.
pub fn operate_env_path() -> PathBuf {
    operate_home().join(".env")
}

/// Load env vars from `~/.olas-operate/.env` (in addition to the standard `.env`).
///
/// Call this **after** `dotenvy::dotenv()` so that the standard `./.env`
/// takes priority. dotenvy never overwrites existing env vars, so the
/// effective priority is:
///
///   explicit env vars > `./.env` > `~/.olas-operate/.env`
pub fn load_operate_env() {
    let path = operate_env_path();
    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        tracing::warn!("Failed to load {}: {}", path.display(), e);
    }
}
