//! Durable device identity.
//!
//! One opaque token per installation, stored as a single line in
//! `<state_dir>/device_id`. Read once at construction, written once if
//! absent. A failed write degrades to an ephemeral id for this process.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use tracing::{debug, warn};

/// File name holding the identity token inside the state directory.
const DEVICE_ID_FILE: &str = "device_id";

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crosstalk")
}

/// Load the persisted device id, or mint and persist a fresh one.
///
/// `state_dir` overrides the platform data directory. An unreadable or empty
/// file is replaced; an unwritable directory is logged and the id stays
/// ephemeral.
pub fn load_or_create(state_dir: Option<&Path>, prefix: &str) -> String {
    let dir = state_dir.map(Path::to_path_buf).unwrap_or_else(default_state_dir);
    let path = dir.join(DEVICE_ID_FILE);

    if let Ok(raw) = std::fs::read_to_string(&path) {
        let stored = raw.trim();
        if !stored.is_empty() {
            debug!(device_id = stored, "Loaded persisted device identity");
            return stored.to_string();
        }
    }

    let id = generate(prefix);
    if let Err(e) = std::fs::create_dir_all(&dir)
        .and_then(|_| std::fs::write(&path, &id))
    {
        warn!(error = %e, path = %path.display(), "Can't persist device id, using ephemeral identity");
    } else {
        debug!(device_id = %id, path = %path.display(), "Persisted new device identity");
    }
    id
}

/// Mint a new identity token: `{prefix}-{unix_millis}-{9 char suffix}`.
fn generate(prefix: &str) -> String {
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), random_suffix())
}

/// Nine lowercase alphanumeric characters, the relay's token-suffix style.
pub(crate) fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}
