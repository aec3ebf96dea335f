//! Process-wide repository handles.
//!
//! Every operation on a working tree shares one [`GitClient`], created on
//! first use and reused for the rest of the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::client::GitClient;
use crate::errors::GitError;

static HANDLES: OnceLock<Mutex<HashMap<PathBuf, Arc<GitClient>>>> = OnceLock::new();

/// Get the shared client for `work_tree`, creating it on first use.
///
/// # Errors
///
/// Returns an error if git is not installed.
pub fn open(work_tree: &Path) -> Result<Arc<GitClient>, GitError> {
    let mut handles = HANDLES
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(client) = handles.get(work_tree) {
        return Ok(Arc::clone(client));
    }
    let client = Arc::new(GitClient::new(work_tree)?);
    handles.insert(work_tree.to_path_buf(), Arc::clone(&client));
    Ok(client)
}
