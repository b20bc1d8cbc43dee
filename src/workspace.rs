//! Workspace root resolution
//!
//! The root is resolved once at startup from an explicit path (`--root` / `CORNE_ROOT`) or the
//! current working directory. Everything else is derived from it.

use std::env;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::WorkspaceError;

/// Location of the device inventory relative to the workspace root
pub const INVENTORY_PATH: &str = "etc/devices.conf";
/// Location of built firmware artifacts relative to the workspace root
pub const RESULTS_DIR: &str = "results";

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Resolves the workspace from the given `explicit` root, or the current directory when
    /// none was given.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Workspace, WorkspaceError> {
        let root = match explicit {
            Some(root) => root,
            None => env::current_dir().map_err(WorkspaceError::CurrentDir)?,
        };

        if !root.is_dir() {
            return Err(WorkspaceError::NotFound(root));
        }

        debug!("Using workspace root {}", root.display());

        Ok(Workspace { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inventory_path(&self) -> PathBuf {
        self.root.join(INVENTORY_PATH)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }
}
