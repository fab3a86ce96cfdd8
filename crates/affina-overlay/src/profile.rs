use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

const PROFILE_FILE: &str = "profile.json";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    #[serde(default)]
    pub user_name: String,
}

/// Persists the only state that outlives a run: the display name.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(PROFILE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored display name, or `None` when there is none yet.
    pub fn load_user_name(&self) -> Result<Option<String>, ProfileError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let profile: Profile = serde_json::from_str(&content)?;
        let name = profile.user_name.trim().to_string();
        Ok((!name.is_empty()).then_some(name))
    }

    pub fn save_user_name(&self, user_name: &str) -> Result<(), ProfileError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let profile = Profile {
            user_name: user_name.trim().to_string(),
        };
        let body = serde_json::to_vec_pretty(&profile)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
