//! Profile partitioning (spec §3 "Profile", §4.A profile operations).
//!
//! `profiles.json` on disk: `{profiles: {name: {meta...}}, active_profile}`.
//! Switching is a metadata update only — it never moves rows, since
//! every table is already partitioned by a `profile` column.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Default profile name used when a store is opened for the first time.
pub const DEFAULT_PROFILE: &str = "default";

/// Metadata for one profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileMeta {
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ProfilesFile {
    profiles: HashMap<String, ProfileMeta>,
    active_profile: Option<String>,
}

/// Filesystem-safe name check: ASCII alphanumerics, `-`, `_` only.
fn is_filesystem_safe(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Manages `profiles.json` and the currently active profile.
pub struct ProfileManager {
    path: PathBuf,
    state: ProfilesFile,
}

impl ProfileManager {
    /// Load (or initialize) `profiles.json` under `root`, creating the
    /// default profile if the file does not yet exist.
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join("profiles.json");
        let mut state = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProfilesFile::default(),
            Err(e) => return Err(ErrorKind::Internal(crate::error::sanitize(e.to_string()))),
        };

        if state.profiles.is_empty() {
            let now = Utc::now();
            state.profiles.insert(
                DEFAULT_PROFILE.to_string(),
                ProfileMeta { description: "Default profile".into(), created_at: now, last_used_at: now },
            );
            state.active_profile = Some(DEFAULT_PROFILE.to_string());
        }
        if state.active_profile.is_none() {
            state.active_profile = state.profiles.keys().next().cloned();
        }

        let manager = Self { path, state };
        manager.persist()?;
        Ok(manager)
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| ErrorKind::Internal(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| ErrorKind::Internal(crate::error::sanitize(e.to_string())))
    }

    /// Name of the profile every scoped query/write should use.
    pub fn active_profile(&self) -> &str {
        self.state
            .active_profile
            .as_deref()
            .unwrap_or(DEFAULT_PROFILE)
    }

    pub fn list(&self) -> Vec<(String, ProfileMeta)> {
        self.state.profiles.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn create(&mut self, name: &str, description: &str) -> Result<()> {
        if !is_filesystem_safe(name) {
            return Err(ErrorKind::InvalidInput(format!("profile name '{name}' is not filesystem-safe")));
        }
        if self.state.profiles.contains_key(name) {
            return Err(ErrorKind::Conflict(format!("profile '{name}' already exists")));
        }
        let now = Utc::now();
        self.state.profiles.insert(
            name.to_string(),
            ProfileMeta { description: description.to_string(), created_at: now, last_used_at: now },
        );
        self.persist()
    }

    /// Switch the active profile. Metadata-only; callers must scope
    /// subsequent Store operations with the new `active_profile()`.
    pub fn switch(&mut self, name: &str) -> Result<()> {
        if !self.state.profiles.contains_key(name) {
            return Err(ErrorKind::NotFound(format!("profile '{name}' does not exist")));
        }
        if let Some(meta) = self.state.profiles.get_mut(name) {
            meta.last_used_at = Utc::now();
        }
        self.state.active_profile = Some(name.to_string());
        self.persist()
    }

    /// Remove a profile's metadata. Callers are responsible for purging
    /// its rows from every profile-scoped table beforehand (Store owns
    /// that transaction; see `Orchestrator::delete_profile`).
    pub fn delete(&mut self, name: &str) -> Result<()> {
        if name == DEFAULT_PROFILE {
            return Err(ErrorKind::InvalidInput("cannot delete the default profile".into()));
        }
        if self.state.profiles.remove(name).is_none() {
            return Err(ErrorKind::NotFound(format!("profile '{name}' does not exist")));
        }
        if self.state.active_profile.as_deref() == Some(name) {
            self.state.active_profile = Some(DEFAULT_PROFILE.to_string());
        }
        self.persist()
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if !is_filesystem_safe(new) {
            return Err(ErrorKind::InvalidInput(format!("profile name '{new}' is not filesystem-safe")));
        }
        if self.state.profiles.contains_key(new) {
            return Err(ErrorKind::Conflict(format!("profile '{new}' already exists")));
        }
        let meta = self
            .state
            .profiles
            .remove(old)
            .ok_or_else(|| ErrorKind::NotFound(format!("profile '{old}' does not exist")))?;
        self.state.profiles.insert(new.to_string(), meta);
        if self.state.active_profile.as_deref() == Some(old) {
            self.state.active_profile = Some(new.to_string());
        }
        self.persist()
    }
}
