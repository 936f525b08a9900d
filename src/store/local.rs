//! Local preference store — the on-device cached copy of one user's profile.
//!
//! A single JSON document, read whole and written whole. Absent or corrupt
//! files read as the default (empty) profile, matching the remote side's
//! treatment of missing records. Writes go through a temp file + rename so
//! each `update` call is atomic on disk; nothing is transactional across
//! calls (last writer wins).

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use crate::models::UserProfile;

use super::StoreError;

pub struct PreferenceStore {
    path: PathBuf,
    /// Serializes the read-modify-write inside one `update` call.
    guard: Mutex<()>,
}

impl PreferenceStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Open at the default on-device location (~/Saqtan/data.json).
    pub fn at_default_location() -> Self {
        Self::open(crate::config::profile_path())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read the cached profile. Absent or corrupt files yield the default.
    pub fn read(&self) -> UserProfile {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        self.read_unlocked()
    }

    /// Apply `transform` to the cached profile and persist the result
    /// atomically. Returns the profile as written.
    pub fn update<F>(&self, transform: F) -> Result<UserProfile, StoreError>
    where
        F: FnOnce(UserProfile) -> UserProfile,
    {
        let _guard = self.guard.lock().map_err(|_| StoreError::LockPoisoned)?;
        let updated = transform(self.read_unlocked());
        self.write_unlocked(&updated)?;
        Ok(updated)
    }

    /// Reset the cache to the default profile (sign-out path).
    pub fn reset(&self) -> Result<(), StoreError> {
        let _guard = self.guard.lock().map_err(|_| StoreError::LockPoisoned)?;
        self.write_unlocked(&UserProfile::default())
    }

    fn read_unlocked(&self) -> UserProfile {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!("corrupt profile cache at {:?}: {e}", self.path);
                UserProfile::default()
            }),
            Err(_) => UserProfile::default(),
        }
    }

    fn write_unlocked(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let parent = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&serde_json::to_vec_pretty(profile)?)?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}
