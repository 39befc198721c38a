//! Durable key-value store for the user profile and settings.
//!
//! The on-disk document is one JSON object with the keys `userProfile`,
//! `autoFillEnabled`, `autoSubmitEnabled` and `lastFillTime`.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// The answers the form is filled from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub full_name: String,
    /// "challenge", "battle", a team/doubles variant, or anything else.
    pub challenge_type: String,
    pub challenge_target: String,
    pub partner_name: String,
    pub practice_days: Vec<String>,
    pub challenge_days: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub auto_fill_enabled: bool,
    pub auto_submit_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_fill_enabled: true,
            auto_submit_enabled: false,
        }
    }
}

/// Everything the store holds. Missing keys stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_fill_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_submit_enabled: Option<bool>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fill_time: Option<i64>,
}

impl StoreSnapshot {
    pub fn settings(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            auto_fill_enabled: self.auto_fill_enabled.unwrap_or(defaults.auto_fill_enabled),
            auto_submit_enabled: self
                .auto_submit_enabled
                .unwrap_or(defaults.auto_submit_enabled),
        }
    }

    /// Overwrite the keys present in `patch`.
    pub fn apply(&mut self, patch: StorePatch) {
        if let Some(profile) = patch.user_profile {
            self.user_profile = Some(profile);
        }
        if let Some(enabled) = patch.auto_fill_enabled {
            self.auto_fill_enabled = Some(enabled);
        }
        if let Some(enabled) = patch.auto_submit_enabled {
            self.auto_submit_enabled = Some(enabled);
        }
        if let Some(time) = patch.last_fill_time {
            self.last_fill_time = Some(time);
        }
    }
}

/// A partial update; only `Some` keys are written.
pub type StorePatch = StoreSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store is locked by another process: {0}")]
    Lock(PathBuf),
}

/// Asynchronous get/set access to the profile store.
#[allow(async_fn_in_trait)]
pub trait ProfileStore {
    async fn get(&self) -> Result<StoreSnapshot, StoreError>;
    async fn set(&self, patch: StorePatch) -> Result<(), StoreError>;
}

/// Default location: `<config_dir>/signup-autofill/store.json`.
pub fn default_store_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("signup-autofill").join("store.json"))
}

/// Store persisted as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Read the file, treating a missing file as an empty store.
    pub fn read(&self) -> Result<StoreSnapshot, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(StoreSnapshot::default()),
            Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Json {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StoreSnapshot::default()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Merge `patch` into the file and return the resulting snapshot.
    pub fn update(&self, patch: StorePatch) -> Result<StoreSnapshot, StoreError> {
        self.modify(|snapshot| {
            snapshot.apply(patch);
            snapshot.clone()
        })
    }

    /// Remove the profile while keeping settings.
    pub fn clear_profile(&self) -> Result<(), StoreError> {
        self.modify(|snapshot| snapshot.user_profile = None)
    }

    /// Read-modify-write under an exclusive lock file, writing via temp file
    /// + rename.
    fn modify<T>(&self, f: impl FnOnce(&mut StoreSnapshot) -> T) -> Result<T, StoreError> {
        use fs2::FileExt;

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent).map_err(io_err)?;

        let lock_path = self.lock_path();
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(io_err)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Lock(lock_path.clone()))?;

        let mut snapshot = self.read()?;
        let output = f(&mut snapshot);

        let json = serde_json::to_string_pretty(&snapshot).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let temp_path = parent.join(format!(".store.json.tmp-{}-{nanos}", std::process::id()));
        {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)
                .map_err(io_err)?;
            file.write_all(json.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        if let Err(err) = replace_file(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(io_err(err));
        }
        let _ = FileExt::unlock(&lock_file);
        Ok(output)
    }
}

/// Atomically replace a file via rename, with a Windows fallback.
fn replace_file(temp_path: &Path, path: &Path) -> io::Result<()> {
    match std::fs::rename(temp_path, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            #[cfg(windows)]
            {
                if err.kind() == io::ErrorKind::AlreadyExists {
                    std::fs::remove_file(path)?;
                    return std::fs::rename(temp_path, path);
                }
            }
            Err(err)
        }
    }
}

impl ProfileStore for JsonFileStore {
    async fn get(&self) -> Result<StoreSnapshot, StoreError> {
        self.read()
    }

    async fn set(&self, patch: StorePatch) -> Result<(), StoreError> {
        self.update(patch).map(|_| ())
    }
}

/// Store kept in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: RefCell<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new(snapshot: StoreSnapshot) -> Self {
        Self {
            snapshot: RefCell::new(snapshot),
        }
    }

    pub fn with_profile(profile: Profile) -> Self {
        Self::new(StoreSnapshot {
            user_profile: Some(profile),
            ..StoreSnapshot::default()
        })
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot.borrow().clone()
    }
}

impl ProfileStore for MemoryStore {
    async fn get(&self) -> Result<StoreSnapshot, StoreError> {
        Ok(self.snapshot())
    }

    async fn set(&self, patch: StorePatch) -> Result<(), StoreError> {
        self.snapshot.borrow_mut().apply(patch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn create_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "signup-autofill-{prefix}-{}-{now}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap_or_else(|err| {
            panic!("failed to create temp dir: {err}");
        });
        dir
    }

    #[test]
    fn settings_default_to_autofill_on_autosubmit_off() {
        let settings = StoreSnapshot::default().settings();
        assert!(settings.auto_fill_enabled);
        assert!(!settings.auto_submit_enabled);
    }

    #[test]
    fn profile_accepts_partial_camel_case_json() {
        let profile: Profile = serde_json::from_str(
            r#"{"fullName":"Jane Doe","challengeType":"battle","practiceDays":["Monday"]}"#,
        )
        .unwrap_or_else(|err| panic!("parse failed: {err}"));
        assert_eq!(profile.full_name, "Jane Doe");
        assert_eq!(profile.challenge_type, "battle");
        assert_eq!(profile.practice_days, vec!["Monday".to_string()]);
        assert!(profile.partner_name.is_empty());
    }

    #[test]
    fn missing_file_reads_as_empty_store() {
        let root = create_temp_dir("store-missing");
        let store = JsonFileStore::new(root.join("nested").join("store.json"));
        let snapshot = store
            .read()
            .unwrap_or_else(|err| panic!("read failed: {err}"));
        assert_eq!(snapshot, StoreSnapshot::default());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn update_merges_only_present_keys() {
        let root = create_temp_dir("store-merge");
        let store = JsonFileStore::new(root.join("store.json"));
        store
            .update(StorePatch {
                user_profile: Some(Profile {
                    full_name: "Jane Doe".into(),
                    ..Profile::default()
                }),
                auto_submit_enabled: Some(true),
                ..StorePatch::default()
            })
            .unwrap_or_else(|err| panic!("first update failed: {err}"));
        store
            .update(StorePatch {
                last_fill_time: Some(1_700_000_000_000),
                ..StorePatch::default()
            })
            .unwrap_or_else(|err| panic!("second update failed: {err}"));

        let snapshot = store
            .read()
            .unwrap_or_else(|err| panic!("read failed: {err}"));
        assert_eq!(
            snapshot.user_profile.map(|p| p.full_name).as_deref(),
            Some("Jane Doe")
        );
        assert_eq!(snapshot.auto_submit_enabled, Some(true));
        assert_eq!(snapshot.last_fill_time, Some(1_700_000_000_000));

        let text = fs::read_to_string(root.join("store.json"))
            .unwrap_or_else(|err| panic!("failed to read store file: {err}"));
        assert!(text.contains("\"userProfile\""));
        assert!(text.contains("\"lastFillTime\""));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn clear_profile_keeps_settings() {
        let root = create_temp_dir("store-clear");
        let store = JsonFileStore::new(root.join("store.json"));
        store
            .update(StorePatch {
                user_profile: Some(Profile::default()),
                auto_fill_enabled: Some(false),
                ..StorePatch::default()
            })
            .unwrap_or_else(|err| panic!("update failed: {err}"));
        store
            .clear_profile()
            .unwrap_or_else(|err| panic!("clear failed: {err}"));
        let snapshot = store
            .read()
            .unwrap_or_else(|err| panic!("read failed: {err}"));
        assert_eq!(snapshot.user_profile, None);
        assert_eq!(snapshot.auto_fill_enabled, Some(false));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn invalid_json_is_reported() {
        let root = create_temp_dir("store-invalid");
        let path = root.join("store.json");
        fs::write(&path, "{not json").unwrap_or_else(|err| panic!("write failed: {err}"));
        let err = JsonFileStore::new(&path).read().err();
        assert!(matches!(err, Some(StoreError::Json { .. })));
        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn memory_store_applies_patches() {
        let store = MemoryStore::with_profile(Profile::default());
        store
            .set(StorePatch {
                last_fill_time: Some(5),
                ..StorePatch::default()
            })
            .await
            .unwrap_or_else(|err| panic!("set failed: {err}"));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.last_fill_time, Some(5));
        assert!(snapshot.user_profile.is_some());
    }
}
