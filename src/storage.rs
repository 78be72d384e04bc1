//! Local persistence: history, trial counter, activation flag, API key.
//!
//! [`LocalStore`] is a flat key-value store, one JSON file per key in a data
//! directory. Everything above it is a thin typed view:
//!
//! | View | Keys |
//! |---|---|
//! | [`HistoryLog`] | `doculatex_history` |
//! | [`LicenseGate`] | `doculatex_usage_count`, `doculatex_activated` |
//! | [`CredentialStore`] | `user_gemini_api_key` |
//!
//! ## Concurrency
//!
//! None. Reads and writes are synchronous and non-transactional; two
//! processes sharing a data directory race with last-writer-wins. Each write
//! goes to a temp file first and is renamed into place, so a reader never
//! sees half a file.
//!
//! ## Why tolerate corrupt values?
//!
//! A hand-edited or truncated history file should cost the user their
//! history, not the ability to convert. Unparseable values are logged and
//! read as absent.

use crate::error::DocuLatexError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const HISTORY_KEY: &str = "doculatex_history";
pub const USAGE_COUNT_KEY: &str = "doculatex_usage_count";
pub const ACTIVATED_KEY: &str = "doculatex_activated";
pub const API_KEY_KEY: &str = "user_gemini_api_key";

/// Most recent conversions kept.
pub const HISTORY_CAP: usize = 50;

/// Free conversions before activation is required.
pub const MAX_TRIAL_USES: u32 = 10;

/// Shared unlock code. A product gate, not a secret: anyone who reads the
/// binary can find it.
pub const UNLOCK_CODE: &str = "DOCULATEX-PRO-2025";

/// Every valid Gemini key starts with this.
pub const API_KEY_PREFIX: &str = "AIza";

/// Text left in a key field by the setup template.
const KEY_TEMPLATE_MARKER: &str = "Điền_Mã";

/// Environment fallback when no key is stored.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

// ── Key-value store ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DocuLatexError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| DocuLatexError::Storage {
            path: dir.clone(),
            detail: e.to_string(),
        })?;
        debug!("Opened local store at {}", dir.display());
        Ok(Self { dir })
    }

    /// Open the store in [`default_dir`].
    pub fn open_default() -> Result<Self, DocuLatexError> {
        Self::open(default_dir()?)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn storage_err(path: &Path, e: impl std::fmt::Display) -> DocuLatexError {
        DocuLatexError::Storage {
            path: path.to_path_buf(),
            detail: e.to_string(),
        }
    }

    /// Raw stored value, or `None` if the key was never set.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>, DocuLatexError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::storage_err(&path, e)),
        }
    }

    pub fn set_raw(&self, key: &str, value: &str) -> Result<(), DocuLatexError> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, value).map_err(|e| Self::storage_err(&path, e))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| Self::storage_err(&path, e))
    }

    /// Remove a key. Removing an absent key is not an error.
    pub fn remove(&self, key: &str) -> Result<(), DocuLatexError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::storage_err(&path, e)),
        }
    }

    /// Typed read. A value that does not parse is logged and read as `None`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DocuLatexError> {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!("Ignoring unreadable value for '{}': {}", key, e);
                Ok(None)
            }
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), DocuLatexError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| Self::storage_err(&self.path_for(key), e))?;
        self.set_raw(key, &raw)
    }

    pub fn history(&self) -> HistoryLog<'_> {
        HistoryLog { store: self }
    }

    pub fn license(&self) -> LicenseGate<'_> {
        LicenseGate { store: self }
    }

    pub fn credentials(&self) -> CredentialStore<'_> {
        CredentialStore { store: self }
    }
}

/// `DOCULATEX_DATA_DIR` if set, else `<local data dir>/doculatex`.
pub fn default_dir() -> Result<PathBuf, DocuLatexError> {
    if let Ok(dir) = std::env::var("DOCULATEX_DATA_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::data_local_dir()
        .map(|d| d.join("doculatex"))
        .ok_or_else(|| {
            DocuLatexError::InvalidConfig(
                "no local data directory found; set DOCULATEX_DATA_DIR".to_string(),
            )
        })
}

// ── History ──────────────────────────────────────────────────────────────────

/// One saved conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub file_name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Canonical text.
    pub markdown: String,
}

impl HistoryEntry {
    pub fn new(file_name: impl Into<String>, markdown: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: format!("{}{:x}", now.timestamp_millis(), now.timestamp_subsec_nanos() % 1_000_000),
            file_name: file_name.into(),
            timestamp: now.timestamp_millis(),
            markdown: markdown.into(),
        }
    }

    /// Local date-time, for listings.
    pub fn local_time(&self) -> Option<chrono::DateTime<chrono::Local>> {
        chrono::DateTime::from_timestamp_millis(self.timestamp).map(|t| t.with_timezone(&chrono::Local))
    }
}

/// Newest-first list of past conversions, capped at [`HISTORY_CAP`].
pub struct HistoryLog<'a> {
    store: &'a LocalStore,
}

impl HistoryLog<'_> {
    pub fn list(&self) -> Result<Vec<HistoryEntry>, DocuLatexError> {
        Ok(self.store.get_json(HISTORY_KEY)?.unwrap_or_default())
    }

    /// Record a conversion; the oldest entries beyond the cap are dropped.
    pub fn push(&self, file_name: &str, markdown: &str) -> Result<HistoryEntry, DocuLatexError> {
        let mut entries = self.list()?;
        let mut entry = HistoryEntry::new(file_name, markdown);
        let base = entry.id.clone();
        let mut n = 1;
        while entries.iter().any(|e| e.id == entry.id) {
            entry.id = format!("{base}-{n}");
            n += 1;
        }

        entries.insert(0, entry.clone());
        entries.truncate(HISTORY_CAP);
        self.store.set_json(HISTORY_KEY, &entries)?;
        debug!("History: saved '{}' as {}", entry.file_name, entry.id);
        Ok(entry)
    }

    pub fn get(&self, id: &str) -> Result<HistoryEntry, DocuLatexError> {
        self.list()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| DocuLatexError::HistoryNotFound(id.to_string()))
    }

    pub fn delete(&self, id: &str) -> Result<(), DocuLatexError> {
        let mut entries = self.list()?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return Err(DocuLatexError::HistoryNotFound(id.to_string()));
        }
        self.store.set_json(HISTORY_KEY, &entries)
    }

    pub fn clear(&self) -> Result<(), DocuLatexError> {
        self.store.remove(HISTORY_KEY)
    }
}

// ── Trial / activation ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageState {
    pub count: u32,
    pub activated: bool,
}

impl UsageState {
    pub fn can_convert(&self) -> bool {
        self.activated || self.count < MAX_TRIAL_USES
    }

    /// Trial conversions left; `None` once activated.
    pub fn remaining(&self) -> Option<u32> {
        (!self.activated).then(|| MAX_TRIAL_USES.saturating_sub(self.count))
    }
}

/// Ten free conversions, then an unlock code.
pub struct LicenseGate<'a> {
    store: &'a LocalStore,
}

impl LicenseGate<'_> {
    pub fn state(&self) -> Result<UsageState, DocuLatexError> {
        Ok(UsageState {
            count: self.store.get_json(USAGE_COUNT_KEY)?.unwrap_or(0),
            activated: self.store.get_json(ACTIVATED_KEY)?.unwrap_or(false),
        })
    }

    pub fn can_convert(&self) -> Result<bool, DocuLatexError> {
        Ok(self.state()?.can_convert())
    }

    /// `Err(TrialExhausted)` unless another conversion is allowed.
    pub fn check(&self) -> Result<UsageState, DocuLatexError> {
        let state = self.state()?;
        if state.can_convert() {
            Ok(state)
        } else {
            Err(DocuLatexError::TrialExhausted {
                used: state.count,
                limit: MAX_TRIAL_USES,
            })
        }
    }

    /// Count one successful conversion. Activated installs stop counting.
    pub fn record_conversion(&self) -> Result<UsageState, DocuLatexError> {
        let mut state = self.state()?;
        if !state.activated {
            state.count = state.count.saturating_add(1);
            self.store.set_json(USAGE_COUNT_KEY, &state.count)?;
        }
        Ok(state)
    }

    /// Activate permanently if `code` matches. Returns whether it did.
    pub fn activate(&self, code: &str) -> Result<bool, DocuLatexError> {
        if code != UNLOCK_CODE {
            info!("Activation rejected");
            return Ok(false);
        }
        self.store.set_json(ACTIVATED_KEY, &true)?;
        info!("Activated");
        Ok(true)
    }

    pub fn is_activated(&self) -> Result<bool, DocuLatexError> {
        Ok(self.state()?.activated)
    }
}

// ── API key ──────────────────────────────────────────────────────────────────

/// Structural check only: trimmed, `AIza…`, not the template placeholder.
pub fn validate_api_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && key.starts_with(API_KEY_PREFIX) && !key.contains(KEY_TEMPLATE_MARKER)
}

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeySource {
    Stored,
    Environment,
}

pub struct CredentialStore<'a> {
    store: &'a LocalStore,
}

impl CredentialStore<'_> {
    /// The stored key, if any, whether or not it is valid.
    pub fn stored(&self) -> Result<Option<String>, DocuLatexError> {
        Ok(self
            .store
            .get_raw(API_KEY_KEY)?
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty()))
    }

    /// Store a key after trimming. Malformed keys are rejected.
    pub fn set(&self, key: &str) -> Result<(), DocuLatexError> {
        if !validate_api_key(key) {
            return Err(DocuLatexError::AuthError {
                detail: format!("API key must start with '{API_KEY_PREFIX}'"),
            });
        }
        self.store.set_raw(API_KEY_KEY, key.trim())
    }

    pub fn clear(&self) -> Result<(), DocuLatexError> {
        self.store.remove(API_KEY_KEY)
    }

    /// The key to use: a valid stored key first, then a valid
    /// `GEMINI_API_KEY`.
    pub fn resolve(&self) -> Result<Option<(String, KeySource)>, DocuLatexError> {
        let env = std::env::var(API_KEY_ENV).ok();
        Ok(pick_key(self.stored()?.as_deref(), env.as_deref()))
    }
}

fn pick_key(stored: Option<&str>, env: Option<&str>) -> Option<(String, KeySource)> {
    if let Some(key) = stored.filter(|k| validate_api_key(k)) {
        return Some((key.trim().to_string(), KeySource::Stored));
    }
    env.filter(|k| validate_api_key(k))
        .map(|k| (k.trim().to_string(), KeySource::Environment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("data")).unwrap();
        (dir, store)
    }

    #[test]
    fn history_is_newest_first_and_capped() {
        let (_dir, store) = store();
        let log = store.history();
        for i in 0..55 {
            log.push(&format!("f{i}.pdf"), "text").unwrap();
        }
        let entries = log.list().unwrap();
        assert_eq!(entries.len(), HISTORY_CAP);
        assert_eq!(entries[0].file_name, "f54.pdf");
        assert_eq!(entries[49].file_name, "f5.pdf");

        let mut ids: Vec<_> = entries.iter().map(|e| e.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), HISTORY_CAP);
    }

    #[test]
    fn history_get_delete_clear() {
        let (_dir, store) = store();
        let log = store.history();
        let a = log.push("a.pdf", "A").unwrap();
        let b = log.push("b.pdf", "B").unwrap();

        assert_eq!(log.get(&a.id).unwrap().markdown, "A");
        log.delete(&a.id).unwrap();
        assert!(matches!(log.get(&a.id), Err(DocuLatexError::HistoryNotFound(_))));
        assert!(matches!(log.delete(&a.id), Err(DocuLatexError::HistoryNotFound(_))));
        assert_eq!(log.list().unwrap(), vec![b]);

        log.clear().unwrap();
        assert!(log.list().unwrap().is_empty());
    }

    #[test]
    fn corrupt_history_reads_as_empty() {
        let (_dir, store) = store();
        store.set_raw(HISTORY_KEY, "{not json").unwrap();
        assert!(store.history().list().unwrap().is_empty());
        store.history().push("x.pdf", "x").unwrap();
        assert_eq!(store.history().list().unwrap().len(), 1);
    }

    #[test]
    fn history_uses_camel_case_fields() {
        let entry = HistoryEntry {
            id: "1".into(),
            file_name: "a.pdf".into(),
            timestamp: 0,
            markdown: "m".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"fileName\""));
    }

    #[test]
    fn trial_gate_blocks_after_limit() {
        let (_dir, store) = store();
        let gate = store.license();
        for _ in 0..MAX_TRIAL_USES {
            gate.check().unwrap();
            gate.record_conversion().unwrap();
        }
        assert!(!gate.can_convert().unwrap());
        match gate.check() {
            Err(DocuLatexError::TrialExhausted { used, limit }) => {
                assert_eq!((used, limit), (MAX_TRIAL_USES, MAX_TRIAL_USES));
            }
            other => panic!("expected TrialExhausted, got {other:?}"),
        }
    }

    #[test]
    fn activation_unlocks_and_stops_counting() {
        let (_dir, store) = store();
        let gate = store.license();
        store.set_json(USAGE_COUNT_KEY, &MAX_TRIAL_USES).unwrap();

        assert!(!gate.activate("wrong").unwrap());
        assert!(!gate.can_convert().unwrap());

        assert!(gate.activate(UNLOCK_CODE).unwrap());
        assert!(gate.can_convert().unwrap());
        let state = gate.record_conversion().unwrap();
        assert_eq!(state.count, MAX_TRIAL_USES);
        assert_eq!(state.remaining(), None);
    }

    #[test]
    fn key_validation() {
        assert!(validate_api_key("  AIzaSyExample "));
        assert!(!validate_api_key(""));
        assert!(!validate_api_key("sk-123"));
        assert!(!validate_api_key("AIza_Điền_Mã_Vào_Đây"));
    }

    #[test]
    fn stored_key_takes_precedence_over_env() {
        assert_eq!(
            pick_key(Some("AIzaUser"), Some("AIzaEnv")),
            Some(("AIzaUser".to_string(), KeySource::Stored))
        );
        assert_eq!(
            pick_key(Some("bogus"), Some("AIzaEnv")),
            Some(("AIzaEnv".to_string(), KeySource::Environment))
        );
        assert_eq!(pick_key(None, Some("bogus")), None);
    }

    #[test]
    fn credential_store_round_trip() {
        let (_dir, store) = store();
        let creds = store.credentials();
        assert!(creds.set("nope").is_err());
        creds.set(" AIzaKey ").unwrap();
        assert_eq!(creds.stored().unwrap().as_deref(), Some("AIzaKey"));
        creds.clear().unwrap();
        assert_eq!(creds.stored().unwrap(), None);
    }
}
