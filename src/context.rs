//! Tiered context memory: hot/warm/cold entries, token-pressure
//! estimation, and checkpoint persistence with eviction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::persistence;

/// Age-based tier an entry falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextTier {
    /// Age `<= 180s`.
    Hot,
    /// Age `<= 1800s`.
    Warm,
    /// Age `<= 86400s`.
    Cold,
}

impl ContextTier {
    fn max_age_secs(self) -> i64 {
        match self {
            ContextTier::Hot => 180,
            ContextTier::Warm => 1_800,
            ContextTier::Cold => 86_400,
        }
    }

    fn from_age_secs(age_secs: i64) -> Option<Self> {
        if age_secs <= ContextTier::Hot.max_age_secs() {
            Some(ContextTier::Hot)
        } else if age_secs <= ContextTier::Warm.max_age_secs() {
            Some(ContextTier::Warm)
        } else if age_secs <= ContextTier::Cold.max_age_secs() {
            Some(ContextTier::Cold)
        } else {
            None
        }
    }
}

/// Current token-pressure reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextPressure {
    /// `< 30%` of the token budget in use.
    Low,
    /// `< 70%`.
    Medium,
    /// `< 90%`.
    High,
    /// `>= 90%`.
    Critical,
}

impl ContextPressure {
    fn from_pct(pct: u32) -> Self {
        if pct < 30 {
            ContextPressure::Low
        } else if pct < 70 {
            ContextPressure::Medium
        } else if pct < 90 {
            ContextPressure::High
        } else {
            ContextPressure::Critical
        }
    }
}

/// A single stored context entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// The value, serialized as JSON for checkpointing.
    pub value: serde_json::Value,
    /// When this entry was added or last promoted/demoted.
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// The tier this entry currently lives in.
    pub tier: ContextTier,
}

/// A snapshot of context state for persistence, partitioned by tier.
/// Matches the on-disk shape of `context_manager.py`'s `ContextCheckpoint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCheckpoint {
    /// Identifier of the session this checkpoint was taken for.
    pub session_id: String,
    /// A short human-readable summary of progress so far.
    pub progress_summary: String,
    /// Hot-tier entries at checkpoint time, keyed by store key.
    pub hot_context: HashMap<String, serde_json::Value>,
    /// Warm-tier entries at checkpoint time.
    pub warm_context: HashMap<String, serde_json::Value>,
    /// Cold-tier entries at checkpoint time.
    pub cold_context: HashMap<String, serde_json::Value>,
    /// When the checkpoint was taken.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Errors raised by context memory operations.
#[derive(Error, Debug)]
pub enum ContextError {
    /// The named key is not present.
    #[error("unknown key: {0}")]
    UnknownKey(String),

    /// Persistence failure saving/loading a checkpoint.
    #[error(transparent)]
    Persistence(#[from] crate::error::PersistenceError),
}

/// Configuration for a `ContextManager`.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Token budget pressure is measured against.
    pub max_tokens: u64,
    /// Directory checkpoint files are written to.
    pub checkpoint_dir: PathBuf,
    /// Pressure percentage at or above which `should_checkpoint` is true
    /// and the pressure callback fires.
    pub pressure_threshold_pct: u32,
    /// Maximum retained checkpoint files; oldest are evicted beyond this.
    pub max_checkpoints: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100_000,
            checkpoint_dir: PathBuf::from(".claude/checkpoints"),
            pressure_threshold_pct: 70,
            max_checkpoints: 10,
        }
    }
}

/// The tiered, pressure-aware context store.
///
/// Not `Debug`/`Clone`: `pressure_callback` is an opaque closure, the same
/// way `bus::MessageBus`'s subscriber handlers are.
pub struct ContextManager {
    config: ContextConfig,
    entries: HashMap<String, ContextEntry>,
    checkpoints: Vec<PathBuf>,
    pressure_callback: Option<Box<dyn FnMut(ContextPressure, u32) + Send>>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("config", &self.config)
            .field("entries", &self.entries)
            .field("checkpoints", &self.checkpoints)
            .field("has_pressure_callback", &self.pressure_callback.is_some())
            .finish()
    }
}

impl ContextManager {
    /// Builds an empty store with no pressure callback registered.
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            checkpoints: Vec::new(),
            pressure_callback: None,
        }
    }

    /// Registers `callback`, invoked with the current pressure level and
    /// percentage whenever `add` pushes usage at or above
    /// `pressure_threshold_pct`.
    pub fn set_pressure_callback(
        &mut self,
        callback: impl FnMut(ContextPressure, u32) + Send + 'static,
    ) {
        self.pressure_callback = Some(Box::new(callback));
    }

    /// Adds or replaces `key`, placing it in the `Hot` tier, then checks
    /// pressure and fires the callback if the threshold was crossed.
    pub fn add(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.insert(
            key.into(),
            ContextEntry {
                value,
                updated_at: chrono::Utc::now(),
                tier: ContextTier::Hot,
            },
        );
        self.check_pressure();
    }

    fn check_pressure(&mut self) {
        let pct = self.pressure_pct();
        if pct >= self.config.pressure_threshold_pct {
            if let Some(callback) = self.pressure_callback.as_mut() {
                callback(ContextPressure::from_pct(pct), pct);
            }
        }
    }

    /// Reads `key` without mutating its tier.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ContextEntry> {
        self.entries.get(key)
    }

    /// Removes `key`, returning its entry if present.
    pub fn remove(&mut self, key: &str) -> Option<ContextEntry> {
        self.entries.remove(key)
    }

    /// All keys currently in `tier`.
    #[must_use]
    pub fn get_tier(&self, tier: ContextTier) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.tier == tier)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Removes every entry in `tier`.
    pub fn clear_tier(&mut self, tier: ContextTier) {
        self.entries.retain(|_, e| e.tier != tier);
    }

    /// Moves `key` one tier hotter (Cold -> Warm -> Hot), refreshing its
    /// timestamp.
    pub fn promote(&mut self, key: &str) -> Result<(), ContextError> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| ContextError::UnknownKey(key.to_string()))?;
        entry.tier = match entry.tier {
            ContextTier::Cold => ContextTier::Warm,
            ContextTier::Warm | ContextTier::Hot => ContextTier::Hot,
        };
        entry.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Moves `key` one tier colder (Hot -> Warm -> Cold).
    pub fn demote(&mut self, key: &str) -> Result<(), ContextError> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| ContextError::UnknownKey(key.to_string()))?;
        entry.tier = match entry.tier {
            ContextTier::Hot => ContextTier::Warm,
            ContextTier::Warm | ContextTier::Cold => ContextTier::Cold,
        };
        Ok(())
    }

    /// Re-derives every entry's tier from its age, demoting anything
    /// whose actual age has outgrown its recorded tier and dropping
    /// anything older than the `Cold` ceiling.
    pub fn demote_stale(&mut self) {
        let now = chrono::Utc::now();
        self.entries.retain(|_, entry| {
            let age = (now - entry.updated_at).num_seconds();
            match ContextTier::from_age_secs(age) {
                Some(tier) => {
                    entry.tier = tier;
                    true
                }
                None => false,
            }
        });
    }

    /// Rough token estimate: `(key_len + value_len) / 4` for every entry,
    /// matching the original's character-count heuristic.
    #[must_use]
    pub fn estimate_tokens(&self) -> u64 {
        self.entries
            .iter()
            .map(|(k, e)| {
                let value_len = e.value.to_string().len();
                ((k.len() + value_len) / 4) as u64
            })
            .sum()
    }

    /// Current pressure bucket.
    #[must_use]
    pub fn pressure(&self) -> ContextPressure {
        let pct = self.pressure_pct();
        ContextPressure::from_pct(pct)
    }

    fn pressure_pct(&self) -> u32 {
        if self.config.max_tokens == 0 {
            return 100;
        }
        ((self.estimate_tokens().saturating_mul(100)) / self.config.max_tokens) as u32
    }

    /// True once pressure has reached the configured checkpoint
    /// threshold (`>= 70%` by default).
    #[must_use]
    pub fn should_checkpoint(&self) -> bool {
        self.pressure_pct() >= self.config.pressure_threshold_pct
    }

    /// A short human-readable summary for dashboards/logs.
    #[must_use]
    pub fn get_summary(&self) -> String {
        format!(
            "{} entries, ~{} tokens ({:?} pressure)",
            self.entries.len(),
            self.estimate_tokens(),
            self.pressure()
        )
    }

    /// Reduces pressure by truncating any string value longer than 500
    /// characters to its first 200 characters plus a truncation marker,
    /// matching `context_manager.py`'s `compress`.
    pub fn compress(&mut self) {
        for entry in self.entries.values_mut() {
            if let serde_json::Value::String(s) = &entry.value {
                if s.chars().count() > 500 {
                    let truncated: String = s.chars().take(200).collect();
                    entry.value = serde_json::Value::String(format!("{truncated}... [truncated]"));
                }
            }
        }
    }

    /// Writes every current entry, partitioned by tier, to a new
    /// checkpoint file named `checkpoint-<session_id>-<unix>.json`,
    /// evicting the oldest checkpoint file(s) beyond `max_checkpoints`.
    /// Returns the path written.
    pub fn create_checkpoint(
        &mut self,
        session_id: &str,
        progress_summary: &str,
    ) -> Result<PathBuf, ContextError> {
        let mut hot_context = HashMap::new();
        let mut warm_context = HashMap::new();
        let mut cold_context = HashMap::new();
        for (key, entry) in &self.entries {
            let bucket = match entry.tier {
                ContextTier::Hot => &mut hot_context,
                ContextTier::Warm => &mut warm_context,
                ContextTier::Cold => &mut cold_context,
            };
            bucket.insert(key.clone(), entry.value.clone());
        }

        let checkpoint = ContextCheckpoint {
            session_id: session_id.to_string(),
            progress_summary: progress_summary.to_string(),
            hot_context,
            warm_context,
            cold_context,
            created_at: chrono::Utc::now(),
        };

        std::fs::create_dir_all(&self.config.checkpoint_dir)?;
        let filename = format!(
            "checkpoint-{session_id}-{}.json",
            checkpoint.created_at.timestamp()
        );
        let path = self.config.checkpoint_dir.join(filename);
        persistence::save_json(&path, &checkpoint)?;
        self.checkpoints.push(path.clone());
        self.cleanup_old_checkpoints()?;
        Ok(path)
    }

    /// Restores the store's entries from a checkpoint file at `path`,
    /// replacing the current contents entirely.
    pub fn restore_checkpoint(&mut self, path: &Path) -> Result<(), ContextError> {
        let checkpoint: ContextCheckpoint = persistence::load_json(path)?;
        self.entries.clear();
        let now = chrono::Utc::now();
        for (tier, context) in [
            (ContextTier::Hot, checkpoint.hot_context),
            (ContextTier::Warm, checkpoint.warm_context),
            (ContextTier::Cold, checkpoint.cold_context),
        ] {
            for (key, value) in context {
                self.entries.insert(
                    key,
                    ContextEntry {
                        value,
                        updated_at: now,
                        tier,
                    },
                );
            }
        }
        Ok(())
    }

    /// Lists known checkpoint file paths, oldest first.
    #[must_use]
    pub fn list_checkpoints(&self) -> Vec<PathBuf> {
        self.checkpoints.clone()
    }

    fn cleanup_old_checkpoints(&mut self) -> Result<(), ContextError> {
        while self.checkpoints.len() > self.config.max_checkpoints {
            let oldest = self.checkpoints.remove(0);
            let _ = std::fs::remove_file(&oldest);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn manager_in(dir: &Path) -> ContextManager {
        ContextManager::new(ContextConfig {
            checkpoint_dir: dir.to_path_buf(),
            max_checkpoints: 2,
            ..ContextConfig::default()
        })
    }

    #[test]
    fn should_checkpoint_once_pressure_crosses_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        mgr.config.max_tokens = 40;
        mgr.add("k", serde_json::json!("x".repeat(200)));
        assert!(mgr.should_checkpoint());
    }

    #[test]
    fn pressure_callback_fires_once_threshold_crossed() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        mgr.config.max_tokens = 40;
        let fired = Arc::new(Mutex::new(Vec::new()));
        let recorder = fired.clone();
        mgr.set_pressure_callback(move |pressure, pct| recorder.lock().unwrap().push((pressure, pct)));

        mgr.add("k1", serde_json::json!("short"));
        assert!(fired.lock().unwrap().is_empty(), "should not fire below threshold");

        mgr.add("k2", serde_json::json!("x".repeat(200)));
        assert!(!fired.lock().unwrap().is_empty(), "should fire once threshold crossed");
    }

    #[test]
    fn compress_truncates_long_string_values_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        let long_value = "a".repeat(600);
        mgr.add("long", serde_json::json!(long_value));
        mgr.add("short", serde_json::json!("fits fine"));

        mgr.compress();

        let compressed = mgr.get("long").unwrap().value.as_str().unwrap().to_string();
        assert!(compressed.ends_with("... [truncated]"));
        assert_eq!(compressed.len(), 200 + "... [truncated]".len());
        assert_eq!(mgr.get("short").unwrap().value, serde_json::json!("fits fine"));
    }

    #[test]
    fn checkpoint_eviction_keeps_only_max_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        mgr.add("k", serde_json::json!("v"));

        let _first = mgr.create_checkpoint("session-1", "start").unwrap();
        let _second = mgr.create_checkpoint("session-1", "middle").unwrap();
        let third = mgr.create_checkpoint("session-1", "end").unwrap();

        assert_eq!(mgr.list_checkpoints().len(), 2);
        assert!(mgr.restore_checkpoint(&third).is_ok());
    }

    #[test]
    fn restore_checkpoint_partitions_entries_back_into_their_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        mgr.add("hot-key", serde_json::json!("v"));
        mgr.demote("hot-key").unwrap();
        let path = mgr.create_checkpoint("session-1", "checkpointed").unwrap();

        let mut restored = manager_in(dir.path());
        restored.restore_checkpoint(&path).unwrap();
        assert_eq!(restored.get("hot-key").unwrap().tier, ContextTier::Warm);
    }

    #[test]
    fn promote_moves_towards_hot() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        mgr.add("k", serde_json::json!("v"));
        mgr.demote("k").unwrap();
        assert_eq!(mgr.get("k").unwrap().tier, ContextTier::Warm);
        mgr.promote("k").unwrap();
        assert_eq!(mgr.get("k").unwrap().tier, ContextTier::Hot);
    }
}
