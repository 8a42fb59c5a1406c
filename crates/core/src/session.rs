//! Durable mirror of the active session, used to resume a conversation
//! after the process is suspended or the channel drops.
//!
//! One storage slot holds at most one session. Persistence is strictly
//! best-effort: a broken or absent slot degrades to "no persistence" and
//! never surfaces errors to callers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// The three-valued activity snapshot mirrored for resumption. Coarser than
/// the six-valued UI status: only what the server needs to pick up where the
/// conversation left off.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoarseState {
    #[default]
    Idle,
    Recording,
    Processing,
}

/// The locally mirrored state of one logical conversation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// Server-assigned opaque token; immutable once set within a connection.
    pub session_id: String,
    /// Refreshed on every save; records older than the configured max age
    /// are discarded, never resumed.
    pub last_activity_at: DateTime<Utc>,
    pub coarse_state: CoarseState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_response: Option<String>,
    /// Audio references not yet handed to the playback collaborator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_audio_urls: Vec<String>,
}

impl SessionRecord {
    /// Creates an idle record for a freshly assigned session id.
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            last_activity_at: Utc::now(),
            coarse_state: CoarseState::Idle,
            partial_transcript: None,
            partial_response: None,
            pending_audio_urls: Vec::new(),
        }
    }

    /// Age of the record relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Raw storage behind the mirror. Implementations only move strings; the
/// mirror owns serialization and expiry.
pub trait StorageSlot: Send + Sync {
    fn save(&self, raw: &str) -> Result<()>;
    fn load(&self) -> Result<Option<String>>;
    fn clear(&self) -> Result<()>;
}

/// A JSON file on disk, one record per slot.
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl StorageSlot for FileSlot {
    fn save(&self, raw: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&self.path, raw)
            .with_context(|| format!("writing {}", self.path.display()))
    }

    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

/// An in-memory slot, mainly for tests and for callers that opt out of
/// durability without changing code paths.
#[derive(Default)]
pub struct MemorySlot {
    raw: std::sync::Mutex<Option<String>>,
}

impl StorageSlot for MemorySlot {
    fn save(&self, raw: &str) -> Result<()> {
        *self.raw.lock().unwrap() = Some(raw.to_string());
        Ok(())
    }

    fn load(&self) -> Result<Option<String>> {
        Ok(self.raw.lock().unwrap().clone())
    }

    fn clear(&self) -> Result<()> {
        *self.raw.lock().unwrap() = None;
        Ok(())
    }
}

/// Best-effort persistence for the active [`SessionRecord`].
///
/// Every failure path logs and carries on: the conversation must never be
/// blocked on the mirror.
pub struct SessionMirror {
    slot: Option<Box<dyn StorageSlot>>,
}

impl SessionMirror {
    pub fn new(slot: Box<dyn StorageSlot>) -> Self {
        Self { slot: Some(slot) }
    }

    /// A mirror with no backing store; every operation is a no-op.
    pub fn disabled() -> Self {
        Self { slot: None }
    }

    /// Persists the record, stamping `last_activity_at` with the current time.
    pub fn save(&self, record: &SessionRecord) {
        let Some(slot) = &self.slot else { return };
        let mut stamped = record.clone();
        stamped.last_activity_at = Utc::now();
        match serde_json::to_string(&stamped) {
            Ok(raw) => {
                if let Err(e) = slot.save(&raw) {
                    warn!(error = ?e, "failed to persist session record");
                }
            }
            Err(e) => warn!(error = ?e, "failed to serialize session record"),
        }
    }

    /// Loads the mirrored record if one exists and is younger than `max_age`.
    /// Expired or unreadable records are deleted and treated as absent.
    pub fn load(&self, max_age: Duration) -> Option<SessionRecord> {
        let slot = self.slot.as_ref()?;
        let raw = match slot.load() {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = ?e, "failed to read session record");
                return None;
            }
        };
        let record: SessionRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = ?e, "discarding unparsable session record");
                self.clear();
                return None;
            }
        };
        let age = record.age(Utc::now());
        if age > max_age {
            debug!(
                session_id = %record.session_id,
                age_secs = age.as_secs(),
                "discarding expired session record"
            );
            self.clear();
            return None;
        }
        Some(record)
    }

    /// Removes the mirrored record, best-effort.
    pub fn clear(&self) {
        if let Some(slot) = &self.slot {
            if let Err(e) = slot.clear() {
                warn!(error = ?e, "failed to clear session record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn mirror_with_memory() -> SessionMirror {
        SessionMirror::new(Box::new(MemorySlot::default()))
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let mirror = mirror_with_memory();
        let mut record = SessionRecord::new("abc".into());
        record.coarse_state = CoarseState::Processing;
        record.partial_response = Some("half a thought".into());
        record.pending_audio_urls = vec!["/voice/audio/a.wav".into()];
        mirror.save(&record);

        let loaded = mirror.load(Duration::from_secs(3600)).expect("record");
        assert_eq!(loaded.session_id, "abc");
        assert_eq!(loaded.coarse_state, CoarseState::Processing);
        assert_eq!(loaded.partial_response.as_deref(), Some("half a thought"));
        assert_eq!(loaded.pending_audio_urls, vec!["/voice/audio/a.wav"]);
    }

    #[test]
    fn test_save_stamps_activity_time() {
        let mirror = mirror_with_memory();
        let mut record = SessionRecord::new("abc".into());
        record.last_activity_at = Utc::now() - TimeDelta::hours(6);
        mirror.save(&record);

        // The stale timestamp was replaced at save time, so the record is
        // fresh again.
        let loaded = mirror.load(Duration::from_secs(60)).expect("record");
        assert!(loaded.age(Utc::now()) < Duration::from_secs(5));
    }

    #[test]
    fn test_expired_record_is_deleted() {
        let slot = Box::new(MemorySlot::default());
        let mut record = SessionRecord::new("old".into());
        record.last_activity_at = Utc::now() - TimeDelta::hours(2);
        slot.save(&serde_json::to_string(&record).unwrap()).unwrap();

        let mirror = SessionMirror::new(slot);
        assert!(mirror.load(Duration::from_secs(3600)).is_none());
        // A second load sees nothing either: expiry deletes.
        assert!(mirror.load(Duration::from_secs(u64::MAX / 2)).is_none());
    }

    #[test]
    fn test_unparsable_record_is_deleted() {
        let slot = Box::new(MemorySlot::default());
        slot.save("definitely not json").unwrap();
        let mirror = SessionMirror::new(slot);
        assert!(mirror.load(Duration::from_secs(3600)).is_none());
        assert!(mirror.load(Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn test_disabled_mirror_is_silent() {
        let mirror = SessionMirror::disabled();
        mirror.save(&SessionRecord::new("abc".into()));
        assert!(mirror.load(Duration::from_secs(3600)).is_none());
        mirror.clear();
    }

    #[test]
    fn test_clear_removes_record() {
        let mirror = mirror_with_memory();
        mirror.save(&SessionRecord::new("abc".into()));
        mirror.clear();
        assert!(mirror.load(Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn test_file_slot_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "murmur-session-test-{}.json",
            std::process::id()
        ));
        let slot = FileSlot::new(path.clone());
        let _ = slot.clear();

        assert!(slot.load().unwrap().is_none());
        slot.save("{\"k\":1}").unwrap();
        assert_eq!(slot.load().unwrap().as_deref(), Some("{\"k\":1}"));
        slot.clear().unwrap();
        assert!(slot.load().unwrap().is_none());
        // Clearing an already-empty slot is fine.
        slot.clear().unwrap();
    }
}
