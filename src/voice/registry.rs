//! Bounded, in-order transcript of recent utterances.
//!
//! Keeps the last `retention` utterances with their annotation state for UI
//! rendering. Older entries are evicted from the head; annotations for an
//! evicted utterance are silently dropped.

use std::collections::VecDeque;

use serde::Serialize;

use super::utterance::Utterance;

/// Default number of utterances kept.
pub const DEFAULT_RETENTION: usize = 20;

/// Where an utterance is in its production/playback lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UtterancePhase {
    /// Appended; translation/synthesis in flight.
    Producing,
    /// Clips placed on the playback timeline.
    Scheduled,
    /// Nothing (more) to play.
    Done,
}

/// One transcript line: the immutable utterance plus its annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub utterance: Utterance,
    pub translated_text: Option<String>,
    pub is_being_read: bool,
    pub failed: bool,
    pub phase: UtterancePhase,
}

impl TranscriptEntry {
    fn new(utterance: Utterance) -> Self {
        Self {
            utterance,
            translated_text: None,
            is_being_read: false,
            failed: false,
            phase: UtterancePhase::Producing,
        }
    }

    pub fn utterance_id(&self) -> u64 {
        self.utterance.id
    }
}

/// Partial update merged into an existing entry. `None` fields are left as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationPatch {
    pub translated_text: Option<String>,
    pub is_being_read: Option<bool>,
    pub failed: Option<bool>,
    pub phase: Option<UtterancePhase>,
}

impl AnnotationPatch {
    pub fn translated(text: impl Into<String>) -> Self {
        Self {
            translated_text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn reading(is_being_read: bool) -> Self {
        Self {
            is_being_read: Some(is_being_read),
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            failed: Some(true),
            ..Self::default()
        }
    }

    pub fn phase(mut self, phase: UtterancePhase) -> Self {
        self.phase = Some(phase);
        self
    }

    fn apply(self, entry: &mut TranscriptEntry) {
        if let Some(text) = self.translated_text {
            entry.translated_text = Some(text);
        }
        if let Some(reading) = self.is_being_read {
            entry.is_being_read = reading;
        }
        if let Some(failed) = self.failed {
            entry.failed = failed;
        }
        if let Some(phase) = self.phase {
            entry.phase = phase;
        }
    }
}

/// Ring-buffer transcript. Never holds more than `retention` entries.
#[derive(Debug)]
pub struct UtteranceRegistry {
    entries: VecDeque<TranscriptEntry>,
    retention: usize,
}

impl UtteranceRegistry {
    /// `retention` is clamped to at least 1.
    pub fn new(retention: usize) -> Self {
        let retention = retention.max(1);
        Self {
            entries: VecDeque::with_capacity(retention),
            retention,
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Append at the tail, evicting from the head past the retention limit.
    /// Returns the evicted utterance ids (oldest first).
    pub fn append(&mut self, utterance: Utterance) -> Vec<u64> {
        self.entries.push_back(TranscriptEntry::new(utterance));
        let mut evicted = Vec::new();
        while self.entries.len() > self.retention {
            if let Some(old) = self.entries.pop_front() {
                evicted.push(old.utterance_id());
            }
        }
        evicted
    }

    /// Merge `patch` into the entry for `utterance_id`.
    ///
    /// Returns the updated entry, or `None` when the utterance is not (or no
    /// longer) present.
    pub fn annotate(&mut self, utterance_id: u64, patch: AnnotationPatch) -> Option<TranscriptEntry> {
        let entry = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.utterance_id() == utterance_id)?;
        patch.apply(entry);
        Some(entry.clone())
    }

    pub fn get(&self, utterance_id: u64) -> Option<&TranscriptEntry> {
        self.entries.iter().find(|e| e.utterance_id() == utterance_id)
    }

    /// Ordered copy of the current transcript, oldest first.
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Clear every `is_being_read` flag. Returns the ids that changed.
    pub fn clear_reading(&mut self) -> Vec<u64> {
        self.entries
            .iter_mut()
            .filter(|e| e.is_being_read)
            .map(|e| {
                e.is_being_read = false;
                e.utterance_id()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for UtteranceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
