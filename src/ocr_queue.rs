//! Persistent re-OCR queue (spec §4.17, C3).
//!
//! Backed by a single JSON file (`ocr_queue.json`, spec §6), FIFO within a
//! priority ordering of inverse `original_confidence`. Single-writer; the
//! whole file is rewritten on each mutation, which is adequate at the
//! queue sizes this service expects (low-confidence OCR documents, not
//! every ingest).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrState {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrQueueEntry {
    pub doc_id: String,
    pub source_path: String,
    pub original_confidence: f64,
    pub attempts: u32,
    pub state: OcrState,
    pub last_error: Option<String>,
}

/// Per-kind re-OCR thresholds (spec §4.17 example: pdf 0.7, email 0.5).
pub fn should_reocr(confidence: f64, kind: &str) -> bool {
    let threshold = match kind {
        "pdf" => 0.7,
        "email" => 0.5,
        _ => 0.6,
    };
    confidence < threshold
}

pub struct OcrQueue {
    path: PathBuf,
    entries: Mutex<Vec<OcrQueueEntry>>,
}

impl OcrQueue {
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading OCR queue {}", path.display()))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing OCR queue {}", path.display()))?
            }
        } else {
            Vec::new()
        };
        Ok(OcrQueue {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, guard: &[OcrQueueEntry]) -> Result<()> {
        let raw = serde_json::to_string_pretty(guard)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("writing OCR queue {}", self.path.display()))
    }

    pub fn enqueue(&self, entry: OcrQueueEntry) -> Result<()> {
        let mut guard = self.entries.lock().expect("ocr queue lock poisoned");
        guard.push(entry);
        self.persist(&guard)
    }

    /// Returns entries ordered by priority (lowest confidence first), only
    /// those still `pending`.
    pub fn next_batch(&self, limit: usize) -> Vec<OcrQueueEntry> {
        let guard = self.entries.lock().expect("ocr queue lock poisoned");
        let mut pending: Vec<OcrQueueEntry> = guard
            .iter()
            .filter(|e| e.state == OcrState::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.original_confidence.partial_cmp(&b.original_confidence).unwrap());
        pending.truncate(limit);
        pending
    }

    pub fn mark_processing(&self, doc_id: &str) -> Result<()> {
        self.transition(doc_id, OcrState::Processing, None)
    }

    pub fn mark_completed(&self, doc_id: &str) -> Result<()> {
        self.transition(doc_id, OcrState::Completed, None)
    }

    pub fn mark_failed(&self, doc_id: &str, error: String) -> Result<()> {
        let mut guard = self.entries.lock().expect("ocr queue lock poisoned");
        if let Some(entry) = guard.iter_mut().find(|e| e.doc_id == doc_id) {
            entry.attempts += 1;
            entry.last_error = Some(error);
            entry.state = if entry.attempts >= MAX_ATTEMPTS {
                OcrState::Failed
            } else {
                OcrState::Pending
            };
        }
        self.persist(&guard)
    }

    fn transition(&self, doc_id: &str, state: OcrState, error: Option<String>) -> Result<()> {
        let mut guard = self.entries.lock().expect("ocr queue lock poisoned");
        if let Some(entry) = guard.iter_mut().find(|e| e.doc_id == doc_id) {
            entry.state = state;
            entry.last_error = error;
        }
        self.persist(&guard)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("ocr queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<OcrQueueEntry> {
        self.entries.lock().expect("ocr queue lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(doc_id: &str, confidence: f64) -> OcrQueueEntry {
        OcrQueueEntry {
            doc_id: doc_id.to_string(),
            source_path: format!("/tmp/{doc_id}.pdf"),
            original_confidence: confidence,
            attempts: 0,
            state: OcrState::Pending,
            last_error: None,
        }
    }

    #[test]
    fn should_reocr_uses_per_kind_thresholds() {
        assert!(should_reocr(0.6, "pdf"));
        assert!(!should_reocr(0.8, "pdf"));
        assert!(should_reocr(0.4, "email"));
        assert!(!should_reocr(0.55, "email"));
    }

    #[test]
    fn next_batch_orders_by_lowest_confidence_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ocr_queue.json");
        let q = OcrQueue::load(&path).unwrap();
        q.enqueue(entry("d1", 0.6)).unwrap();
        q.enqueue(entry("d2", 0.2)).unwrap();
        q.enqueue(entry("d3", 0.4)).unwrap();
        let batch = q.next_batch(10);
        assert_eq!(batch[0].doc_id, "d2");
        assert_eq!(batch[1].doc_id, "d3");
        assert_eq!(batch[2].doc_id, "d1");
    }

    #[test]
    fn failed_attempts_cap_at_max_then_mark_failed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ocr_queue.json");
        let q = OcrQueue::load(&path).unwrap();
        q.enqueue(entry("d1", 0.2)).unwrap();
        for _ in 0..MAX_ATTEMPTS {
            q.mark_failed("d1", "boom".to_string()).unwrap();
        }
        let all = q.all();
        assert_eq!(all[0].state, OcrState::Failed);
        assert_eq!(all[0].attempts, MAX_ATTEMPTS);
    }

    #[test]
    fn queue_persists_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ocr_queue.json");
        {
            let q = OcrQueue::load(&path).unwrap();
            q.enqueue(entry("d1", 0.3)).unwrap();
        }
        let reloaded = OcrQueue::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
    }
}
