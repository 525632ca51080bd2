//! Controlled vocabulary trees for topics, projects, places, and people
//! (spec §4.1, C1).
//!
//! Four slash-path forests are loaded from YAML lists (one file per kind,
//! spec §6 "Controlled-vocabulary file format"). Lookup never raises: an
//! unknown path simply yields `false`/empty. Loading fails fast on
//! malformed input, per spec's stated error semantics.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VocabKind {
    Topics,
    Projects,
    Places,
    People,
}

impl VocabKind {
    fn file_name(self) -> &'static str {
        match self {
            VocabKind::Topics => "topics.yaml",
            VocabKind::Projects => "projects.yaml",
            VocabKind::Places => "places.yaml",
            VocabKind::People => "people.yaml",
        }
    }
}

/// One project watchlist entry: canonical id plus aliases and an optional
/// active date window (spec §4.1 `match_projects`).
#[derive(Debug, Clone, Deserialize)]
pub struct WatchlistEntry {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub starts: Option<DateTime<Utc>>,
    pub ends: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct SuggestionCounter {
    occurrences: u64,
    last_seen: Option<DateTime<Utc>>,
}

/// A forest of slash-separated paths with exact and prefix lookup.
#[derive(Debug, Clone, Default)]
struct PathTree {
    /// Every valid full path, e.g. `technology/ai/embeddings`.
    paths: Vec<String>,
}

impl PathTree {
    fn from_yaml(raw: &str) -> Result<Self> {
        let paths: Vec<String> = serde_yaml_like::parse_string_list(raw)?;
        for p in &paths {
            if p.starts_with('/') || p.ends_with('/') || p.contains("//") {
                anyhow::bail!("malformed vocabulary path: {p:?}");
            }
        }
        Ok(PathTree { paths })
    }

    fn is_valid(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// True if `path` is itself valid or a prefix of some valid path
    /// (spec: "prefix-valid path in the relevant tree").
    fn is_prefix_valid(&self, path: &str) -> bool {
        self.paths
            .iter()
            .any(|p| p == path || p.starts_with(&format!("{path}/")))
    }
}

/// Minimal embedded YAML-list reader so the vocabulary loader does not need
/// a full YAML parser: controlled-vocabulary files are flat `- path` lists
/// (spec §6), so a line-oriented reader is sufficient and keeps the
/// dependency surface unchanged from the teacher's `toml`-only config path.
mod serde_yaml_like {
    use anyhow::Result;

    pub fn parse_string_list(raw: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let item = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix('-'))
                .ok_or_else(|| anyhow::anyhow!("expected list item, got: {trimmed:?}"))?;
            let item = item.trim().trim_matches('"').trim_matches('\'');
            if item.is_empty() {
                anyhow::bail!("empty vocabulary entry");
            }
            out.push(item.to_string());
        }
        Ok(out)
    }
}

pub struct Vocabulary {
    trees: HashMap<&'static str, PathTree>,
    watchlist: Vec<WatchlistEntry>,
    suggestions: RwLock<HashMap<String, SuggestionCounter>>,
}

impl Vocabulary {
    /// Loads the four vocabulary files from `dir`. Missing files are
    /// treated as empty trees (a fresh install has no vocabulary yet);
    /// malformed files fail fast.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut trees = HashMap::new();
        for kind in [
            VocabKind::Topics,
            VocabKind::Projects,
            VocabKind::Places,
            VocabKind::People,
        ] {
            let path = dir.join(kind.file_name());
            let tree = if path.exists() {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading vocabulary file {}", path.display()))?;
                PathTree::from_yaml(&raw)
                    .with_context(|| format!("parsing vocabulary file {}", path.display()))?
            } else {
                PathTree::default()
            };
            trees.insert(Self::key(kind), tree);
        }
        Ok(Vocabulary {
            trees,
            watchlist: Vec::new(),
            suggestions: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_watchlist(mut self, watchlist: Vec<WatchlistEntry>) -> Self {
        self.watchlist = watchlist;
        self
    }

    fn key(kind: VocabKind) -> &'static str {
        match kind {
            VocabKind::Topics => "topics",
            VocabKind::Projects => "projects",
            VocabKind::Places => "places",
            VocabKind::People => "people",
        }
    }

    pub fn is_valid(&self, kind: VocabKind, path: &str) -> bool {
        self.trees
            .get(Self::key(kind))
            .map(|t| t.is_prefix_valid(path))
            .unwrap_or(false)
    }

    /// Classifies free tags into controlled paths (similarity > 0.78) or
    /// suggestions (spec §4.1 `classify`).
    pub fn classify(&self, free_tags: &[String], kind: VocabKind) -> (Vec<String>, Vec<String>) {
        let tree = match self.trees.get(Self::key(kind)) {
            Some(t) => t,
            None => return (Vec::new(), free_tags.to_vec()),
        };
        let mut controlled = Vec::new();
        let mut suggested = Vec::new();
        for tag in free_tags {
            let normalized = normalize_tag(tag);
            let mut best: Option<(f64, &str)> = None;
            for candidate in &tree.paths {
                let sim = path_similarity(&normalized, candidate);
                if best.map(|(s, _)| sim > s).unwrap_or(true) {
                    best = Some((sim, candidate.as_str()));
                }
            }
            match best {
                Some((sim, path)) if sim > 0.78 => controlled.push(path.to_string()),
                _ => {
                    suggested.push(tag.clone());
                    self.record_suggestion(tag);
                }
            }
        }
        (controlled, suggested)
    }

    fn record_suggestion(&self, tag: &str) {
        let mut guard = self.suggestions.write().expect("suggestions lock poisoned");
        let entry = guard.entry(tag.to_string()).or_default();
        entry.occurrences += 1;
        entry.last_seen = Some(Utc::now());
    }

    /// Returns `(tag, occurrences, last_seen)` for periodic promotion
    /// review (spec §4.1).
    pub fn suggestion_counters(&self) -> Vec<(String, u64, Option<DateTime<Utc>>)> {
        let guard = self.suggestions.read().expect("suggestions lock poisoned");
        guard
            .iter()
            .map(|(tag, c)| (tag.clone(), c.occurrences, c.last_seen))
            .collect()
    }

    /// Scans the watchlist for name/alias hits, honoring an optional active
    /// date window (spec §4.1 `match_projects`).
    pub fn match_projects(&self, text: &str, date: DateTime<Utc>) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut hits = Vec::new();
        for entry in &self.watchlist {
            let mut names = vec![entry.id.clone()];
            names.extend(entry.aliases.clone());
            let in_window = entry.starts.map(|s| date >= s).unwrap_or(true)
                && entry.ends.map(|e| date <= e).unwrap_or(true);
            if !in_window {
                continue;
            }
            if names.iter().any(|n| lower.contains(&n.to_lowercase())) {
                hits.push(entry.id.clone());
            }
        }
        hits.sort();
        hits.dedup();
        hits
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '/')
        .collect()
}

/// Normalized Levenshtein similarity in `[0, 1]`, `1.0` being identical.
fn path_similarity(a: &str, b: &str) -> f64 {
    let b_norm = normalize_tag(b);
    let dist = levenshtein(a, &b_norm);
    let max_len = a.chars().count().max(b_norm.chars().count());
    if max_len == 0 {
        1.0
    } else {
        1.0 - (dist as f64 / max_len as f64)
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        let tree = PathTree::from_yaml(
            "- technology/ai\n- technology/ai/embeddings\n- technology/infra\n",
        )
        .unwrap();
        let mut trees = HashMap::new();
        trees.insert("topics", tree);
        Vocabulary {
            trees,
            watchlist: Vec::new(),
            suggestions: RwLock::new(HashMap::new()),
        }
    }

    #[test]
    fn exact_path_is_valid() {
        let v = vocab();
        assert!(v.is_valid(VocabKind::Topics, "technology/ai/embeddings"));
    }

    #[test]
    fn prefix_path_is_valid() {
        let v = vocab();
        assert!(v.is_valid(VocabKind::Topics, "technology"));
    }

    #[test]
    fn unknown_path_is_invalid() {
        let v = vocab();
        assert!(!v.is_valid(VocabKind::Topics, "technology/quantum"));
    }

    #[test]
    fn classify_matches_close_free_tag() {
        let v = vocab();
        let (controlled, suggested) =
            v.classify(&["ml-embeddings".to_string()], VocabKind::Topics);
        // "ml-embeddings" isn't close enough by edit-distance to the path;
        // it should land as a suggestion, not a controlled topic.
        assert!(controlled.is_empty());
        assert_eq!(suggested, vec!["ml-embeddings".to_string()]);
    }

    #[test]
    fn classify_exact_free_tag_is_controlled() {
        let v = vocab();
        let (controlled, _) = v.classify(
            &["technology/ai/embeddings".to_string()],
            VocabKind::Topics,
        );
        assert_eq!(controlled, vec!["technology/ai/embeddings".to_string()]);
    }

    #[test]
    fn match_projects_respects_date_window() {
        let entry = WatchlistEntry {
            id: "proj-x".to_string(),
            aliases: vec!["Project X".to_string()],
            starts: Some("2024-01-01T00:00:00Z".parse().unwrap()),
            ends: Some("2024-12-31T00:00:00Z".parse().unwrap()),
        };
        let v = Vocabulary {
            trees: HashMap::new(),
            watchlist: vec![entry],
            suggestions: RwLock::new(HashMap::new()),
        };
        let inside: DateTime<Utc> = "2024-06-01T00:00:00Z".parse().unwrap();
        let outside: DateTime<Utc> = "2025-06-01T00:00:00Z".parse().unwrap();
        assert_eq!(
            v.match_projects("notes about Project X kickoff", inside),
            vec!["proj-x".to_string()]
        );
        assert!(v.match_projects("notes about Project X kickoff", outside).is_empty());
    }
}
