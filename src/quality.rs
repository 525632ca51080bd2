//! Quality/novelty/actionability scoring and per-type index gating
//! (spec §4.7, C10).

use chrono::{DateTime, Duration, Utc};

use crate::models::{GateKind, Scores};

/// One row of the gating table in spec §4.7.
#[derive(Debug, Clone, Copy)]
pub struct GateThreshold {
    pub min_quality: f64,
    pub min_signal: f64,
}

/// Per-`gate_kind` thresholds from spec §4.7's table, falling back to
/// `generic` for anything unrecognized.
pub fn gate_threshold(kind: &GateKind) -> GateThreshold {
    match kind.as_str() {
        "email.thread" => GateThreshold { min_quality: 0.70, min_signal: 0.60 },
        "chat.daily" => GateThreshold { min_quality: 0.65, min_signal: 0.60 },
        "pdf.report" => GateThreshold { min_quality: 0.75, min_signal: 0.65 },
        "web.article" => GateThreshold { min_quality: 0.70, min_signal: 0.60 },
        "note" => GateThreshold { min_quality: 0.60, min_signal: 0.50 },
        "text" => GateThreshold { min_quality: 0.65, min_signal: 0.55 },
        "legal" => GateThreshold { min_quality: 0.80, min_signal: 0.70 },
        _ => GateThreshold { min_quality: 0.65, min_signal: 0.55 }, // generic
    }
}

/// Inputs the scorer needs beyond the raw text (spec §4.7).
pub struct ScoringInput<'a> {
    pub text: &'a str,
    pub ocr_confidence: Option<f64>,
    pub parse_success: bool,
    pub has_structure: bool,
    pub gate_kind: &'a GateKind,
    pub similar_topic_docs_90d: usize,
    pub watchlist_hit: bool,
    pub nearest_entity_date: Option<DateTime<Utc>>,
    pub is_exact_duplicate: bool,
    pub now: DateTime<Utc>,
}

/// Saturation constant `K` for novelty (spec §4.7, default 10).
const NOVELTY_SATURATION_K: f64 = 10.0;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn quality_score(input: &ScoringInput) -> f64 {
    let ocr_component = input.ocr_confidence.unwrap_or(1.0);
    let parse_component = if input.parse_success { 1.0 } else { 0.0 };
    let structure_component = if input.has_structure { 1.0 } else { 0.3 };
    // Length adequacy: sigmoid centered at 200 chars, scaled so it saturates
    // smoothly over a few hundred characters either side of the center.
    let len = input.text.len() as f64;
    let length_component = sigmoid((len - 200.0) / 100.0);

    (ocr_component * 0.35 + parse_component * 0.2 + structure_component * 0.2 + length_component * 0.25)
        .clamp(0.0, 1.0)
}

fn novelty_score(input: &ScoringInput) -> f64 {
    if input.is_exact_duplicate {
        return 0.0;
    }
    let n = input.similar_topic_docs_90d as f64;
    (1.0 - (n / NOVELTY_SATURATION_K).min(1.0)).clamp(0.0, 1.0)
}

fn actionability_score(input: &ScoringInput) -> f64 {
    let watchlist_component = if input.watchlist_hit { 0.7 } else { 0.0 };
    let date_boost = match input.nearest_entity_date {
        Some(d) => {
            let days = (input.now - d).num_days().unsigned_abs();
            if days <= 30 {
                0.3 * (1.0 - days as f64 / 30.0)
            } else {
                0.0
            }
        }
        None => 0.0,
    };
    (watchlist_component + date_boost).clamp(0.0, 1.0)
}

/// Computes all four scores and the `do_index` gate verdict (spec §4.7).
pub fn score(input: &ScoringInput) -> Scores {
    let quality = quality_score(input);
    let novelty = novelty_score(input);
    let actionability = actionability_score(input);
    let signalness = Scores::compute_signalness(quality, novelty, actionability);

    let threshold = gate_threshold(input.gate_kind);
    let do_index = quality >= threshold.min_quality && signalness >= threshold.min_signal;
    let gate_reason = if do_index {
        None
    } else if quality < threshold.min_quality {
        Some(format!("quality below {:.2}", threshold.min_quality))
    } else {
        Some(format!("signalness below {:.2}", threshold.min_signal))
    };

    Scores {
        quality,
        novelty,
        actionability,
        signalness,
        do_index,
        gate_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input(text: &str) -> ScoringInput {
        ScoringInput {
            text,
            ocr_confidence: None,
            parse_success: true,
            has_structure: true,
            gate_kind: &GateKind("note".to_string()),
            similar_topic_docs_90d: 0,
            watchlist_hit: false,
            nearest_entity_date: None,
            is_exact_duplicate: false,
            now: Utc::now(),
        }
    }

    #[test]
    fn duplicate_gets_zero_novelty() {
        let mut input = base_input("hello world this is a reasonably long paragraph of text");
        input.is_exact_duplicate = true;
        let s = score(&input);
        assert_eq!(s.novelty, 0.0);
    }

    #[test]
    fn low_quality_short_text_fails_gate() {
        let input = base_input("hi");
        let s = score(&input);
        assert!(!s.do_index);
        assert!(s.gate_reason.is_some());
    }

    #[test]
    fn high_quality_long_text_with_watchlist_hit_passes_note_gate() {
        let mut input = base_input(&"word ".repeat(100));
        input.watchlist_hit = true;
        let s = score(&input);
        assert!(s.do_index, "scores: {s:?}");
    }

    #[test]
    fn legal_gate_is_stricter_than_note_gate() {
        let note = gate_threshold(&GateKind("note".to_string()));
        let legal = gate_threshold(&GateKind("legal".to_string()));
        assert!(legal.min_quality > note.min_quality);
        assert!(legal.min_signal > note.min_signal);
    }

    #[test]
    fn signalness_matches_weighted_formula() {
        let input = base_input(&"word ".repeat(100));
        let s = score(&input);
        let expected = Scores::compute_signalness(s.quality, s.novelty, s.actionability);
        assert_eq!(s.signalness, expected);
    }
}
