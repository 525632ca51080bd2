//! Dual-corpus routing (spec §4.15, C12).
//!
//! Every accepted document enters `FULL`; it additionally enters
//! `CANONICAL` iff it passed the quality gate, isn't a duplicate, and
//! clears its per-type quality/signal thresholds.

use crate::models::{CorpusView, Scores};
use crate::quality::gate_threshold;
use crate::models::GateKind;

/// Decides which views a document belongs to (spec §4.15 `route`).
pub fn route(scores: &Scores, is_duplicate: bool, gate_kind: &GateKind) -> Vec<CorpusView> {
    let mut views = vec![CorpusView::Full];
    let threshold = gate_threshold(gate_kind);
    if scores.do_index
        && !is_duplicate
        && scores.quality >= threshold.min_quality
        && scores.signalness >= threshold.min_signal
    {
        views.push(CorpusView::Canonical);
    }
    views
}

/// Query-kind hint (spec §4.15 `suggest_view`). Anything else targets
/// `CANONICAL`.
pub fn suggest_view(query_kind: &str) -> CorpusView {
    match query_kind {
        "audit" | "dedup" | "compliance" => CorpusView::Full,
        _ => CorpusView::Canonical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_document_routes_to_both_views() {
        let scores = Scores {
            quality: 0.9,
            novelty: 0.8,
            actionability: 0.5,
            signalness: 0.8,
            do_index: true,
            gate_reason: None,
        };
        let views = route(&scores, false, &GateKind("note".to_string()));
        assert!(views.contains(&CorpusView::Full));
        assert!(views.contains(&CorpusView::Canonical));
    }

    #[test]
    fn duplicate_never_enters_canonical() {
        let scores = Scores {
            quality: 0.9,
            novelty: 0.0,
            actionability: 0.5,
            signalness: 0.8,
            do_index: true,
            gate_reason: None,
        };
        let views = route(&scores, true, &GateKind("note".to_string()));
        assert_eq!(views, vec![CorpusView::Full]);
    }

    #[test]
    fn gated_out_document_stays_full_only() {
        let scores = Scores {
            quality: 0.3,
            novelty: 0.3,
            actionability: 0.0,
            signalness: 0.3,
            do_index: false,
            gate_reason: Some("quality below 0.60".to_string()),
        };
        let views = route(&scores, false, &GateKind("note".to_string()));
        assert_eq!(views, vec![CorpusView::Full]);
    }

    #[test]
    fn suggest_view_routes_audit_kinds_to_full() {
        assert_eq!(suggest_view("audit"), CorpusView::Full);
        assert_eq!(suggest_view("dedup"), CorpusView::Full);
        assert_eq!(suggest_view("compliance"), CorpusView::Full);
        assert_eq!(suggest_view("search"), CorpusView::Canonical);
        assert_eq!(suggest_view("qa"), CorpusView::Canonical);
    }
}
