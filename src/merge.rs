//! Cross-page merge: one [`InvoiceRecord`] out of many page outcomes.
//!
//! The merge is a pure function over the set of page outcomes. Inputs are
//! re-sorted by page number before anything else, so task completion order
//! can never change the result — same outcomes in, same record out,
//! including the same set of flagged conflicts.
//!
//! ## Single-value fields
//!
//! A field reported by several pages resolves to one value:
//! * two or more *distinct* non-empty values (compared through the same
//!   normalizers both extractors feed) → the field becomes a recorded
//!   conflict carrying every candidate with provenance, and stays out of
//!   the resolved map;
//! * otherwise, the value attributed to the first page that reported it
//!   with `ai` source if any page used `ai` for that field, else to the
//!   highest-confidence `local` report.
//!
//! ## Line items
//!
//! Concatenated in page order. Exact duplicates across *adjacent* pages
//! are dropped — the double-rendered continuation-page case — keyed on
//! normalized (description, amount). Identical items on non-adjacent
//! pages are legitimate repeat charges and are kept.

use crate::pipeline::parse::{normalize_amount, normalize_field_value, normalize_text};
use crate::record::{
    DocumentStatus, ExtractionSource, FieldCandidate, FieldConflict, FieldProvenance,
    InvoiceRecord, LineItem, PageOutcome,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Merge per-page outcomes into one record.
pub fn merge_pages(outcomes: &[PageOutcome]) -> InvoiceRecord {
    let mut pages: Vec<&PageOutcome> = outcomes.iter().collect();
    pages.sort_by_key(|p| p.page_num);

    if pages.is_empty() {
        return InvoiceRecord {
            resolved: BTreeMap::new(),
            conflicts: Vec::new(),
            line_items: Vec::new(),
            provenance: Vec::new(),
            status: DocumentStatus::Failed,
            failure: Some("document produced no pages".to_string()),
        };
    }

    // ── Gather single-value candidates in page order ─────────────────────
    let mut candidates: BTreeMap<String, Vec<FieldCandidate>> = BTreeMap::new();
    for page in &pages {
        let Some(attempt) = page.attempt.as_ref().filter(|_| page.error.is_none()) else {
            continue;
        };
        for (field, value) in &attempt.fields {
            if value.trim().is_empty() {
                continue;
            }
            candidates.entry(field.clone()).or_default().push(FieldCandidate {
                value: value.clone(),
                page: page.page_num,
                source: attempt.source,
                confidence: attempt.confidence,
            });
        }
    }

    // ── Resolve or flag each field ───────────────────────────────────────
    let mut resolved = BTreeMap::new();
    let mut conflicts = Vec::new();
    let mut provenance = Vec::new();

    for (field, cands) in candidates {
        let distinct: BTreeSet<String> = cands
            .iter()
            .map(|c| normalize_field_value(&field, &c.value))
            .collect();

        if distinct.len() > 1 {
            conflicts.push(FieldConflict {
                field,
                candidates: cands,
            });
            continue;
        }

        let winner = cands
            .iter()
            .find(|c| c.source == ExtractionSource::Ai)
            .or_else(|| {
                cands
                    .iter()
                    .max_by(|a, b| {
                        a.confidence
                            .partial_cmp(&b.confidence)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            // Ties go to the earliest page.
                            .then(b.page.cmp(&a.page))
                    })
            })
            .expect("candidate list is never empty");

        provenance.push(FieldProvenance {
            field: field.clone(),
            page: winner.page,
            source: winner.source,
        });
        resolved.insert(field, winner.value.clone());
    }

    // ── Line items: concatenate, dedup across adjacent pages ─────────────
    let mut line_items: Vec<LineItem> = Vec::new();
    let mut prev_page_keys: HashSet<(String, String)> = HashSet::new();

    for page in &pages {
        let items: &[LineItem] = page
            .attempt
            .as_ref()
            .filter(|_| page.error.is_none())
            .map(|a| a.line_items.as_slice())
            .unwrap_or(&[]);

        let item_key = |i: &LineItem| {
            let amount = normalize_amount(&i.amount).unwrap_or_else(|| i.amount.clone());
            (normalize_text(&i.description), amount)
        };

        let page_keys: HashSet<(String, String)> = items.iter().map(item_key).collect();

        for item in items {
            if prev_page_keys.contains(&item_key(item)) {
                continue;
            }
            line_items.push(item.clone());
        }

        prev_page_keys = page_keys;
    }

    // ── Document status ──────────────────────────────────────────────────
    let failed = pages.iter().filter(|p| !p.is_resolved()).count();
    let (status, failure) = if failed == pages.len() {
        let first_error = pages
            .iter()
            .find_map(|p| p.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "all pages failed".to_string());
        (DocumentStatus::Failed, Some(first_error))
    } else if failed > 0 {
        (DocumentStatus::Partial, None)
    } else {
        (DocumentStatus::Complete, None)
    };

    InvoiceRecord {
        resolved,
        conflicts,
        line_items,
        provenance,
        status,
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use crate::record::{fields, AttemptStatus, ExtractionAttempt};
    use std::collections::BTreeMap;

    fn attempt(
        source: ExtractionSource,
        confidence: f32,
        pairs: &[(&str, &str)],
        items: &[(&str, &str)],
        page: usize,
    ) -> ExtractionAttempt {
        let mut fields_map = BTreeMap::new();
        for (k, v) in pairs {
            fields_map.insert(k.to_string(), v.to_string());
        }
        ExtractionAttempt {
            source,
            status: AttemptStatus::Ok,
            fields: fields_map,
            line_items: items
                .iter()
                .map(|(d, a)| LineItem {
                    description: d.to_string(),
                    amount: a.to_string(),
                    page,
                    source,
                })
                .collect(),
            confidence,
            raw_text: None,
            error: None,
        }
    }

    fn outcome(page_num: usize, attempt: ExtractionAttempt) -> PageOutcome {
        PageOutcome {
            page_num,
            attempt: Some(attempt),
            decision: None,
            from_cache: false,
            retries: 0,
            duration_ms: 0,
            error: None,
        }
    }

    fn failed_outcome(page_num: usize) -> PageOutcome {
        PageOutcome::failed(
            page_num,
            PageError::AiFailed {
                page: page_num,
                retries: 3,
                detail: "503".into(),
            },
            0,
        )
    }

    #[test]
    fn agreeing_values_resolve() {
        let record = merge_pages(&[
            outcome(
                1,
                attempt(ExtractionSource::Local, 0.9, &[(fields::VENDOR, "ACME Ltd")], &[], 1),
            ),
            outcome(
                2,
                attempt(ExtractionSource::Local, 0.8, &[(fields::VENDOR, "acme  ltd")], &[], 2),
            ),
        ]);
        assert_eq!(record.resolved[fields::VENDOR], "ACME Ltd");
        assert!(record.conflicts.is_empty());
        assert_eq!(record.status, DocumentStatus::Complete);
    }

    #[test]
    fn conflicting_totals_are_flagged_not_resolved() {
        let record = merge_pages(&[
            outcome(
                1,
                attempt(ExtractionSource::Local, 0.9, &[(fields::GRAND_TOTAL, "100.00")], &[], 1),
            ),
            outcome(
                2,
                attempt(ExtractionSource::Ai, 1.0, &[(fields::GRAND_TOTAL, "126.74")], &[], 2),
            ),
        ]);

        assert!(!record.is_resolved(fields::GRAND_TOTAL));
        assert!(record.is_conflicting(fields::GRAND_TOTAL));
        let conflict = &record.conflicts[0];
        assert_eq!(conflict.candidates.len(), 2);
        assert_eq!(conflict.candidates[0].page, 1);
        assert_eq!(conflict.candidates[0].source, ExtractionSource::Local);
        assert_eq!(conflict.candidates[1].page, 2);
        assert_eq!(conflict.candidates[1].source, ExtractionSource::Ai);
    }

    #[test]
    fn merge_is_order_independent() {
        let a = outcome(
            1,
            attempt(ExtractionSource::Local, 0.9, &[(fields::GRAND_TOTAL, "100.00")], &[], 1),
        );
        let b = outcome(
            2,
            attempt(ExtractionSource::Ai, 1.0, &[(fields::GRAND_TOTAL, "200.00")], &[], 2),
        );
        let c = outcome(
            3,
            attempt(ExtractionSource::Ai, 1.0, &[(fields::VENDOR, "ACME")], &[], 3),
        );

        let forward = merge_pages(&[a.clone(), b.clone(), c.clone()]);
        let backward = merge_pages(&[c, b, a]);

        assert_eq!(
            serde_json::to_value(&forward).unwrap(),
            serde_json::to_value(&backward).unwrap()
        );
    }

    #[test]
    fn ai_report_wins_over_higher_page_counts() {
        // Field seen by local on page 1 and by AI on page 3: AI wins, and
        // provenance points at the AI page.
        let record = merge_pages(&[
            outcome(
                1,
                attempt(ExtractionSource::Local, 0.95, &[(fields::INVOICE_NUMBER, "INV-1")], &[], 1),
            ),
            outcome(
                3,
                attempt(ExtractionSource::Ai, 1.0, &[(fields::INVOICE_NUMBER, "INV-1")], &[], 3),
            ),
        ]);

        let prov = record
            .provenance
            .iter()
            .find(|p| p.field == fields::INVOICE_NUMBER)
            .unwrap();
        assert_eq!(prov.source, ExtractionSource::Ai);
        assert_eq!(prov.page, 3);
    }

    #[test]
    fn highest_confidence_local_wins_without_ai() {
        let record = merge_pages(&[
            outcome(
                1,
                attempt(ExtractionSource::Local, 0.82, &[(fields::VENDOR, "ACME Ltd")], &[], 1),
            ),
            outcome(
                2,
                attempt(ExtractionSource::Local, 0.97, &[(fields::VENDOR, "ACME LTD")], &[], 2),
            ),
        ]);

        let prov = record.provenance.iter().find(|p| p.field == fields::VENDOR).unwrap();
        assert_eq!(prov.page, 2);
        assert_eq!(record.resolved[fields::VENDOR], "ACME LTD");
    }

    #[test]
    fn adjacent_duplicate_line_items_are_dropped() {
        let record = merge_pages(&[
            outcome(
                1,
                attempt(
                    ExtractionSource::Local,
                    0.9,
                    &[],
                    &[("Paper A4", "12.50"), ("Toner", "89.00")],
                    1,
                ),
            ),
            outcome(
                2,
                attempt(
                    ExtractionSource::Ai,
                    1.0,
                    &[],
                    &[("Toner", "89.00"), ("Delivery", "5.00")],
                    2,
                ),
            ),
        ]);

        let got: Vec<&str> = record.line_items.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(got, vec!["Paper A4", "Toner", "Delivery"]);
    }

    #[test]
    fn non_adjacent_duplicates_are_kept() {
        // A monthly fee appearing on pages 1 and 3 with a quiet page 2 is a
        // real repeat charge, not a double render.
        let record = merge_pages(&[
            outcome(
                1,
                attempt(ExtractionSource::Local, 0.9, &[], &[("Monthly fee", "10.00")], 1),
            ),
            outcome(2, attempt(ExtractionSource::Local, 0.9, &[], &[], 2)),
            outcome(
                3,
                attempt(ExtractionSource::Local, 0.9, &[], &[("Monthly fee", "10.00")], 3),
            ),
        ]);
        assert_eq!(record.line_items.len(), 2);
    }

    #[test]
    fn all_pages_failed_yields_failed_record() {
        let record = merge_pages(&[failed_outcome(1), failed_outcome(2)]);
        assert_eq!(record.status, DocumentStatus::Failed);
        assert!(record.resolved.is_empty());
        assert!(record.failure.as_deref().unwrap_or("").contains("503"));
    }

    #[test]
    fn partial_failure_keeps_partial_data() {
        let record = merge_pages(&[
            outcome(
                1,
                attempt(ExtractionSource::Ai, 1.0, &[(fields::VENDOR, "ACME")], &[], 1),
            ),
            failed_outcome(2),
        ]);
        assert_eq!(record.status, DocumentStatus::Partial);
        assert_eq!(record.resolved[fields::VENDOR], "ACME");
    }

    #[test]
    fn no_pages_is_an_explicit_failure() {
        let record = merge_pages(&[]);
        assert_eq!(record.status, DocumentStatus::Failed);
        assert!(record.failure.is_some());
    }
}
