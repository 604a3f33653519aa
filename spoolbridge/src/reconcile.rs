//! Reconciliation session
//!
//! Walks the unmapped slicer filaments and binds each one to an unused spool,
//! asking a [`DecisionSource`] to confirm every proposal.
//!
//! # Phases
//!
//! - **Primary**: tier 1/2 proposals in catalog order. Records with no
//!   proposal, a skip, or an invalid explicit choice go to the fallback queue.
//!   Stops early once `min(|A|, |B|)` entries are mapped.
//! - **Fallback**: tier 3 proposals (first unused spool) for the queued records.
//! - **Complete**: whatever is still unmapped is reported, never retried.
//!
//! Each accepted decision is persisted immediately through
//! [`MappingStore::bind_if_free`], so abandoning a session mid-sweep loses
//! nothing already accepted. The store is re-read before every step, which
//! keeps proposals clear of targets mapped concurrently by other callers. A
//! target taken while the decision source was deciding is never stolen back:
//! the record is handled as a skip.

use crate::catalog::{Catalog, FilamentRecord};
use crate::mapping::{used_target_ids, Mapping, MappingStore};
use crate::matcher::{MatchCandidate, MatchTier, Matcher};
use serde::Serialize;
use spoolbridge_common::Result;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{info, warn};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Primary,
    Fallback,
    Complete,
}

/// Answer to a proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    AcceptProposed,
    /// Use this catalog-B id instead of the proposed one
    AcceptExplicit(String),
    Skip,
}

/// What a decision source is asked to confirm
#[derive(Debug, Clone, Copy)]
pub struct Proposal<'a> {
    pub phase: SessionPhase,
    pub source: &'a FilamentRecord,
    pub target: &'a FilamentRecord,
    pub candidate: &'a MatchCandidate,
}

/// Anything that can answer proposals: a terminal, a remote UI, a policy
pub trait DecisionSource {
    fn decide(&mut self, proposal: &Proposal<'_>) -> Decision;
}

impl<F> DecisionSource for F
where
    F: FnMut(&Proposal<'_>) -> Decision,
{
    fn decide(&mut self, proposal: &Proposal<'_>) -> Decision {
        self(proposal)
    }
}

/// Accepts every proposal
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoAccept;

impl DecisionSource for AutoAccept {
    fn decide(&mut self, _proposal: &Proposal<'_>) -> Decision {
        Decision::AcceptProposed
    }
}

/// One binding made during a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedPair {
    pub source_id: String,
    pub target_id: String,
    pub phase: SessionPhase,
    pub tier: MatchTier,
    /// The decision source replaced the proposed target
    pub explicit: bool,
}

/// Outcome of a completed session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionReport {
    pub mapped: Vec<MappedPair>,
    /// Catalog-A ids left unmapped
    pub unresolved: Vec<String>,
}

impl SessionReport {
    /// True when every queued record got a binding
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Catalog-B records not referenced by `used`, in catalog order
pub fn available_targets<'b>(
    catalog_b: &'b Catalog,
    used: &BTreeSet<String>,
) -> Vec<&'b FilamentRecord> {
    catalog_b.iter().filter(|r| !used.contains(&r.id)).collect()
}

/// Interactive or programmatic reconciliation over one pair of catalogs
pub struct ReconciliationSession<'a> {
    catalog_a: &'a Catalog,
    catalog_b: &'a Catalog,
    store: &'a MappingStore,
    matcher: &'a Matcher,
    phase: SessionPhase,
}

impl<'a> ReconciliationSession<'a> {
    pub fn new(
        catalog_a: &'a Catalog,
        catalog_b: &'a Catalog,
        store: &'a MappingStore,
        matcher: &'a Matcher,
    ) -> Self {
        Self {
            catalog_a,
            catalog_b,
            store,
            matcher,
            phase: SessionPhase::Primary,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Run both phases to completion
    ///
    /// # Errors
    /// Only persistence failures are returned; decisions accepted before the
    /// failure stay committed.
    pub fn run(&mut self, decisions: &mut dyn DecisionSource) -> Result<SessionReport> {
        let mut report = SessionReport::default();
        let limit = self.catalog_a.len().min(self.catalog_b.len());

        let initial = self.store.load();
        let mut queue: VecDeque<&'a FilamentRecord> = self
            .catalog_a
            .iter()
            .filter(|r| !initial.contains_key(&r.id))
            .collect();
        let mut fallback_queue: Vec<&'a FilamentRecord> = Vec::new();

        info!(
            slicer_filaments = self.catalog_a.len(),
            spools = self.catalog_b.len(),
            already_mapped = initial.len(),
            pending = queue.len(),
            "Reconciliation started"
        );

        self.phase = SessionPhase::Primary;
        loop {
            let mapping = self.store.load();
            if mapping.len() >= limit {
                break;
            }
            let Some(record) = queue.pop_front() else {
                break;
            };
            if mapping.contains_key(&record.id) {
                continue;
            }

            let used = used_target_ids(&mapping);
            let available = available_targets(self.catalog_b, &used);
            let Some(candidate) = self.matcher.propose(record, &available) else {
                warn!(source = %record.composite_key(), "No close match, deferring to fallback");
                fallback_queue.push(record);
                continue;
            };

            match self.decide(record, &candidate, &used, decisions) {
                Some((target_id, explicit)) if self.store.bind_if_free(&record.id, &target_id)? => {
                    report.mapped.push(MappedPair {
                        source_id: record.id.clone(),
                        target_id,
                        phase: SessionPhase::Primary,
                        tier: candidate.tier,
                        explicit,
                    });
                }
                _ => fallback_queue.push(record),
            }
        }

        // Left in the queue only when one side ran out of filaments
        report.unresolved.extend(queue.iter().map(|r| r.id.clone()));

        if !fallback_queue.is_empty() {
            info!(count = fallback_queue.len(), "Revisiting skipped filaments with fallback suggestions");
        }
        self.phase = SessionPhase::Fallback;
        for record in fallback_queue {
            let mapping = self.store.load();
            if mapping.contains_key(&record.id) {
                continue;
            }

            let used = used_target_ids(&mapping);
            let available = available_targets(self.catalog_b, &used);
            let resolved = match self.matcher.fallback(record, &available) {
                Some(candidate) => self
                    .decide(record, &candidate, &used, decisions)
                    .map(|choice| (choice, candidate.tier)),
                None => None,
            };

            match resolved {
                Some(((target_id, explicit), tier))
                    if self.store.bind_if_free(&record.id, &target_id)? =>
                {
                    report.mapped.push(MappedPair {
                        source_id: record.id.clone(),
                        target_id,
                        phase: SessionPhase::Fallback,
                        tier,
                        explicit,
                    });
                }
                _ => report.unresolved.push(record.id.clone()),
            }
        }

        self.phase = SessionPhase::Complete;
        if report.is_complete() {
            info!(mapped = report.mapped.len(), "Reconciliation complete");
        } else {
            warn!(
                mapped = report.mapped.len(),
                unresolved = report.unresolved.len(),
                ids = ?report.unresolved,
                "Reconciliation complete, not all filaments are mapped"
            );
        }
        Ok(report)
    }

    /// Ask the decision source and validate its answer
    ///
    /// Returns the chosen target and whether it was given explicitly.
    fn decide(
        &self,
        record: &FilamentRecord,
        candidate: &MatchCandidate,
        used: &BTreeSet<String>,
        decisions: &mut dyn DecisionSource,
    ) -> Option<(String, bool)> {
        let target = self.catalog_b.get(&candidate.target_id)?;
        info!(
            phase = ?self.phase,
            source = %record.composite_key(),
            target_key = %target.composite_key(),
            target_id = %target.id,
            "Suggested match"
        );

        let proposal = Proposal {
            phase: self.phase,
            source: record,
            target,
            candidate,
        };

        match decisions.decide(&proposal) {
            Decision::AcceptProposed => Some((candidate.target_id.clone(), false)),
            Decision::AcceptExplicit(id) => {
                let id = id.trim();
                if !self.catalog_b.contains(id) {
                    warn!(source = %record.id, target_id = %id, "Chosen spool not found");
                    None
                } else if used.contains(id) {
                    warn!(source = %record.id, target_id = %id, "Chosen spool already mapped to another filament");
                    None
                } else {
                    Some((id.to_string(), true))
                }
            }
            Decision::Skip => {
                info!(source = %record.id, "Proposal skipped");
                None
            }
        }
    }
}

/// Suggested targets for every unmapped catalog-A record
///
/// A record with a tier 1/2 proposal gets that single id; otherwise every
/// unused catalog-B id is listed. Read-only.
pub fn possible_matches(
    catalog_a: &Catalog,
    catalog_b: &Catalog,
    mapping: &Mapping,
    matcher: &Matcher,
) -> BTreeMap<String, Vec<String>> {
    let used = used_target_ids(mapping);
    let available = available_targets(catalog_b, &used);

    catalog_a
        .iter()
        .filter(|r| !mapping.contains_key(&r.id))
        .map(|record| {
            let ids = match matcher.propose(record, &available) {
                Some(candidate) => vec![candidate.target_id],
                None => available.iter().map(|t| t.id.clone()).collect(),
            };
            (record.id.clone(), ids)
        })
        .collect()
}

/// Mapping coverage summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingStatus {
    pub slicer_filaments: usize,
    pub spools: usize,
    pub mapped: usize,
    pub unmapped_sources: Vec<String>,
    pub unused_targets: Vec<String>,
    /// Entries whose source or target is missing from the current catalogs
    pub stale_entries: Vec<String>,
}

pub fn mapping_status(catalog_a: &Catalog, catalog_b: &Catalog, mapping: &Mapping) -> MappingStatus {
    let used = used_target_ids(mapping);
    MappingStatus {
        slicer_filaments: catalog_a.len(),
        spools: catalog_b.len(),
        mapped: mapping.len(),
        unmapped_sources: catalog_a
            .iter()
            .filter(|r| !mapping.contains_key(&r.id))
            .map(|r| r.id.clone())
            .collect(),
        unused_targets: available_targets(catalog_b, &used)
            .into_iter()
            .map(|r| r.id.clone())
            .collect(),
        stale_entries: mapping
            .iter()
            .filter(|(s, t)| !catalog_a.contains(s) || !catalog_b.contains(t))
            .map(|(s, _)| s.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rec(id: &str, vendor: &str, material: &str, name: &str) -> FilamentRecord {
        FilamentRecord::new(id, vendor, material, name)
    }

    #[test]
    fn test_possible_matches_lists_fallback_ids() {
        let a = Catalog::from_records(vec![
            rec("a1", "Bambu", "PLA", "Matte Black"),
            rec("a2", "Bambu", "PLA", "zzz"),
            rec("a3", "Bambu", "PETG", "Clear"),
        ]);
        let b = Catalog::from_records(vec![
            rec("b1", "Bambu", "PLA", "Matte Black"),
            rec("b2", "Generic", "ABS", "Orange"),
            rec("b3", "Generic", "PETG", "Translucent"),
        ]);
        let mut mapping = Mapping::new();
        mapping.insert("a3".into(), "b3".into());

        let matches = possible_matches(&a, &b, &mapping, &Matcher::default());
        assert_eq!(matches.len(), 2);
        assert_eq!(matches["a1"], vec!["b1".to_string()]);
        assert_eq!(matches["a2"], vec!["b1".to_string(), "b2".to_string()]);
        assert!(!matches.contains_key("a3"));
    }

    #[test]
    fn test_mapping_status() {
        let a = Catalog::from_records(vec![rec("a1", "V", "PLA", "Red"), rec("a2", "V", "PLA", "Blue")]);
        let b = Catalog::from_records(vec![rec("b1", "V", "PLA", "Red"), rec("b2", "V", "PLA", "Blue")]);
        let mut mapping = Mapping::new();
        mapping.insert("a1".into(), "b1".into());
        mapping.insert("gone".into(), "b9".into());

        let status = mapping_status(&a, &b, &mapping);
        assert_eq!(status.mapped, 2);
        assert_eq!(status.unmapped_sources, vec!["a2".to_string()]);
        assert_eq!(status.unused_targets, vec!["b2".to_string()]);
        assert_eq!(status.stale_entries, vec!["gone".to_string()]);
    }

    #[test]
    fn test_session_phase_transitions() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::new(dir.path().join("m.json"));
        let a = Catalog::from_records(vec![rec("a1", "V", "PLA", "Red")]);
        let b = Catalog::from_records(vec![rec("b1", "V", "PLA", "Red")]);
        let matcher = Matcher::default();

        let mut session = ReconciliationSession::new(&a, &b, &store, &matcher);
        assert_eq!(session.phase(), SessionPhase::Primary);
        let report = session.run(&mut AutoAccept).unwrap();
        assert_eq!(session.phase(), SessionPhase::Complete);
        assert!(report.is_complete());
        assert_eq!(store.get("a1").as_deref(), Some("b1"));
    }
}
