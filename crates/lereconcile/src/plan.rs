//! Reconciliation plan
//!
//! A plan is the per-resource classification computed fresh on every run.
//! It is never persisted.

use std::fmt::Write as _;

use serde::Serialize;

/// What the reconciler will do with one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    /// Missing; will be created.
    Create,
    /// Already present; left alone.
    Skip,
}

/// One classified resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    /// Resource name.
    pub name: String,
    /// Resource kind.
    pub kind: String,
    /// Planned action.
    pub action: PlanAction,
}

/// Ordered classification of every declared resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Entries in declared order.
    pub entries: Vec<PlanEntry>,
}

impl ReconcilePlan {
    /// Names of resources to create.
    pub fn to_create(&self) -> Vec<&str> {
        self.names(PlanAction::Create)
    }

    /// Names of resources already present.
    pub fn to_skip(&self) -> Vec<&str> {
        self.names(PlanAction::Skip)
    }

    /// Number of creations.
    pub fn create_count(&self) -> usize {
        self.count(PlanAction::Create)
    }

    /// Number of skips.
    pub fn skip_count(&self) -> usize {
        self.count(PlanAction::Skip)
    }

    /// True when nothing needs creating.
    pub fn is_noop(&self) -> bool {
        self.create_count() == 0
    }

    /// Human-readable plan: one line per resource and a count summary.
    pub fn render(&self) -> String {
        let width = self
            .entries
            .iter()
            .map(|e| e.kind.len())
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        for entry in &self.entries {
            let marker = match entry.action {
                PlanAction::Create => "+ create",
                PlanAction::Skip => "= exists",
            };
            let _ = writeln!(out, "  {marker}  {:<width$}  {}", entry.kind, entry.name);
        }
        let _ = write!(
            out,
            "Plan: {} to create, {} already present.",
            self.create_count(),
            self.skip_count()
        );
        out
    }

    fn names(&self, action: PlanAction) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.action == action)
            .map(|e| e.name.as_str())
            .collect()
    }

    fn count(&self, action: PlanAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}
