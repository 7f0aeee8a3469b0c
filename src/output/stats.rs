//! Checkpoint statistics per tenant
//!
//! This module reads the checkpoint store (never writes it) and summarizes
//! each phase for `--status` and the export summary.

use crate::state::{ErrorCategory, Phase};
use crate::storage::CheckpointStore;
use crate::tenant::Tenant;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Checkpoint summary of one phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseStatus {
    pub phase: Phase,

    /// A checkpoint record exists
    pub present: bool,

    pub complete: bool,
    pub saved_at: Option<DateTime<Utc>>,
    pub items: usize,
    pub succeeded: usize,
    pub failed: usize,

    /// Failed items by category
    pub failures: BTreeMap<ErrorCategory, usize>,
}

impl PhaseStatus {
    fn absent(phase: Phase) -> Self {
        Self {
            phase,
            present: false,
            complete: false,
            saved_at: None,
            items: 0,
            succeeded: 0,
            failed: 0,
            failures: BTreeMap::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        match (self.present, self.complete) {
            (false, _) => "not started",
            (true, false) => "partial",
            (true, true) => "complete",
        }
    }
}

/// Checkpoint summary of one tenant
#[derive(Debug, Clone, PartialEq)]
pub struct TenantStatus {
    pub tenant: String,
    pub name: String,
    pub enrichment_blocked: bool,
    pub phases: Vec<PhaseStatus>,

    /// Street codes first seen by the latest discovery
    pub new_streets: Vec<u32>,

    /// Street codes missing from the latest discovery
    pub removed_streets: Vec<u32>,
}

impl TenantStatus {
    pub fn phase(&self, phase: Phase) -> Option<&PhaseStatus> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Failed items across all phases by category
    pub fn failures(&self) -> BTreeMap<ErrorCategory, usize> {
        let mut total = BTreeMap::new();
        for phase in &self.phases {
            for (category, count) in &phase.failures {
                *total.entry(*category).or_insert(0) += count;
            }
        }
        total
    }
}

fn codes(metadata: &BTreeMap<String, Value>, key: &str) -> Vec<u32> {
    metadata
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Loads the checkpoint summary of every network phase of `tenant`
pub fn load_status(store: &dyn CheckpointStore, tenant: &Tenant) -> TenantStatus {
    let mut phases = Vec::new();
    let mut new_streets = Vec::new();
    let mut removed_streets = Vec::new();

    for phase in Phase::ALL.into_iter().filter(Phase::is_network) {
        let Some(checkpoint) = store.load(&tenant.key, phase) else {
            phases.push(PhaseStatus::absent(phase));
            continue;
        };

        if phase == Phase::StreetDiscovery {
            new_streets = codes(&checkpoint.metadata, "new");
            removed_streets = codes(&checkpoint.metadata, "removed");
        }

        let mut failures = BTreeMap::new();
        for failure in checkpoint.items.iter().filter_map(|r| r.failure()) {
            *failures.entry(failure.category).or_insert(0) += 1;
        }

        phases.push(PhaseStatus {
            phase,
            present: true,
            complete: checkpoint.complete,
            saved_at: Some(checkpoint.saved_at),
            items: checkpoint.items.len(),
            succeeded: checkpoint.success_count(),
            failed: checkpoint.failed_count(),
            failures,
        });
    }

    TenantStatus {
        tenant: tenant.key.clone(),
        name: tenant.name.clone(),
        enrichment_blocked: tenant.enrichment_blocked,
        phases,
        new_streets,
        removed_streets,
    }
}

/// Prints a tenant's checkpoint status to stdout
pub fn print_status(status: &TenantStatus) {
    println!("=== {} ({}) ===", status.tenant, status.name);
    if status.enrichment_blocked {
        println!("  enrichment blocked by tenant policy");
    }

    for phase in &status.phases {
        print!("  {:<20} {:<12}", phase.phase.to_string(), phase.label());
        if phase.present {
            print!(
                " {} items, {} ok, {} failed",
                phase.items, phase.succeeded, phase.failed
            );
            if let Some(saved_at) = phase.saved_at {
                print!(", saved {}", saved_at.format("%Y-%m-%d %H:%M:%S"));
            }
        }
        println!();

        for (category, count) in &phase.failures {
            println!("      {}: {}", category, count);
        }
    }

    if !status.new_streets.is_empty() || !status.removed_streets.is_empty() {
        println!(
            "  last discovery: {} new streets, {} removed",
            status.new_streets.len(),
            status.removed_streets.len()
        );
    }
    println!();
}
