//! Phase definitions and the per-phase state machine
//!
//! A crawl run walks the phases in a fixed order. Each phase moves through
//! `NotStarted -> Running -> Completed`, or short-circuits to `SkippedByPolicy`.

use crate::ComplotError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One stage of the crawl pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Scan the tenant's street-code range for codes that answer
    StreetDiscovery,

    /// Scan house numbers of every active street for building records
    RecordSearch,

    /// Fetch the building file of every record
    DetailFetch,

    /// Fetch the permit request file of every request listed in a building file
    RequestEnrichment,

    /// Write flat tabular artifacts
    Export,
}

impl Phase {
    /// All phases in pipeline order
    pub const ALL: [Phase; 5] = [
        Phase::StreetDiscovery,
        Phase::RecordSearch,
        Phase::DetailFetch,
        Phase::RequestEnrichment,
        Phase::Export,
    ];

    /// Returns true if the phase dispatches work items against the backend
    pub fn is_network(&self) -> bool {
        !matches!(self, Self::Export)
    }

    /// Returns true if the phase is disabled for enrichment-blocked tenants
    pub fn is_enrichment(&self) -> bool {
        matches!(self, Self::DetailFetch | Self::RequestEnrichment)
    }

    /// The phase whose output this phase consumes
    pub fn upstream(&self) -> Option<Phase> {
        match self {
            Self::StreetDiscovery => None,
            Self::RecordSearch => Some(Self::StreetDiscovery),
            Self::DetailFetch => Some(Self::RecordSearch),
            Self::RequestEnrichment => Some(Self::DetailFetch),
            Self::Export => Some(Self::RequestEnrichment),
        }
    }

    /// Stable key used in checkpoint records and on the command line
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::StreetDiscovery => "street_discovery",
            Self::RecordSearch => "record_search",
            Self::DetailFetch => "detail_fetch",
            Self::RequestEnrichment => "request_enrichment",
            Self::Export => "export",
        }
    }

    /// Parses a phase key, accepting hyphens in place of underscores
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s.replace('-', "_").as_str() {
            "street_discovery" | "streets" => Some(Self::StreetDiscovery),
            "record_search" | "records" => Some(Self::RecordSearch),
            "detail_fetch" | "details" => Some(Self::DetailFetch),
            "request_enrichment" | "requests" => Some(Self::RequestEnrichment),
            "export" => Some(Self::Export),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Why a phase was short-circuited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The tenant configuration disables the phase
    TenantPolicy,

    /// The operator asked for the phase to be skipped
    Operator,
}

/// Execution state of a single phase within a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    NotStarted,
    Running,
    Completed,
    SkippedByPolicy(SkipReason),
}

impl PhaseState {
    /// Returns true once the next phase is allowed to start
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::SkippedByPolicy(_))
    }

    /// Returns true if moving from `self` to `to` is a legal transition
    ///
    /// `Completed -> Running` is the retry-errors and incremental re-entry path.
    pub fn can_transition_to(&self, to: PhaseState) -> bool {
        use PhaseState::*;
        matches!(
            (self, to),
            (NotStarted, Running)
                | (NotStarted, Completed)
                | (Running, Completed)
                | (Completed, Running)
                | (NotStarted, SkippedByPolicy(_))
                | (Running, SkippedByPolicy(_))
        )
    }

    /// Performs a checked transition
    pub fn transition(self, to: PhaseState) -> Result<PhaseState, ComplotError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(ComplotError::InvalidTransition { from: self, to })
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::SkippedByPolicy(SkipReason::TenantPolicy) => "skipped_by_policy",
            Self::SkippedByPolicy(SkipReason::Operator) => "skipped_by_operator",
        }
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
