//! Flat tabular export of a tenant's checkpoints
//!
//! Reads the checkpoint store only. Every file is rewritten from scratch on
//! each export.

use crate::config::OutputConfig;
use crate::models::{BuildingDetail, BuildingRecord, RequestDetail, Street};
use crate::output::csv::write_file;
use crate::output::markdown::write_summary;
use crate::output::stats::load_status;
use crate::output::{OutputError, OutputResult};
use crate::state::Phase;
use crate::storage::CheckpointStore;
use crate::tenant::Tenant;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Files written by one export, with their data row counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub dir: PathBuf,
    pub files: Vec<(String, usize)>,
}

impl ExportSummary {
    pub fn rows(&self, file: &str) -> Option<usize> {
        self.files
            .iter()
            .find(|(name, _)| name == file)
            .map(|(_, rows)| *rows)
    }
}

fn write_table<S: AsRef<str>>(
    path: &Path,
    header: &[&str],
    rows: impl IntoIterator<Item = Vec<S>>,
) -> OutputResult<usize> {
    write_file(path, header, rows).map_err(|source| OutputError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Streets of the latest discovery, plus baseline streets it no longer sees
fn load_streets(store: &dyn CheckpointStore, tenant: &str) -> Vec<(Street, bool)> {
    let Some(checkpoint) = store.load(tenant, Phase::StreetDiscovery) else {
        return Vec::new();
    };

    let observed: Vec<Street> = checkpoint
        .decode_payloads::<Option<Street>>()
        .into_iter()
        .flatten()
        .collect();
    let active: BTreeSet<u32> = observed.iter().map(|s| s.code).collect();

    let mut streets: HashMap<u32, Street> = checkpoint
        .metadata
        .get("baseline")
        .and_then(|v| serde_json::from_value::<Vec<Street>>(v.clone()).ok())
        .unwrap_or_default()
        .into_iter()
        .map(|s| (s.code, s))
        .collect();
    for street in observed {
        streets.insert(street.code, street);
    }

    let mut rows: Vec<(Street, bool)> = streets
        .into_values()
        .map(|s| {
            let is_active = active.contains(&s.code);
            (s, is_active)
        })
        .collect();
    rows.sort_by_key(|(s, _)| s.code);
    rows
}

fn load_records(store: &dyn CheckpointStore, tenant: &str) -> Vec<BuildingRecord> {
    store
        .load(tenant, Phase::RecordSearch)
        .map(|cp| {
            cp.decode_payloads::<Vec<BuildingRecord>>()
                .into_iter()
                .flatten()
                .collect()
        })
        .unwrap_or_default()
}

fn load_phase<T: serde::de::DeserializeOwned>(
    store: &dyn CheckpointStore,
    tenant: &str,
    phase: Phase,
) -> Vec<T> {
    store
        .load(tenant, phase)
        .map(|cp| cp.decode_payloads())
        .unwrap_or_default()
}

/// Writes every export file for `tenant` into `{data-dir}/{tenant}/`
///
/// Buildings come from the building files when any were fetched, otherwise
/// from the search records. Request files are only written when request
/// enrichment produced data.
pub fn export_tenant(
    output: &OutputConfig,
    tenant: &Tenant,
    store: &dyn CheckpointStore,
) -> OutputResult<ExportSummary> {
    let dir = output.tenant_dir(&tenant.key);
    std::fs::create_dir_all(&dir)?;
    let mut summary = ExportSummary {
        dir: dir.clone(),
        files: Vec::new(),
    };

    let streets = load_streets(store, &tenant.key);
    let n = write_table(
        &dir.join("streets.csv"),
        &["code", "name", "status"],
        streets.iter().map(|(s, active)| {
            vec![
                s.code.to_string(),
                s.name.clone(),
                if *active { "active" } else { "removed" }.to_string(),
            ]
        }),
    )?;
    summary.files.push(("streets.csv".to_string(), n));

    let records = load_records(store, &tenant.key);
    let details: Vec<BuildingDetail> = load_phase(store, &tenant.key, Phase::DetailFetch);

    let header = [
        "tik_number",
        "address",
        "neighborhood",
        "street_name",
        "gush",
        "helka",
        "num_requests",
        "num_plans",
    ];
    let n = if details.is_empty() {
        let mut seen = BTreeSet::new();
        write_table(
            &dir.join("buildings.csv"),
            &header,
            records
                .iter()
                .filter(|r| seen.insert(r.tik_number.clone()))
                .map(|r| {
                    vec![
                        r.tik_number.clone(),
                        r.address.clone(),
                        String::new(),
                        r.street_name.clone(),
                        r.gush.clone(),
                        r.helka.clone(),
                        String::new(),
                        String::new(),
                    ]
                }),
        )?
    } else {
        let by_tik: HashMap<&str, &BuildingRecord> = records
            .iter()
            .map(|r| (r.tik_number.as_str(), r))
            .collect();
        write_table(
            &dir.join("buildings.csv"),
            &header,
            details.iter().map(|d| {
                let record = by_tik.get(d.tik_number.as_str());
                let (gush, helka) = match (record, d.gush_helka.first()) {
                    (_, Some(parcel)) => (parcel.gush.clone(), parcel.helka.clone()),
                    (Some(r), None) => (r.gush.clone(), r.helka.clone()),
                    (None, None) => (String::new(), String::new()),
                };
                vec![
                    d.tik_number.clone(),
                    d.address.clone(),
                    d.neighborhood.clone(),
                    record.map(|r| r.street_name.clone()).unwrap_or_default(),
                    gush,
                    helka,
                    d.requests.len().to_string(),
                    d.plans.len().to_string(),
                ]
            }),
        )?
    };
    summary.files.push(("buildings.csv".to_string(), n));

    let n = write_table(
        &dir.join("permits.csv"),
        &[
            "tik_number",
            "address",
            "request_number",
            "submission_date",
            "last_event",
            "applicant_name",
            "permit_number",
            "permit_date",
        ],
        details.iter().flat_map(|d| {
            d.requests.iter().map(move |r| {
                vec![
                    d.tik_number.clone(),
                    d.address.clone(),
                    r.request_number.clone(),
                    r.submission_date.clone(),
                    r.last_event.clone(),
                    r.applicant_name.clone(),
                    r.permit_number.clone(),
                    r.permit_date.clone(),
                ]
            })
        }),
    )?;
    summary.files.push(("permits.csv".to_string(), n));

    let requests: Vec<RequestDetail> = load_phase(store, &tenant.key, Phase::RequestEnrichment);
    if !requests.is_empty() {
        export_requests(&mut summary, &requests)?;
    }

    let status = load_status(store, tenant);
    write_summary(&dir.join("summary.md"), &status, &summary)?;
    summary.files.push(("summary.md".to_string(), 0));

    tracing::info!(
        tenant = %tenant.key,
        dir = %dir.display(),
        files = summary.files.len(),
        "Export written"
    );

    Ok(summary)
}

fn export_requests(summary: &mut ExportSummary, requests: &[RequestDetail]) -> OutputResult<()> {
    let dir = summary.dir.clone();

    let n = write_table(
        &dir.join("requests.csv"),
        &[
            "request_number",
            "tik_number",
            "address",
            "submission_date",
            "request_type",
            "primary_use",
            "description",
            "permit_number",
            "permit_date",
            "main_area_sqm",
            "service_area_sqm",
            "housing_units",
            "num_stakeholders",
            "num_events",
        ],
        requests.iter().map(|r| {
            vec![
                r.request_number.clone(),
                r.tik_number.clone(),
                r.address.clone(),
                r.submission_date.clone(),
                r.request_type.clone(),
                r.primary_use.clone(),
                r.description.clone(),
                r.permit_number.clone(),
                r.permit_date.clone(),
                r.main_area_sqm.clone(),
                r.service_area_sqm.clone(),
                r.housing_units.clone(),
                r.stakeholders.len().to_string(),
                r.events.len().to_string(),
            ]
        }),
    )?;
    summary.files.push(("requests.csv".to_string(), n));

    let n = write_table(
        &dir.join("stakeholders.csv"),
        &["request_number", "tik_number", "role", "name"],
        requests.iter().flat_map(|r| {
            r.stakeholders.iter().map(move |s| {
                vec![
                    r.request_number.clone(),
                    r.tik_number.clone(),
                    s.role.clone(),
                    s.name.clone(),
                ]
            })
        }),
    )?;
    summary.files.push(("stakeholders.csv".to_string(), n));

    let n = write_table(
        &dir.join("permit_events.csv"),
        &[
            "request_number",
            "tik_number",
            "status",
            "event_type",
            "start_date",
            "end_date",
        ],
        requests.iter().flat_map(|r| {
            r.events.iter().map(move |e| {
                vec![
                    r.request_number.clone(),
                    r.tik_number.clone(),
                    e.status.clone(),
                    e.event_type.clone(),
                    e.start_date.clone(),
                    e.end_date.clone(),
                ]
            })
        }),
    )?;
    summary.files.push(("permit_events.csv".to_string(), n));

    Ok(())
}
