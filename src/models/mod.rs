//! Domain records produced by the parsers and carried as phase payloads
//!
//! The orchestrator stores these as opaque JSON; only the phase handlers and
//! the exporter know their shape.

use serde::{Deserialize, Serialize};

/// A street code that answered the discovery lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Street {
    pub code: u32,
    pub name: String,
}

/// One row of an address search
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildingRecord {
    pub tik_number: String,
    pub address: String,
    #[serde(default)]
    pub gush: String,
    #[serde(default)]
    pub helka: String,
    pub street_code: u32,
    pub street_name: String,
    pub house_number: u32,
}

/// Parcel (gush/helka) entry of a building file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Parcel {
    pub gush: String,
    pub helka: String,
    #[serde(default)]
    pub migrash: String,
    #[serde(default)]
    pub plan_number: String,
}

/// Permit request as listed in a building file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermitRequest {
    pub request_number: String,
    #[serde(default)]
    pub submission_date: String,
    #[serde(default)]
    pub last_event: String,
    #[serde(default)]
    pub applicant_name: String,
    #[serde(default)]
    pub permit_number: String,
    #[serde(default)]
    pub permit_date: String,
}

/// Urban plan affecting a building
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Plan {
    pub plan_number: String,
    #[serde(default)]
    pub plan_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_date: String,
}

/// Parsed building file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildingDetail {
    pub tik_number: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub gush_helka: Vec<Parcel>,
    #[serde(default)]
    pub requests: Vec<PermitRequest>,
    #[serde(default)]
    pub plans: Vec<Plan>,
}

/// Key of a request enrichment work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRef {
    pub request_number: String,
    pub tik_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stakeholder {
    pub role: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestEvent {
    pub status: String,
    pub event_type: String,
    pub start_date: String,
    pub end_date: String,
}

/// Parsed permit request file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestDetail {
    pub request_number: String,
    #[serde(default)]
    pub tik_number: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub submission_date: String,
    #[serde(default)]
    pub request_type: String,
    #[serde(default)]
    pub primary_use: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permit_number: String,
    #[serde(default)]
    pub permit_date: String,
    #[serde(default)]
    pub main_area_sqm: String,
    #[serde(default)]
    pub service_area_sqm: String,
    #[serde(default)]
    pub housing_units: String,
    #[serde(default)]
    pub stakeholders: Vec<Stakeholder>,
    #[serde(default)]
    pub events: Vec<RequestEvent>,
}
