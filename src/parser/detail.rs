//! Building file pages (GetTikFile)

use crate::models::{BuildingDetail, Parcel, PermitRequest, Plan};
use crate::parser::{
    cell, check_record_page, header_field, info_pairs, row_cells, selector, table_rows, text_of,
    ParseError,
};
use scraper::Html;

const LANDMARKS: [&str; 3] = ["#result-title-div-id", "#info-main", "#table-requests"];

/// Parses a building file
pub fn parse_building_detail(html: &str, tik_number: &str) -> Result<BuildingDetail, ParseError> {
    let document = Html::parse_document(html);
    check_record_page(&document)?;

    let mut has_landmark = false;
    for css in LANDMARKS {
        if document.select(&selector(css)?).next().is_some() {
            has_landmark = true;
            break;
        }
    }
    if !has_landmark {
        return Err(ParseError::MissingElement("building file sections"));
    }

    let neighborhood = info_pairs(&document, "#info-main")?
        .into_iter()
        .find(|(label, _)| label.contains("שכונה"))
        .map(|(_, value)| value)
        .unwrap_or_default();

    Ok(BuildingDetail {
        tik_number: tik_number.to_string(),
        address: header_field(&document, "כתובת")?,
        neighborhood,
        addresses: extract_addresses(&document)?,
        gush_helka: extract_parcels(&document)?,
        requests: extract_requests(&document)?,
        plans: extract_plans(&document)?,
    })
}

fn extract_addresses(document: &Html) -> Result<Vec<String>, ParseError> {
    Ok(table_rows(document, "#addresses")?
        .into_iter()
        .map(text_of)
        .filter(|a| !a.is_empty())
        .collect())
}

fn extract_parcels(document: &Html) -> Result<Vec<Parcel>, ParseError> {
    let mut parcels = Vec::new();
    for row in table_rows(document, "#table-gushim-helkot")? {
        let cells = row_cells(row)?;
        if cells.len() < 5 {
            continue;
        }
        let parcel = Parcel {
            gush: cell(&cells, 1),
            helka: cell(&cells, 2),
            migrash: cell(&cells, 3),
            plan_number: cell(&cells, 4),
        };
        if !parcel.gush.is_empty() {
            parcels.push(parcel);
        }
    }
    Ok(parcels)
}

fn extract_requests(document: &Html) -> Result<Vec<PermitRequest>, ParseError> {
    let mut requests = Vec::new();
    for row in table_rows(document, "#table-requests")? {
        let cells = row_cells(row)?;
        if cells.len() < 7 {
            continue;
        }
        let request = PermitRequest {
            request_number: cell(&cells, 1),
            submission_date: cell(&cells, 2),
            last_event: cell(&cells, 3),
            applicant_name: cell(&cells, 4),
            permit_number: cell(&cells, 5),
            permit_date: cell(&cells, 6),
        };
        if !request.request_number.is_empty() {
            requests.push(request);
        }
    }
    Ok(requests)
}

fn extract_plans(document: &Html) -> Result<Vec<Plan>, ParseError> {
    let mut plans = Vec::new();
    for row in table_rows(document, "#table-taba")? {
        if text_of(row).contains("לא אותרו") {
            continue;
        }
        let cells = row_cells(row)?;
        if cells.len() < 5 {
            continue;
        }
        let plan = Plan {
            plan_number: cell(&cells, 1),
            plan_name: cell(&cells, 2),
            status: cell(&cells, 3),
            status_date: cell(&cells, 4),
        };
        if !plan.plan_number.is_empty() {
            plans.push(plan);
        }
    }
    Ok(plans)
}
