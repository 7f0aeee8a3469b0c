//! Permit request pages (GetBakashaFile)

use crate::models::{RequestDetail, RequestEvent, Stakeholder};
use crate::parser::{
    cell, check_record_page, header_field, info_pairs, row_cells, selector, table_rows,
    ParseError,
};
use scraper::Html;

/// Parses a permit request file
pub fn parse_request_detail(
    html: &str,
    request_number: &str,
    tik_number: &str,
) -> Result<RequestDetail, ParseError> {
    let document = Html::parse_document(html);
    check_record_page(&document)?;

    if document
        .select(&selector("#result-title-div-id, #info-main")?)
        .next()
        .is_none()
    {
        return Err(ParseError::MissingElement("request file sections"));
    }

    let mut detail = RequestDetail {
        request_number: request_number.to_string(),
        tik_number: tik_number.to_string(),
        address: header_field(&document, "כתובת")?,
        submission_date: header_field(&document, "תאריך הגשה")?,
        ..RequestDetail::default()
    };

    for (label, value) in info_pairs(&document, "#info-main")? {
        let slot = if label.contains("מספר תיק בניין") {
            &mut detail.tik_number
        } else if label.contains("סוג הבקשה") {
            &mut detail.request_type
        } else if label.contains("שימוש עיקרי") {
            &mut detail.primary_use
        } else if label.contains("תיאור הבקשה") {
            &mut detail.description
        } else if label.contains("מספר היתר") {
            &mut detail.permit_number
        } else if label.contains("תאריך הפקת היתר") {
            &mut detail.permit_date
        } else if label.contains("שטח עיקרי") {
            &mut detail.main_area_sqm
        } else if label.contains("שטח שירות") {
            &mut detail.service_area_sqm
        } else if label.contains("יחידות דיור") {
            &mut detail.housing_units
        } else {
            continue;
        };
        *slot = value;
    }

    for row in table_rows(&document, "#table-baaley-inyan")? {
        let cells = row_cells(row)?;
        if cells.len() >= 2 {
            let stakeholder = Stakeholder {
                role: cell(&cells, 0),
                name: cell(&cells, 1),
            };
            if !stakeholder.name.is_empty() {
                detail.stakeholders.push(stakeholder);
            }
        }
    }

    for row in table_rows(&document, "#table-events")? {
        let cells = row_cells(row)?;
        if cells.len() >= 4 {
            let event = RequestEvent {
                status: cell(&cells, 0),
                event_type: cell(&cells, 1),
                start_date: cell(&cells, 2),
                end_date: cell(&cells, 3),
            };
            if !event.event_type.is_empty() {
                detail.events.push(event);
            }
        }
    }

    Ok(detail)
}
