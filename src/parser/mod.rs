//! HTML parsers for backend responses
//!
//! All functions here are pure: they take the raw response text and return
//! typed records or a `ParseError`. A parse error is a permanent failure for
//! the work item that fetched the page.

mod detail;
mod request;
mod search;

pub use detail::parse_building_detail;
pub use request::parse_request_detail;
pub use search::{parse_search_results, parse_street_lookup, SearchContext};

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

/// Reasons a response could not be turned into records
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("backend reports no data for this record")]
    NoData,

    #[error("backend requires identification for this record")]
    AuthRequired,

    #[error("response is missing {0}")]
    MissingElement(&'static str),

    #[error("invalid selector '{0}'")]
    InvalidSelector(String),
}

const NO_DATA_MARKERS: [&str; 2] = ["לא ניתן להציג את המידע המבוקש", "לא אותרו תוצאות"];
const AUTH_MARKERS: [&str; 2] = ["מספר תעודת הזהות", "אנא הזינו"];

pub(crate) fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|_| ParseError::InvalidSelector(css.to_string()))
}

/// Text fragments of an element, trimmed and joined by single spaces
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn document_text(document: &Html) -> String {
    document.root_element().text().collect()
}

pub(crate) fn has_no_data(text: &str) -> bool {
    NO_DATA_MARKERS.iter().any(|m| text.contains(m))
}

pub(crate) fn requires_auth(text: &str) -> bool {
    AUTH_MARKERS.iter().any(|m| text.contains(m))
}

/// Rejects "no data" and identification pages before field extraction
pub(crate) fn check_record_page(document: &Html) -> Result<(), ParseError> {
    let text = document_text(document);
    if requires_auth(&text) {
        return Err(ParseError::AuthRequired);
    }
    if has_no_data(&text) {
        return Err(ParseError::NoData);
    }
    Ok(())
}

/// Cell text by index, empty when the row is short
pub(crate) fn cell(cells: &[ElementRef<'_>], index: usize) -> String {
    cells.get(index).map(|c| text_of(*c)).unwrap_or_default()
}

/// `tbody tr` rows of the first table matching `table_css`
pub(crate) fn table_rows<'a>(
    document: &'a Html,
    table_css: &str,
) -> Result<Vec<ElementRef<'a>>, ParseError> {
    let table_sel = selector(table_css)?;
    let row_sel = selector("tbody tr")?;
    Ok(document
        .select(&table_sel)
        .next()
        .map(|table| table.select(&row_sel).collect())
        .unwrap_or_default())
}

pub(crate) fn row_cells<'a>(row: ElementRef<'a>) -> Result<Vec<ElementRef<'a>>, ParseError> {
    let td = selector("td")?;
    Ok(row.select(&td).collect())
}

/// Value following the header label containing `label`
pub(crate) fn header_field(document: &Html, label: &str) -> Result<String, ParseError> {
    let sel = selector("#result-title-div-id .top-navbar-info-desc")?;
    let divs: Vec<_> = document.select(&sel).collect();
    for (i, div) in divs.iter().enumerate() {
        if text_of(*div).contains(label) {
            if let Some(next) = divs.get(i + 1) {
                return Ok(text_of(*next));
            }
        }
    }
    Ok(String::new())
}

/// Two-column label/value pairs of an info table
pub(crate) fn info_pairs(document: &Html, table_css: &str) -> Result<Vec<(String, String)>, ParseError> {
    let table_sel = selector(table_css)?;
    let tr = selector("tr")?;
    let mut pairs = Vec::new();
    if let Some(table) = document.select(&table_sel).next() {
        for row in table.select(&tr) {
            let cells = row_cells(row)?;
            if cells.len() >= 2 {
                let label = text_of(cells[0]).trim_end_matches(':').trim().to_string();
                pairs.push((label, text_of(cells[1])));
            }
        }
    }
    Ok(pairs)
}
