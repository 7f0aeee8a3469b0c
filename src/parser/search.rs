//! Address search results (GetTikimByAddress / GetBakashotByAddress)

use crate::models::{BuildingRecord, Street};
use crate::parser::{document_text, row_cells, selector, table_rows, text_of, ParseError};
use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::OnceLock;

const RESULTS_TABLE: &str = "table#results-table";

/// Query context echoed into every record of a search page
#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a> {
    pub city_name: &'a str,
    pub street: &'a Street,
    pub house_number: u32,
}

fn has_results(text: &str) -> bool {
    text.contains("נמצאו") && (text.contains("תיקי בניין") || text.contains("בקשות"))
}

fn has_no_results(text: &str) -> bool {
    text.contains("לא אותרו") || text.contains("לא ניתן")
}

/// Extracts the street name from a discovery lookup
///
/// Returns `None` when the code has no results at this house number.
pub fn parse_street_lookup(html: &str, city_name: &str) -> Result<Option<String>, ParseError> {
    let document = Html::parse_document(html);
    if !has_results(&document_text(&document)) {
        return Ok(None);
    }

    let rows = table_rows(&document, RESULTS_TABLE)?;
    let Some(first) = rows.first() else {
        return Ok(None);
    };

    for cell in row_cells(*first)? {
        let text = text_of(cell);
        if !text.contains(city_name) {
            continue;
        }
        // "<street> <house> <city>" once the city is removed leaves "<street> <house>"
        let without_city = text.replace(city_name, "");
        let without_city = without_city.trim();
        let street = match without_city.rsplit_once(' ') {
            Some((left, _)) => left.trim(),
            None => without_city,
        };
        if street.chars().count() > 1 {
            return Ok(Some(street.to_string()));
        }
    }

    Ok(None)
}

/// Parses every building row of an address search page
pub fn parse_search_results(
    html: &str,
    ctx: &SearchContext<'_>,
) -> Result<Vec<BuildingRecord>, ParseError> {
    let document = Html::parse_document(html);
    if has_no_results(&document_text(&document)) {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for row in table_rows(&document, RESULTS_TABLE)? {
        if let Some(record) = parse_row(row, ctx)? {
            records.push(record);
        }
    }
    Ok(records)
}

fn parse_row(
    row: ElementRef<'_>,
    ctx: &SearchContext<'_>,
) -> Result<Option<BuildingRecord>, ParseError> {
    let cells = row_cells(row)?;
    if cells.len() < 3 {
        return Ok(None);
    }

    let Some(tik_number) = extract_tik_number(row)? else {
        return Ok(None);
    };

    let address = cells
        .iter()
        .map(|c| text_of(*c))
        .find(|t| t.contains(ctx.city_name))
        .unwrap_or_default();

    let (gush, helka) = extract_gush_helka(&cells);

    Ok(Some(BuildingRecord {
        tik_number,
        address,
        gush,
        helka,
        street_code: ctx.street.code,
        street_name: ctx.street.name.clone(),
        house_number: ctx.house_number,
    }))
}

fn building_link() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"getBuilding\((\d+)\)").ok())
        .as_ref()
}

fn digits() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").ok()).as_ref()
}

/// Tik number from a `getBuilding(N)` link, else the digits of the first link
fn extract_tik_number(row: ElementRef<'_>) -> Result<Option<String>, ParseError> {
    let links = selector("a[href]")?;

    for link in row.select(&links) {
        let href = link.value().attr("href").unwrap_or_default();
        if let Some(caps) = building_link().and_then(|re| re.captures(href)) {
            return Ok(caps.get(1).map(|m| m.as_str().to_string()));
        }
    }

    Ok(row.select(&links).next().and_then(|link| {
        let text = text_of(link);
        digits()
            .and_then(|re| re.find(&text))
            .map(|m| m.as_str().to_string())
    }))
}

/// Trailing run of short numeric cells: the last is helka, the one before it gush
fn extract_gush_helka(cells: &[ElementRef<'_>]) -> (String, String) {
    let numeric: Vec<String> = cells
        .iter()
        .rev()
        .map(|c| text_of(*c))
        .skip_while(|t| !is_short_number(t))
        .take_while(|t| is_short_number(t))
        .collect();

    if numeric.len() >= 2 {
        (numeric[1].clone(), numeric[0].clone())
    } else {
        (String::new(), String::new())
    }
}

fn is_short_number(text: &str) -> bool {
    !text.is_empty() && text.len() <= 6 && text.chars().all(|c| c.is_ascii_digit())
}
