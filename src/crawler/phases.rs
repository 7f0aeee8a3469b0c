//! Phase handlers: fetch-and-parse for one work item
//!
//! A [`PhaseTask`] is everything a worker needs to rebuild a handler on its
//! own side of the process boundary, so it is plain serializable data.

use crate::config::{ApiConfig, CrawlerConfig};
use crate::crawler::fetcher::{FailedFetch, FetchClient, FetchResponse};
use crate::models::{BuildingDetail, BuildingRecord, RequestRef, Street};
use crate::parser::{
    parse_building_detail, parse_request_detail, parse_search_results, parse_street_lookup,
    ParseError, SearchContext,
};
use crate::state::{ErrorCategory, FetchFailure, FetchResult, Phase, WorkItem};
use crate::tenant::{Credential, EndpointBuilder, EndpointKind, Tenant};
use crate::ComplotError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Type-erased per-item handler shared by the executor's tasks
pub type ItemHandler = Arc<dyn Fn(WorkItem) -> BoxFuture<'static, FetchResult> + Send + Sync>;

/// Serializable description of one phase run for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTask {
    pub phase: Phase,
    pub tenant: Tenant,
    pub crawler: CrawlerConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub credential: Option<Credential>,
}

struct PhaseContext {
    client: FetchClient,
    endpoints: EndpointBuilder,
    tenant: Tenant,
    test_house_numbers: Vec<u32>,
    max_house_number: u32,
}

impl PhaseContext {
    async fn fetch(&self, kind: EndpointKind) -> Result<FetchResponse, FailedFetch> {
        let request = self
            .endpoints
            .build(&self.tenant, &kind)
            .map_err(|e| FailedFetch {
                failure: FetchFailure::new(ErrorCategory::BadRequest, e.to_string()),
                attempts: 0,
            })?;
        self.client.fetch(&request).await
    }
}

/// Builds the handler for `task.phase`
///
/// Export does no fetching and has no handler.
pub fn build_handler(task: &PhaseTask) -> Result<ItemHandler, ComplotError> {
    let client = FetchClient::new(&task.api, &task.crawler)?;
    build_handler_with_client(task, client)
}

pub fn build_handler_with_client(
    task: &PhaseTask,
    client: FetchClient,
) -> Result<ItemHandler, ComplotError> {
    let ctx = Arc::new(PhaseContext {
        client,
        endpoints: EndpointBuilder::new(&task.api).with_credential(task.credential.clone()),
        tenant: task.tenant.clone(),
        test_house_numbers: task.crawler.test_house_numbers.clone(),
        max_house_number: task.crawler.max_house_number,
    });

    let handler: ItemHandler = match task.phase {
        Phase::StreetDiscovery => Arc::new(move |item| {
            let ctx = Arc::clone(&ctx);
            async move { discover_street(&ctx, item).await }.boxed()
        }),
        Phase::RecordSearch => Arc::new(move |item| {
            let ctx = Arc::clone(&ctx);
            async move { search_street(&ctx, item).await }.boxed()
        }),
        Phase::DetailFetch => Arc::new(move |item| {
            let ctx = Arc::clone(&ctx);
            async move { fetch_building(&ctx, item).await }.boxed()
        }),
        Phase::RequestEnrichment => Arc::new(move |item| {
            let ctx = Arc::clone(&ctx);
            async move { fetch_request(&ctx, item).await }.boxed()
        }),
        Phase::Export => {
            return Err(ComplotError::WorkerProtocol(
                "export phase has no fetch handler".to_string(),
            ))
        }
    };

    Ok(handler)
}

fn decode_input<T: DeserializeOwned>(item: &WorkItem) -> Result<T, FetchResult> {
    serde_json::from_value(item.input.clone()).map_err(|e| {
        FetchResult::failed(
            item.id.clone(),
            FetchFailure::new(ErrorCategory::BadRequest, format!("invalid item input: {}", e)),
            item.attempt_count,
        )
    })
}

fn parse_failure(item: &WorkItem, error: ParseError, attempts: u32) -> FetchResult {
    FetchResult::failed(
        item.id.clone(),
        FetchFailure::new(ErrorCategory::ParseError, error.to_string()),
        attempts,
    )
}

fn encode_payload<T: Serialize>(item: &WorkItem, value: &T, attempts: u32) -> FetchResult {
    match serde_json::to_value(value) {
        Ok(payload) => FetchResult::success(item.id.clone(), payload, attempts),
        Err(e) => FetchResult::failed(
            item.id.clone(),
            FetchFailure::new(ErrorCategory::ParseError, e.to_string()),
            attempts,
        ),
    }
}

/// Tries the test house numbers in order until one yields a street name
///
/// A lookup that is permanently refused is skipped. A lookup that exhausts its
/// retries fails the whole item so that it can be retried later.
async fn discover_street(ctx: &PhaseContext, item: WorkItem) -> FetchResult {
    let code: u32 = match decode_input(&item) {
        Ok(code) => code,
        Err(result) => return result,
    };
    let mut attempts = item.attempt_count;

    for &house in &ctx.test_house_numbers {
        match ctx
            .fetch(EndpointKind::AddressSearch {
                street: code,
                house,
            })
            .await
        {
            Ok(response) => {
                attempts += response.attempts;
                match parse_street_lookup(&response.body, &ctx.tenant.name) {
                    Ok(Some(name)) => {
                        return encode_payload(&item, &Some(Street { code, name }), attempts)
                    }
                    Ok(None) => continue,
                    Err(e) => return parse_failure(&item, e, attempts),
                }
            }
            Err(failed) => {
                attempts += failed.attempts;
                if failed.failure.category.is_retryable() {
                    return FetchResult::failed(item.id, failed.failure, attempts);
                }
                tracing::debug!(street = code, house, error = %failed.failure, "Lookup refused");
            }
        }
    }

    FetchResult::success(item.id, Value::Null, attempts)
}

/// Scans every house number of a street and collects its building records
async fn search_street(ctx: &PhaseContext, item: WorkItem) -> FetchResult {
    let street: Street = match decode_input(&item) {
        Ok(street) => street,
        Err(result) => return result,
    };
    let mut attempts = item.attempt_count;
    let mut seen = HashSet::new();
    let mut records: Vec<BuildingRecord> = Vec::new();

    for house in 1..ctx.max_house_number {
        let response = match ctx
            .fetch(EndpointKind::AddressSearch {
                street: street.code,
                house,
            })
            .await
        {
            Ok(response) => response,
            Err(failed) => {
                attempts += failed.attempts;
                if failed.failure.category.is_retryable() {
                    let detail = format!("house {}: {}", house, failed.failure.detail);
                    return FetchResult::failed(
                        item.id,
                        FetchFailure::new(failed.failure.category, detail),
                        attempts,
                    );
                }
                continue;
            }
        };
        attempts += response.attempts;

        let search = SearchContext {
            city_name: &ctx.tenant.name,
            street: &street,
            house_number: house,
        };
        match parse_search_results(&response.body, &search) {
            Ok(page) => {
                for record in page {
                    if seen.insert(record.tik_number.clone()) {
                        records.push(record);
                    }
                }
            }
            Err(e) => return parse_failure(&item, e, attempts),
        }
    }

    encode_payload(&item, &records, attempts)
}

async fn fetch_building(ctx: &PhaseContext, item: WorkItem) -> FetchResult {
    let tik: String = match decode_input(&item) {
        Ok(tik) => tik,
        Err(result) => return result,
    };
    let base = item.attempt_count;

    match ctx.fetch(EndpointKind::BuildingFile { tik: tik.clone() }).await {
        Ok(response) => {
            let attempts = base + response.attempts;
            match parse_building_detail(&response.body, &tik) {
                Ok(detail) => encode_payload(&item, &detail, attempts),
                Err(e) => parse_failure(&item, e, attempts),
            }
        }
        Err(failed) => FetchResult::failed(item.id, failed.failure, base + failed.attempts),
    }
}

async fn fetch_request(ctx: &PhaseContext, item: WorkItem) -> FetchResult {
    let request: RequestRef = match decode_input(&item) {
        Ok(request) => request,
        Err(result) => return result,
    };
    let base = item.attempt_count;

    match ctx
        .fetch(EndpointKind::RequestFile {
            request: request.request_number.clone(),
        })
        .await
    {
        Ok(response) => {
            let attempts = base + response.attempts;
            match parse_request_detail(&response.body, &request.request_number, &request.tik_number)
            {
                Ok(detail) => encode_payload(&item, &detail, attempts),
                Err(e) => parse_failure(&item, e, attempts),
            }
        }
        Err(failed) => FetchResult::failed(item.id, failed.failure, base + failed.attempts),
    }
}

// ===== Expected work items =====

/// One item per street code in the tenant's declared range
pub fn discovery_items(tenant: &Tenant) -> Vec<WorkItem> {
    let (lo, hi) = tenant.street_range;
    (lo..=hi)
        .map(|code| WorkItem::new(code.to_string(), json!(code)))
        .collect()
}

pub fn record_items(streets: &[Street]) -> Vec<WorkItem> {
    streets
        .iter()
        .map(|street| WorkItem::new(street.code.to_string(), json!(street)))
        .collect()
}

/// One item per unique tik number, in first-seen order
pub fn detail_items(records: &[BuildingRecord]) -> Vec<WorkItem> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| !r.tik_number.is_empty() && seen.insert(r.tik_number.as_str()))
        .map(|r| WorkItem::new(r.tik_number.clone(), json!(r.tik_number)))
        .collect()
}

/// One item per unique request number across all building files
pub fn request_items(details: &[BuildingDetail]) -> Vec<WorkItem> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for detail in details {
        for request in &detail.requests {
            if request.request_number.is_empty() || !seen.insert(request.request_number.clone())
            {
                continue;
            }
            let key = RequestRef {
                request_number: request.request_number.clone(),
                tik_number: detail.tik_number.clone(),
            };
            items.push(WorkItem::new(key.request_number.clone(), json!(key)));
        }
    }
    items
}
