//! Request URL construction for the backend's program endpoints

use crate::config::ApiConfig;
use crate::tenant::{EndpointFamily, Tenant};
use crate::ComplotError;
use serde::{Deserialize, Serialize};
use url::Url;

/// Opaque credential forwarded to authenticated endpoints
///
/// The crawler never inspects it. `Debug` is redacted so it does not leak into logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// The backend programs the crawler calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
    /// Search one street/house-number address
    AddressSearch { street: u32, house: u32 },

    /// Building file by tik number
    BuildingFile { tik: String },

    /// Permit request file by request number
    RequestFile { request: String },
}

/// A fully resolved request: what the fetch client needs and nothing more
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub url: Url,
    pub referer: String,
}

/// Builds request descriptors for one API base
#[derive(Debug, Clone)]
pub struct EndpointBuilder {
    base_url: String,
    app_name: String,
    credential: Option<Credential>,
}

impl EndpointBuilder {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            base_url: api.base_url.trim_end_matches('?').to_string(),
            app_name: api.app_name.clone(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    /// Builds the descriptor for `kind` against `tenant`
    ///
    /// Parameters keep their declared order, and the `arguments` list names them
    /// in the casing the backend expects.
    pub fn build(
        &self,
        tenant: &Tenant,
        kind: &EndpointKind,
    ) -> Result<RequestDescriptor, ComplotError> {
        let site = tenant.site_id.to_string();
        let (program, params): (&str, Vec<(&str, String)>) = match kind {
            EndpointKind::AddressSearch { street, house } => match tenant.endpoint_family {
                EndpointFamily::Tikim => (
                    "GetTikimByAddress",
                    vec![
                        ("siteid", site),
                        ("c", tenant.city_code.to_string()),
                        ("s", street.to_string()),
                        ("h", house.to_string()),
                        ("l", "true".to_string()),
                        ("arguments", "siteid,c,s,h,l".to_string()),
                    ],
                ),
                EndpointFamily::Bakashot => (
                    "GetBakashotByAddress",
                    vec![
                        ("siteid", site),
                        ("grp", "0".to_string()),
                        ("t", "1".to_string()),
                        ("c", tenant.city_code.to_string()),
                        ("s", street.to_string()),
                        ("h", house.to_string()),
                        ("l", "true".to_string()),
                        ("arguments", "siteId,grp,t,c,s,h,l".to_string()),
                    ],
                ),
            },
            EndpointKind::BuildingFile { tik } => (
                "GetTikFile",
                vec![
                    ("siteid", site),
                    ("t", encode(tik)),
                    ("arguments", "siteid,t".to_string()),
                ],
            ),
            EndpointKind::RequestFile { request } => match &self.credential {
                Some(credential) => (
                    "GetBakashaFile",
                    vec![
                        ("siteid", site),
                        ("b", encode(request)),
                        ("token", encode(credential.expose())),
                        ("arguments", "siteid,b,token".to_string()),
                    ],
                ),
                None => (
                    "GetBakashaFile",
                    vec![
                        ("siteid", site),
                        ("b", encode(request)),
                        ("arguments", "siteid,b".to_string()),
                    ],
                ),
            },
        };

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let raw = format!(
            "{}?appname={}&prgname={}&{}",
            self.base_url, self.app_name, program, query
        );
        let url = Url::parse(&raw).map_err(|e| ComplotError::InvalidEndpoint {
            url: raw.clone(),
            message: e.to_string(),
        })?;

        Ok(RequestDescriptor {
            url,
            referer: tenant.portal_url.clone(),
        })
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
