//! HTTP implementation of [`VultrClient`] against the Vultr v1 API
//!
//! The v1 API authenticates with an `API-Key` header, takes form-encoded POST
//! bodies, and returns collections as JSON objects keyed by id (or `[]` when
//! empty). Lookups of unknown objects answer 412 with a short text body such
//! as `Invalid server.`, which we map to [`VultrError::NotFound`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{CreateServerRequest, IpType, ReservedIp, Server, SshKey, VultrClient, VultrError};

/// Production Vultr API endpoint
pub const DEFAULT_API_URL: &str = "https://api.vultr.com";

/// Response bodies that mean "no such object" rather than a failed request
const NOT_FOUND_MESSAGES: &[&str] = &[
    "invalid server",
    "invalid subscription",
    "invalid reserved ip",
    "ip address not found",
    "not found",
];

/// Vultr client backed by `reqwest`
pub struct HttpVultrClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpVultrClient {
    /// Create a client for the given API key and base URL
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, VultrError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("capv/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<String, VultrError> {
        debug!(path, "GET vultr");
        let response = self
            .http
            .get(self.url(path))
            .header("API-Key", &self.api_key)
            .query(query)
            .send()
            .await?;
        read_body(response).await
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<String, VultrError> {
        debug!(path, "POST vultr");
        let response = self
            .http
            .post(self.url(path))
            .header("API-Key", &self.api_key)
            .form(form)
            .send()
            .await?;
        read_body(response).await
    }
}

#[async_trait]
impl VultrClient for HttpVultrClient {
    async fn get_server(&self, id: &str) -> Result<Server, VultrError> {
        let body = self.get("server/list", &[("SUBID", id)]).await?;
        // An unknown id occasionally comes back as an empty collection
        if body.trim() == "[]" {
            return Err(VultrError::NotFound(format!("server {}", id)));
        }
        parse(&body)
    }

    async fn list_servers_by_tag(&self, tag: &str) -> Result<Vec<Server>, VultrError> {
        let body = self.get("server/list", &[("tag", tag)]).await?;
        parse_collection(&body)
    }

    async fn create_server(&self, request: &CreateServerRequest) -> Result<String, VultrError> {
        let body = self.post("server/create", &server_form(request)).await?;
        parse_subid(&body)
    }

    async fn destroy_server(&self, id: &str) -> Result<(), VultrError> {
        self.post("server/destroy", &[("SUBID", id.to_string())])
            .await
            .map(|_| ())
    }

    async fn create_reserved_ip(
        &self,
        region: i64,
        ip_type: IpType,
        label: &str,
    ) -> Result<String, VultrError> {
        let form = [
            ("DCID", region.to_string()),
            ("ip_type", ip_type.as_str().to_string()),
            ("label", label.to_string()),
        ];
        let body = self.post("reservedip/create", &form).await?;
        parse_subid(&body)
    }

    async fn list_reserved_ips(&self) -> Result<Vec<ReservedIp>, VultrError> {
        let body = self.get("reservedip/list", &[]).await?;
        parse_collection(&body)
    }

    async fn destroy_reserved_ip(&self, id: &str) -> Result<(), VultrError> {
        self.post("reservedip/destroy", &[("ip_address", id.to_string())])
            .await
            .map(|_| ())
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, VultrError> {
        let body = self.get("sshkey/list", &[]).await?;
        parse_collection(&body)
    }
}

/// Read a response body, turning non-2xx answers into errors
async fn read_body(response: reqwest::Response) -> Result<String, VultrError> {
    let status = response.status();
    let body = response.text().await?;
    classify(status, body)
}

fn classify(status: StatusCode, body: String) -> Result<String, VultrError> {
    if status.is_success() {
        return Ok(body);
    }

    let message = body.trim().to_string();
    if status == StatusCode::NOT_FOUND || is_not_found_message(&message) {
        return Err(VultrError::NotFound(message));
    }

    Err(VultrError::Api {
        status: status.as_u16(),
        message,
    })
}

fn is_not_found_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    NOT_FOUND_MESSAGES.iter().any(|m| lower.starts_with(m))
}

fn server_form(request: &CreateServerRequest) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("DCID", request.region.to_string()),
        ("VPSPLANID", request.plan_id.to_string()),
        ("OSID", request.os_id.to_string()),
        ("label", request.label.clone()),
        ("hostname", request.hostname.clone()),
        ("tag", request.tag.clone()),
        ("SSHKEYID", request.ssh_key_id.clone()),
    ];
    if let Some(ref data) = request.user_data {
        form.push(("userdata", STANDARD.encode(data)));
    }
    if let Some(script) = request.script_id {
        form.push(("SCRIPTID", script.to_string()));
    }
    if let Some(ref ip) = request.reserved_ip_v4 {
        form.push(("reserved_ip_v4", ip.clone()));
    }
    form
}

fn parse<T: DeserializeOwned>(body: &str) -> Result<T, VultrError> {
    serde_json::from_str(body).map_err(|e| VultrError::InvalidResponse(e.to_string()))
}

/// Parse a collection returned either as `{ "<id>": {...} }` or as `[]`
fn parse_collection<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, VultrError> {
    let value: serde_json::Value = parse(body)?;
    let items: Vec<serde_json::Value> = match value {
        serde_json::Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => Vec::new(),
        other => {
            return Err(VultrError::InvalidResponse(format!(
                "expected collection, got {}",
                other
            )))
        }
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).map_err(|e| VultrError::InvalidResponse(e.to_string()))
        })
        .collect()
}

/// Extract `SUBID` from a create response
fn parse_subid(body: &str) -> Result<String, VultrError> {
    let value: serde_json::Value = parse(body)?;
    match value.get("SUBID") {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(VultrError::InvalidResponse(format!(
            "create response has no SUBID: {}",
            body
        ))),
    }
}
