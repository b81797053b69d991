use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::CatalogConfig,
    error::{Error, Result},
    models::{Application, DownloadType, InstallMethod, NavigationLink},
};

const USER_AGENT: &str = concat!("appdock/", env!("CARGO_PKG_VERSION"));

/// Items returned by a fallback fetch plus the host that served them.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub items: Vec<T>,
    pub endpoint: Option<String>,
    pub errors: Vec<String>,
}

impl<T> Fetched<T> {
    fn empty(errors: Vec<String>) -> Self {
        Self {
            items: Vec::new(),
            endpoint: None,
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeedTestEntry {
    pub url: String,
    #[serde(default, rename = "response_time")]
    pub response_time_ms: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeedTestReport {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "fastest_api")]
    pub fastest: Option<SpeedTestEntry>,
    #[serde(default, rename = "all_results")]
    pub results: Vec<SpeedTestEntry>,
}

#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
}

impl CatalogClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Config(format!("http client: {err}")))?;
        Ok(Self { http })
    }

    /// Tries every configured host; an all-failed fetch yields an empty list.
    pub async fn fetch_applications(&self, config: &CatalogConfig) -> Fetched<Application> {
        let mut errors = Vec::new();
        for base in config.fallback_order() {
            match self.fetch_applications_from(base).await {
                Ok(items) => {
                    info!("loaded {} applications from {base}", items.len());
                    return Fetched {
                        items,
                        endpoint: Some(base.to_string()),
                        errors,
                    };
                }
                Err(err) => {
                    warn!("{err}");
                    errors.push(err.to_string());
                }
            }
        }
        warn!("all application endpoints failed, showing an empty catalog");
        Fetched::empty(errors)
    }

    pub async fn fetch_applications_from(&self, base: &str) -> Result<Vec<Application>> {
        let url = CatalogConfig::applications_url(base);
        let payload = self.get_json(&url).await?;
        Ok(normalize_applications(&payload))
    }

    /// Navigation is non-fatal: failures fall back to a built-in link list.
    pub async fn fetch_navigation(&self, config: &CatalogConfig) -> Fetched<NavigationLink> {
        let mut errors = Vec::new();
        for base in config.fallback_order() {
            let url = CatalogConfig::navigation_url(base);
            match self.get_json(&url).await {
                Ok(payload) => {
                    let items = normalize_navigation(&payload);
                    debug!("loaded {} navigation links from {base}", items.len());
                    return Fetched {
                        items,
                        endpoint: Some(base.to_string()),
                        errors,
                    };
                }
                Err(err) => {
                    warn!("{err}");
                    errors.push(err.to_string());
                }
            }
        }
        warn!("all navigation endpoints failed, using default links");
        Fetched {
            items: default_navigation(),
            endpoint: None,
            errors,
        }
    }

    pub async fn speed_test(&self, base: &str) -> Result<SpeedTestReport> {
        let url = CatalogConfig::speed_test_url(base);
        let payload = self.get_json(&url).await?;
        let report: SpeedTestReport = serde_json::from_value(payload)?;
        if !report.success {
            return Err(Error::DataShape("speed test reported failure".into()));
        }
        Ok(report)
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|err| Error::network(url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::network(url, format!("HTTP {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|err| Error::network(url, err))?;
        serde_json::from_str::<Value>(&body).map_err(|err| {
            let snippet: String = body.chars().take(120).collect();
            Error::network(url, format!("invalid JSON ({err}): {}", snippet.trim()))
        })
    }
}

/// Accepts a bare array or a paginated envelope (`results` / `data`).
fn record_list(payload: &Value) -> Option<&Vec<Value>> {
    if let Some(items) = payload.as_array() {
        return Some(items);
    }
    ["results", "data"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_array))
}

pub fn normalize_applications(payload: &Value) -> Vec<Application> {
    let Some(records) = record_list(payload) else {
        warn!("{}", Error::DataShape("application list not found".into()));
        return Vec::new();
    };

    records
        .iter()
        .filter_map(|record| {
            let parsed = parse_application(record);
            if parsed.is_none() {
                debug!("skipping application record without a name");
            }
            parsed
        })
        .collect()
}

fn parse_application(record: &Value) -> Option<Application> {
    if !record.is_object() {
        return None;
    }
    let name = text_field(record, "name")?;

    let category = match record.get("category") {
        Some(Value::Object(_)) => record.get("category").and_then(|c| text_field(c, "name")),
        Some(Value::String(raw)) => non_empty(raw),
        _ => None,
    }
    .or_else(|| text_field(record, "category_name"));

    Some(Application {
        id: record.get("id").and_then(Value::as_i64),
        name,
        version: text_field(record, "version"),
        short_description: text_field(record, "short_description")
            .or_else(|| text_field(record, "description")),
        logo: text_field(record, "icon").or_else(|| text_field(record, "logo_url")),
        category,
        install_method: text_field(record, "install_method")
            .map(|raw| InstallMethod::parse(&raw))
            .unwrap_or(InstallMethod::Manual),
        install_params: text_field(record, "install_params"),
        download_type: text_field(record, "download_type")
            .map(|raw| DownloadType::parse(&raw))
            .unwrap_or(DownloadType::Unknown),
        external_link: text_field(record, "external_link"),
        uploaded_file_url: text_field(record, "uploaded_file_url"),
        server_file_path: text_field(record, "server_file_path"),
    })
}

pub fn normalize_navigation(payload: &Value) -> Vec<NavigationLink> {
    let Some(records) = record_list(payload) else {
        warn!("{}", Error::DataShape("navigation list not found".into()));
        return Vec::new();
    };

    let mut links: Vec<(i64, NavigationLink)> = records
        .iter()
        .filter_map(|record| {
            let name = text_field(record, "name")?;
            let url = text_field(record, "url")?;
            let order = record.get("order").and_then(Value::as_i64).unwrap_or(0);
            Some((order, NavigationLink { name, url }))
        })
        .collect();
    links.sort_by_key(|(order, _)| *order);
    links.into_iter().map(|(_, link)| link).collect()
}

pub fn default_navigation() -> Vec<NavigationLink> {
    [
        ("GitHub", "https://github.com"),
        ("Stack Overflow", "https://stackoverflow.com"),
        ("MDN Web Docs", "https://developer.mozilla.org"),
    ]
    .into_iter()
    .map(|(name, url)| NavigationLink {
        name: name.to_string(),
        url: url.to_string(),
    })
    .collect()
}

fn text_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(raw) => non_empty(raw),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
