use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::SpeedTestReport,
    error::{Error, Result},
};

const CONFIG_DIR: &str = "appdock";
const CONFIG_FILE: &str = "settings.json";
const LOG_FILE: &str = "appdock.log";

pub const DEFAULT_SILENT_FLAG: &str = "/S";
pub const DEFAULT_LOG_PANEL_CAPACITY: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Catalog hosts shipped with the client. They can be selected but not removed.
pub const BUILTIN_ENDPOINTS: [&str; 3] = [
    "http://vip.itvip.com.cn:8000",
    "http://d.itvip.com.cn:8000",
    "http://dsm:8000",
];

const APPLICATIONS_SUFFIX: &str = "/api/v1/applications";
const NAVIGATION_SUFFIX: &str = "/api/v1/navigation";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api_endpoints: Vec<String>,
    pub selected_endpoint: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub silent_install_flag: String,
    pub run_installer_elevated: bool,
    pub log_file: Option<PathBuf>,
    pub log_panel_capacity: usize,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_endpoints: Vec::new(),
            selected_endpoint: None,
            download_dir: None,
            silent_install_flag: DEFAULT_SILENT_FLAG.to_string(),
            run_installer_elevated: false,
            log_file: None,
            log_panel_capacity: DEFAULT_LOG_PANEL_CAPACITY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    /// Reads the settings file, falling back to defaults when it is missing or malformed.
    ///
    /// The settings decide where the log goes, so problems are returned for the
    /// caller to report once logging is up.
    pub fn load() -> (Self, Option<String>) {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => (
                Self::default(),
                Some("no config directory available, using defaults".to_string()),
            ),
        }
    }

    /// A missing file is not a problem; an unreadable or malformed one is.
    pub fn load_from(path: &Path) -> (Self, Option<String>) {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return (Self::default(), None),
            Err(err) => {
                return (
                    Self::default(),
                    Some(format!("cannot read settings {:?}: {err}", path)),
                )
            }
        };
        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => (config.normalized(), None),
            Err(err) => (
                Self::default(),
                Some(format!("failed to parse settings {:?}: {err}", path)),
            ),
        }
    }

    fn normalized(mut self) -> Self {
        if self.silent_install_flag.trim().is_empty() {
            self.silent_install_flag = DEFAULT_SILENT_FLAG.to_string();
        }
        if self.log_panel_capacity == 0 {
            self.log_panel_capacity = DEFAULT_LOG_PANEL_CAPACITY;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
        self
    }

    /// Built-in hosts followed by any valid user-configured ones.
    pub fn catalog_config(&self) -> CatalogConfig {
        let configured = self.api_endpoints.iter().filter(|raw| match normalize_endpoint(raw) {
            Ok(_) => true,
            Err(err) => {
                debug!("skipping configured endpoint: {err}");
                false
            }
        });
        let mut config = CatalogConfig::new(
            BUILTIN_ENDPOINTS
                .iter()
                .map(|url| url.to_string())
                .chain(configured.cloned()),
        )
        .unwrap_or_default();
        if let Some(selected) = &self.selected_endpoint {
            let with_selected = config
                .with_endpoint(selected)
                .unwrap_or_else(|_| config.clone());
            match with_selected.with_selected(selected) {
                Ok(next) => config = next,
                Err(err) => warn!("ignoring selected endpoint: {err}"),
            }
        }
        config
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .or_else(dirs::home_dir)
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join(CONFIG_DIR))
                .unwrap_or_else(env::temp_dir)
                .join(LOG_FILE)
        })
    }

    pub fn silent_flags(&self) -> Vec<String> {
        split_flags(&self.silent_install_flag)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn config_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn split_flags(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Ordered catalog hosts plus the one currently selected.
///
/// Values are immutable; every update returns a new config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    endpoints: Vec<String>,
    selected: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoints: BUILTIN_ENDPOINTS.iter().map(|url| url.to_string()).collect(),
            selected: 0,
        }
    }
}

impl CatalogConfig {
    pub fn new<I, S>(endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for raw in endpoints {
            let url = normalize_endpoint(raw.as_ref())?;
            if !normalized.contains(&url) {
                normalized.push(url);
            }
        }
        if normalized.is_empty() {
            return Err(Error::Config("at least one catalog endpoint is required".into()));
        }
        Ok(Self {
            endpoints: normalized,
            selected: 0,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn selected(&self) -> &str {
        &self.endpoints[self.selected]
    }

    pub fn is_builtin(url: &str) -> bool {
        BUILTIN_ENDPOINTS.contains(&url)
    }

    /// Selected host first, then the remaining hosts in list order.
    pub fn fallback_order(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.selected()).chain(
            self.endpoints
                .iter()
                .enumerate()
                .filter(move |(index, _)| *index != self.selected)
                .map(|(_, url)| url.as_str()),
        )
    }

    pub fn with_endpoint(&self, raw: &str) -> Result<Self> {
        let url = normalize_endpoint(raw)?;
        if self.endpoints.contains(&url) {
            return Err(Error::invalid_endpoint(url, "already configured"));
        }
        let mut next = self.clone();
        next.endpoints.push(url);
        Ok(next)
    }

    pub fn without_endpoint(&self, raw: &str) -> Result<Self> {
        let url = normalize_endpoint(raw)?;
        if Self::is_builtin(&url) {
            return Err(Error::invalid_endpoint(url, "built-in endpoints cannot be removed"));
        }
        let Some(index) = self.endpoints.iter().position(|item| *item == url) else {
            return Err(Error::invalid_endpoint(url, "not configured"));
        };
        if self.endpoints.len() == 1 {
            return Err(Error::invalid_endpoint(url, "cannot remove the last endpoint"));
        }

        let mut next = self.clone();
        next.endpoints.remove(index);
        next.selected = match self.selected {
            current if current == index => 0,
            current if current > index => current - 1,
            current => current,
        };
        Ok(next)
    }

    pub fn with_selected(&self, raw: &str) -> Result<Self> {
        let url = normalize_endpoint(raw)?;
        let Some(index) = self.endpoints.iter().position(|item| *item == url) else {
            return Err(Error::invalid_endpoint(url, "not configured"));
        };
        let mut next = self.clone();
        next.selected = index;
        Ok(next)
    }

    /// Switches to the fastest host reported by a speed test, adding it when unknown.
    pub fn apply_speed_test(&self, report: &SpeedTestReport) -> Result<Self> {
        let Some(fastest) = &report.fastest else {
            return Err(Error::DataShape("speed test reported no fastest endpoint".into()));
        };
        let url = normalize_endpoint(&fastest.url)?;
        let base = if self.endpoints.contains(&url) {
            self.clone()
        } else {
            self.with_endpoint(&url)?
        };
        base.with_selected(&url)
    }

    pub fn applications_url(base: &str) -> String {
        format!("{base}{APPLICATIONS_SUFFIX}/")
    }

    pub fn navigation_url(base: &str) -> String {
        format!("{base}{NAVIGATION_SUFFIX}/")
    }

    pub fn speed_test_url(base: &str) -> String {
        format!("{base}/test-speed/")
    }

    /// Server-side file download endpoint with the path percent-encoded.
    pub fn server_file_url(base: &str, server_path: &str) -> String {
        format!(
            "{base}/download/server-file/?path={}",
            urlencoding::encode(server_path)
        )
    }
}

/// Trims, checks the scheme and strips trailing slashes or a pasted API suffix.
pub fn normalize_endpoint(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_endpoint(raw, "empty"));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(Error::invalid_endpoint(raw, "must start with http:// or https://"));
    }

    let mut url = trimmed.trim_end_matches('/');
    for suffix in [APPLICATIONS_SUFFIX, NAVIGATION_SUFFIX] {
        if let Some(stripped) = url.strip_suffix(suffix) {
            url = stripped;
        }
    }
    let url = url.trim_end_matches('/');
    if url.ends_with(':') || url.ends_with("//") {
        return Err(Error::invalid_endpoint(raw, "missing host"));
    }
    Ok(url.to_string())
}
