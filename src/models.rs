use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Bucket name for applications the catalog did not categorise.
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DownloadType {
    ExternalLink,
    UploadedFile,
    ServerPath,
    Unknown,
}

impl DownloadType {
    /// Accepts both the API codes and the admin display labels.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "external_link" | "EXTERNAL_LINK" | "外部链接" => Self::ExternalLink,
            "uploaded_file" | "UPLOADED_FILE" | "本机上传" => Self::UploadedFile,
            "server_path" | "SERVER_PATH" | "手动选择服务器文件" => Self::ServerPath,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstallMethod {
    Silent,
    Manual,
}

impl InstallMethod {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "silent" | "SILENT" | "静默安装" => Self::Silent,
            _ => Self::Manual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Application {
    pub id: Option<i64>,
    pub name: String,
    pub version: Option<String>,
    pub short_description: Option<String>,
    pub logo: Option<String>,
    pub category: Option<String>,
    pub install_method: InstallMethod,
    pub install_params: Option<String>,
    pub download_type: DownloadType,
    pub external_link: Option<String>,
    pub uploaded_file_url: Option<String>,
    pub server_file_path: Option<String>,
}

impl Application {
    /// Minimal record used by tests and fixtures; every optional field empty.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            version: None,
            short_description: None,
            logo: None,
            category: None,
            install_method: InstallMethod::Manual,
            install_params: None,
            download_type: DownloadType::Unknown,
            external_link: None,
            uploaded_file_url: None,
            server_file_path: None,
        }
    }

    pub fn category_name(&self) -> &str {
        self.category.as_deref().unwrap_or(UNCATEGORIZED)
    }

    pub fn description(&self) -> &str {
        self.short_description.as_deref().unwrap_or_default()
    }

    /// Identity used to keep per-card state apart when installers share a filename.
    pub fn key(&self) -> String {
        match self.id {
            Some(id) => format!("id:{id}"),
            None => format!("name:{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NavigationLink {
    pub name: String,
    pub url: String,
}

/// Final URL and on-disk filename for an application's installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDownload {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Progressing,
    Completed,
    Failed,
    Cancelled,
}

/// Opaque key for one download session on the host side.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DownloadHandle(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub owner: String,
    pub app_name: String,
    pub filename: String,
    pub url: String,
    pub save_path: Option<PathBuf>,
    pub received_bytes: u64,
    pub total_bytes: u64,
    pub status: DownloadStatus,
    pub handle: Option<DownloadHandle>,
    pub install_method: InstallMethod,
    pub install_flags: Vec<String>,
}

impl DownloadTask {
    /// Completed fraction in `0.0..=1.0`; zero while the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.received_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
