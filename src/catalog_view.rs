//! Pure projections of the catalog used by the terminal UI: category buckets,
//! the filtered card list, and installer URL/filename resolution.

use std::collections::BTreeMap;

use crate::{
    config::CatalogConfig,
    models::{Application, DownloadType, ResolvedDownload},
};

/// Label of the bucket that shows every application.
pub const ALL_CATEGORY: &str = "all";

/// Filenames shorter than this are treated as unusable.
const MIN_FILENAME_LEN: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    /// `None` shows every category.
    pub category: Option<String>,
    pub search_term: String,
}

impl ViewState {
    pub fn with_category(&self, category: Option<&str>) -> Self {
        Self {
            category: category.map(str::to_string),
            search_term: self.search_term.clone(),
        }
    }

    pub fn with_search(&self, search_term: impl Into<String>) -> Self {
        Self {
            category: self.category.clone(),
            search_term: search_term.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryBucket {
    /// What selecting the bucket filters on; `None` for the `all` bucket.
    pub category: Option<String>,
    pub name: String,
    pub count: usize,
}

/// Every application lands in exactly one named bucket.
pub fn group_by_category(apps: &[Application]) -> BTreeMap<String, Vec<&Application>> {
    let mut groups: BTreeMap<String, Vec<&Application>> = BTreeMap::new();
    for app in apps {
        groups
            .entry(app.category_name().to_string())
            .or_default()
            .push(app);
    }
    groups
}

/// The `all` bucket first, then named buckets sorted by name.
pub fn category_buckets(apps: &[Application]) -> Vec<CategoryBucket> {
    let mut buckets = vec![CategoryBucket {
        category: None,
        name: ALL_CATEGORY.to_string(),
        count: apps.len(),
    }];
    buckets.extend(
        group_by_category(apps)
            .into_iter()
            .map(|(name, members)| CategoryBucket {
                category: Some(name.clone()),
                name,
                count: members.len(),
            }),
    );
    buckets
}

pub fn filter_applications<'a>(apps: &'a [Application], state: &ViewState) -> Vec<&'a Application> {
    let needle = state.search_term.trim().to_lowercase();
    apps.iter()
        .filter(|app| match &state.category {
            None => true,
            Some(category) => app.category_name() == category,
        })
        .filter(|app| {
            needle.is_empty()
                || app.name.to_lowercase().contains(&needle)
                || app.description().to_lowercase().contains(&needle)
        })
        .collect()
}

/// Picks the installer URL following the app's download type, then any populated source.
pub fn resolve_download(app: &Application, catalog_base: &str) -> Option<ResolvedDownload> {
    let by_type = match app.download_type {
        DownloadType::ExternalLink => app.external_link.as_deref().map(url_source),
        DownloadType::UploadedFile => app.uploaded_file_url.as_deref().map(url_source),
        DownloadType::ServerPath => app
            .server_file_path
            .as_deref()
            .map(|path| server_source(path, catalog_base)),
        DownloadType::Unknown => None,
    };

    let (url, candidate) = by_type.or_else(|| {
        app.external_link
            .as_deref()
            .map(url_source)
            .or_else(|| app.uploaded_file_url.as_deref().map(url_source))
            .or_else(|| {
                app.server_file_path
                    .as_deref()
                    .map(|path| server_source(path, catalog_base))
            })
    })?;

    let filename = match candidate {
        Some(name) if is_usable_filename(&name) => name,
        _ => fallback_filename(app),
    };
    Some(ResolvedDownload { url, filename })
}

fn url_source(url: &str) -> (String, Option<String>) {
    (url.to_string(), filename_from_url(url))
}

fn server_source(path: &str, catalog_base: &str) -> (String, Option<String>) {
    let name = last_segment(path).map(str::to_string);
    (CatalogConfig::server_file_url(catalog_base, path), name)
}

/// Last path segment with query and fragment removed, percent-decoded.
pub fn filename_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let raw = without_query.rsplit('/').next().unwrap_or_default();
    let decoded = urlencoding::decode(raw)
        .map(|value| value.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    last_segment(&decoded).map(str::to_string)
}

fn last_segment(path: &str) -> Option<&str> {
    let segment = path.rsplit(['/', '\\']).next()?.trim();
    if segment.is_empty() {
        None
    } else {
        Some(segment)
    }
}

fn is_usable_filename(name: &str) -> bool {
    name.chars().count() >= MIN_FILENAME_LEN
        && !name.ends_with('.')
        && !name.ends_with('/')
        && !name.ends_with('\\')
}

/// `{sanitized name}-{version|latest}.exe`
pub fn fallback_filename(app: &Application) -> String {
    let base = replace_unsafe(&app.name, |_| false);
    let version = app
        .version
        .as_deref()
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .map(|version| replace_unsafe(version, |ch| matches!(ch, '.' | '-')))
        .unwrap_or_else(|| "latest".to_string());
    format!("{base}-{version}.exe")
}

/// Keeps ASCII alphanumerics, CJK and whatever `also_keep` allows; the rest becomes `_`.
fn replace_unsafe(raw: &str, also_keep: impl Fn(char) -> bool) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || is_cjk(ch) || also_keep(ch) {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn is_cjk(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&ch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstallMethod, UNCATEGORIZED};

    const BASE: &str = "http://dsm:8000";

    fn app(name: &str, category: Option<&str>, description: Option<&str>) -> Application {
        Application {
            category: category.map(str::to_string),
            short_description: description.map(str::to_string),
            ..Application::named(name)
        }
    }

    fn catalog() -> Vec<Application> {
        vec![
            app("WeChat", Some("Social"), Some("Messaging client")),
            app("Chrome", Some("Browser"), Some("Web browser")),
            app("Notepad++", Some("Tools"), Some("Text editor")),
            app("7-Zip", None, Some("Archive TOOL")),
        ]
    }

    #[test]
    fn external_link_scenario() {
        let foo = Application {
            download_type: DownloadType::ExternalLink,
            external_link: Some("http://x/foo-1.2.exe".into()),
            ..Application::named("Foo")
        };
        let resolved = resolve_download(&foo, BASE).unwrap();
        assert_eq!(resolved.url, "http://x/foo-1.2.exe");
        assert_eq!(resolved.filename, "foo-1.2.exe");
    }

    #[test]
    fn external_link_strips_query_and_decodes() {
        let app = Application {
            download_type: DownloadType::ExternalLink,
            external_link: Some("https://cdn/dl/%E5%BE%AE%E4%BF%A1Setup.exe?token=abc#x".into()),
            ..Application::named("WeChat")
        };
        let resolved = resolve_download(&app, BASE).unwrap();
        assert_eq!(resolved.url, app.external_link.clone().unwrap());
        assert_eq!(resolved.filename, "微信Setup.exe");
    }

    #[test]
    fn server_path_is_percent_encoded_and_round_trips() {
        let path = r"D:\packages\office suite\setup&x=1.msi";
        let app = Application {
            download_type: DownloadType::ServerPath,
            server_file_path: Some(path.into()),
            ..Application::named("Office")
        };
        let resolved = resolve_download(&app, BASE).unwrap();
        let (prefix, encoded) = resolved.url.split_once("?path=").unwrap();
        assert_eq!(prefix, "http://dsm:8000/download/server-file/");
        assert_eq!(encoded, urlencoding::encode(path));
        assert_eq!(urlencoding::decode(encoded).unwrap(), path);
        assert_eq!(resolved.filename, "setup&x=1.msi");
    }

    #[test]
    fn type_mismatch_falls_back_in_fixed_order() {
        let app = Application {
            download_type: DownloadType::UploadedFile,
            uploaded_file_url: None,
            server_file_path: Some("/srv/tool.exe".into()),
            external_link: Some("http://x/ext-tool.exe".into()),
            ..Application::named("Tool")
        };
        let resolved = resolve_download(&app, BASE).unwrap();
        assert_eq!(resolved.url, "http://x/ext-tool.exe");

        let server_only = Application {
            download_type: DownloadType::Unknown,
            server_file_path: Some("/srv/tool.exe".into()),
            ..Application::named("Tool")
        };
        let resolved = resolve_download(&server_only, BASE).unwrap();
        assert!(resolved.url.starts_with("http://dsm:8000/download/server-file/?path="));
        assert_eq!(resolved.filename, "tool.exe");
    }

    #[test]
    fn unusable_filenames_get_generated_name() {
        let short = Application {
            download_type: DownloadType::UploadedFile,
            uploaded_file_url: Some("http://x/media/a.e".into()),
            version: Some("2.0".into()),
            ..Application::named("My App!")
        };
        assert_eq!(
            resolve_download(&short, BASE).unwrap().filename,
            "My_App_-2.0.exe"
        );

        let trailing_slash = Application {
            download_type: DownloadType::ExternalLink,
            external_link: Some("http://x/download/".into()),
            ..Application::named("办公套件")
        };
        assert_eq!(
            resolve_download(&trailing_slash, BASE).unwrap().filename,
            "办公套件-latest.exe"
        );

        let dotted = Application {
            download_type: DownloadType::ExternalLink,
            external_link: Some("http://x/get/installer.".into()),
            ..Application::named("Dot")
        };
        assert_eq!(resolve_download(&dotted, BASE).unwrap().filename, "Dot-latest.exe");
    }

    #[test]
    fn generated_name_sanitizes_version() {
        let app = Application {
            version: Some("2024/01 beta:1".into()),
            ..Application::named("X")
        };
        assert_eq!(fallback_filename(&app), "X-2024_01_beta_1.exe");

        let blank = Application {
            version: Some("  ".into()),
            ..Application::named("X")
        };
        assert_eq!(fallback_filename(&blank), "X-latest.exe");
    }

    #[test]
    fn nothing_populated_resolves_to_none() {
        let app = Application {
            download_type: DownloadType::ExternalLink,
            install_method: InstallMethod::Silent,
            ..Application::named("Ghost")
        };
        assert!(resolve_download(&app, BASE).is_none());
    }

    #[test]
    fn grouping_partitions_the_catalog() {
        let apps = catalog();
        let groups = group_by_category(&apps);
        let total: usize = groups.values().map(Vec::len).sum();
        assert_eq!(total, apps.len());
        assert!(groups.contains_key(UNCATEGORIZED));
        for app in &apps {
            let hits = groups
                .values()
                .filter(|members| members.iter().any(|member| member.name == app.name))
                .count();
            assert_eq!(hits, 1, "{} should be in exactly one bucket", app.name);
        }

        let buckets = category_buckets(&apps);
        assert_eq!(buckets[0].name, ALL_CATEGORY);
        assert_eq!(buckets[0].category, None);
        assert_eq!(buckets[0].count, 4);
        let names: Vec<&str> = buckets[1..].iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Browser", "Social", "Tools", UNCATEGORIZED]);
    }

    #[test]
    fn filter_by_category_and_search() {
        let apps = catalog();
        let state = ViewState::default().with_search("tool");
        let names: Vec<&str> = filter_applications(&apps, &state)
            .iter()
            .map(|app| app.name.as_str())
            .collect();
        assert_eq!(names, vec!["7-Zip"]);

        let state = ViewState::default().with_category(Some("Browser"));
        assert_eq!(filter_applications(&apps, &state).len(), 1);

        let state = ViewState::default()
            .with_category(Some(UNCATEGORIZED))
            .with_search("zip");
        assert_eq!(filter_applications(&apps, &state)[0].name, "7-Zip");
    }

    #[test]
    fn category_named_all_is_not_the_all_bucket() {
        let mut apps = catalog();
        apps.push(app("Misc", Some(ALL_CATEGORY), None));

        let buckets = category_buckets(&apps);
        let named_all = buckets
            .iter()
            .find(|bucket| bucket.category.as_deref() == Some(ALL_CATEGORY))
            .unwrap();
        assert_eq!(named_all.count, 1);

        let state = ViewState::default().with_category(named_all.category.as_deref());
        let names: Vec<&str> = filter_applications(&apps, &state)
            .iter()
            .map(|app| app.name.as_str())
            .collect();
        assert_eq!(names, vec!["Misc"]);
        assert_eq!(filter_applications(&apps, &ViewState::default()).len(), 5);
    }

    #[test]
    fn search_is_case_insensitive() {
        let apps = catalog();
        let upper = filter_applications(&apps, &ViewState::default().with_search("CHROME"));
        let lower = filter_applications(&apps, &ViewState::default().with_search("chrome"));
        assert_eq!(upper, lower);
        assert_eq!(upper.len(), 1);
    }

    #[test]
    fn filtering_is_idempotent() {
        let apps = catalog();
        let state = ViewState::default().with_search("e");
        let once: Vec<Application> = filter_applications(&apps, &state)
            .into_iter()
            .cloned()
            .collect();
        let twice = filter_applications(&once, &state);
        assert_eq!(once.iter().collect::<Vec<_>>(), twice);
    }
}
