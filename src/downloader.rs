use std::path::{Path, PathBuf};

use futures::StreamExt;
use log::{debug, warn};
use tokio::{fs, io::AsyncWriteExt};

use crate::error::{Error, Result};

const PARTIAL_SUFFIX: &str = ".part";
const USER_AGENT: &str = concat!("appdock/", env!("CARGO_PKG_VERSION"));

/// Streams installers into the download directory.
///
/// Transfers have no timeout; a stalled server only blocks its own task.
#[derive(Clone)]
pub struct Downloader {
    http: reqwest::Client,
    dir: PathBuf,
}

impl Downloader {
    pub fn new(dir: PathBuf) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| Error::Config(format!("http client: {err}")))?;
        Ok(Self { http, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final location for `filename`, or `None` when it has no usable name.
    pub fn target_path(&self, filename: &str) -> Option<PathBuf> {
        sanitize_filename(filename).map(|name| self.dir.join(name))
    }

    pub fn partial_path(target: &Path) -> PathBuf {
        let mut raw = target.as_os_str().to_os_string();
        raw.push(PARTIAL_SUFFIX);
        PathBuf::from(raw)
    }

    /// Downloads `url` to `filename`, reporting `(received, total)` once when the
    /// session opens (`received == 0`) and after every chunk.
    ///
    /// `total` is zero when the server sent no length. Bytes land in a `.part`
    /// file that is renamed only once the transfer completes.
    pub async fn fetch<F>(&self, url: &str, filename: &str, mut on_progress: F) -> Result<PathBuf>
    where
        F: FnMut(u64, u64),
    {
        let failed = |reason: String| Error::Download {
            filename: filename.to_string(),
            reason,
        };

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(failed(format!("unsupported download URL {url:?}")));
        }
        let target = self
            .target_path(filename)
            .ok_or_else(|| failed("invalid filename".into()))?;
        let partial = Self::partial_path(&target);

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| failed(format!("cannot create {:?}: {err}", self.dir)))?;

        let result = self
            .stream_to(url, &partial, &mut on_progress)
            .await
            .map_err(failed);
        if let Err(err) = result {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                debug!("no partial file to remove at {:?}: {cleanup}", partial);
            }
            return Err(err);
        }

        if fs::metadata(&target).await.is_ok() {
            fs::remove_file(&target)
                .await
                .map_err(|err| failed(format!("cannot replace {:?}: {err}", target)))?;
        }
        fs::rename(&partial, &target)
            .await
            .map_err(|err| failed(format!("cannot finalize {:?}: {err}", target)))?;
        Ok(target)
    }

    async fn stream_to<F>(
        &self,
        url: &str,
        partial: &Path,
        on_progress: &mut F,
    ) -> std::result::Result<(), String>
    where
        F: FnMut(u64, u64),
    {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("server answered HTTP {status}"));
        }

        let total = response.content_length().unwrap_or(0);
        let mut file = fs::File::create(partial)
            .await
            .map_err(|err| format!("cannot create {:?}: {err}", partial))?;

        let mut received: u64 = 0;
        on_progress(received, total);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| format!("transfer interrupted: {err}"))?;
            file.write_all(&chunk)
                .await
                .map_err(|err| format!("write failed: {err}"))?;
            received += chunk.len() as u64;
            on_progress(received, total);
        }
        file.flush()
            .await
            .map_err(|err| format!("write failed: {err}"))?;

        if total > 0 && received < total {
            warn!("short read for {url}: {received} of {total} bytes");
            return Err(format!("transfer ended after {received} of {total} bytes"));
        }
        Ok(())
    }
}

/// Keeps the final path component and replaces characters Windows rejects.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(
        name.chars()
            .map(|ch| match ch {
                '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
                ch if ch.is_control() => '_',
                ch => ch,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    #[test]
    fn sanitizes_traversal_and_reserved_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename(r"..\evil.exe").as_deref(), Some("evil.exe"));
        assert_eq!(sanitize_filename("a:b?.exe").as_deref(), Some("a_b_.exe"));
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("dir/"), None);
    }

    #[tokio::test]
    async fn streams_to_target_with_progress() {
        let payload = vec![7u8; 64 * 1024];
        let body = payload.clone();
        let base = serve(Router::new().route(
            "/files/setup.exe",
            get(move || {
                let body = body.clone();
                async move { body }
            }),
        ))
        .await;

        let dir = tempfile::TempDir::new().unwrap();
        let downloader = Downloader::new(dir.path().to_path_buf()).unwrap();
        let mut updates = Vec::new();
        let path = downloader
            .fetch(&format!("{base}/files/setup.exe"), "setup.exe", |received, total| {
                updates.push((received, total))
            })
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("setup.exe"));
        assert_eq!(std::fs::read(&path).unwrap(), payload);
        assert!(!Downloader::partial_path(&path).exists());
        assert_eq!(updates[0], (0, payload.len() as u64));
        let (last_received, last_total) = *updates.last().unwrap();
        assert_eq!(last_received, payload.len() as u64);
        assert_eq!(last_total, payload.len() as u64);
        assert!(updates.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    }

    #[tokio::test]
    async fn http_error_leaves_no_files() {
        let base = serve(Router::new().route(
            "/files/missing.exe",
            get(|| async { StatusCode::NOT_FOUND }),
        ))
        .await;

        let dir = tempfile::TempDir::new().unwrap();
        let downloader = Downloader::new(dir.path().to_path_buf()).unwrap();
        let err = downloader
            .fetch(&format!("{base}/files/missing.exe"), "missing.exe", |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Download { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let dir = tempfile::TempDir::new().unwrap();
        let downloader = Downloader::new(dir.path().to_path_buf()).unwrap();
        let err = downloader
            .fetch("about:blank", "blank.exe", |_, _| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported download URL"));
    }
}
