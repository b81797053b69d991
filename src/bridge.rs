//! Boundary between the view and the side-effecting host.
//!
//! The view sends commands over a channel and never blocks on them. The host
//! loop owns the transfers and reports back through a single event stream, so
//! events for one download always arrive in the order they were produced.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use log::{debug, info};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::{JoinHandle, JoinSet},
};

use crate::{
    downloader::{sanitize_filename, Downloader},
    error::{Error, Result},
    execute::{install_command_line, Platform},
    logging::LogLevel,
    models::{DownloadHandle, InstallMethod},
};

pub const CANCELLED: &str = "cancelled";

const ABOUT_TITLE: &str = "About appdock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub filename: String,
    pub install_method: InstallMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// The transfer is open and the target file exists.
    DownloadStarted {
        handle: DownloadHandle,
        filename: String,
        path: PathBuf,
    },
    DownloadProgress {
        handle: DownloadHandle,
        filename: String,
        received: u64,
        total: u64,
        progress: f64,
    },
    DownloadComplete {
        handle: DownloadHandle,
        filename: String,
        path: PathBuf,
        install_method: InstallMethod,
    },
    DownloadFailed {
        handle: DownloadHandle,
        filename: String,
        error: String,
    },
    InstallLaunched {
        filename: String,
        path: PathBuf,
    },
    InstallFailed {
        filename: String,
        error: String,
    },
    About {
        title: String,
        text: String,
    },
    /// Steps for finishing a manual install after the folder was opened.
    InstallGuide {
        title: String,
        text: String,
    },
    Log {
        level: LogLevel,
        text: String,
    },
}

#[derive(Debug)]
enum HostCommand {
    StartDownload {
        handle: DownloadHandle,
        request: DownloadRequest,
    },
    RunSilentInstall {
        filename: String,
        path: PathBuf,
        flags: Vec<String>,
    },
    OpenFilePath {
        path: PathBuf,
    },
    OpenExternalLink {
        url: String,
    },
    ShowAbout,
    ShowInstallGuide {
        app_name: String,
    },
    LogMessage {
        text: String,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Keyed by the on-disk name, holding the requested filename and its handle.
type InFlight = Arc<Mutex<HashMap<String, (String, DownloadHandle)>>>;

/// Two requested names that sanitise to the same file share one slot.
fn registry_key(filename: &str) -> String {
    sanitize_filename(filename).unwrap_or_else(|| filename.to_string())
}

/// Cheap to clone; every clone talks to the same host loop.
#[derive(Clone)]
pub struct HostBridge {
    commands: UnboundedSender<HostCommand>,
    in_flight: InFlight,
    next_handle: Arc<AtomicU64>,
}

impl HostBridge {
    pub fn spawn<P: Platform>(
        downloader: Downloader,
        platform: P,
    ) -> (Self, UnboundedReceiver<HostEvent>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));

        let host = Host {
            downloader,
            platform: Arc::new(platform),
            events: event_tx,
            in_flight: in_flight.clone(),
            transfers: JoinSet::new(),
        };
        let task = tokio::spawn(host.run(command_rx));

        let bridge = Self {
            commands: command_tx,
            in_flight,
            next_handle: Arc::new(AtomicU64::new(0)),
        };
        (bridge, event_rx, task)
    }

    /// Registers the target file and queues the transfer.
    ///
    /// A target stays registered until its `DownloadComplete` or
    /// `DownloadFailed` event has been sent.
    pub fn start_download(&self, request: DownloadRequest) -> Result<DownloadHandle> {
        let key = registry_key(&request.filename);
        let mut in_flight = self.in_flight.lock().unwrap();
        if in_flight.contains_key(&key) {
            return Err(Error::DownloadInFlight(request.filename));
        }

        let handle = DownloadHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let filename = request.filename.clone();
        self.send(HostCommand::StartDownload { handle, request })?;
        in_flight.insert(key, (filename, handle));
        Ok(handle)
    }

    #[cfg(test)]
    pub fn is_in_flight(&self, filename: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap()
            .contains_key(&registry_key(filename))
    }

    /// `filename` is echoed back unchanged in the launch outcome event.
    pub fn run_silent_install(
        &self,
        filename: impl Into<String>,
        path: PathBuf,
        flags: Vec<String>,
    ) -> Result<()> {
        self.send(HostCommand::RunSilentInstall {
            filename: filename.into(),
            path,
            flags,
        })
    }

    pub fn open_file_path(&self, path: PathBuf) -> Result<()> {
        self.send(HostCommand::OpenFilePath { path })
    }

    pub fn open_external_link(&self, url: impl Into<String>) -> Result<()> {
        self.send(HostCommand::OpenExternalLink { url: url.into() })
    }

    pub fn show_about(&self) -> Result<()> {
        self.send(HostCommand::ShowAbout)
    }

    pub fn show_install_guide(&self, app_name: impl Into<String>) -> Result<()> {
        self.send(HostCommand::ShowInstallGuide {
            app_name: app_name.into(),
        })
    }

    pub fn log_message(&self, text: impl Into<String>) -> Result<()> {
        self.send(HostCommand::LogMessage { text: text.into() })
    }

    /// Aborts running transfers and waits until each one has reported `cancelled`.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.send(HostCommand::Shutdown { done })?;
        finished.await.map_err(|_| Error::BridgeClosed)
    }

    fn send(&self, command: HostCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::BridgeClosed)
    }
}

struct Host<P> {
    downloader: Downloader,
    platform: Arc<P>,
    events: UnboundedSender<HostEvent>,
    in_flight: InFlight,
    transfers: JoinSet<()>,
}

impl<P: Platform> Host<P> {
    async fn run(mut self, mut commands: UnboundedReceiver<HostCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(HostCommand::Shutdown { done }) => {
                        self.cancel_all().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.cancel_all().await;
                        break;
                    }
                },
                Some(joined) = self.transfers.join_next(), if !self.transfers.is_empty() => {
                    if let Err(err) = joined {
                        if !err.is_cancelled() {
                            debug!("download task ended abnormally: {err}");
                        }
                    }
                }
            }
        }
        debug!("host loop stopped");
    }

    fn handle(&mut self, command: HostCommand) {
        match command {
            HostCommand::StartDownload { handle, request } => self.start_download(handle, request),
            HostCommand::RunSilentInstall {
                filename,
                path,
                flags,
            } => self.run_silent_install(filename, path, flags),
            HostCommand::OpenFilePath { path } => match self.platform.reveal(&path) {
                Ok(()) => self.log(LogLevel::Info, format!("opened folder for {}", path.display())),
                Err(err) => self.log(
                    LogLevel::Error,
                    format!("cannot open {}: {err}", path.display()),
                ),
            },
            HostCommand::OpenExternalLink { url } => {
                let url = url.trim().to_string();
                if url.is_empty() {
                    self.log(LogLevel::Error, "refusing to open an empty link");
                    return;
                }
                match self.platform.open_url(&url) {
                    Ok(()) => self.log(LogLevel::Info, format!("opened {url}")),
                    Err(err) => self.log(LogLevel::Error, format!("cannot open {url}: {err}")),
                }
            }
            HostCommand::ShowAbout => {
                let _ = self.events.send(HostEvent::About {
                    title: ABOUT_TITLE.to_string(),
                    text: about_text(),
                });
            }
            HostCommand::ShowInstallGuide { app_name } => {
                let _ = self.events.send(HostEvent::InstallGuide {
                    title: format!("Installing {app_name}"),
                    text: install_guide(&app_name),
                });
            }
            HostCommand::LogMessage { text } => info!(target: "frontend", "{text}"),
            HostCommand::Shutdown { .. } => {}
        }
    }

    fn start_download(&mut self, handle: DownloadHandle, request: DownloadRequest) {
        self.log(
            LogLevel::Info,
            format!(
                "downloading {} ({}) from {}",
                request.filename,
                request.install_method.as_str(),
                request.url
            ),
        );

        let downloader = self.downloader.clone();
        let events = self.events.clone();
        let in_flight = self.in_flight.clone();
        self.transfers.spawn(async move {
            let DownloadRequest {
                url,
                filename,
                install_method,
            } = request;
            let target = downloader.target_path(&filename);
            let key = registry_key(&filename);

            let mut last_percent = None;
            let result = downloader
                .fetch(&url, &filename, |received, total| {
                    if received == 0 {
                        if let Some(path) = target.clone() {
                            let _ = events.send(HostEvent::DownloadStarted {
                                handle,
                                filename: filename.clone(),
                                path,
                            });
                        }
                    }
                    let progress = if total > 0 {
                        (received as f64 / total as f64).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    // unknown totals report once per MiB
                    let bucket = if total > 0 {
                        (progress * 100.0) as u64
                    } else {
                        received >> 20
                    };
                    if last_percent == Some(bucket) {
                        return;
                    }
                    last_percent = Some(bucket);
                    let _ = events.send(HostEvent::DownloadProgress {
                        handle,
                        filename: filename.clone(),
                        received,
                        total,
                        progress,
                    });
                })
                .await;

            let (level, text, event) = match result {
                Ok(path) => (
                    LogLevel::Success,
                    format!("downloaded {filename} to {}", path.display()),
                    HostEvent::DownloadComplete {
                        handle,
                        filename: filename.clone(),
                        path,
                        install_method,
                    },
                ),
                Err(err) => (
                    LogLevel::Error,
                    format!("download failed: {err}"),
                    HostEvent::DownloadFailed {
                        handle,
                        filename: filename.clone(),
                        error: err.to_string(),
                    },
                ),
            };
            log::log!(level.as_log_level(), "{text}");

            // deregister and report under one lock so shutdown never reports twice
            let mut registry = in_flight.lock().unwrap();
            if registry.get(&key).map(|(_, owner)| *owner) == Some(handle) {
                registry.remove(&key);
            }
            let _ = events.send(HostEvent::Log { level, text });
            let _ = events.send(event);
        });
    }

    fn run_silent_install(&self, filename: String, path: PathBuf, flags: Vec<String>) {
        let command_line = install_command_line(&path, &flags);
        self.log(LogLevel::Info, format!("running {command_line}"));

        let platform = self.platform.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let launch_path = path.clone();
            let launched =
                tokio::task::spawn_blocking(move || platform.spawn_installer(&launch_path, &flags))
                    .await
                    .unwrap_or_else(|err| {
                        Err(Error::InstallLaunch {
                            path: path.display().to_string(),
                            reason: err.to_string(),
                        })
                    });

            let (level, text, event) = match launched {
                Ok(()) => (
                    LogLevel::Success,
                    format!("installer started for {filename}"),
                    HostEvent::InstallLaunched { filename, path },
                ),
                Err(err) => (
                    LogLevel::Error,
                    format!("install launch failed: {err}"),
                    HostEvent::InstallFailed {
                        filename,
                        error: err.to_string(),
                    },
                ),
            };
            log::log!(level.as_log_level(), "{text}");
            let _ = events.send(HostEvent::Log { level, text });
            let _ = events.send(event);
        });
    }

    async fn cancel_all(&mut self) {
        self.transfers.abort_all();
        while self.transfers.join_next().await.is_some() {}

        let cancelled: Vec<(String, DownloadHandle)> = self
            .in_flight
            .lock()
            .unwrap()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for (filename, handle) in cancelled {
            if let Some(target) = self.downloader.target_path(&filename) {
                let partial = Downloader::partial_path(&target);
                if partial.exists() {
                    if let Err(err) = std::fs::remove_file(&partial) {
                        debug!("cannot remove {}: {err}", partial.display());
                    }
                }
            }
            self.log(LogLevel::Warning, format!("download of {filename} cancelled"));
            let _ = self.events.send(HostEvent::DownloadFailed {
                handle,
                filename,
                error: CANCELLED.to_string(),
            });
        }
    }

    fn log(&self, level: LogLevel, text: impl Into<String>) {
        let text = text.into();
        log::log!(level.as_log_level(), "{text}");
        let _ = self.events.send(HostEvent::Log { level, text });
    }
}

fn about_text() -> String {
    format!(
        "appdock {}\nTerminal client for the company software catalog.\nDownloads installers and runs them silently when the catalog allows it.",
        env!("CARGO_PKG_VERSION")
    )
}

fn install_guide(app_name: &str) -> String {
    format!(
        "1. The {app_name} installer is in the folder that just opened.\n\
         2. Double-click it to start the setup wizard.\n\
         3. Follow the wizard until it finishes.\n\
         4. Start {app_name} from the Start menu."
    )
}
