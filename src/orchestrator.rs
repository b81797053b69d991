//! Download/install lifecycle per filename.
//!
//! `Idle -> Requested -> InProgress -> {Completed, Failed}`; a completed silent
//! download moves on to `Installing -> Installed`, a manual one to `Revealed`.
//! Running transfers live in `active`, keyed by filename because two transfers
//! must never write the same file. Once a transfer reports its end the task is
//! dropped and only the outcome is kept, keyed by the owning application so a
//! shared installer name does not leak one card's state into another.

use std::{collections::HashMap, path::PathBuf};

use log::{debug, warn};

use crate::{
    bridge::{DownloadRequest, HostBridge, HostEvent, CANCELLED},
    error::{Error, Result},
    models::{Application, DownloadHandle, DownloadStatus, DownloadTask, InstallMethod, ResolvedDownload},
};

/// What the host must do after a transfer completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    SilentInstall {
        filename: String,
        path: PathBuf,
        flags: Vec<String>,
    },
    Reveal {
        app_name: String,
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonState {
    pub label: String,
    pub enabled: bool,
}

impl ButtonState {
    fn enabled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            enabled: true,
        }
    }

    fn disabled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Installing,
    Installed,
    Revealed,
    Failed(String),
    InstallFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Finished {
    filename: String,
    outcome: Outcome,
}

pub struct Orchestrator {
    default_flags: Vec<String>,
    active: HashMap<String, DownloadTask>,
    outcomes: HashMap<String, Finished>,
}

impl Orchestrator {
    pub fn new(default_flags: Vec<String>) -> Self {
        Self {
            default_flags,
            active: HashMap::new(),
            outcomes: HashMap::new(),
        }
    }

    pub fn task(&self, filename: &str) -> Option<&DownloadTask> {
        self.active.get(filename)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Flags for a silent install; the app's own parameters win over the configured flag.
    pub fn install_flags(&self, app: &Application) -> Vec<String> {
        app.install_params
            .as_deref()
            .map(crate::config::split_flags)
            .filter(|flags| !flags.is_empty())
            .unwrap_or_else(|| self.default_flags.clone())
    }

    /// Idle -> Requested.
    pub fn request(
        &mut self,
        app: &Application,
        resolved: Option<&ResolvedDownload>,
    ) -> Result<DownloadRequest> {
        let resolved = resolved.ok_or_else(|| Error::Resolution(app.name.clone()))?;
        if self.active.contains_key(&resolved.filename) {
            return Err(Error::DownloadInFlight(resolved.filename.clone()));
        }

        let owner = app.key();
        self.outcomes.remove(&owner);
        self.active.insert(
            resolved.filename.clone(),
            DownloadTask {
                owner,
                app_name: app.name.clone(),
                filename: resolved.filename.clone(),
                url: resolved.url.clone(),
                save_path: None,
                received_bytes: 0,
                total_bytes: 0,
                status: DownloadStatus::Pending,
                handle: None,
                install_method: app.install_method,
                install_flags: self.install_flags(app),
            },
        );
        Ok(DownloadRequest {
            url: resolved.url.clone(),
            filename: resolved.filename.clone(),
            install_method: app.install_method,
        })
    }

    /// Records the handle the bridge assigned to a requested download.
    pub fn attach(&mut self, filename: &str, handle: DownloadHandle) {
        if let Some(task) = self.active.get_mut(filename) {
            task.handle = Some(handle);
        }
    }

    /// Requested -> InProgress.
    pub fn confirm(&mut self, filename: &str, handle: DownloadHandle, path: Option<PathBuf>) {
        if let Some(task) = self.active.get_mut(filename) {
            task.handle = Some(handle);
            task.status = DownloadStatus::Progressing;
            if path.is_some() {
                task.save_path = path;
            }
        }
    }

    pub fn on_progress(&mut self, filename: &str, received: u64, total: u64) {
        if let Some(task) = self.active.get_mut(filename) {
            task.status = DownloadStatus::Progressing;
            task.received_bytes = received;
            task.total_bytes = total;
        }
    }

    /// InProgress -> Completed; returns the single follow-up action for the host.
    pub fn on_complete(&mut self, filename: &str, path: PathBuf) -> Option<FollowUp> {
        let mut task = self.active.remove(filename)?;
        task.status = DownloadStatus::Completed;
        debug!("{filename} {:?} at {}", task.status, path.display());
        match task.install_method {
            InstallMethod::Silent => {
                self.finish(&task, Outcome::Installing);
                Some(FollowUp::SilentInstall {
                    filename: task.filename,
                    path,
                    flags: task.install_flags,
                })
            }
            InstallMethod::Manual => {
                self.finish(&task, Outcome::Revealed);
                Some(FollowUp::Reveal {
                    app_name: task.app_name,
                    path,
                })
            }
        }
    }

    fn finish(&mut self, task: &DownloadTask, outcome: Outcome) {
        self.outcomes.insert(
            task.owner.clone(),
            Finished {
                filename: task.filename.clone(),
                outcome,
            },
        );
    }

    /// InProgress -> Failed.
    pub fn on_failed(&mut self, filename: &str, reason: impl Into<String>) {
        let Some(mut task) = self.active.remove(filename) else {
            return;
        };
        let reason = reason.into();
        task.status = if reason == CANCELLED {
            DownloadStatus::Cancelled
        } else {
            DownloadStatus::Failed
        };
        debug!(
            "{filename} {:?} after {} bytes: {reason}",
            task.status, task.received_bytes
        );
        self.finish(&task, Outcome::Failed(reason));
    }

    /// Cards still waiting on an installer launch for `filename`.
    fn installing(&mut self, filename: &str) -> impl Iterator<Item = &mut Outcome> + '_ {
        let filename = filename.to_string();
        self.outcomes
            .values_mut()
            .filter(move |finished| {
                finished.filename == filename && finished.outcome == Outcome::Installing
            })
            .map(|finished| &mut finished.outcome)
    }

    pub fn on_installed(&mut self, filename: &str) {
        for outcome in self.installing(filename) {
            *outcome = Outcome::Installed;
        }
    }

    /// The download itself stays on disk; only the outcome changes.
    pub fn on_install_failed(&mut self, filename: &str, reason: impl Into<String>) {
        let reason = reason.into();
        for outcome in self.installing(filename) {
            *outcome = Outcome::InstallFailed(reason.clone());
        }
    }

    pub fn button(&self, app: &Application, resolved: Option<&ResolvedDownload>) -> ButtonState {
        let Some(resolved) = resolved else {
            return ButtonState::disabled("link missing");
        };

        let owner = app.key();
        if let Some(task) = self
            .active
            .get(&resolved.filename)
            .filter(|task| task.owner == owner)
        {
            return match task.status {
                DownloadStatus::Pending => ButtonState::disabled("starting…"),
                _ if task.total_bytes > 0 => ButtonState::disabled(format!(
                    "downloading {:>2}%",
                    (task.fraction() * 100.0).floor() as u32
                )),
                _ => ButtonState::disabled("downloading…"),
            };
        }

        match self.outcomes.get(&owner).map(|finished| &finished.outcome) {
            Some(Outcome::Installing) => ButtonState::disabled("installing…"),
            Some(Outcome::Installed) => ButtonState::disabled("installed/launched"),
            Some(Outcome::Revealed) => ButtonState::disabled("folder opened"),
            Some(Outcome::Failed(_)) => ButtonState::enabled("failed, retry"),
            Some(Outcome::InstallFailed(_)) => ButtonState::enabled("install failed, retry"),
            None => match app.install_method {
                InstallMethod::Silent => ButtonState::enabled("install"),
                InstallMethod::Manual => ButtonState::enabled("download"),
            },
        }
    }

    /// Last failure reason for `app`, if its latest attempt failed.
    pub fn failure(&self, app: &Application) -> Option<&str> {
        match self.outcomes.get(&app.key()).map(|finished| &finished.outcome) {
            Some(Outcome::Failed(reason)) | Some(Outcome::InstallFailed(reason)) => Some(reason),
            _ => None,
        }
    }

    /// Issues a download for `app` through the bridge.
    pub fn trigger(
        &mut self,
        bridge: &HostBridge,
        app: &Application,
        resolved: Option<&ResolvedDownload>,
    ) -> Result<DownloadHandle> {
        let request = self.request(app, resolved)?;
        let filename = request.filename.clone();
        match bridge.start_download(request) {
            Ok(handle) => {
                self.attach(&filename, handle);
                Ok(handle)
            }
            Err(err) => {
                self.on_failed(&filename, err.to_string());
                Err(err)
            }
        }
    }

    /// Applies a host event and sends the resulting follow-up command, if any.
    pub fn dispatch(&mut self, bridge: &HostBridge, event: &HostEvent) -> Result<()> {
        match event {
            HostEvent::DownloadStarted {
                handle,
                filename,
                path,
            } => self.confirm(filename, *handle, Some(path.clone())),
            HostEvent::DownloadProgress {
                filename,
                received,
                total,
                ..
            } => self.on_progress(filename, *received, *total),
            HostEvent::DownloadComplete { filename, path, .. } => {
                match self.on_complete(filename, path.clone()) {
                    Some(FollowUp::SilentInstall {
                        filename,
                        path,
                        flags,
                    }) => bridge.run_silent_install(filename, path, flags)?,
                    Some(FollowUp::Reveal { app_name, path }) => {
                        bridge.open_file_path(path)?;
                        bridge.show_install_guide(app_name)?;
                    }
                    None => warn!("completion for unknown download {filename}"),
                }
            }
            HostEvent::DownloadFailed {
                filename, error, ..
            } => self.on_failed(filename, error.clone()),
            HostEvent::InstallLaunched { filename, .. } => self.on_installed(filename),
            HostEvent::InstallFailed { filename, error } => {
                self.on_install_failed(filename, error.clone())
            }
            HostEvent::About { .. } | HostEvent::InstallGuide { .. } | HostEvent::Log { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bridge::tests::{next_event, serve_files, Call, RecordingPlatform},
        catalog_view::resolve_download,
        downloader::Downloader,
        models::DownloadType,
    };

    fn silent_app() -> Application {
        Application {
            install_method: InstallMethod::Silent,
            download_type: DownloadType::ExternalLink,
            external_link: Some("http://x/tool-setup.exe".into()),
            ..Application::named("Tool")
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(vec!["/S".into()])
    }

    #[test]
    fn missing_link_disables_button_and_emits_nothing() {
        let app = Application::named("Ghost");
        let resolved = resolve_download(&app, "http://dsm:8000");
        let mut orch = orchestrator();

        let button = orch.button(&app, resolved.as_ref());
        assert_eq!(button, ButtonState::disabled("link missing"));
        assert!(matches!(
            orch.request(&app, resolved.as_ref()),
            Err(Error::Resolution(_))
        ));
        assert_eq!(orch.active_count(), 0);
    }

    #[test]
    fn silent_completion_installs_exactly_once() {
        let app = silent_app();
        let resolved = resolve_download(&app, "http://dsm:8000");
        let mut orch = orchestrator();

        assert_eq!(orch.button(&app, resolved.as_ref()).label, "install");
        let request = orch.request(&app, resolved.as_ref()).unwrap();
        assert_eq!(request.filename, "tool-setup.exe");
        assert_eq!(orch.button(&app, resolved.as_ref()), ButtonState::disabled("starting…"));

        orch.confirm(&request.filename, DownloadHandle(1), None);
        orch.on_progress(&request.filename, 50, 200);
        assert_eq!(
            orch.button(&app, resolved.as_ref()),
            ButtonState::disabled("downloading 25%")
        );

        let path = PathBuf::from("/downloads/tool-setup.exe");
        assert_eq!(
            orch.on_complete(&request.filename, path.clone()),
            Some(FollowUp::SilentInstall {
                filename: "tool-setup.exe".into(),
                path: path.clone(),
                flags: vec!["/S".into()],
            })
        );
        assert_eq!(orch.on_complete(&request.filename, path), None);
        assert!(orch.task(&request.filename).is_none());
        assert_eq!(orch.button(&app, resolved.as_ref()), ButtonState::disabled("installing…"));

        orch.on_installed(&request.filename);
        let button = orch.button(&app, resolved.as_ref());
        assert!(!button.enabled);
        assert_eq!(button.label, "installed/launched");
    }

    #[test]
    fn manual_completion_reveals() {
        let app = Application {
            install_method: InstallMethod::Manual,
            ..silent_app()
        };
        let resolved = resolve_download(&app, "http://dsm:8000");
        let mut orch = orchestrator();
        let request = orch.request(&app, resolved.as_ref()).unwrap();

        let path = PathBuf::from("/downloads/tool-setup.exe");
        assert_eq!(
            orch.on_complete(&request.filename, path.clone()),
            Some(FollowUp::Reveal {
                app_name: "Tool".into(),
                path,
            })
        );
        assert_eq!(orch.button(&app, resolved.as_ref()), ButtonState::disabled("folder opened"));
    }

    #[test]
    fn duplicate_request_is_refused_until_failure() {
        let app = silent_app();
        let resolved = resolve_download(&app, "http://dsm:8000");
        let mut orch = orchestrator();
        orch.request(&app, resolved.as_ref()).unwrap();

        assert!(matches!(
            orch.request(&app, resolved.as_ref()),
            Err(Error::DownloadInFlight(_))
        ));

        orch.on_failed("tool-setup.exe", "connection reset");
        let button = orch.button(&app, resolved.as_ref());
        assert!(button.enabled);
        assert_eq!(button.label, "failed, retry");
        assert_eq!(orch.failure(&app), Some("connection reset"));

        orch.request(&app, resolved.as_ref()).unwrap();
        assert_eq!(orch.failure(&app), None);
        assert_eq!(orch.button(&app, resolved.as_ref()).label, "starting…");
    }

    #[test]
    fn app_install_params_override_default_flag() {
        let app = Application {
            install_params: Some("/qn  /norestart".into()),
            ..silent_app()
        };
        assert_eq!(
            orchestrator().install_flags(&app),
            vec!["/qn".to_string(), "/norestart".to_string()]
        );
        assert_eq!(orchestrator().install_flags(&silent_app()), vec!["/S".to_string()]);
    }

    #[test]
    fn unknown_total_is_indeterminate() {
        let app = silent_app();
        let resolved = resolve_download(&app, "http://dsm:8000");
        let mut orch = orchestrator();
        orch.request(&app, resolved.as_ref()).unwrap();
        orch.on_progress("tool-setup.exe", 4096, 0);

        let task = orch.task("tool-setup.exe").unwrap();
        assert_eq!(task.status, DownloadStatus::Progressing);
        assert_eq!(task.fraction(), 0.0);
        assert_eq!(
            orch.button(&app, resolved.as_ref()),
            ButtonState::disabled("downloading…")
        );
    }

    #[test]
    fn shared_filename_keeps_cards_apart() {
        let vendor_a = Application {
            install_method: InstallMethod::Manual,
            download_type: DownloadType::ExternalLink,
            external_link: Some("http://vendor-a/dl/setup.exe".into()),
            ..Application::named("Alpha")
        };
        let vendor_b = Application {
            install_method: InstallMethod::Silent,
            download_type: DownloadType::ExternalLink,
            external_link: Some("http://vendor-b/files/setup.exe".into()),
            ..Application::named("Beta")
        };
        let resolved_a = resolve_download(&vendor_a, "http://dsm:8000");
        let resolved_b = resolve_download(&vendor_b, "http://dsm:8000");
        let mut orch = orchestrator();

        orch.request(&vendor_a, resolved_a.as_ref()).unwrap();
        orch.on_progress("setup.exe", 10, 100);
        assert_eq!(orch.button(&vendor_b, resolved_b.as_ref()), ButtonState::enabled("install"));
        assert!(matches!(
            orch.request(&vendor_b, resolved_b.as_ref()),
            Err(Error::DownloadInFlight(_))
        ));

        orch.on_complete("setup.exe", PathBuf::from("/downloads/setup.exe"));
        assert_eq!(
            orch.button(&vendor_a, resolved_a.as_ref()),
            ButtonState::disabled("folder opened")
        );
        assert_eq!(orch.button(&vendor_b, resolved_b.as_ref()), ButtonState::enabled("install"));

        orch.request(&vendor_b, resolved_b.as_ref()).unwrap();
        orch.on_failed("setup.exe", "timeout");
        assert_eq!(orch.failure(&vendor_b), Some("timeout"));
        assert_eq!(orch.failure(&vendor_a), None);
        assert_eq!(
            orch.button(&vendor_a, resolved_a.as_ref()),
            ButtonState::disabled("folder opened")
        );
    }

    struct Driven {
        orch: Orchestrator,
        app: Application,
        resolved: Option<ResolvedDownload>,
        path: PathBuf,
        follow_up: HostEvent,
        _dir: tempfile::TempDir,
    }

    /// Runs one download through a real bridge until its follow-up has been reported.
    async fn drive_to_completion(
        platform: RecordingPlatform,
        file: &str,
        install_method: InstallMethod,
    ) -> Driven {
        let base = serve_files().await;
        let dir = tempfile::TempDir::new().unwrap();
        let (bridge, mut events, _task) =
            HostBridge::spawn(Downloader::new(dir.path().to_path_buf()).unwrap(), platform);

        let app = Application {
            install_method,
            download_type: DownloadType::ExternalLink,
            external_link: Some(format!("{base}/files/{file}")),
            ..Application::named("Tool")
        };
        let resolved = resolve_download(&app, &base);
        let mut orch = orchestrator();
        orch.trigger(&bridge, &app, resolved.as_ref()).unwrap();

        let path = loop {
            let event = next_event(&mut events).await;
            orch.dispatch(&bridge, &event).unwrap();
            if let HostEvent::DownloadComplete { path, .. } = event {
                break path;
            }
        };
        let follow_up = next_event(&mut events).await;
        orch.dispatch(&bridge, &follow_up).unwrap();
        Driven {
            orch,
            app,
            resolved,
            path,
            follow_up,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn silent_download_runs_installer_through_bridge() {
        let platform = RecordingPlatform::default();
        let driven =
            drive_to_completion(platform.clone(), "tool-setup.exe", InstallMethod::Silent).await;

        assert!(matches!(driven.follow_up, HostEvent::InstallLaunched { .. }));
        assert_eq!(
            driven.orch.button(&driven.app, driven.resolved.as_ref()),
            ButtonState::disabled("installed/launched")
        );
        assert_eq!(
            platform.calls(),
            vec![Call::Install(driven.path, vec!["/S".into()])]
        );
    }

    #[tokio::test]
    async fn manual_download_reveals_and_shows_guide() {
        let platform = RecordingPlatform::default();
        let driven =
            drive_to_completion(platform.clone(), "tool-setup.exe", InstallMethod::Manual).await;

        match &driven.follow_up {
            HostEvent::InstallGuide { title, text } => {
                assert_eq!(title, "Installing Tool");
                assert!(text.contains("Start Tool"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            driven.orch.button(&driven.app, driven.resolved.as_ref()),
            ButtonState::disabled("folder opened")
        );
        assert_eq!(platform.calls(), vec![Call::Reveal(driven.path)]);
    }

    #[tokio::test]
    async fn install_launch_failure_keeps_download_and_allows_retry() {
        let platform = RecordingPlatform {
            fail_installs: true,
            ..RecordingPlatform::default()
        };
        let mut driven =
            drive_to_completion(platform.clone(), "tool-setup.exe", InstallMethod::Silent).await;

        assert!(matches!(driven.follow_up, HostEvent::InstallFailed { .. }));
        assert_eq!(
            driven.orch.button(&driven.app, driven.resolved.as_ref()),
            ButtonState::enabled("install failed, retry")
        );
        assert!(driven
            .orch
            .failure(&driven.app)
            .is_some_and(|reason| reason.contains("access denied")));
        assert!(driven.path.exists());
        assert_eq!(
            platform.calls(),
            vec![Call::Install(driven.path.clone(), vec!["/S".into()])]
        );

        driven
            .orch
            .request(&driven.app, driven.resolved.as_ref())
            .unwrap();
        assert_eq!(
            driven.orch.button(&driven.app, driven.resolved.as_ref()),
            ButtonState::disabled("starting…")
        );
    }

    #[tokio::test]
    async fn reserved_characters_in_filename_still_finish_install() {
        let driven = drive_to_completion(
            RecordingPlatform::default(),
            "tool%3Asetup.exe",
            InstallMethod::Silent,
        )
        .await;

        assert_eq!(driven.resolved.as_ref().unwrap().filename, "tool:setup.exe");
        assert_eq!(driven.path.file_name().unwrap(), "tool_setup.exe");
        match &driven.follow_up {
            HostEvent::InstallLaunched { filename, .. } => assert_eq!(filename, "tool:setup.exe"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            driven.orch.button(&driven.app, driven.resolved.as_ref()),
            ButtonState::disabled("installed/launched")
        );
    }
}
