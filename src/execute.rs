use std::{
    path::{Path, PathBuf},
    process::Command,
    thread,
};

use log::debug;

use crate::error::{Error, Result};

/// OS side effects the host bridge performs on behalf of the view.
pub trait Platform: Send + Sync + 'static {
    /// Starts the installer detached; success means the process launched, nothing more.
    fn spawn_installer(&self, path: &Path, flags: &[String]) -> Result<()>;

    /// Shows `path` selected in the native file manager.
    fn reveal(&self, path: &Path) -> Result<()>;

    fn open_url(&self, url: &str) -> Result<()>;
}

/// Quoted command line as it is logged, e.g. `"C:\Users\me\Downloads\a b.exe" /S`.
pub fn install_command_line(path: &Path, flags: &[String]) -> String {
    let mut line = format!("\"{}\"", path.display());
    for flag in flags {
        line.push(' ');
        line.push_str(flag);
    }
    line
}

#[derive(Debug, Clone, Default)]
pub struct SystemPlatform {
    run_as_admin: bool,
}

impl SystemPlatform {
    pub fn new(run_as_admin: bool) -> Self {
        Self { run_as_admin }
    }
}

impl Platform for SystemPlatform {
    fn spawn_installer(&self, path: &Path, flags: &[String]) -> Result<()> {
        if !path.is_file() {
            return Err(launch_error(path, "installer file does not exist"));
        }
        debug!("launching {}", install_command_line(path, flags));
        launch_installer(path, flags, self.run_as_admin)
    }

    fn reveal(&self, path: &Path) -> Result<()> {
        reveal_in_file_manager(path)
    }

    fn open_url(&self, url: &str) -> Result<()> {
        open::that(url).map_err(Error::from)
    }
}

fn launch_error(path: &Path, reason: impl ToString) -> Error {
    Error::InstallLaunch {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(windows)]
fn launch_installer(path: &Path, flags: &[String], run_as_admin: bool) -> Result<()> {
    use std::ffi::{OsStr, OsString};

    let arguments = OsString::from(flags.join(" "));
    let working_directory = path.parent().map(|dir| dir.as_os_str().to_os_string());
    let verb = if run_as_admin {
        Some(OsStr::new("runas"))
    } else {
        None
    };

    shell::shell_execute(
        path.as_os_str(),
        Some(arguments.as_os_str()).filter(|value| !value.is_empty()),
        working_directory.as_deref(),
        verb,
    )
    .map_err(|reason| launch_error(path, reason))
}

#[cfg(not(windows))]
fn launch_installer(path: &Path, flags: &[String], _run_as_admin: bool) -> Result<()> {
    let mut command = Command::new(path);
    command.args(flags);
    if let Some(dir) = path.parent() {
        command.current_dir(dir);
    }
    let mut child = command.spawn().map_err(|err| launch_error(path, err))?;
    // reap in the background; exit status is not reported
    thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(())
}

fn reveal_in_file_manager(path: &Path) -> Result<()> {
    let mut command = reveal_command(path);
    let mut child = command.spawn()?;
    thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(())
}

fn reveal_command(path: &Path) -> Command {
    if cfg!(target_os = "windows") {
        let mut command = Command::new("explorer");
        command.arg("/select,").arg(path);
        command
    } else if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg("-R").arg(path);
        command
    } else {
        let target: PathBuf = if path.is_dir() {
            path.to_path_buf()
        } else {
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| path.to_path_buf())
        };
        let mut command = Command::new("xdg-open");
        command.arg(target);
        command
    }
}

#[cfg(windows)]
mod shell {
    use std::{ffi::OsStr, os::windows::ffi::OsStrExt, ptr};

    use windows::{
        core::PCWSTR,
        Win32::{Foundation::HWND, UI::Shell::ShellExecuteW, UI::WindowsAndMessaging::SW_SHOWNORMAL},
    };

    fn os_str_to_wide(value: &OsStr) -> Vec<u16> {
        value.encode_wide().chain(Some(0)).collect()
    }

    pub(super) fn shell_execute(
        target: &OsStr,
        arguments: Option<&OsStr>,
        working_directory: Option<&OsStr>,
        verb: Option<&OsStr>,
    ) -> Result<(), String> {
        let file_buffer = os_str_to_wide(target);
        let arg_buffer = arguments.map(os_str_to_wide);
        let dir_buffer = working_directory.map(os_str_to_wide);
        let verb_buffer = verb.map(os_str_to_wide);

        let as_pcwstr = |buffer: &Option<Vec<u16>>| {
            buffer
                .as_ref()
                .map(|value| PCWSTR(value.as_ptr()))
                .unwrap_or(PCWSTR::null())
        };

        let result = unsafe {
            ShellExecuteW(
                HWND(ptr::null_mut()),
                as_pcwstr(&verb_buffer),
                PCWSTR(file_buffer.as_ptr()),
                as_pcwstr(&arg_buffer),
                as_pcwstr(&dir_buffer),
                SW_SHOWNORMAL,
            )
        };

        // values <= 32 are error codes
        if result.0 as isize <= 32 {
            Err(format!("ShellExecute error code {}", result.0 as isize))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_quotes_paths_with_spaces() {
        let path = Path::new("/home/me/My Downloads/setup tool.exe");
        let flags = vec!["/S".to_string()];
        assert_eq!(
            install_command_line(path, &flags),
            "\"/home/me/My Downloads/setup tool.exe\" /S"
        );
        assert_eq!(
            install_command_line(path, &["/qn".into(), "/norestart".into()]),
            "\"/home/me/My Downloads/setup tool.exe\" /qn /norestart"
        );
    }

    #[test]
    fn missing_installer_is_a_launch_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = SystemPlatform::default()
            .spawn_installer(&dir.path().join("absent.exe"), &["/S".to_string()]);
        assert!(matches!(result, Err(Error::InstallLaunch { .. })));
    }
}
