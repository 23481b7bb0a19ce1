use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacsError {
    #[error("could not start {executable}: {source}")]
    Spawn {
        executable: String,
        source: std::io::Error,
    },

    #[error("storage command exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// Sends DICOM files to an archive through the DCMTK `storescu` tool
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreScu {
    pub executable: PathBuf,
    pub host: String,
    pub port: u16,
    pub called_ae_title: String,
    pub verbose: bool,
}

impl Default for StoreScu {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("storescu"),
            host: "localhost".to_string(),
            port: 4242,
            called_ae_title: "Orthanc".to_string(),
            verbose: true,
        }
    }
}

impl StoreScu {
    /// Arguments for a recursive scan of `dir`
    pub fn args(&self, dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![self.host.clone().into(), self.port.to_string().into()];
        if self.verbose {
            args.push("-v".into());
        }
        args.extend(["-aec".into(), self.called_ae_title.clone().into()]);
        // +r recurse into the directory, +sd scan it for DICOM files
        args.extend(["+r".into(), "+sd".into(), dir.as_os_str().to_owned()]);
        args
    }

    pub fn command(&self, dir: &Path) -> Command {
        let mut command = Command::new(&self.executable);
        command.args(self.args(dir));
        command
    }

    /// Sends every DICOM file under `dir`, waiting for the transfer to finish
    pub fn send_directory(&self, dir: &Path) -> Result<(), PacsError> {
        log::info!(
            "sending {} to {}@{}:{}",
            dir.display(),
            self.called_ae_title,
            self.host,
            self.port
        );
        let output = self.command(dir).output().map_err(|source| PacsError::Spawn {
            executable: self.executable.display().to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            log::debug!("storescu: {line}");
        }

        if !output.status.success() {
            return Err(PacsError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_storescu_arguments() {
        let scu = StoreScu::default();
        let args = scu.args(Path::new("report/temp"));
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["localhost", "4242", "-v", "-aec", "Orthanc", "+r", "+sd", "report/temp"]
        );
    }

    #[test]
    fn quiet_mode_drops_verbose_flag() {
        let scu = StoreScu {
            verbose: false,
            host: "pacs.local".into(),
            port: 11112,
            ..StoreScu::default()
        };
        let command = scu.command(Path::new("out"));
        assert_eq!(command.get_program(), "storescu");
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, ["pacs.local", "11112", "-aec", "Orthanc", "+r", "+sd", "out"]);
    }

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let scu = StoreScu {
            executable: PathBuf::from("/nonexistent/bin/storescu"),
            ..StoreScu::default()
        };
        let err = scu.send_directory(Path::new(".")).unwrap_err();
        assert!(matches!(err, PacsError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/bin/storescu"));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_reported() {
        let scu = StoreScu {
            executable: PathBuf::from("false"),
            ..StoreScu::default()
        };
        assert!(matches!(
            scu.send_directory(Path::new(".")),
            Err(PacsError::Failed { .. })
        ));
    }
}
