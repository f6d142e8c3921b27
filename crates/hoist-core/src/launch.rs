use crate::CoreError;
use serde::Serialize;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use tracing::info;

/// Environment variable carrying the joined classpath.
pub const CLASSPATH_ENV: &str = "HOIST_CLASSPATH";
/// Environment variable carrying the joined native library directories.
pub const NATIVE_PATH_ENV: &str = "HOIST_NATIVE_PATH";

/// Everything needed to start the installed application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Code resources in descriptor order, pointing into the code cache
    /// when it is enabled.
    pub classpath: Vec<PathBuf>,
    pub native_dirs: Vec<PathBuf>,
}

impl LaunchPlan {
    pub fn joined_classpath(&self) -> Result<OsString, CoreError> {
        std::env::join_paths(&self.classpath).map_err(|e| CoreError::Launch(e.to_string()))
    }

    pub fn joined_native_dirs(&self) -> Result<OsString, CoreError> {
        std::env::join_paths(&self.native_dirs).map_err(|e| CoreError::Launch(e.to_string()))
    }
}

/// Starts the application described by a [`LaunchPlan`].
pub trait Launcher {
    fn launch(&self, plan: &LaunchPlan) -> Result<(), CoreError>;
}

/// Runs the plan's program as a child process and waits for it.
pub struct CommandLauncher;

impl Launcher for CommandLauncher {
    fn launch(&self, plan: &LaunchPlan) -> Result<(), CoreError> {
        if plan.program.is_empty() {
            return Err(CoreError::Launch("no launch program configured".to_owned()));
        }
        info!("launching {} {:?}", plan.program, plan.args);
        let status = Command::new(&plan.program)
            .args(&plan.args)
            .current_dir(&plan.working_dir)
            .env(CLASSPATH_ENV, plan.joined_classpath()?)
            .env(NATIVE_PATH_ENV, plan.joined_native_dirs()?)
            .status()
            .map_err(|e| CoreError::Launch(format!("{}: {e}", plan.program)))?;
        if status.success() {
            Ok(())
        } else {
            Err(CoreError::Launch(format!("{} exited with {status}", plan.program)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_with_platform_separator() {
        let plan = LaunchPlan {
            classpath: vec![PathBuf::from("/a/x.jar"), PathBuf::from("/b/y.jar")],
            ..LaunchPlan::default()
        };
        let joined = plan.joined_classpath().unwrap();
        let parts: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(parts, plan.classpath);
    }

    #[test]
    fn empty_program_is_rejected() {
        let err = CommandLauncher.launch(&LaunchPlan::default()).unwrap_err();
        assert!(matches!(err, CoreError::Launch(_)));
    }

    #[cfg(unix)]
    #[test]
    fn command_launcher_passes_classpath() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cp.txt");
        let plan = LaunchPlan {
            program: "sh".to_owned(),
            args: vec![
                "-c".to_owned(),
                format!("printf %s \"${CLASSPATH_ENV}\" > {}", out.display()),
            ],
            working_dir: dir.path().to_path_buf(),
            classpath: vec![PathBuf::from("/x/app.jar")],
            native_dirs: Vec::new(),
        };
        CommandLauncher.launch(&plan).unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "/x/app.jar");
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_is_launch_error() {
        let plan = LaunchPlan {
            program: "false".to_owned(),
            working_dir: std::env::temp_dir(),
            ..LaunchPlan::default()
        };
        assert!(matches!(
            CommandLauncher.launch(&plan),
            Err(CoreError::Launch(msg)) if msg.contains("exited")
        ));
    }
}
