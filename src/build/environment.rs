// src/build/environment.rs

//! Per-package build environments
//!
//! Each build gets an isolated working tree (source root plus artifact
//! output directory) and an environment-variable overlay applied to every
//! subprocess the build runs. The environment is exclusively owned by the
//! orchestrator invocation that created it and removed afterwards unless
//! the run asked to keep build trees for debugging.

use crate::context::WorkContext;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

/// An isolated working tree for building one package
pub struct BuildEnvironment {
    root: PathBuf,
    source_root: PathBuf,
    /// The unpacked source tree; starts equal to `source_root` and is
    /// narrowed once the archive's top-level directory is known
    source_dir: PathBuf,
    dist_dir: PathBuf,
    extra_environ: BTreeMap<String, String>,
    keep: bool,
}

impl BuildEnvironment {
    /// Create a fresh environment under the context work directory.
    /// A stale tree from an earlier interrupted run is removed first.
    pub fn new(ctx: &WorkContext, directory_name: &str) -> Result<Self> {
        let root = ctx.package_work_dir(directory_name);
        if root.exists() {
            debug!("removing stale build tree {}", root.display());
            fs::remove_dir_all(&root)?;
        }
        let source_root = root.join("source");
        let dist_dir = root.join("dist");
        fs::create_dir_all(&source_root)?;
        fs::create_dir_all(&dist_dir)?;

        Ok(Self {
            root,
            source_dir: source_root.clone(),
            source_root,
            dist_dir,
            extra_environ: BTreeMap::new(),
            keep: ctx.keep_build_dirs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn set_source_dir(&mut self, dir: PathBuf) {
        self.source_dir = dir;
    }

    /// Where builders drop produced artifacts
    pub fn dist_dir(&self) -> &Path {
        &self.dist_dir
    }

    pub fn extra_environ(&self) -> &BTreeMap<String, String> {
        &self.extra_environ
    }

    pub fn extra_environ_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.extra_environ
    }

    pub fn insert_environ(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.extra_environ.insert(key.into(), value.into());
    }

    /// A `sh -c` command rooted in the source directory with the
    /// environment overlay applied
    pub fn shell_command(&self, script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd.current_dir(&self.source_dir);
        cmd.envs(self.extra_environ.iter());
        cmd
    }

    /// Run a command, appending its output to the package build log.
    ///
    /// When a deadline is given the subprocess is killed once it expires
    /// and the overrun is reported as a build failure.
    pub fn run_logged(
        &self,
        mut cmd: Command,
        package: &str,
        phase: &str,
        log_path: &Path,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let log_err = log.try_clone()?;

        debug!("{}: running {} step: {:?}", package, phase, cmd);
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| Error::BuildFailed {
                package: package.to_string(),
                phase: phase.to_string(),
                reason: format!("failed to start subprocess: {e}"),
            })?;

        let status = match timeout {
            Some(deadline) => match child.wait_timeout(deadline)? {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::BuildFailed {
                        package: package.to_string(),
                        phase: phase.to_string(),
                        reason: format!("deadline of {}s exceeded", deadline.as_secs()),
                    });
                }
            },
            None => child.wait()?,
        };

        if !status.success() {
            return Err(Error::BuildFailed {
                package: package.to_string(),
                phase: phase.to_string(),
                reason: format!("subprocess exited with {status}, log in {}", log_path.display()),
            });
        }
        Ok(())
    }

    /// Remove the working tree, unless the run keeps build dirs
    pub fn cleanup(self) -> Result<()> {
        if self.keep {
            debug!("keeping build tree {}", self.root.display());
            return Ok(());
        }
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;

    #[test]
    fn test_environment_layout_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let env = BuildEnvironment::new(&ctx, "frob-1.0").unwrap();
        assert!(env.source_root().is_dir());
        assert!(env.dist_dir().is_dir());
        let root = env.root().to_path_buf();
        env.cleanup().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_environ_overlay_reaches_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let mut env = BuildEnvironment::new(&ctx, "frob-1.0").unwrap();
        env.insert_environ("FROB_FLAG", "enabled");

        let marker = env.dist_dir().join("flag.txt");
        let script = format!("printf '%s' \"$FROB_FLAG\" > {}", marker.display());
        let cmd = env.shell_command(&script);
        let log = dir.path().join("build.log");
        env.run_logged(cmd, "frob", "test", &log, None).unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap(), "enabled");
    }

    #[test]
    fn test_failing_subprocess_is_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let env = BuildEnvironment::new(&ctx, "frob-1.0").unwrap();
        let cmd = env.shell_command("exit 3");
        let log = dir.path().join("build.log");
        let err = env.run_logged(cmd, "frob", "test", &log, None).unwrap_err();
        assert!(matches!(err, Error::BuildFailed { .. }));
    }

    #[test]
    fn test_deadline_kills_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let env = BuildEnvironment::new(&ctx, "frob-1.0").unwrap();
        let cmd = env.shell_command("sleep 30");
        let log = dir.path().join("build.log");
        let err = env
            .run_logged(cmd, "frob", "test", &log, Some(Duration::from_millis(200)))
            .unwrap_err();
        match err {
            Error::BuildFailed { reason, .. } => assert!(reason.contains("deadline")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
