//! Copying files to and from storage hosts.

use crate::prelude::*;
use crate::process::{CommandLine, ProcessRunner, SystemRunner};

/// Abstract interface for remote file copies.
pub trait ScpPort {
    /// Copy `source` to `target`, where exactly one of them is a remote
    /// reference of the form `host:/absolute/path`. When `user` is given,
    /// the remote side becomes `user@host:/absolute/path`. When `mkdir` is
    /// set, the parent directory of `target` is created first.
    fn scp(&self, source: &str, target: &str, user: Option<&str>, mkdir: bool) -> Result<()>;
}

/// Is `path` a remote reference like `host:/path`?
pub fn is_remote(path: &str) -> bool {
    path.contains(':')
}

/// Split a remote reference into host and path.
fn split_remote(path: &str) -> Result<(&str, &str)> {
    let idx = path
        .find(':')
        .ok_or_else(|| format_err!("not a remote path: {:?}", path))?;
    Ok((&path[..idx], &path[idx + 1..]))
}

/// Prefix the host of a remote reference with `user@`.
fn with_user(path: &str, user: Option<&str>) -> String {
    match user {
        Some(user) if is_remote(path) && !path.contains('@') => format!("{}@{}", user, path),
        _ => path.to_owned(),
    }
}

/// Copies files using the `scp` and `ssh` commands.
#[derive(Clone, Debug, Default)]
pub struct SystemScp<R = SystemRunner> {
    runner: R,
}

impl<R: ProcessRunner> SystemScp<R> {
    /// Create an SCP port running commands using `runner`.
    pub fn new(runner: R) -> SystemScp<R> {
        SystemScp { runner }
    }
}

impl<R: ProcessRunner> ScpPort for SystemScp<R> {
    #[instrument(level = "debug", skip(self))]
    fn scp(&self, source: &str, target: &str, user: Option<&str>, mkdir: bool) -> Result<()> {
        if is_remote(source) == is_remote(target) {
            return Err(format_err!(
                "exactly one of {:?} and {:?} must be a remote path",
                source,
                target,
            ));
        }
        if target.ends_with('/') {
            return Err(format_err!(
                "target {:?} must be a file path, not a directory",
                target
            ));
        }
        let source = with_user(source, user);
        let target = with_user(target, user);

        if mkdir {
            if is_remote(&target) {
                let (host, path) = split_remote(&target)?;
                if let Some(parent) = Path::new(path).parent() {
                    let parent = parent.display().to_string();
                    let cmd = CommandLine::new("ssh", vec![host, "mkdir", "-p", parent.as_str()]);
                    self.runner.run_checked(&cmd)?;
                }
            } else if let Some(parent) = Path::new(&target).parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("could not create {}", parent.display()))?;
            }
        }

        info!("scp {} {}", source, target);
        let cmd = CommandLine::new("scp", vec![source.as_str(), target.as_str()]);
        self.runner.run_checked(&cmd)?;
        Ok(())
    }
}
