use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Answers "has this file changed since this commit?".
///
/// Implementations must report failure instead of guessing: an unknown commit,
/// a path outside any repository, or a missing `git` binary are all errors.
pub trait GitChecker {
    /// Returns `true` when any commit after `commit`, up to `HEAD`, touched
    /// `file_path`.
    fn has_file_changed_since(&self, commit: &str, file_path: &Path) -> Result<bool, GitError>;
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("commit `{0}` is not a revision")]
    InvalidCommit(String),
    #[error("directory `{}` does not exist", .0.display())]
    MissingDirectory(PathBuf),
    #[error("failed to run git: {0}")]
    Spawn(#[source] io::Error),
    #[error("waiting for git failed: {0}")]
    Wait(#[source] io::Error),
    #[error("git timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
    #[error("git exited with {}: {stderr}", exit_label(.code))]
    Failed { code: Option<i32>, stderr: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

/// Shells out to the `git` CLI from the file's parent directory.
#[derive(Debug, Clone, Default)]
pub struct ExecGitChecker {
    timeout: Option<Duration>,
}

impl ExecGitChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kills `git` and reports [`GitError::TimedOut`] once `timeout` elapses.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl GitChecker for ExecGitChecker {
    fn has_file_changed_since(&self, commit: &str, file_path: &Path) -> Result<bool, GitError> {
        // git would parse a leading `-` as an option, e.g. `--output=<file>`.
        if commit.starts_with('-') {
            return Err(GitError::InvalidCommit(commit.to_string()));
        }
        let dir = file_path.parent().unwrap_or(file_path);
        if !dir.is_dir() {
            return Err(GitError::MissingDirectory(dir.to_path_buf()));
        }

        // `-n 1` keeps stdout to a single line so the pipe never fills while polling.
        let child = Command::new("git")
            .arg("log")
            .arg("-n")
            .arg("1")
            .arg("--format=%H")
            .arg("--end-of-options")
            .arg(format!("{commit}..HEAD"))
            .arg("--")
            .arg(file_path)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(GitError::Spawn)?;

        debug!(commit, path = %file_path.display(), "running git log");
        let (status, stdout, stderr) = wait_with_deadline(child, self.timeout)?;
        if !status.success() {
            return Err(GitError::Failed {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        let changed = !stdout.trim().is_empty();
        debug!(commit, path = %file_path.display(), changed, "git log finished");
        Ok(changed)
    }
}

fn wait_with_deadline(
    mut child: Child,
    timeout: Option<Duration>,
) -> Result<(ExitStatus, String, String), GitError> {
    let status = match timeout {
        None => child.wait().map_err(GitError::Wait)?,
        Some(limit) => {
            let started = Instant::now();
            loop {
                match child.try_wait().map_err(GitError::Wait)? {
                    Some(status) => break status,
                    None if started.elapsed() >= limit => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(GitError::TimedOut(limit));
                    }
                    None => thread::sleep(POLL_INTERVAL),
                }
            }
        }
    };

    let mut stdout = String::new();
    if let Some(mut pipe) = child.stdout.take() {
        pipe.read_to_string(&mut stdout).map_err(GitError::Wait)?;
    }
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        pipe.read_to_string(&mut stderr).map_err(GitError::Wait)?;
    }
    Ok((status, stdout, stderr))
}

#[cfg(test)]
mod tests {
    use super::{ExecGitChecker, GitChecker, GitError, wait_with_deadline};
    use std::fs;
    use std::path::Path;
    use std::process::Command;
    use std::time::Duration;

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    fn git(repo: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args([
                "-c",
                "user.name=trees",
                "-c",
                "user.email=trees@example.invalid",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .current_dir(repo)
            .output()
            .expect("git runs");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn commit_file(repo: &Path, name: &str, content: &str) -> String {
        fs::write(repo.join(name), content).expect("write file");
        git(repo, &["add", name]);
        git(repo, &["commit", "-q", "-m", name]);
        git(repo, &["rev-parse", "HEAD"])
    }

    #[test]
    fn unchanged_file_reports_no_change() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path();
        git(repo, &["init", "-q"]);
        let head = commit_file(repo, "auth.rs", "fn auth() {}\n");
        commit_file(repo, "other.rs", "fn other() {}\n");

        let changed = ExecGitChecker::new()
            .has_file_changed_since(&head, &repo.join("auth.rs"))
            .expect("check");
        assert!(!changed);
    }

    #[test]
    fn modified_file_reports_change() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path();
        git(repo, &["init", "-q"]);
        let first = commit_file(repo, "auth.rs", "fn auth() {}\n");
        commit_file(repo, "auth.rs", "fn auth() { check() }\n");

        let changed = ExecGitChecker::with_timeout(Duration::from_secs(30))
            .has_file_changed_since(&first, &repo.join("auth.rs"))
            .expect("check");
        assert!(changed);
    }

    #[test]
    fn unknown_commit_is_an_error() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path();
        git(repo, &["init", "-q"]);
        commit_file(repo, "auth.rs", "fn auth() {}\n");

        let err = ExecGitChecker::new()
            .has_file_changed_since("deadbeefdeadbeef", &repo.join("auth.rs"))
            .expect_err("unknown commit");
        assert!(matches!(err, GitError::Failed { .. }), "got {err:?}");
    }

    #[test]
    fn option_like_commit_is_rejected_without_side_effects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path();
        let file = repo.join("auth.rs");
        fs::write(&file, "fn auth() {}\n").expect("write");
        if git_available() {
            git(repo, &["init", "-q"]);
            git(repo, &["add", "auth.rs"]);
            git(repo, &["commit", "-q", "-m", "seed"]);
            fs::write(&file, "fn auth() { deny() }\n").expect("edit");
            git(repo, &["commit", "-q", "-am", "edit"]);
        }
        let leak = repo.join("leak");

        for commit in [
            format!("--output={}", leak.display()),
            "-p".to_string(),
            "--all".to_string(),
        ] {
            let err = ExecGitChecker::new()
                .has_file_changed_since(&commit, &file)
                .expect_err(&commit);
            assert!(matches!(err, GitError::InvalidCommit(_)), "got {err:?}");
        }
        let mut names = fs::read_dir(repo)
            .expect("read repo")
            .map(|entry| entry.expect("entry").file_name())
            .collect::<Vec<_>>();
        names.sort();
        assert!(
            names.iter().all(|name| !name.to_string_lossy().starts_with("leak")),
            "unexpected files: {names:?}"
        );
    }

    #[test]
    fn unreachable_ancestor_is_an_error() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path();
        git(repo, &["init", "-q"]);
        commit_file(repo, "auth.rs", "fn auth() {}\n");

        let err = ExecGitChecker::new()
            .has_file_changed_since("HEAD~5", &repo.join("auth.rs"))
            .expect_err("unreachable ancestor");
        assert!(matches!(err, GitError::Failed { .. }), "got {err:?}");
    }

    #[test]
    fn path_outside_repository_is_an_error() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let plain = dir.path().join("plain");
        fs::create_dir_all(&plain).expect("plain dir");
        fs::write(plain.join("notes.txt"), "x").expect("write");

        let result = ExecGitChecker::new().has_file_changed_since("HEAD", &plain.join("notes.txt"));
        assert!(result.is_err());
    }

    #[test]
    fn missing_directory_is_reported_before_spawning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("gone").join("auth.rs");

        let err = ExecGitChecker::new()
            .has_file_changed_since("abc123", &missing)
            .expect_err("missing dir");
        assert!(matches!(err, GitError::MissingDirectory(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn deadline_kills_a_hung_child() {
        let child = Command::new("sleep")
            .arg("5")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sleep");
        let started = std::time::Instant::now();

        let err = wait_with_deadline(child, Some(Duration::from_millis(50))).expect_err("timeout");
        assert!(matches!(err, GitError::TimedOut(_)), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn failed_error_message_includes_status_and_stderr() {
        let err = GitError::Failed {
            code: Some(128),
            stderr: "fatal: bad revision".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "git exited with status 128: fatal: bad revision"
        );
    }
}
