//! `git` executable backend

use crate::backend::{Backend, BackendConfig, REMOTE_NAME};
use crate::user::User;
use chrono::{DateTime, FixedOffset};
use gitstore_core::{Error, Result};
use std::fs;
use std::process::Command;
use tracing::{debug, info};

/// `git log --date=iso` timestamp layout
const ISO_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Backend invoking `git -C <data dir> ...` per operation
#[derive(Debug, Clone)]
pub struct GitBinary {
    config: BackendConfig,
}

impl GitBinary {
    /// Backend for `config.data_dir`
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    /// Whether a `git` executable can be run
    pub fn available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        if let Some(key) = &self.config.ssh_key {
            cmd.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no",
                    key.display()
                ),
            );
        }
        cmd
    }

    /// Run a git subcommand inside the data directory
    fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = self.command();
        cmd.arg("-C").arg(&self.config.data_dir).args(args);
        exec(cmd, args)
    }

    fn remote_url(&self) -> Result<&str> {
        self.config.remote.as_deref().ok_or(Error::NoOnlineRemote)
    }

    fn remote_branch(&self) -> String {
        format!("{REMOTE_NAME}/{}", self.config.branch)
    }
}

fn exec(mut cmd: Command, args: &[&str]) -> Result<String> {
    debug!(target: "gitstore::backend", args = ?args, "git");
    let out = cmd.output()?;
    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    if out.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&out.stderr);
    Err(Error::backend(format!(
        "git {}: {}{}",
        args.join(" "),
        stderr.trim(),
        stdout.trim()
    )))
}

impl Backend for GitBinary {
    fn name(&self) -> &'static str {
        "git"
    }

    fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.config.data_dir)?;
        self.run(&["init"])?;
        let head = format!("refs/heads/{}", self.config.branch);
        self.run(&["symbolic-ref", "HEAD", &head])?;
        info!(target: "gitstore::backend", path = ?self.config.data_dir, "Repository initialized");
        Ok(())
    }

    fn clone_remote(&self) -> Result<()> {
        let remote = self.remote_url()?;
        let dir = self.config.data_dir.to_string_lossy().into_owned();
        let args: [&str; 9] = [
            "clone",
            "--depth",
            "10",
            "--origin",
            REMOTE_NAME,
            "--branch",
            &self.config.branch,
            remote,
            &dir,
        ];
        let mut cmd = self.command();
        cmd.args(args);
        exec(cmd, &args)?;
        info!(target: "gitstore::backend", remote = %remote, "Repository cloned");
        Ok(())
    }

    fn add_remote(&self) -> Result<()> {
        let remote = self.remote_url()?;
        match self.run(&["remote", "add", REMOTE_NAME, remote]) {
            Ok(_) => Ok(()),
            Err(Error::Backend(msg)) if msg.contains("already exists") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn pull(&self) -> Result<()> {
        self.run(&["pull", "--no-rebase", REMOTE_NAME, &self.config.branch])?;
        Ok(())
    }

    fn push(&self) -> Result<()> {
        let refspec = format!("HEAD:{}", self.config.branch);
        self.run(&["push", REMOTE_NAME, &refspec])?;
        Ok(())
    }

    fn commit(&self, path: &str, message: &str, user: &User) -> Result<()> {
        let name = format!("user.name={}", user.name);
        let email = format!("user.email={}", user.email);
        self.run(&["add", "-A", "--", path])?;
        match self.run(&["-c", &name, "-c", &email, "commit", "-m", message]) {
            Ok(_) => {
                debug!(target: "gitstore::backend", path = %path, "Committed");
                Ok(())
            }
            Err(Error::Backend(msg)) if msg.contains("nothing to commit") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn undo(&self) -> Result<()> {
        match self.run(&["checkout", "--", "."]) {
            Ok(_) => {}
            // Nothing tracked yet
            Err(Error::Backend(msg)) if msg.contains("did not match") => {}
            Err(e) => return Err(e),
        }
        self.run(&["clean", "-fd"])?;
        info!(target: "gitstore::backend", "Uncommitted changes reverted");
        Ok(())
    }

    fn changed_files(&self) -> Result<Vec<String>> {
        self.remote_url()?;
        self.run(&["fetch", REMOTE_NAME, &self.config.branch])?;
        let range = format!("..{}", self.remote_branch());
        let out = self.run(&["diff", "--name-only", &range])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| l.ends_with(".json"))
            .map(str::to_string)
            .collect())
    }

    fn last_commit_time(&self) -> Result<DateTime<FixedOffset>> {
        let remotes = format!("--remotes={REMOTE_NAME}");
        let out = self.run(&["log", "-1", &remotes, "--format=%cd", "--date=iso"])?;
        parse_commit_time(&out)
    }

    fn is_repository(&self) -> bool {
        self.config.data_dir.join(".git").exists()
    }

    fn has_remote(&self) -> bool {
        self.run(&["remote"])
            .map(|out| out.lines().any(|l| l.trim() == REMOTE_NAME))
            .unwrap_or(false)
    }
}

/// Parse the first line of `git log --date=iso` output
pub fn parse_commit_time(out: &str) -> Result<DateTime<FixedOffset>> {
    let line = out.lines().next().unwrap_or_default().trim();
    if line.is_empty() {
        return Err(Error::backend("no commits found"));
    }
    let stamp = line.get(..25).unwrap_or(line);
    DateTime::parse_from_str(stamp, ISO_DATE_FORMAT)
        .map_err(|e| Error::backend(format!("bad commit time {stamp:?}: {e}")))
}
