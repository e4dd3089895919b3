//! Deployable artifact sources
//!
//! The three function packages are opaque zip files and the app is a built
//! static directory. They come either from a local directory or from a
//! shallow clone of each component's repository.

use crate::error::{DeployError, Result};
use crate::naming::Component;
use async_trait::async_trait;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Where packages and static assets are fetched from
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Path of the component's artifact: a zip file for functions, a
    /// directory for the app
    async fn fetch(&self, component: Component) -> Result<PathBuf>;
}

/// Pre-built artifacts in one directory:
/// `{api,gateway,log-summary}.zip` and `app/`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactSource for DirectorySource {
    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }

    async fn fetch(&self, component: Component) -> Result<PathBuf> {
        let path = match component {
            Component::App => self.root.join("app"),
            other => self.root.join(format!("{}.zip", other.as_str())),
        };
        check_artifact(component, &path)?;
        Ok(path)
    }
}

/// Shallow clones of `{repo_base}/airbrx-{component}.git` at one branch
pub struct GitSource {
    repo_base: String,
    branch: String,
    token: String,
    work_dir: PathBuf,
}

impl GitSource {
    pub fn new(
        repo_base: impl Into<String>,
        branch: impl Into<String>,
        token: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repo_base: repo_base.into(),
            branch: branch.into(),
            token: token.into(),
            work_dir: work_dir.into(),
        }
    }

    fn clone_url(&self, component: Component) -> String {
        format!(
            "{}/{}.git",
            self.repo_base.trim_end_matches('/'),
            component.repository()
        )
    }

    /// Git configuration carrying the token as an HTTP header. Passed through
    /// `GIT_CONFIG_*` so it stays out of argv and out of the checkout's
    /// `.git/config`.
    fn auth_env(&self) -> Vec<(String, String)> {
        if self.token.is_empty() || !self.repo_base.starts_with("https://") {
            return Vec::new();
        }
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("x-access-token:{}", self.token));
        vec![
            ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
            ("GIT_CONFIG_KEY_0".to_string(), "http.extraHeader".to_string()),
            (
                "GIT_CONFIG_VALUE_0".to_string(),
                format!("Authorization: Basic {}", credentials),
            ),
        ]
    }

    fn redact(&self, text: &str) -> String {
        if self.token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.token, "***")
        }
    }

    async fn run_git(&self, args: &[&str]) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.envs(self.auth_env());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: git {}", self.redact(&args.join(" ")));

        let output = cmd.output().await.map_err(|e| {
            DeployError::Source(format!("could not run git: {}", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployError::Source(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                self.redact(stderr.trim())
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactSource for GitSource {
    fn describe(&self) -> String {
        format!("{} (branch {})", self.repo_base, self.branch)
    }

    async fn fetch(&self, component: Component) -> Result<PathBuf> {
        let checkout = self.work_dir.join(component.repository());
        if checkout.exists() {
            tokio::fs::remove_dir_all(&checkout).await?;
        }
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let url = self.clone_url(component);
        let target = checkout.to_string_lossy().to_string();
        tracing::info!("Cloning {} ({})", component.repository(), self.branch);
        self.run_git(&[
            "clone",
            "--depth",
            "1",
            "--branch",
            &self.branch,
            &url,
            &target,
        ])
        .await?;

        let path = match component {
            Component::App => checkout.join("dist"),
            _ => checkout.join("dist").join("lambda.zip"),
        };
        check_artifact(component, &path)?;
        Ok(path)
    }
}

fn check_artifact(component: Component, path: &Path) -> Result<()> {
    let ok = match component {
        Component::App => path.is_dir(),
        _ => path.is_file(),
    };
    if ok {
        Ok(())
    } else {
        Err(DeployError::Source(format!(
            "{} artifact not found at {}",
            component,
            path.display()
        )))
    }
}
