// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Git checkout
//!
//! Clones into an empty working directory or fetches into an existing clone.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CheckoutRequest, LogFn, ScmCheckout};

/// Source checkout backed by the `git` binary
#[derive(Debug, Clone)]
pub struct GitCheckout {
    git: PathBuf,
}

impl GitCheckout {
    /// Use the `git` found on `PATH`
    pub fn locate() -> anyhow::Result<Self> {
        let git = which::which("git").context("git not found in PATH")?;
        Ok(Self { git })
    }

    pub fn with_binary(git: impl Into<PathBuf>) -> Self {
        Self { git: git.into() }
    }

    pub fn binary(&self) -> &Path {
        &self.git
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> anyhow::Result<String> {
        debug!(dir = %dir.display(), ?args, "Running git");

        let output = Command::new(&self.git)
            .args(args)
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.git.display()))?;

        if !output.status.success() {
            anyhow::bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ScmCheckout for GitCheckout {
    async fn checkout(
        &self,
        request: &CheckoutRequest,
        pwd: &Path,
        log: &LogFn<'_>,
    ) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(pwd)
            .await
            .with_context(|| format!("failed to create {}", pwd.display()))?;

        if pwd.join(".git").exists() {
            log(&format!("Fetching changes from {}", request.url));
            self.git(pwd, &["fetch", "--tags", &request.url]).await?;
            let target = request.branch.as_deref().unwrap_or("FETCH_HEAD");
            self.git(pwd, &["checkout", "-f", target]).await?;
        } else {
            log(&format!("Cloning {} into {}", request.url, pwd.display()));
            let mut args = vec!["clone"];
            if let Some(branch) = request.branch.as_deref() {
                args.extend(["--branch", branch]);
            }
            args.extend([request.url.as_str(), "."]);
            self.git(pwd, &args).await?;
        }

        let head = self.git(pwd, &["rev-parse", "HEAD"]).await?;
        log(&format!("Checked out revision {}", head));

        if request.changelog {
            let changes = self.git(pwd, &["log", "-5", "--oneline"]).await?;
            for line in changes.lines() {
                log(line);
            }
        }

        debug!(url = %request.url, poll = request.poll, run = %request.run, "Checkout complete");
        Ok(())
    }
}
