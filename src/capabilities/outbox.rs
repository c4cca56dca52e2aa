// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Outbox mailer
//!
//! Delivers mail by writing each message as an `.eml` file into a directory,
//! for a relay or a human to pick up.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{MailMessage, Mailer};

#[derive(Debug, Clone)]
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create outbox {}", self.dir.display()))?;

        let path = self.dir.join(format!("{}.eml", Uuid::new_v4()));
        tokio::fs::write(&path, message.render())
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!(
            path = %path.display(),
            recipients = message.recipient_count(),
            "Mail queued in outbox"
        );
        Ok(())
    }
}
