// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Mail task
//!
//! Validates and builds a message, then hands it to the mail capability.
//! Once handed off there is nothing to cancel.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{Task, TaskKind};
use crate::capabilities::{MailMessage, Mailer};
use crate::errors::TaskError;
use crate::execution::Scope;

const DEFAULT_CHARSET: &str = "UTF-8";
const DEFAULT_MIME_TYPE: &str = "text/plain";

/// Mail parameters. Recipient fields are comma or whitespace separated lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MailSpec {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub cc: Option<String>,
    #[serde(default)]
    pub bcc: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl MailSpec {
    /// Build the message, rejecting incomplete specs
    pub fn build(&self) -> Result<MailMessage, TaskError> {
        let subject = non_blank(&self.subject);
        let body = non_blank(&self.body);
        let (Some(subject), Some(body)) = (subject, body) else {
            return Err(TaskError::execution(
                TaskKind::Mail.as_str(),
                "Email not sent. All mandatory properties must be supplied ('subject', 'body').",
            ));
        };

        let message = MailMessage {
            from: non_blank(&self.from).map(str::to_string),
            reply_to: non_blank(&self.reply_to).map(str::to_string),
            to: parse_addresses(self.to.as_deref()),
            cc: parse_addresses(self.cc.as_deref()),
            bcc: parse_addresses(self.bcc.as_deref()),
            subject: subject.to_string(),
            body: body.to_string(),
            charset: non_blank(&self.charset).unwrap_or(DEFAULT_CHARSET).to_string(),
            mime_type: non_blank(&self.mime_type)
                .unwrap_or(DEFAULT_MIME_TYPE)
                .to_string(),
        };

        if message.recipient_count() == 0 {
            return Err(TaskError::execution(
                TaskKind::Mail.as_str(),
                "Email not sent. No recipients of any kind specified ('to', 'cc', 'bcc').",
            ));
        }

        Ok(message)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Split a comma or whitespace separated address list
pub fn parse_addresses(list: Option<&str>) -> Vec<String> {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    let separator = SEPARATOR.get_or_init(|| Regex::new(r"[,\s]+").expect("valid regex"));

    match list {
        Some(list) => separator
            .split(list)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

pub struct MailTask {
    mailer: Arc<dyn Mailer>,
    spec: MailSpec,
}

impl MailTask {
    pub fn new(mailer: Arc<dyn Mailer>, spec: MailSpec) -> Self {
        Self { mailer, spec }
    }
}

#[async_trait]
impl Task for MailTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Mail
    }

    async fn start(&self, _scope: &Scope) -> Result<Value, TaskError> {
        let message = self.spec.build()?;
        self.mailer.send(&message).await?;
        info!(subject = %message.subject, recipients = message.recipient_count(), "Mail sent");
        Ok(Value::Null)
    }

    async fn stop(&self) -> Result<(), TaskError> {
        Ok(())
    }
}
