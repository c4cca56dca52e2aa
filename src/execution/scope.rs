// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Per-branch execution scope
//!
//! A `Scope` is the logging prefix and working directory of one logical line
//! of control. It is passed by value into every unit of work; a branch runs
//! with a derived child scope and the parent's scope is never mutated.

use std::path::{Path, PathBuf};

/// Separator between nested branch names in a logging prefix
pub const PREFIX_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    logging_prefix: Option<String>,
    pwd: PathBuf,
}

impl Scope {
    /// Root scope of an execution: no prefix, working directory = workspace
    pub fn root(workspace: impl Into<PathBuf>) -> Self {
        Self {
            logging_prefix: None,
            pwd: workspace.into(),
        }
    }

    pub fn logging_prefix(&self) -> Option<&str> {
        self.logging_prefix.as_deref()
    }

    pub fn pwd(&self) -> &Path {
        &self.pwd
    }

    /// Scope of the branch `name` running under this scope
    pub fn branch(&self, name: &str) -> Self {
        Self {
            logging_prefix: Some(compose_prefix(self.logging_prefix(), name)),
            pwd: self.pwd.clone(),
        }
    }

    /// Same prefix, different working directory.
    ///
    /// Relative paths are resolved against the current working directory.
    pub fn with_pwd(&self, path: impl AsRef<Path>) -> Self {
        Self {
            logging_prefix: self.logging_prefix.clone(),
            pwd: self.pwd.join(path),
        }
    }

    /// Prefix a log line with `[prefix] ` when this scope has a prefix
    pub fn decorate(&self, line: &str) -> String {
        match self.logging_prefix() {
            Some(prefix) if !prefix.is_empty() => format!("[{}] {}", prefix, line),
            _ => line.to_string(),
        }
    }
}

/// `parent|name` when a parent prefix exists, else `name`
pub fn compose_prefix(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) => format!("{}{}{}", parent, PREFIX_SEPARATOR, name),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_prefix() {
        assert_eq!(compose_prefix(Some("p"), "b"), "p|b");
        assert_eq!(compose_prefix(None, "b"), "b");
    }

    #[test]
    fn test_nested_branches() {
        let root = Scope::root("/ws");
        let inner = root.branch("deploy").branch("web");
        assert_eq!(inner.logging_prefix(), Some("deploy|web"));
        assert_eq!(inner.pwd(), Path::new("/ws"));
        assert_eq!(root.logging_prefix(), None);
    }

    #[test]
    fn test_with_pwd_keeps_prefix() {
        let scope = Scope::root("/ws").branch("a").with_pwd("sub");
        assert_eq!(scope.pwd(), Path::new("/ws/sub"));
        assert_eq!(scope.logging_prefix(), Some("a"));

        let absolute = scope.with_pwd("/tmp/x");
        assert_eq!(absolute.pwd(), Path::new("/tmp/x"));
    }

    #[test]
    fn test_decorate() {
        let root = Scope::root("/ws");
        assert_eq!(root.decorate("hello"), "hello");
        assert_eq!(root.branch("a").decorate("hello"), "[a] hello");
    }
}
