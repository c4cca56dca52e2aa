// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Terminal color utilities
//!
//! Build-log coloring (256-color escapes, as rendered by an xterm color map)
//! and the styles used by the CLI around it.

use colored::Colorize;

/// Color map the build log is rendered with; exported to tasks as `TERM`
pub const COLOR_MAP_NAME: &str = "xterm";

/// 256-color index used for error lines
pub const ERROR_COLOR: u8 = 196;

/// Wrap `message` in a 256-color foreground escape
pub fn color_line(color: u8, message: &str) -> String {
    format!("\x1b[38;5;{}m{}\x1b[m", color, message)
}

/// Build-log line in the error color
pub fn error_line(message: &str) -> String {
    color_line(ERROR_COLOR, message)
}

/// Style for success messages
pub fn success(msg: &str) -> colored::ColoredString {
    msg.green()
}

/// Style for error messages
pub fn error(msg: &str) -> colored::ColoredString {
    msg.red()
}

/// Style for dimmed/secondary text
pub fn dimmed(msg: &str) -> colored::ColoredString {
    msg.dimmed()
}

/// Style for code/commands
pub fn code(msg: &str) -> colored::ColoredString {
    msg.cyan()
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.len().max(40)));
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}

pub fn print_info(msg: &str) {
    println!("  {} {}", "→".blue(), msg);
}
