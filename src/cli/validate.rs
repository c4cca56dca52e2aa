// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Validate command - check a deployment plan

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::plan::{Plan, PlanValidator, Step};

/// Run the validate command
pub fn run(plan_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating plan...".bold());
    println!();

    if !plan_path.exists() {
        return Err(miette::miette!(
            "Plan file not found: {}\n\n\
             Create a .deployflow.yaml or pass the plan path explicitly.",
            plan_path.display()
        ));
    }

    let plan = match Plan::from_file(&plan_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("  {} Failed to parse plan", "✗".red());
            eprintln!();
            return Err(miette::miette!("Parse error: {}", e));
        }
    };

    println!("  {} Plan file is valid YAML", "✓".green());

    let validation = PlanValidator::validate(&plan);

    if !validation.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Plan summary".bold());
        println!("  Name: {}", plan.name);
        println!("  Jobs: {}", plan.jobs.len());
        println!("  Steps: {}", plan.step_count());
        for step in &plan.steps {
            println!("    - {}{}", step.type_name(), describe(step).dimmed());
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Plan validation failed"));
    }

    if validation.has_warnings() {
        println!("{}", "Plan is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Plan is valid!".green().bold());
    }
    Ok(())
}

fn describe(step: &Step) -> String {
    match step {
        Step::Parallel { branches } => {
            let names: Vec<_> = branches.iter().map(|b| b.name.as_str()).collect();
            format!(" [branches: {}]", names.join(", "))
        }
        Step::Trigger(trigger) => format!(" [job: {}]", trigger.job),
        Step::Checkout(checkout) => format!(" [{}]", checkout.url),
        Step::Dir { path, .. } => format!(" [{}]", path.display()),
        _ => String::new(),
    }
}
