// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Deployment plans
//!
//! A plan is the YAML description of one deployment: a local job catalog and
//! a tree of steps that the runner maps onto tasks.

mod definition;
mod runner;
mod validation;

pub use definition::*;
pub use runner::{expand, plan_body, run_steps};
pub use validation::{PlanValidator, ValidationResult};
