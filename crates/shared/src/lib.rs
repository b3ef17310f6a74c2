#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! PlanSync Shared Types and Utilities
//!
//! This crate contains the plan, coupon and owner types plus the database
//! helpers shared by the PlanSync crates.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
