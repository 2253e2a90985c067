//! orgscope CLI - row-level security DDL and live isolation probes.
//!
//! `orgscope rls setup|up|down` prints the fail-closed policy DDL for a set
//! of tenant-owned tables. `orgscope probe` creates a scratch table on a live
//! server and proves that tenants cannot see each other's rows through a
//! reused pooled connection.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
