//! CLI command implementations.

pub mod probe;
pub mod rls;
pub mod version;
