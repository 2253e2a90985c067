//! `orgscope version` command - Display version information.

use orgscope_core::ORG_SESSION_VARIABLE;

use crate::error::CliResult;
use crate::output::{self, kv};

/// Package version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
const NAME: &str = env!("CARGO_PKG_NAME");

/// Run the version command
pub async fn run() -> CliResult<()> {
    output::header("orgscope");

    kv("Version", VERSION);
    kv("Binary", NAME);

    #[cfg(debug_assertions)]
    let build_mode = "debug";
    #[cfg(not(debug_assertions))]
    let build_mode = "release";

    kv("Build", build_mode);

    let mut features = Vec::new();

    #[cfg(feature = "postgres")]
    features.push("postgres");

    if features.is_empty() {
        features.push("none");
    }

    kv("Features", &features.join(", "));
    kv("Session variable", ORG_SESSION_VARIABLE);

    Ok(())
}
