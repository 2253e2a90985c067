//! Styled terminal output utilities.
//!
//! Status lines go to stderr so generated DDL on stdout can be piped.

use owo_colors::OwoColorize;

/// Print a header/title
pub fn header(text: &str) {
    eprintln!();
    eprintln!("{}", text.bold().cyan());
    eprintln!("{}", "─".repeat(text.chars().count()).dimmed());
    eprintln!();
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    eprintln!("  {}: {}", key.dimmed(), value);
}

/// Print a success message
pub fn success(text: &str) {
    eprintln!("{} {}", "✔".green().bold(), text.green());
}

/// Print a warning message
pub fn warn(text: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), text.yellow());
}

/// Print an error message
pub fn error(text: &str) {
    eprintln!("{} {}", "✖".red().bold(), text.red());
}

/// Print a newline
pub fn newline() {
    eprintln!();
}

/// Print text to stdout unstyled
pub fn raw(text: &str) {
    print!("{text}");
    if !text.ends_with('\n') {
        println!();
    }
}
