//! Environment variable interpolation for config files.
//!
//! - `$VAR` / `${VAR}`: value of VAR; an error if unset
//! - `${VAR:-default}`: default when VAR is unset or empty
//! - `${VAR-default}`: default only when VAR is unset
//! - `$$`: a literal `$`

use std::env;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static VAR_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?:(?P<op>:?-)(?P<default>[^}]*))?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("variable reference pattern is valid")
});

/// Interpolated text plus every problem found along the way.
#[derive(Debug)]
pub struct InterpolationResult {
    pub text: String,
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Substitute environment variables into `input`.
///
/// Unresolvable references are left in place and reported, so a single pass
/// lists every missing variable.
pub fn interpolate(input: &str) -> InterpolationResult {
    interpolate_with(input, |name| env::var(name).ok())
}

fn interpolate_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = VAR_REFERENCE
        .replace_all(input, |caps: &Captures| {
            let whole = &caps[0];
            if caps.name("escape").is_some() {
                return "$".to_string();
            }

            let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
                return whole.to_string();
            };
            let name = name.as_str();
            let op = caps.name("op").map(|m| m.as_str());
            let default = caps.name("default").map(|m| m.as_str());

            match (lookup(name), default) {
                (Some(value), _) if value.contains(['\n', '\r']) => {
                    errors.push(format!("environment variable '{name}' contains a newline"));
                    whole.to_string()
                }
                (Some(value), Some(default)) if value.is_empty() && op == Some(":-") => {
                    default.to_string()
                }
                (Some(value), _) => value,
                (None, Some(default)) => default.to_string(),
                (None, None) => {
                    errors.push(format!("environment variable '{name}' is not set"));
                    whole.to_string()
                }
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}
