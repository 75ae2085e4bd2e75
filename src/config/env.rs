//! Typed environment variable parsing with defaults.

use std::str::FromStr;

/// Parse `name` as a number, or return `default` when it is unset.
fn parse_env_num<T>(name: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| format!("{name}={raw:?} is not a valid number: {e}")),
        Err(_) => Ok(default),
    }
}

pub fn parse_env_u64(name: &str, default: u64) -> Result<u64, String> {
    parse_env_num(name, default)
}

pub fn parse_env_u32(name: &str, default: u32) -> Result<u32, String> {
    parse_env_num(name, default)
}

/// `1`/`true`/`yes` → true, `0`/`false`/`no`/empty → false, anything else is an error.
pub fn parse_env_bool(name: &str, default: bool) -> Result<bool, String> {
    let Ok(v) = std::env::var(name) else {
        return Ok(default);
    };
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "" | "0" | "false" | "no" => Ok(false),
        other => Err(format!("invalid {name}: expected true/false, got '{other}'")),
    }
}

/// Read `name`, falling back to `default` when unset or empty.
pub fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
