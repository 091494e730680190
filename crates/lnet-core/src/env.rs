//! Environment-variable configuration helpers.
//!
//! Carried from the teacher's `gvthread_core::env` near-verbatim: a
//! handful of test-only knobs (§6.4, §9's `LNET_CONCURRENCY=1`) are read
//! once at startup through these helpers rather than scattered
//! `std::env::var` calls.

use std::env;

pub fn env_get(name: &str) -> Option<String> {
    env::var(name).ok()
}

pub fn env_get_str(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

pub fn env_get_opt<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

pub fn env_get_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "on"),
        Err(_) => default,
    }
}

pub fn env_is_set(name: &str) -> bool {
    env::var(name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_default_when_unset() {
        assert!(!env_get_bool("LNET_CORE_TEST_UNSET_VAR_XYZ", false));
        assert!(env_get_bool("LNET_CORE_TEST_UNSET_VAR_XYZ", true));
    }
}
