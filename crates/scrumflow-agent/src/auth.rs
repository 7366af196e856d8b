//! API credentials for the reasoning service
//!
//! The configured variable (default `OPENAI_API_KEY`) wins; `SCRUMFLOW_API_KEY`
//! is the fallback.

use scrumflow_core::{Result, ScrumError};
use std::env;

/// Generic fallback variable
pub const FALLBACK_API_KEY_ENV: &str = "SCRUMFLOW_API_KEY";

/// Read the API key from `env_name`, falling back to [`FALLBACK_API_KEY_ENV`]
pub fn get_api_key(env_name: &str) -> Result<String> {
    for name in [env_name, FALLBACK_API_KEY_ENV] {
        if let Ok(key) = env::var(name) {
            if !key.trim().is_empty() {
                tracing::debug!("Using API key from {}", name);
                return Ok(key);
            }
        }
    }

    Err(ScrumError::Auth(format!(
        "No API key found. Set {} (or {}) before running agents.",
        env_name, FALLBACK_API_KEY_ENV
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to prevent concurrent env var modifications
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap();

        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();
        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let result = f();

        for (key, original) in originals {
            match original {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        result
    }

    #[test]
    fn test_configured_variable_wins() {
        with_env_vars(
            &[
                ("SCRUMFLOW_TEST_KEY", Some("primary")),
                (FALLBACK_API_KEY_ENV, Some("fallback")),
            ],
            || assert_eq!(get_api_key("SCRUMFLOW_TEST_KEY").unwrap(), "primary"),
        );
    }

    #[test]
    fn test_fallback_when_primary_blank() {
        with_env_vars(
            &[
                ("SCRUMFLOW_TEST_KEY", Some("  ")),
                (FALLBACK_API_KEY_ENV, Some("fallback")),
            ],
            || assert_eq!(get_api_key("SCRUMFLOW_TEST_KEY").unwrap(), "fallback"),
        );
    }

    #[test]
    fn test_missing_key_is_auth_error() {
        with_env_vars(
            &[("SCRUMFLOW_TEST_KEY", None), (FALLBACK_API_KEY_ENV, None)],
            || {
                assert!(matches!(
                    get_api_key("SCRUMFLOW_TEST_KEY"),
                    Err(ScrumError::Auth(_))
                ))
            },
        );
    }
}
