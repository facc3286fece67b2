//! Runtime settings, read from the environment (after `.env` is loaded).
//!
//! | Variable                 | Default                     |
//! |--------------------------|-----------------------------|
//! | `SUPABASE_URL`           | unset → simulation          |
//! | `SUPABASE_ANON_KEY`      | unset → simulation          |
//! | `SIM_TICK_MS`            | 3000                        |
//! | `FETCH_MAX_ATTEMPTS`     | 3                           |
//! | `FETCH_INITIAL_DELAY_MS` | 200                         |
//! | `LOG_FILE_PATH`          | `logs/emobility_pulse.log`  |
//! | `WEBHOOK_SECRET`         | unset → change webhook off  |

use std::str::FromStr;
use std::time::Duration;

use crate::error::PulseError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// `None` when either the URL or the key is missing.
    pub backend: Option<BackendSettings>,
    pub sim_tick: Duration,
    pub retry: RetryPolicy,
    pub log_file_path: String,
    /// Shared secret the change webhook must present.
    pub webhook_secret: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: None,
            sim_tick: Duration::from_millis(3000),
            retry: RetryPolicy::default(),
            log_file_path: "logs/emobility_pulse.log".to_string(),
            webhook_secret: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, PulseError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PulseError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();

        let backend = match (get("SUPABASE_URL"), get("SUPABASE_ANON_KEY")) {
            (Some(url), Some(anon_key)) => Some(BackendSettings { url, anon_key }),
            _ => None,
        };

        let sim_tick = match get("SIM_TICK_MS") {
            Some(raw) => Duration::from_millis(parse("SIM_TICK_MS", &raw)?),
            None => defaults.sim_tick,
        };

        let retry = match (get("FETCH_MAX_ATTEMPTS"), get("FETCH_INITIAL_DELAY_MS")) {
            (None, None) => defaults.retry,
            (attempts, delay) => {
                let attempts = match attempts {
                    Some(raw) => parse("FETCH_MAX_ATTEMPTS", &raw)?,
                    None => defaults.retry.max_attempts(),
                };
                let delay = match delay {
                    Some(raw) => Duration::from_millis(parse("FETCH_INITIAL_DELAY_MS", &raw)?),
                    None => defaults.retry.delay_for(0),
                };
                RetryPolicy::new(attempts, delay)
            }
        };

        Ok(Self {
            backend,
            sim_tick,
            retry,
            log_file_path: get("LOG_FILE_PATH").unwrap_or(defaults.log_file_path),
            webhook_secret: get("WEBHOOK_SECRET"),
        })
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, PulseError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| PulseError::Config(format!("{key}='{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert!(settings.backend.is_none());
        assert_eq!(settings.sim_tick, Duration::from_secs(3));
        assert_eq!(settings.retry.max_attempts(), 3);
        assert_eq!(settings.log_file_path, "logs/emobility_pulse.log");
        assert!(settings.webhook_secret.is_none());
    }

    #[test]
    fn test_webhook_secret() {
        let settings = Settings::from_lookup(lookup(&[("WEBHOOK_SECRET", " ")])).unwrap();
        assert!(settings.webhook_secret.is_none());

        let settings = Settings::from_lookup(lookup(&[("WEBHOOK_SECRET", "s3cret")])).unwrap();
        assert_eq!(settings.webhook_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_backend_needs_url_and_key() {
        let settings = Settings::from_lookup(lookup(&[("SUPABASE_URL", "https://x.example.co")])).unwrap();
        assert!(settings.backend.is_none());

        let settings = Settings::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://x.example.co"),
            ("SUPABASE_ANON_KEY", "   "),
        ]))
        .unwrap();
        assert!(settings.backend.is_none());

        let settings = Settings::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://x.example.co"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]))
        .unwrap();
        assert_eq!(
            settings.backend,
            Some(BackendSettings {
                url: "https://x.example.co".to_string(),
                anon_key: "anon".to_string(),
            })
        );
    }

    #[test]
    fn test_numeric_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("SIM_TICK_MS", "250"),
            ("FETCH_MAX_ATTEMPTS", "5"),
            ("FETCH_INITIAL_DELAY_MS", "50"),
        ]))
        .unwrap();
        assert_eq!(settings.sim_tick, Duration::from_millis(250));
        assert_eq!(settings.retry.max_attempts(), 5);
        assert_eq!(settings.retry.delay_for(0), Duration::from_millis(50));
    }

    #[test]
    fn test_bad_number_is_config_error() {
        let err = Settings::from_lookup(lookup(&[("SIM_TICK_MS", "soon")])).unwrap_err();
        assert!(matches!(err, PulseError::Config(msg) if msg.contains("SIM_TICK_MS")));
    }
}
