//! Shared env/duration parsing helpers used by the server's config loader
//! and by tests that need to build equivalent config values without going
//! through environment variables.

use std::time::Duration;

/// Error returned when an env var's value cannot be parsed as a duration.
#[derive(Debug, thiserror::Error)]
#[error("invalid duration {raw:?} for {var}: {source}")]
pub struct DurationEnvError {
    var: &'static str,
    raw: String,
    #[source]
    source: humantime::DurationError,
}

/// Parse a duration string in the `Ns/Nms/Nm/Nh` grammar (and combinations
/// such as `"1h30m"`), as documented for the server's env vars.
pub fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw)
}

/// Read `var` from the environment and parse it as a duration, falling back
/// to `default` when the variable is unset. Returns an error only when the
/// variable is set to something unparseable.
pub fn duration_from_env(var: &'static str, default: Duration) -> Result<Duration, DurationEnvError> {
    match std::env::var(var) {
        Ok(raw) => parse_duration(&raw).map_err(|source| DurationEnvError {
            var,
            raw,
            source,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_combined_duration() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn falls_back_when_env_var_unset() {
        let d = duration_from_env("VIEWER_CONFIG_TEST_UNSET_VAR", Duration::from_secs(30)).unwrap();
        assert_eq!(d, Duration::from_secs(30));
    }

    #[test]
    fn errors_on_unparseable_env_value() {
        // SAFETY: test-only, single-threaded within this test.
        unsafe {
            std::env::set_var("VIEWER_CONFIG_TEST_BAD_VAR", "not-a-duration");
        }
        let err = duration_from_env("VIEWER_CONFIG_TEST_BAD_VAR", Duration::from_secs(1));
        assert!(err.is_err());
        unsafe {
            std::env::remove_var("VIEWER_CONFIG_TEST_BAD_VAR");
        }
    }
}
