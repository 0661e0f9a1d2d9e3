use std::time::Duration;

use tracing::warn;

pub const INTERVAL_ENV_VAR: &str = "INTERVAL_TIME";
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Sampling period from the `INTERVAL_TIME` environment variable.
/// Missing, unparsable or non-positive values fall back to the default.
pub fn interval_from_env() -> Duration {
    let raw = std::env::var(INTERVAL_ENV_VAR).ok();
    Duration::from_secs(parse_interval_secs(raw.as_deref()))
}

fn parse_interval_secs(raw: Option<&str>) -> u64 {
    let Some(raw) = raw else {
        return DEFAULT_INTERVAL_SECS;
    };

    match raw.trim().parse::<i64>() {
        Ok(secs) if secs > 0 => secs as u64,
        Ok(secs) => {
            warn!(
                value = secs,
                "{INTERVAL_ENV_VAR} must be a positive integer, using default of {DEFAULT_INTERVAL_SECS}s"
            );
            DEFAULT_INTERVAL_SECS
        }
        Err(_) => {
            warn!(
                value = raw,
                "{INTERVAL_ENV_VAR} is not an integer, using default of {DEFAULT_INTERVAL_SECS}s"
            );
            DEFAULT_INTERVAL_SECS
        }
    }
}
