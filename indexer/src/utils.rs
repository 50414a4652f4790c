use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

// HTTP and database client crates are chatty at debug level.
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls", "sqlx"];

pub fn init_tracing(verbosity: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));

    let subscriber = fmt().with_env_filter(filter).with_target(true).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        warn!("tracing subscriber already initialized");
    }

    Ok(())
}

fn default_directives(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|krate| format!("{krate}=warn")));
    directives.join(",")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Invalid date format: '{0}'. Use 'YYYY-MM-DD', 'YYYY-MM-DD HH:MM:SS', or 'YYYY-MM-DDTHH:MM:SS'."
)]
pub struct InvalidCutoff(pub String);

/// Parses a cutoff given as a date or a timestamp. Values are taken as UTC.
pub fn parse_cutoff(value: &str) -> std::result::Result<DateTime<Utc>, InvalidCutoff> {
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(timestamp.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|timestamp| timestamp.and_utc())
        .ok_or_else(|| InvalidCutoff(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_supported_cutoff_formats() {
        let midnight = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let afternoon = Utc.with_ymd_and_hms(2024, 1, 1, 13, 45, 0).unwrap();

        assert_eq!(parse_cutoff("2024-01-01"), Ok(midnight));
        assert_eq!(parse_cutoff("2024-01-01 13:45:00"), Ok(afternoon));
        assert_eq!(parse_cutoff("2024-01-01T13:45:00"), Ok(afternoon));
    }

    #[test]
    fn rejects_unsupported_cutoff_format() {
        let err = parse_cutoff("01/01/2024").expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "Invalid date format: '01/01/2024'. Use 'YYYY-MM-DD', 'YYYY-MM-DD HH:MM:SS', or 'YYYY-MM-DDTHH:MM:SS'."
        );
    }

    #[test]
    fn rejects_impossible_dates() {
        assert!(parse_cutoff("2024-02-30").is_err());
        assert!(parse_cutoff("2024-01-01 25:00:00").is_err());
    }

    #[test]
    fn quiets_network_crates() {
        let directives = default_directives(1);
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("sqlx=warn"));
    }
}
