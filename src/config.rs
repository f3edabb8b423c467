//! Process configuration, sourced from environment variables (§6) and
//! validated fail-fast at startup, the way the protocol crate's sibling
//! utilities validate their TOML config.

use validator::{Validate, ValidationError};

/// Full process configuration. `Config::from_env` is the only
/// constructor; fields are intentionally not `pub(crate) mut` so the
/// only route to a populated value is through validation.
#[derive(Debug, Clone, Validate)]
#[validate(schema(function = "validate_record_channels"))]
pub struct Config {
    /// Local wall-clock offset, captured once at process startup before
    /// the tokio runtime spawns any worker threads (`time::UtcOffset`
    /// can only be soundly read from a single-threaded process). Used to
    /// evaluate the recorder's schedule in local time (§4.3.2).
    pub local_offset: time::UtcOffset,
    pub dvr_host: Option<String>,
    pub dvr_cmd_port: u16,
    pub dvr_media_port: u16,
    #[validate(length(min = 1))]
    pub dvr_username: String,
    pub dvr_password: String,

    #[validate(range(min = 1, max = 65535))]
    pub web_port: u16,

    pub record_enabled: bool,
    pub record_channels: Vec<u8>,
    #[validate(range(min = 1, max = 1440))]
    pub record_segment_min: u32,
    pub record_stream_type: u8,
    pub record_dir: std::path::PathBuf,
    pub record_retention_hr: u32,
    pub record_schedule: Vec<(u8, u8)>,
    #[validate(range(min = 0))]
    pub record_min_disk_mb: u64,
}

fn validate_record_channels(cfg: &Config) -> Result<(), ValidationError> {
    if cfg.record_enabled && cfg.record_channels.is_empty() {
        let mut err = ValidationError::new("record_channels_required");
        err.message = Some("DVR_RECORD_ENABLED=true requires DVR_RECORD_CHANNELS".into());
        return Err(err);
    }
    if cfg.record_stream_type > 1 {
        let mut err = ValidationError::new("bad_record_stream_type");
        err.message = Some("DVR_RECORD_STREAM_TYPE must be 0 or 1".into());
        return Err(err);
    }
    Ok(())
}

impl Config {
    /// Reads and validates configuration from the process environment.
    /// Fails fast: an invalid value is a startup error, not a runtime one.
    /// `local_offset` must be captured before the async runtime starts;
    /// see [`Config::local_offset`].
    pub fn from_env(local_offset: time::UtcOffset) -> anyhow::Result<Self> {
        let cfg = Config {
            local_offset,
            dvr_host: env_opt("DVR_HOST"),
            dvr_cmd_port: env_parsed("DVR_CMD_PORT", 5050),
            dvr_media_port: env_parsed("DVR_MEDIA_PORT", 6050),
            dvr_username: std::env::var("DVR_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            dvr_password: std::env::var("DVR_PASSWORD").unwrap_or_default(),
            web_port: env_parsed("DVR_WEB_PORT", 8080),
            record_enabled: env_bool("DVR_RECORD_ENABLED"),
            record_channels: env_opt("DVR_RECORD_CHANNELS")
                .map(|s| parse_channel_list(&s))
                .unwrap_or_default(),
            record_segment_min: env_parsed("DVR_RECORD_SEGMENT_MIN", 15),
            record_stream_type: env_parsed("DVR_RECORD_STREAM_TYPE", 0),
            record_dir: env_opt("DVR_RECORD_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|| std::path::PathBuf::from("recordings")),
            record_retention_hr: env_parsed("DVR_RECORD_RETENTION_HR", 0),
            record_schedule: env_opt("DVR_RECORD_SCHEDULE")
                .map(|s| parse_schedule(&s))
                .unwrap_or_default(),
            record_min_disk_mb: env_parsed("DVR_RECORD_MIN_DISK_MB", 500),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt(name).and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_bool(name: &str) -> bool {
    matches!(env_opt(name).as_deref(), Some("1") | Some("true") | Some("yes"))
}

/// Parses a comma-separated channel list, e.g. `"0,1,2"`.
fn parse_channel_list(s: &str) -> Vec<u8> {
    s.split(',').filter_map(|p| p.trim().parse().ok()).collect()
}

/// Parses `"0-7,22-23"` into inclusive `(start_hour, end_hour)` pairs.
fn parse_schedule(s: &str) -> Vec<(u8, u8)> {
    s.split(',')
        .filter_map(|range| {
            let (a, b) = range.trim().split_once('-')?;
            Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
        })
        .collect()
}

/// True if `hour` (0-23) falls in any configured schedule range,
/// inclusive on both ends.
pub fn hour_in_schedule(schedule: &[(u8, u8)], hour: u8) -> bool {
    schedule.iter().any(|&(start, end)| {
        if start <= end {
            hour >= start && hour <= end
        } else {
            // Wrapping range, e.g. 22-23 doesn't wrap but 22-2 would.
            hour >= start || hour <= end
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_channel_list() {
        assert_eq!(parse_channel_list("0,1, 2"), vec![0, 1, 2]);
    }

    #[test]
    fn parses_schedule_ranges() {
        assert_eq!(parse_schedule("0-7,22-23"), vec![(0, 7), (22, 23)]);
    }

    #[test]
    fn hour_in_schedule_handles_simple_ranges() {
        let sched = parse_schedule("0-7,22-23");
        assert!(hour_in_schedule(&sched, 3));
        assert!(hour_in_schedule(&sched, 22));
        assert!(!hour_in_schedule(&sched, 12));
    }

    #[test]
    fn hour_in_schedule_handles_wrap() {
        let sched = vec![(22, 2)];
        assert!(hour_in_schedule(&sched, 23));
        assert!(hour_in_schedule(&sched, 1));
        assert!(!hour_in_schedule(&sched, 12));
    }
}
