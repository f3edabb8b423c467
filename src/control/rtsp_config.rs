//! Generates the embedded RTSP server's config file and on-demand hook
//! wiring (§1: the server itself is an external collaborator; only its
//! config and hook are core concerns).

use std::fmt::Write as _;

use crate::config::Config;

/// Renders a minimal `mediamtx`-style YAML config: one path per channel,
/// each wired to run the given hook binary on publish/no-publisher.
pub fn render_rtsp_config(cfg: &Config, channels: &[u8], hook_binary: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# generated by dvrgate, do not edit by hand");
    let _ = writeln!(out, "rtspAddress: :8554");
    let _ = writeln!(out, "paths:");
    for &channel in channels {
        let _ = writeln!(out, "  ch{channel}:");
        let _ = writeln!(out, "    runOnDemand: {hook_binary} start --channel {channel}");
        let _ = writeln!(out, "    runOnDemandCloseAfter: 10s");
        let _ = writeln!(out, "    runOnUnDemand: {hook_binary} stop --channel {channel}");
    }
    let _ = cfg; // reserved for future auth/TLS wiring, not needed yet
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            local_offset: time::UtcOffset::UTC,
            dvr_host: None,
            dvr_cmd_port: 5050,
            dvr_media_port: 6050,
            dvr_username: "admin".to_string(),
            dvr_password: String::new(),
            web_port: 8080,
            record_enabled: false,
            record_channels: vec![],
            record_segment_min: 15,
            record_stream_type: 0,
            record_dir: std::path::PathBuf::from("recordings"),
            record_retention_hr: 0,
            record_schedule: vec![],
            record_min_disk_mb: 0,
        }
    }

    #[test]
    fn renders_one_path_per_channel() {
        let yaml = render_rtsp_config(&test_config(), &[0, 1], "dvrgate-hook");
        assert!(yaml.contains("ch0:"));
        assert!(yaml.contains("ch1:"));
        assert!(yaml.contains("dvrgate-hook start --channel 1"));
    }
}
