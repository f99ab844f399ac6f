use std::time::Duration;

use chrono_tz::Tz;

/// Overlay data service base; tiles live under `{MVT_URL}/swh_contours_datetime/...`.
pub const MVT_URL_ENV: &str = "MVT_URL";
/// WMS-style GetCapabilities document advertising the time dimension.
pub const CAPABILITIES_URL_ENV: &str = "CAPABILITIES_URL";

pub const OVERLAY_COLLECTION: &str = "swh_contours_datetime";
pub const OVERLAY_MIN_DETAIL_ZOOM: u8 = 4;
pub const OVERLAY_MAX_DETAIL_ZOOM: u8 = 18;

pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 400;
pub const DEFAULT_APPLIED_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_BROADCAST_BUFFER: usize = 256;
pub const DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_SERVER_PORT: u16 = 3000;
pub const SSE_KEEPALIVE_SECS: u64 = 15;

pub fn required_url(name: &str) -> Result<String, String> {
    let value = std::env::var(name).map_err(|_| format!("{name} is required"))?;
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(format!("{name} is empty"));
    }
    Ok(trimmed.to_string())
}

pub fn throttle_interval() -> Duration {
    std::env::var("THROTTLE_INTERVAL_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_THROTTLE_INTERVAL_MS))
}

pub fn applied_channel_capacity() -> usize {
    std::env::var("APPLIED_CHANNEL_CAPACITY")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_APPLIED_CHANNEL_CAPACITY)
}

pub fn sse_broadcast_buffer() -> usize {
    std::env::var("SSE_BROADCAST_BUFFER")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_BROADCAST_BUFFER)
}

pub fn upstream_http_timeout() -> Duration {
    std::env::var("UPSTREAM_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS))
}

pub fn upstream_connect_timeout() -> Duration {
    std::env::var("UPSTREAM_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS))
}

pub fn server_port() -> u16 {
    std::env::var("SERVER_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_SERVER_PORT)
}

/// Zone for the local half of the time readout.
///
/// `LOCAL_TIMEZONE` wins, then the host's configured zone, then UTC.
pub fn local_timezone() -> Tz {
    std::env::var("LOCAL_TIMEZONE")
        .ok()
        .and_then(|value| value.trim().parse::<Tz>().ok())
        .or_else(|| {
            iana_time_zone::get_timezone()
                .ok()
                .and_then(|name| name.parse::<Tz>().ok())
        })
        .unwrap_or(chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_url_trims_trailing_slash() {
        temp_env::with_var(MVT_URL_ENV, Some(" https://tiles.example/ "), || {
            assert_eq!(
                required_url(MVT_URL_ENV),
                Ok("https://tiles.example".to_string())
            );
        });
    }

    #[test]
    fn required_url_rejects_missing_and_blank() {
        temp_env::with_var_unset(CAPABILITIES_URL_ENV, || {
            assert!(required_url(CAPABILITIES_URL_ENV).is_err());
        });
        temp_env::with_var(CAPABILITIES_URL_ENV, Some("   "), || {
            assert!(required_url(CAPABILITIES_URL_ENV).is_err());
        });
    }

    #[test]
    fn throttle_interval_defaults_and_overrides() {
        temp_env::with_var_unset("THROTTLE_INTERVAL_MS", || {
            assert_eq!(throttle_interval(), Duration::from_millis(400));
        });
        temp_env::with_var("THROTTLE_INTERVAL_MS", Some("250"), || {
            assert_eq!(throttle_interval(), Duration::from_millis(250));
        });
        temp_env::with_var("THROTTLE_INTERVAL_MS", Some("0"), || {
            assert_eq!(throttle_interval(), Duration::from_millis(400));
        });
        temp_env::with_var("THROTTLE_INTERVAL_MS", Some("fast"), || {
            assert_eq!(throttle_interval(), Duration::from_millis(400));
        });
    }

    #[test]
    fn numeric_settings_fall_back_on_invalid_values() {
        temp_env::with_vars(
            [
                ("APPLIED_CHANNEL_CAPACITY", Some("-3")),
                ("SSE_BROADCAST_BUFFER", Some("0")),
                ("SERVER_PORT", Some("99999")),
            ],
            || {
                assert_eq!(applied_channel_capacity(), DEFAULT_APPLIED_CHANNEL_CAPACITY);
                assert_eq!(sse_broadcast_buffer(), DEFAULT_BROADCAST_BUFFER);
                assert_eq!(server_port(), DEFAULT_SERVER_PORT);
            },
        );
    }

    #[test]
    fn local_timezone_prefers_explicit_setting() {
        temp_env::with_var("LOCAL_TIMEZONE", Some("Europe/Copenhagen"), || {
            assert_eq!(local_timezone(), chrono_tz::Europe::Copenhagen);
        });
    }
}
