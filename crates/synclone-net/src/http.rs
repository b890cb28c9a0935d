use reqwest::header::HeaderMap;
use std::error::Error as _;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use synclone_core::retry::TransportFailure;

/// Server-requested back-off: `Retry-After` first, then `X-RateLimit-Reset`.
pub fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
    if let Some(delay) = retry_after_seconds(headers) {
        return Some(Duration::from_secs(delay));
    }
    if let Some(delay) = ratelimit_reset_seconds(headers) {
        return Some(Duration::from_secs(delay));
    }
    None
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn ratelimit_reset_seconds(headers: &HeaderMap) -> Option<u64> {
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if reset <= now { None } else { Some(reset - now) }
}

/// Connection-level failures (refused, reset, timed out, unreachable) are
/// retried for every method; anything else is not.
pub fn classify_transport_error(err: &reqwest::Error) -> TransportFailure {
    if err.is_connect() || err.is_timeout() {
        return TransportFailure::Connection;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && is_connection_io_error(io_err.kind())
        {
            return TransportFailure::Connection;
        }
        source = cause.source();
    }
    TransportFailure::Other
}

fn is_connection_io_error(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("5"));
        assert_eq!(retry_after_seconds(&headers), Some(5));
        assert_eq!(retry_delay_from_headers(&headers), Some(Duration::from_secs(5)));
    }

    #[test]
    fn retry_after_wins_over_ratelimit_reset() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from_str(&(now_secs() + 600).to_string()).unwrap(),
        );
        assert_eq!(retry_delay_from_headers(&headers), Some(Duration::from_secs(2)));
    }

    #[test]
    fn ratelimit_reset_uses_future_time() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from_str(&(now_secs() + 10).to_string()).unwrap(),
        );
        let delay = ratelimit_reset_seconds(&headers).unwrap();
        assert!(delay > 0 && delay <= 10);
    }

    #[test]
    fn past_reset_and_http_dates_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1"));
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_delay_from_headers(&headers), None);
    }

    #[test]
    fn connection_io_kinds() {
        assert!(is_connection_io_error(io::ErrorKind::ConnectionReset));
        assert!(is_connection_io_error(io::ErrorKind::TimedOut));
        assert!(!is_connection_io_error(io::ErrorKind::InvalidData));
        assert!(!is_connection_io_error(io::ErrorKind::PermissionDenied));
    }
}
