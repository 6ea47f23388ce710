// Configuration for a check run. Everything a component needs is passed in
// explicitly; nothing here is process-wide.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use reqwest::Url;

use crate::error::MonitorError;

pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_WINDOW_CHARS: usize = 200;
pub const DEFAULT_LINE_API_BASE: &str = "https://api.line.me";
pub const DEFAULT_SITE_NAME: &str = "キャンプ場";
pub const DEFAULT_NOTIFIED_TTL_SECS: u64 = 24 * 60 * 60;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

// Header set the reservation site expects from a real browser
pub fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("User-Agent".to_string(), BROWSER_USER_AGENT.to_string()),
        (
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        ),
        (
            "Accept-Language".to_string(),
            "ja,en-US;q=0.9,en;q=0.8".to_string(),
        ),
    ])
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

// How much text around a date match counts as its context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    // Parent element of the deepest element holding the date
    Structured,
    // Raw-text window of `radius_chars` on each side of the match
    Window { radius_chars: usize },
    // The whole page is the context of every match
    WholePage,
}

impl Default for ScanMode {
    fn default() -> Self {
        ScanMode::Structured
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    // Positive token present, or no negative token at all
    Lenient,
    // Positive token present
    RequirePositive,
}

impl Default for TieBreak {
    fn default() -> Self {
        TieBreak::Lenient
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParserConfig {
    pub scan: ScanMode,
    pub tie_break: TieBreak,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunPolicy {
    // Send a best-effort alert when the fetch fails
    pub notify_on_error: bool,
    pub dispatch_timeout_ms: u64,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            notify_on_error: false,
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineConfig {
    pub access_token: Option<String>,
    pub destination: Option<String>,
    pub api_base: String,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            destination: None,
            api_base: DEFAULT_LINE_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub target_date: Option<String>,
    pub source_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub site_name: String,
    pub fetch: FetchConfig,
    pub parser: ParserConfig,
    pub policy: RunPolicy,
    pub line: LineConfig,
    pub notified_ttl_secs: u64,
    // Repeat the check in-process at this cadence instead of running once
    pub check_interval_secs: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target_date: None,
            source_url: None,
            headers: default_headers(),
            site_name: DEFAULT_SITE_NAME.to_string(),
            fetch: FetchConfig::default(),
            parser: ParserConfig::default(),
            policy: RunPolicy::default(),
            line: LineConfig::default(),
            notified_ttl_secs: DEFAULT_NOTIFIED_TTL_SECS,
            check_interval_secs: None,
        }
    }
}

// The immutable, validated input of one run
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRequest {
    pub target_date: NaiveDate,
    pub source_url: Url,
    pub headers: BTreeMap<String, String>,
}

impl CheckRequest {
    pub fn new(target_date: NaiveDate, source_url: Url) -> Self {
        Self {
            target_date,
            source_url,
            headers: default_headers(),
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, MonitorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    // Builds a config from any key/value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MonitorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = MonitorConfig {
            target_date: get("CHECK_DATE"),
            source_url: get("CAMPING_URL"),
            ..Default::default()
        };

        config.line.access_token = get("LINE_CHANNEL_ACCESS_TOKEN");
        config.line.destination = get("LINE_USER_ID");
        if let Some(base) = get("LINE_API_BASE") {
            config.line.api_base = base;
        }
        if let Some(name) = get("SITE_NAME") {
            config.site_name = name;
        }

        if let Some(raw) = get("FETCH_TIMEOUT_MS") {
            config.fetch.timeout_ms = parse_number("FETCH_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = get("FETCH_MAX_BODY_BYTES") {
            config.fetch.max_body_bytes = parse_number("FETCH_MAX_BODY_BYTES", &raw)?;
        }
        if let Some(raw) = get("DISPATCH_TIMEOUT_MS") {
            config.policy.dispatch_timeout_ms = parse_number("DISPATCH_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = get("NOTIFY_ON_ERROR") {
            config.policy.notify_on_error = parse_flag("NOTIFY_ON_ERROR", &raw)?;
        }
        if let Some(raw) = get("REQUIRE_POSITIVE_SIGNAL") {
            if parse_flag("REQUIRE_POSITIVE_SIGNAL", &raw)? {
                config.parser.tie_break = TieBreak::RequirePositive;
            }
        }
        if let Some(raw) = get("NOTIFIED_TTL_SECS") {
            config.notified_ttl_secs = parse_number("NOTIFIED_TTL_SECS", &raw)?;
        }
        if let Some(raw) = get("CHECK_INTERVAL_SECS") {
            let secs: u64 = parse_number("CHECK_INTERVAL_SECS", &raw)?;
            if secs == 0 {
                return Err(MonitorError::Configuration(
                    "CHECK_INTERVAL_SECS must be greater than zero".to_string(),
                ));
            }
            config.check_interval_secs = Some(secs);
        }

        let radius_chars = match get("SCAN_WINDOW_CHARS") {
            Some(raw) => parse_number("SCAN_WINDOW_CHARS", &raw)?,
            None => DEFAULT_WINDOW_CHARS,
        };
        if let Some(raw) = get("SCAN_MODE") {
            config.parser.scan = match raw.to_ascii_lowercase().as_str() {
                "structured" => ScanMode::Structured,
                "window" => ScanMode::Window { radius_chars },
                "page" => ScanMode::WholePage,
                other => {
                    return Err(MonitorError::Configuration(format!(
                        "SCAN_MODE must be one of structured, window, page (got {other:?})"
                    )))
                }
            };
        }

        Ok(config)
    }

    // Start-state validation. Messaging settings are checked later, at dispatch.
    pub fn validate(&self) -> Result<CheckRequest, MonitorError> {
        let raw_date = self
            .target_date
            .as_deref()
            .ok_or_else(|| MonitorError::Configuration("target date is not set".to_string()))?;
        let target_date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|e| {
            MonitorError::Configuration(format!(
                "target date {raw_date:?} is not an ISO YYYY-MM-DD date: {e}"
            ))
        })?;

        let raw_url = self
            .source_url
            .as_deref()
            .ok_or_else(|| MonitorError::Configuration("source URL is not set".to_string()))?;
        let source_url = parse_source_url(raw_url)?;

        if self.fetch.timeout_ms == 0 {
            return Err(MonitorError::Configuration(
                "fetch timeout must be greater than zero".to_string(),
            ));
        }
        if self.policy.dispatch_timeout_ms == 0 {
            return Err(MonitorError::Configuration(
                "dispatch timeout must be greater than zero".to_string(),
            ));
        }

        Ok(CheckRequest {
            target_date,
            source_url,
            headers: self.headers.clone(),
        })
    }
}

pub fn parse_source_url(raw: &str) -> Result<Url, MonitorError> {
    let url = Url::parse(raw)
        .map_err(|e| MonitorError::Configuration(format!("source URL {raw:?} is invalid: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(MonitorError::Configuration(format!(
            "source URL must be http or https, got {other:?}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, MonitorError> {
    raw.parse::<T>()
        .map_err(|_| MonitorError::Configuration(format!("{key} must be a number (got {raw:?})")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, MonitorError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MonitorError::Configuration(format!(
            "{key} must be a boolean (got {raw:?})"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_reads_required_and_defaults() {
        let config = MonitorConfig::from_lookup(lookup_from(&[
            ("CHECK_DATE", "2025-07-26"),
            ("CAMPING_URL", "https://example.com/reserve"),
            ("LINE_CHANNEL_ACCESS_TOKEN", "token"),
            ("LINE_USER_ID", "U123"),
        ]))
        .unwrap();

        assert_eq!(config.target_date.as_deref(), Some("2025-07-26"));
        assert_eq!(config.line.destination.as_deref(), Some("U123"));
        assert_eq!(config.fetch.timeout_ms, 60_000);
        assert!(!config.policy.notify_on_error);
        assert_eq!(config.parser.tie_break, TieBreak::Lenient);
        assert_eq!(config.parser.scan, ScanMode::Structured);
        assert_eq!(
            config.headers.get("Accept-Language").map(String::as_str),
            Some("ja,en-US;q=0.9,en;q=0.8")
        );
    }

    #[test]
    fn test_from_lookup_policy_overrides() {
        let config = MonitorConfig::from_lookup(lookup_from(&[
            ("FETCH_TIMEOUT_MS", "1500"),
            ("NOTIFY_ON_ERROR", "true"),
            ("REQUIRE_POSITIVE_SIGNAL", "1"),
            ("SCAN_MODE", "window"),
            ("SCAN_WINDOW_CHARS", "40"),
            ("CHECK_INTERVAL_SECS", "600"),
        ]))
        .unwrap();

        assert_eq!(config.check_interval_secs, Some(600));
        assert_eq!(config.fetch.timeout_ms, 1500);
        assert!(config.policy.notify_on_error);
        assert_eq!(config.parser.tie_break, TieBreak::RequirePositive);
        assert_eq!(config.parser.scan, ScanMode::Window { radius_chars: 40 });
    }

    #[test]
    fn test_from_lookup_rejects_garbage_values() {
        let err = MonitorConfig::from_lookup(lookup_from(&[("FETCH_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(err.is_configuration());

        let err =
            MonitorConfig::from_lookup(lookup_from(&[("SCAN_MODE", "xpath")])).unwrap_err();
        assert!(err.to_string().contains("SCAN_MODE"));

        let err = MonitorConfig::from_lookup(lookup_from(&[("CHECK_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let config = MonitorConfig::from_lookup(lookup_from(&[("LINE_USER_ID", "   ")])).unwrap();
        assert_eq!(config.line.destination, None);
    }

    #[test]
    fn test_validate_requires_date_and_url() {
        let mut config = MonitorConfig::default();
        let err = config.validate().unwrap_err();
        assert_eq!(err, MonitorError::Configuration("target date is not set".into()));

        config.target_date = Some("2025-07-26".into());
        let err = config.validate().unwrap_err();
        assert_eq!(err, MonitorError::Configuration("source URL is not set".into()));

        config.source_url = Some("https://example.com/reserve?hcod1=08300".into());
        let request = config.validate().unwrap();
        assert_eq!(request.target_date, NaiveDate::from_ymd_opt(2025, 7, 26).unwrap());
        assert_eq!(request.source_url.host_str(), Some("example.com"));
    }

    #[test]
    fn test_validate_rejects_bad_date_scheme_and_timeout() {
        let mut config = MonitorConfig {
            target_date: Some("26/07/2025".into()),
            source_url: Some("https://example.com".into()),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_configuration());

        config.target_date = Some("2025-07-26".into());
        config.source_url = Some("ftp://example.com/file".into());
        assert!(config.validate().unwrap_err().to_string().contains("http or https"));

        config.source_url = Some("example.com/no-scheme".into());
        assert!(config.validate().unwrap_err().is_configuration());

        config.source_url = Some("https://example.com".into());
        config.fetch.timeout_ms = 0;
        assert!(config.validate().unwrap_err().is_configuration());
    }
}
