//! Purpose: Resolve store locators and connection parameters into typed config.
//! Exports: `StoreConfig`, `RestConfig`, `parse_duration`, defaults.
//! Role: Shared by the CLI flags/env layer and library callers.
//! Invariants: `memory` selects the in-process store; anything else must be an http(s) base URL.

use std::time::Duration;

use url::Url;

use crate::core::error::{Error, ErrorKind};
use crate::core::store::ApiResult;

pub const DEFAULT_STORE: &str = "http://127.0.0.1:8080";
pub const DEFAULT_SCANNER_BATCH: u32 = 100;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq)]
pub enum StoreConfig {
    Memory,
    Rest(RestConfig),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RestConfig {
    pub base_url: Url,
    pub token: Option<String>,
    pub timeout: Duration,
    pub scanner_batch: u32,
}

impl StoreConfig {
    pub fn parse(locator: &str) -> ApiResult<Self> {
        let trimmed = locator.trim();
        if trimmed.eq_ignore_ascii_case("memory") || trimmed.eq_ignore_ascii_case("mem") {
            return Ok(StoreConfig::Memory);
        }
        Ok(StoreConfig::Rest(RestConfig::new(trimmed)?))
    }

    /// Applies REST-only settings; the memory store ignores them.
    pub fn with_rest_options(
        self,
        token: Option<String>,
        timeout: Option<Duration>,
        scanner_batch: Option<u32>,
    ) -> ApiResult<Self> {
        match self {
            StoreConfig::Memory => Ok(StoreConfig::Memory),
            StoreConfig::Rest(mut config) => {
                if let Some(token) = token {
                    config = config.with_token(token);
                }
                if let Some(timeout) = timeout {
                    config = config.with_timeout(timeout);
                }
                if let Some(batch) = scanner_batch {
                    config = config.with_scanner_batch(batch)?;
                }
                Ok(StoreConfig::Rest(config))
            }
        }
    }
}

impl RestConfig {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            token: None,
            timeout: DEFAULT_TIMEOUT,
            scanner_batch: DEFAULT_SCANNER_BATCH,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = if token.trim().is_empty() {
            None
        } else {
            Some(token)
        };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scanner_batch(mut self, batch: u32) -> ApiResult<Self> {
        if batch == 0 {
            return Err(Error::new(ErrorKind::Argument)
                .with_message("scanner batch must be at least 1"));
        }
        self.scanner_batch = batch;
        Ok(self)
    }
}

fn normalize_base_url(raw: &str) -> ApiResult<Url> {
    let mut url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::Argument)
            .with_message("invalid store locator")
            .with_hint("Use `memory` or a gateway URL such as http://127.0.0.1:8080.")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Argument)
            .with_message("store url must use http or https scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(Error::new(ErrorKind::Argument).with_message("store url must not include a path"));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Parses `<number><unit>` with unit ms, s, m, or h.
pub fn parse_duration(input: &str) -> ApiResult<Duration> {
    let invalid = || {
        Error::new(ErrorKind::Argument)
            .with_message("invalid duration")
            .with_hint("Use a number plus ms|s|m|h (e.g. 10s).")
    };
    let trimmed = input.trim();
    let split = trimmed.char_indices().find(|(_, ch)| !ch.is_ascii_digit());
    let (num_str, unit) = match split {
        Some((idx, _)) => trimmed.split_at(idx),
        None => ("", ""),
    };
    if num_str.is_empty() || unit.is_empty() {
        return Err(invalid());
    }
    let value: u64 = num_str.parse().map_err(|_| invalid())?;
    let millis = match unit {
        "ms" => value,
        "s" => value.saturating_mul(1_000),
        "m" => value.saturating_mul(60_000),
        "h" => value.saturating_mul(3_600_000),
        _ => return Err(invalid()),
    };
    Ok(Duration::from_millis(millis))
}
