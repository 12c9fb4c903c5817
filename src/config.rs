use crate::error::{AppError, Result};

pub const MARKETPLACE_SEARCH_URL: &str = "https://www.ebay.com/sch/i.html";

/// Listings requested per search page. The result is capped again at
/// `max_listings` after parsing.
pub const SEARCH_PAGE_SIZE: usize = 60;

/// Cached recommendations live this long before the next access recomputes.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Cap on listings kept from a single fetch.
pub const DEFAULT_MAX_LISTINGS: usize = 30;

/// Cap on internal records aggregated per match.
pub const DEFAULT_MAX_INTERNAL_MATCHES: usize = 50;

/// Hard deadline for one scrape fetch (milliseconds).
pub const DEFAULT_SCRAPE_TIMEOUT_MS: u64 = 30_000;

/// Inter-fetch delay bounds (milliseconds). The marketplace blocks sessions
/// that issue parallel or too-rapid searches, so successive fetches are
/// spaced by a randomized delay inside these bounds.
pub const DEFAULT_SCRAPE_DELAY_MS_MIN: u64 = 2_000;
pub const DEFAULT_SCRAPE_DELAY_MS_MAX: u64 = 4_000;

/// Below this filtered sample size a market sample is flagged low-confidence.
pub const LOW_SAMPLE_SIZE: usize = 5;

/// Outlier window applied around the raw median before aggregation.
pub const OUTLIER_LOW_FACTOR: f64 = 0.25;
pub const OUTLIER_HIGH_FACTOR: f64 = 4.0;

/// Capacity of the fetch queue in front of the scrape session. One slot:
/// at most one fetch waits while another runs.
pub const FETCH_QUEUE_CAPACITY: usize = 1;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub api_port: u16,
    /// Path or URL to the serialized regressor artifact (MODEL_PATH).
    pub model_path: String,
    /// CSV path, or `sqlite:` connection string (INTERNAL_DATA_PATH).
    pub internal_data_path: String,
    pub cache_ttl_secs: u64,
    pub max_listings: usize,
    pub max_internal_matches: usize,
    pub scrape_timeout_ms: u64,
    pub scrape_delay_ms_min: u64,
    pub scrape_delay_ms_max: u64,
    /// Browser mode for drivers that run a real browser (HEADLESS).
    pub headless: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: parse_var("API_PORT", 8000)?,
            model_path: std::env::var("MODEL_PATH")
                .unwrap_or_else(|_| "models/pricing_model.json".to_string()),
            internal_data_path: std::env::var("INTERNAL_DATA_PATH")
                .unwrap_or_else(|_| "internal_sales.csv".to_string()),
            cache_ttl_secs: parse_var("CACHE_TTL", DEFAULT_CACHE_TTL_SECS)?,
            max_listings: parse_var("MAX_LISTINGS", DEFAULT_MAX_LISTINGS)?,
            max_internal_matches: parse_var("MAX_INTERNAL_MATCHES", DEFAULT_MAX_INTERNAL_MATCHES)?,
            scrape_timeout_ms: parse_var("SCRAPE_TIMEOUT_MS", DEFAULT_SCRAPE_TIMEOUT_MS)?,
            scrape_delay_ms_min: parse_var("SCRAPE_DELAY_MS_MIN", DEFAULT_SCRAPE_DELAY_MS_MIN)?,
            scrape_delay_ms_max: parse_var("SCRAPE_DELAY_MS_MAX", DEFAULT_SCRAPE_DELAY_MS_MAX)?,
            headless: parse_var("HEADLESS", true)?,
        };

        if cfg.scrape_delay_ms_min > cfg.scrape_delay_ms_max {
            return Err(AppError::Config(
                "SCRAPE_DELAY_MS_MIN must not exceed SCRAPE_DELAY_MS_MAX".to_string(),
            ));
        }

        Ok(cfg)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_unset() {
        let cfg = Config::from_env().expect("default config");
        assert_eq!(cfg.cache_ttl_secs, DEFAULT_CACHE_TTL_SECS);
        assert_eq!(cfg.max_listings, DEFAULT_MAX_LISTINGS);
        assert_eq!(cfg.scrape_delay_ms_min, DEFAULT_SCRAPE_DELAY_MS_MIN);
        assert!(cfg.headless);
    }
}
