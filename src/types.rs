use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// One scraped marketplace entry. Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    pub price: f64,
    pub currency: String,
    pub condition: Condition,
    pub sold_date: Option<NaiveDate>,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    New,
    Used,
    Refurbished,
    Unknown,
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Condition::New => "new",
            Condition::Used => "used",
            Condition::Refurbished => "refurbished",
            Condition::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Market sample
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    /// Scrape succeeded and produced at least one listing.
    Ok,
    /// Scrape succeeded but returned no rows.
    Empty,
    /// Navigation timeout, missing root selector, or a driver error.
    Error,
}

impl std::fmt::Display for SampleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SampleStatus::Ok => "ok",
            SampleStatus::Empty => "empty",
            SampleStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The outcome of scraping one query: the parsed listings plus stats derived
/// from the outlier-filtered price set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSample {
    pub listings: Vec<Listing>,
    pub median: Option<f64>,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Standard deviation of the filtered prices.
    pub std_dev: Option<f64>,
    /// Count of listings that survived outlier filtering.
    pub sample_size: usize,
    /// Count of filtered listings with a non-null sold date.
    pub sold_count: usize,
    pub low_confidence: bool,
    pub status: SampleStatus,
    pub timestamp: DateTime<Utc>,
}

impl MarketSample {
    pub fn error(reason: &str) -> Self {
        tracing::warn!("market sample unavailable: {reason}");
        Self {
            listings: Vec::new(),
            median: None,
            mean: None,
            min: None,
            max: None,
            std_dev: None,
            sample_size: 0,
            sold_count: 0,
            low_confidence: true,
            status: SampleStatus::Error,
            timestamp: Utc::now(),
        }
    }

    /// A sample is usable for pricing when the scrape succeeded and produced
    /// a median.
    pub fn is_usable(&self) -> bool {
        self.status == SampleStatus::Ok && self.median.is_some()
    }
}

// ---------------------------------------------------------------------------
// Internal sales records
// ---------------------------------------------------------------------------

/// One row of historical sales. Loaded once at startup from the configured
/// source and immutable for the process lifetime.
#[derive(Debug, Clone, Deserialize, sqlx::FromRow)]
pub struct InternalRecord {
    pub item_id: String,
    pub department: String,
    pub category: String,
    pub subcategory: String,
    pub brand: String,
    #[serde(default)]
    #[sqlx(default)]
    pub upc: Option<String>,
    pub production_date: Option<NaiveDate>,
    pub sold_date: Option<NaiveDate>,
    pub days_to_sell: Option<f64>,
    pub production_price: f64,
    pub sold_price: Option<f64>,
}

impl InternalRecord {
    pub fn is_sold(&self) -> bool {
        self.sold_price.is_some()
    }
}

/// The outcome of matching a query against the internal records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalAggregate {
    pub matched_count: usize,
    /// Records in the aggregate with a non-null sold price.
    pub sold_count: usize,
    /// Mean sold price, falling back to mean production price when no
    /// matched record was ever sold.
    pub internal_price: f64,
    /// Mean production price over the matched records.
    pub production_price: f64,
    pub sell_through_rate: f64,
    pub days_on_shelf: f64,
    /// Modal category among the matched records.
    pub category: String,
}

// ---------------------------------------------------------------------------
// ML signal
// ---------------------------------------------------------------------------

/// What the model adapter reports for one call.
#[derive(Debug, Clone)]
pub enum MlSignal {
    /// No model artifact was configured for this process.
    Absent,
    /// A model was configured but could not be loaded or could not produce
    /// a prediction.
    Degraded(String),
    /// The model produced a price with a per-call confidence in [0, 1].
    Ready { price: f64, confidence: f64 },
}

impl MlSignal {
    pub fn is_available(&self) -> bool {
        matches!(self, MlSignal::Ready { .. })
    }
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionMethod {
    Ml,
    Market,
    Internal,
    Rules,
}

impl std::fmt::Display for PredictionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PredictionMethod::Ml => "ml",
            PredictionMethod::Market => "market",
            PredictionMethod::Internal => "internal",
            PredictionMethod::Rules => "rules",
        };
        write!(f, "{s}")
    }
}

/// Aggregated market figures carried in a recommendation. The per-request
/// listing vector is dropped once the recommendation is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub median_price: Option<f64>,
    pub average_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub sample_size: usize,
    pub sold_listings_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl MarketSummary {
    pub fn from_sample(sample: &MarketSample) -> Self {
        Self {
            median_price: sample.median.map(round2),
            average_price: sample.mean.map(round2),
            min_price: sample.min.map(round2),
            max_price: sample.max.map(round2),
            sample_size: sample.sample_size,
            sold_listings_count: sample.sold_count,
            timestamp: sample.timestamp,
        }
    }
}

/// The final artifact returned to callers and held in the request cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub query: String,
    pub recommended_price: f64,
    /// 0 = all market, 1 = all internal.
    pub internal_vs_market_weighting: f64,
    pub confidence_score: u8,
    pub rationale: String,
    pub prediction_method: PredictionMethod,
    /// None when the scrape failed outright.
    pub market: Option<MarketSummary>,
    pub internal: Option<InternalAggregate>,
    pub warnings: Vec<String>,
}

/// Round a price to cents.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
