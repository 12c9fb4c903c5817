use chrono::Utc;

use crate::config::{LOW_SAMPLE_SIZE, OUTLIER_HIGH_FACTOR, OUTLIER_LOW_FACTOR};
use crate::types::{Listing, MarketSample, SampleStatus};

/// Aggregate parsed listings into a market sample.
///
/// Stats are computed over an outlier-filtered subset: listings priced
/// outside `[0.25 x raw_median, 4.0 x raw_median]` are discarded, then
/// median / mean / min / max / std recomputed over the survivors. The
/// filter window is anchored on the unfiltered median.
pub fn build_sample(listings: Vec<Listing>) -> MarketSample {
    if listings.is_empty() {
        return MarketSample {
            listings,
            median: None,
            mean: None,
            min: None,
            max: None,
            std_dev: None,
            sample_size: 0,
            sold_count: 0,
            low_confidence: true,
            status: SampleStatus::Empty,
            timestamp: Utc::now(),
        };
    }

    let raw_median = median(&mut listings.iter().map(|l| l.price).collect::<Vec<_>>())
        .unwrap_or(0.0);
    let low = OUTLIER_LOW_FACTOR * raw_median;
    let high = OUTLIER_HIGH_FACTOR * raw_median;

    let filtered: Vec<&Listing> = listings
        .iter()
        .filter(|l| l.price >= low && l.price <= high)
        .collect();

    let mut prices: Vec<f64> = filtered.iter().map(|l| l.price).collect();
    let sample_size = prices.len();
    let sold_count = filtered.iter().filter(|l| l.sold_date.is_some()).count();

    let med = median(&mut prices);
    let mean = if prices.is_empty() {
        None
    } else {
        Some(prices.iter().sum::<f64>() / prices.len() as f64)
    };
    let min = prices.iter().copied().fold(None, |acc: Option<f64>, p| {
        Some(acc.map_or(p, |a| a.min(p)))
    });
    let max = prices.iter().copied().fold(None, |acc: Option<f64>, p| {
        Some(acc.map_or(p, |a| a.max(p)))
    });
    let std_dev = mean.map(|m| {
        let var = prices.iter().map(|p| (p - m).powi(2)).sum::<f64>() / prices.len() as f64;
        var.sqrt()
    });

    MarketSample {
        listings,
        median: med,
        mean,
        min,
        max,
        std_dev,
        sample_size,
        sold_count,
        low_confidence: sample_size < LOW_SAMPLE_SIZE,
        status: SampleStatus::Ok,
        timestamp: Utc::now(),
    }
}

/// Middle value after sorting ascending; for even counts, the mean of the
/// two middle values.
fn median(values: &mut Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 0 {
        Some((values[n / 2 - 1] + values[n / 2]) / 2.0)
    } else {
        Some(values[n / 2])
    }
}
