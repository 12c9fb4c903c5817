use crate::error::{AppError, Result};
use crate::types::{
    round2, InternalAggregate, MarketSample, MarketSummary, MlSignal, PredictionMethod,
    Recommendation, SampleStatus,
};

/// Model predictions are trusted only above this per-call confidence.
const ML_CONFIDENCE_FLOOR: f64 = 0.7;

/// Fixed blend applied when the model drives the price.
const ML_BLEND: (f64, f64, f64) = (0.6, 0.3, 0.1);

const HIGH_SELL_THROUGH: f64 = 0.7;
const LOW_SELL_THROUGH: f64 = 0.3;
const STALE_SHELF_DAYS: f64 = 60.0;
const THIN_MARKET_SAMPLE: usize = 5;
const DEEP_MARKET_SAMPLE: usize = 20;

/// Price deviation from the market median beyond this share draws a
/// confidence penalty and a warning.
const DEVIATION_LIMIT: f64 = 0.30;

pub const WARN_LOW_SAMPLE: &str = "low market sample";
pub const WARN_STALE_INVENTORY: &str = "stale inventory";
pub const WARN_DEVIATION: &str = "large deviation from market median";
pub const WARN_NO_INTERNAL: &str = "no internal data";
pub const WARN_SCRAPE_FAILURE: &str = "scrape failure";
pub const WARN_ML_UNAVAILABLE: &str = "ml unavailable";

/// One applied weighting adjustment, kept for the rationale.
#[derive(Debug, Clone)]
struct WeightFactor {
    label: &'static str,
    delta: f64,
}

/// Join market, internal, and model signals into a recommendation.
///
/// Weighting starts at 0.5 and moves by additive deltas, clamped to [0, 1];
/// a dead scrape forces all-internal and a missing internal aggregate
/// forces all-market. The model substitutes a fixed 60/30/10 blend when it
/// is confident enough. With no usable signal at all the call fails, except
/// for the single-production-record case which prices at 1.5x production.
pub fn recommend(
    query: &str,
    market: &MarketSample,
    internal: Option<&InternalAggregate>,
    ml: &MlSignal,
) -> Result<Recommendation> {
    let (weighting, factors) = weighting(market, internal);
    let (price, method) = blend_price(market, internal, ml, weighting)?;
    let price = round2(price);

    let confidence = confidence_score(price, market, internal, ml);
    let warnings = warnings(price, market, internal, ml);
    let rationale = rationale(method, weighting, price, market, internal, ml, &factors);

    Ok(Recommendation {
        query: query.to_string(),
        recommended_price: price,
        internal_vs_market_weighting: weighting,
        confidence_score: confidence,
        rationale,
        prediction_method: method,
        market: (market.status != SampleStatus::Error).then(|| MarketSummary::from_sample(market)),
        internal: internal.cloned(),
        warnings,
    })
}

fn weighting(market: &MarketSample, internal: Option<&InternalAggregate>) -> (f64, Vec<WeightFactor>) {
    let mut factors: Vec<WeightFactor> = Vec::new();
    let mut push = |label, delta| factors.push(WeightFactor { label, delta });

    if let Some(agg) = internal {
        if agg.sell_through_rate > HIGH_SELL_THROUGH {
            push("high sell-through", 0.20);
        }
        if agg.sell_through_rate < LOW_SELL_THROUGH {
            push("low sell-through", -0.15);
        }
        if agg.days_on_shelf > STALE_SHELF_DAYS {
            push("stale inventory", -0.15);
        }
    }
    if market.sample_size < THIN_MARKET_SAMPLE {
        push("thin market sample", 0.20);
    }
    if market.sample_size > DEEP_MARKET_SAMPLE {
        push("deep market sample", -0.10);
    }

    let mut w = 0.5 + factors.iter().map(|f| f.delta).sum::<f64>();
    w = w.clamp(0.0, 1.0);

    // Overrides: a missing side hands its whole weight to the other.
    if internal.is_none() {
        w = 0.0;
        factors = vec![WeightFactor { label: "no internal data", delta: -0.5 }];
    }
    if market.status != SampleStatus::Ok {
        w = 1.0;
        factors = vec![WeightFactor { label: "market sample unusable", delta: 0.5 }];
    }

    (w, factors)
}

fn blend_price(
    market: &MarketSample,
    internal: Option<&InternalAggregate>,
    ml: &MlSignal,
    w_internal: f64,
) -> Result<(f64, PredictionMethod)> {
    let market_median = market.is_usable().then(|| market.median).flatten();
    let internal_price = internal.map(|i| i.internal_price);

    if let MlSignal::Ready { price, confidence } = ml {
        if *confidence >= ML_CONFIDENCE_FLOOR {
            let (w_ml, w_market, w_int) = ML_BLEND;
            let mut terms: Vec<(f64, f64)> = vec![(w_ml, *price)];
            if let Some(median) = market_median {
                terms.push((w_market, median));
            }
            if let Some(price) = internal_price {
                terms.push((w_int, price));
            }
            // Omitted terms redistribute proportionally to the rest.
            let total: f64 = terms.iter().map(|(w, _)| w).sum();
            let blended = terms.iter().map(|(w, v)| w * v).sum::<f64>() / total;
            return Ok((blended, PredictionMethod::Ml));
        }
    }

    match (internal_price, market_median) {
        (Some(internal_price), Some(median)) => {
            let price = w_internal * internal_price + (1.0 - w_internal) * median;
            Ok((price, method_for_weight(w_internal)))
        }
        (Some(internal_price), None) => {
            // A single never-sold record is production data, not pricing
            // history; fall back to a margin over production cost.
            if let Some(agg) = internal {
                if agg.matched_count == 1 && agg.sold_count == 0 {
                    return Ok((agg.production_price * 1.5, PredictionMethod::Rules));
                }
            }
            Ok((internal_price, PredictionMethod::Internal))
        }
        (None, Some(median)) => Ok((median, PredictionMethod::Market)),
        (None, None) => Err(AppError::Internal(
            "no market, internal, or model signal for this query".to_string(),
        )),
    }
}

fn method_for_weight(w_internal: f64) -> PredictionMethod {
    if w_internal < 0.5 {
        PredictionMethod::Market
    } else {
        PredictionMethod::Internal
    }
}

fn confidence_score(
    price: f64,
    market: &MarketSample,
    internal: Option<&InternalAggregate>,
    ml: &MlSignal,
) -> u8 {
    let mut score: i32 = 50;
    if market.sample_size >= 10 {
        score += 20;
    }
    if internal.map_or(false, |i| i.matched_count >= 5) {
        score += 10;
    }
    if ml.is_available() {
        score += 15;
    }
    if deviates_from_median(price, market) {
        score -= 15;
    }
    if market.status == SampleStatus::Error {
        score -= 20;
    }
    if internal.is_none() {
        score -= 10;
    }
    score.clamp(0, 100) as u8
}

fn deviates_from_median(price: f64, market: &MarketSample) -> bool {
    match market.median {
        Some(median) => (price - median).abs() / median.max(1.0) > DEVIATION_LIMIT,
        None => false,
    }
}

fn warnings(
    price: f64,
    market: &MarketSample,
    internal: Option<&InternalAggregate>,
    ml: &MlSignal,
) -> Vec<String> {
    let mut warnings = Vec::new();
    if market.status == SampleStatus::Error {
        warnings.push(WARN_SCRAPE_FAILURE.to_string());
    } else if market.sample_size < THIN_MARKET_SAMPLE {
        warnings.push(WARN_LOW_SAMPLE.to_string());
    }
    if internal.is_none() {
        warnings.push(WARN_NO_INTERNAL.to_string());
    }
    if internal.map_or(false, |i| i.days_on_shelf > STALE_SHELF_DAYS) {
        warnings.push(WARN_STALE_INVENTORY.to_string());
    }
    if deviates_from_median(price, market) {
        warnings.push(WARN_DEVIATION.to_string());
    }
    if let MlSignal::Degraded(_) = ml {
        warnings.push(WARN_ML_UNAVAILABLE.to_string());
    }
    warnings
}

/// Deterministic one-sentence rationale: the blend split plus the two
/// largest weighting adjustments.
fn rationale(
    method: PredictionMethod,
    w_internal: f64,
    price: f64,
    market: &MarketSample,
    internal: Option<&InternalAggregate>,
    ml: &MlSignal,
    factors: &[WeightFactor],
) -> String {
    let split = format!(
        "{:.0}% internal / {:.0}% market",
        w_internal * 100.0,
        (1.0 - w_internal) * 100.0
    );
    let dominant = dominant_factors(factors);

    match method {
        PredictionMethod::Ml => {
            let confidence = match ml {
                MlSignal::Ready { confidence, .. } => *confidence,
                _ => 0.0,
            };
            format!(
                "Model-led price ${price:.2} (model confidence {confidence:.2}) blended over \
                 market median and internal price at 60/30/10; source weighting {split}."
            )
        }
        PredictionMethod::Rules => format!(
            "No market or model signal; priced at 1.5x the production price of the single \
             matched record (${price:.2})."
        ),
        PredictionMethod::Market | PredictionMethod::Internal => {
            let market_part = match market.median {
                Some(median) => {
                    format!("market median ${median:.2} from {} listings", market.sample_size)
                }
                None => "no usable market sample".to_string(),
            };
            let internal_part = match internal {
                Some(agg) => format!(
                    "internal price ${:.2} from {} records",
                    agg.internal_price, agg.matched_count
                ),
                None => "no internal data".to_string(),
            };
            format!(
                "Weighted {split} ({dominant}); {market_part}; {internal_part}; \
                 recommended ${price:.2}."
            )
        }
    }
}

fn dominant_factors(factors: &[WeightFactor]) -> String {
    let mut ranked: Vec<&WeightFactor> = factors.iter().collect();
    ranked.sort_by(|a, b| {
        b.delta
            .abs()
            .partial_cmp(&a.delta.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top: Vec<String> = ranked
        .iter()
        .take(2)
        .map(|f| format!("{} {:+.2}", f.label, f.delta))
        .collect();
    if top.is_empty() {
        "no adjustments".to_string()
    } else {
        format!("dominant factors: {}", top.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::build_sample;
    use crate::types::{Condition, Listing};

    fn listing(price: f64) -> Listing {
        Listing {
            title: "Nike sneakers".to_string(),
            price,
            currency: "USD".to_string(),
            condition: Condition::Used,
            sold_date: None,
            url: String::new(),
        }
    }

    /// A usable market sample with an exact median and a chosen size.
    fn market(median: f64, n: usize) -> MarketSample {
        let mut sample = build_sample((0..n).map(|_| listing(median)).collect());
        assert_eq!(sample.median, Some(median));
        sample.sample_size = n;
        sample
    }

    fn aggregate(price: f64, sell_through: f64, days: f64) -> InternalAggregate {
        InternalAggregate {
            matched_count: 3,
            sold_count: 2,
            internal_price: price,
            production_price: price * 0.6,
            sell_through_rate: sell_through,
            days_on_shelf: days,
            category: "Shoes".to_string(),
        }
    }

    #[test]
    fn strong_internal_history_with_deep_market_sample() {
        let internal = aggregate(45.0, 0.85, 25.0);
        let market = market(52.0, 25);
        let rec = recommend("nike", &market, Some(&internal), &MlSignal::Absent).unwrap();

        assert!((rec.internal_vs_market_weighting - 0.60).abs() < 1e-9);
        assert_eq!(rec.recommended_price, 47.80);
        assert_eq!(rec.confidence_score, 70);
        assert_eq!(rec.prediction_method, PredictionMethod::Internal);
        assert!(rec.warnings.is_empty(), "warnings: {:?}", rec.warnings);
    }

    #[test]
    fn market_only_query_goes_all_market() {
        let market = market(30.0, 25);
        let rec = recommend("nike", &market, None, &MlSignal::Absent).unwrap();

        assert_eq!(rec.internal_vs_market_weighting, 0.0);
        assert_eq!(rec.recommended_price, 30.0);
        assert_eq!(rec.confidence_score, 60);
        assert_eq!(rec.prediction_method, PredictionMethod::Market);
        assert_eq!(rec.warnings, vec![WARN_NO_INTERNAL.to_string()]);
    }

    #[test]
    fn scrape_failure_goes_all_internal() {
        let internal = aggregate(45.0, 0.85, 25.0);
        let market = MarketSample::error("blocked");
        let rec = recommend("nike", &market, Some(&internal), &MlSignal::Absent).unwrap();

        assert_eq!(rec.internal_vs_market_weighting, 1.0);
        assert_eq!(rec.recommended_price, 45.0);
        assert_eq!(rec.confidence_score, 30);
        assert_eq!(rec.prediction_method, PredictionMethod::Internal);
        assert_eq!(rec.warnings, vec![WARN_SCRAPE_FAILURE.to_string()]);
        assert!(rec.market.is_none(), "failed scrapes carry no market block");
    }

    #[test]
    fn confident_model_substitutes_the_fixed_blend() {
        let internal = aggregate(45.0, 0.85, 25.0);
        let market = market(52.0, 25);
        let ml = MlSignal::Ready { price: 50.0, confidence: 0.9 };
        let rec = recommend("nike", &market, Some(&internal), &ml).unwrap();

        assert_eq!(rec.recommended_price, 50.10);
        assert_eq!(rec.prediction_method, PredictionMethod::Ml);
        assert_eq!(rec.confidence_score, 85);
    }

    #[test]
    fn unconfident_model_is_ignored_for_pricing_but_counted_in_confidence() {
        let internal = aggregate(45.0, 0.85, 25.0);
        let market = market(52.0, 25);
        let ml = MlSignal::Ready { price: 500.0, confidence: 0.4 };
        let rec = recommend("nike", &market, Some(&internal), &ml).unwrap();

        assert_eq!(rec.prediction_method, PredictionMethod::Internal);
        assert_eq!(rec.recommended_price, 47.80);
        assert_eq!(rec.confidence_score, 85, "availability still adds 15");
    }

    #[test]
    fn ml_blend_redistributes_when_market_is_missing() {
        let internal = aggregate(45.0, 0.85, 25.0);
        let market = MarketSample::error("blocked");
        let ml = MlSignal::Ready { price: 50.0, confidence: 0.9 };
        let rec = recommend("nike", &market, Some(&internal), &ml).unwrap();

        // (0.6 * 50 + 0.1 * 45) / 0.7
        assert_eq!(rec.recommended_price, 49.29);
        assert_eq!(rec.prediction_method, PredictionMethod::Ml);
    }

    #[test]
    fn no_signal_at_all_is_an_internal_error() {
        let market = MarketSample::error("blocked");
        let err = recommend("nike", &market, None, &MlSignal::Absent).unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn single_production_record_uses_the_rules_margin() {
        let internal = InternalAggregate {
            matched_count: 1,
            sold_count: 0,
            internal_price: 20.0,
            production_price: 20.0,
            sell_through_rate: 0.0,
            days_on_shelf: 12.0,
            category: "Shoes".to_string(),
        };
        let market = MarketSample::error("blocked");
        let rec = recommend("nike", &market, Some(&internal), &MlSignal::Absent).unwrap();

        assert_eq!(rec.prediction_method, PredictionMethod::Rules);
        assert_eq!(rec.recommended_price, 30.0);
    }

    #[test]
    fn weighting_rises_past_the_sell_through_threshold() {
        let market = market(50.0, 10);
        let below = recommend("q", &market, Some(&aggregate(45.0, 0.65, 25.0)), &MlSignal::Absent)
            .unwrap()
            .internal_vs_market_weighting;
        let above = recommend("q", &market, Some(&aggregate(45.0, 0.75, 25.0)), &MlSignal::Absent)
            .unwrap()
            .internal_vs_market_weighting;
        assert!(above > below, "{above} must exceed {below}");
        assert!((above - below - 0.20).abs() < 1e-9);
    }

    #[test]
    fn weighting_is_clamped_to_the_unit_interval() {
        // Low sell-through + stale shelf + deep market stack to -0.40.
        let market = market(50.0, 25);
        let rec = recommend("q", &market, Some(&aggregate(45.0, 0.1, 90.0)), &MlSignal::Absent)
            .unwrap();
        assert!((rec.internal_vs_market_weighting - 0.10).abs() < 1e-9);

        // Thin market + high sell-through stack to the +0.40 extreme.
        let thin = market_with_size(50.0, 3);
        let rec = recommend("q", &thin, Some(&aggregate(45.0, 0.9, 10.0)), &MlSignal::Absent)
            .unwrap();
        assert!(rec.internal_vs_market_weighting <= 1.0);
        assert!((rec.internal_vs_market_weighting - 0.90).abs() < 1e-9);
    }

    fn market_with_size(median: f64, n: usize) -> MarketSample {
        market(median, n)
    }

    #[test]
    fn stale_inventory_and_deviation_draw_warnings() {
        let internal = aggregate(10.0, 0.5, 90.0);
        let market = market(52.0, 25);
        let rec = recommend("q", &market, Some(&internal), &MlSignal::Absent).unwrap();

        // w = 0.5 - 0.15 - 0.10 = 0.25 -> price 0.25*10 + 0.75*52 = 41.5,
        // within 30% of the median, so only the stale warning fires.
        assert_eq!(rec.prediction_method, PredictionMethod::Market);
        assert!(rec.warnings.contains(&WARN_STALE_INVENTORY.to_string()));

        // An internal price far below market pushes the blend past the
        // deviation limit once weighting favors internal.
        let internal = aggregate(10.0, 0.9, 10.0);
        let thin = market_with_size(52.0, 3);
        let rec = recommend("q", &thin, Some(&internal), &MlSignal::Absent).unwrap();
        assert!(rec.warnings.contains(&WARN_DEVIATION.to_string()));
        assert!(rec.warnings.contains(&WARN_LOW_SAMPLE.to_string()));
    }

    #[test]
    fn degraded_model_draws_a_warning() {
        let market = market(30.0, 25);
        let ml = MlSignal::Degraded("artifact truncated".to_string());
        let rec = recommend("q", &market, None, &ml).unwrap();
        assert!(rec.warnings.contains(&WARN_ML_UNAVAILABLE.to_string()));
        assert_eq!(rec.prediction_method, PredictionMethod::Market);
    }

    #[test]
    fn rationale_is_deterministic_and_names_dominant_factors() {
        let internal = aggregate(45.0, 0.85, 25.0);
        let market = market(52.0, 25);
        let a = recommend("nike", &market, Some(&internal), &MlSignal::Absent).unwrap();
        let b = recommend("nike", &market, Some(&internal), &MlSignal::Absent).unwrap();
        assert_eq!(a.rationale, b.rationale);
        assert!(a.rationale.contains("60% internal / 40% market"), "{}", a.rationale);
        assert!(a.rationale.contains("high sell-through"), "{}", a.rationale);
        assert!(a.rationale.contains("deep market sample"), "{}", a.rationale);
    }

    #[test]
    fn recommended_price_is_never_negative() {
        let internal = aggregate(0.0, 0.5, 10.0);
        let market = market(0.01, 25);
        let rec = recommend("q", &market, Some(&internal), &MlSignal::Absent).unwrap();
        assert!(rec.recommended_price >= 0.0);
    }
}
