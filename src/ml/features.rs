use std::collections::HashMap;

use crate::internal::engine::tokenize;
use crate::ml::model::ModelArtifact;
use crate::types::{InternalAggregate, MarketSample};
use crate::upc::Query;

pub const FEATURE_COUNT: usize = 9;

/// Fixed feature order expected by the artifact.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "category_id",
    "subcategory_id",
    "brand_id",
    "department_id",
    "production_price",
    "days_on_shelf",
    "market_median",
    "market_sample_size",
    "market_std",
];

/// Assemble the feature vector from query, market sample, and internal
/// aggregate. Categorical values outside the training vocabulary land in
/// the reserved unknown bucket; missing numerics are imputed with the
/// per-column training means bundled in the artifact.
pub fn assemble(
    artifact: &ModelArtifact,
    query: &Query,
    market: &MarketSample,
    internal: Option<&InternalAggregate>,
) -> [f64; FEATURE_COUNT] {
    let tokens = tokenize(&query.canonical);
    let means = &artifact.feature_means;
    let vocab = &artifact.vocab;

    let category = internal
        .and_then(|i| vocab.category.get(&i.category.to_lowercase()).copied())
        .or_else(|| lookup_tokens(&vocab.category, &tokens))
        .unwrap_or(artifact.unknown_id);
    let subcategory = lookup_tokens(&vocab.subcategory, &tokens).unwrap_or(artifact.unknown_id);
    let brand = lookup_tokens(&vocab.brand, &tokens).unwrap_or(artifact.unknown_id);
    let department = lookup_tokens(&vocab.department, &tokens).unwrap_or(artifact.unknown_id);

    let production_price = internal.map(|i| i.production_price).unwrap_or(means[4]);
    let days_on_shelf = internal.map(|i| i.days_on_shelf).unwrap_or(means[5]);

    let (market_median, market_sample_size, market_std) = if market.is_usable() {
        (
            market.median.unwrap_or(means[6]),
            market.sample_size as f64,
            market.std_dev.unwrap_or(means[8]),
        )
    } else {
        (means[6], means[7], means[8])
    };

    [
        category,
        subcategory,
        brand,
        department,
        production_price,
        days_on_shelf,
        market_median,
        market_sample_size,
        market_std,
    ]
}

fn lookup_tokens(vocab: &HashMap<String, f64>, tokens: &[String]) -> Option<f64> {
    tokens.iter().find_map(|t| vocab.get(t).copied())
}

/// Per-call model confidence in [0, 1].
///
/// Each signal contributes a saturating share of 0.45 driven by its sample
/// size; a volatile market (high coefficient of variation) and extreme
/// sell-through rates shrink their shares. Having both signals adds a 0.10
/// bonus. Never reports full certainty.
pub fn signal_confidence(market: &MarketSample, internal: Option<&InternalAggregate>) -> f64 {
    let mut confidence = 0.0;

    if market.is_usable() {
        let n = market.sample_size as f64;
        let mut market_conf = 0.45 * (1.0 - (-n / 15.0).exp());
        if let (Some(median), Some(std_dev)) = (market.median, market.std_dev) {
            if median > 0.0 {
                let cv = std_dev / median;
                if cv > 0.5 {
                    market_conf *= 0.7;
                } else if cv > 0.3 {
                    market_conf *= 0.85;
                }
            }
        }
        confidence += market_conf;
    }

    if let Some(agg) = internal {
        let n = agg.matched_count as f64;
        let mut internal_conf = 0.45 * (1.0 - (-n / 50.0).exp());
        if agg.sell_through_rate > 0.8 || agg.sell_through_rate < 0.2 {
            internal_conf *= 0.9;
        }
        confidence += internal_conf;
    }

    if market.is_usable() && internal.is_some() {
        confidence += 0.10;
    }

    confidence.min(0.95)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::build_sample;
    use crate::ml::model::tests::test_artifact;
    use crate::types::{Condition, Listing, MarketSample};

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

    fn market(n: usize) -> MarketSample {
        build_sample((0..n).map(|i| listing(48.0 + i as f64 * 0.5)).collect())
    }

    fn aggregate() -> InternalAggregate {
        InternalAggregate {
            matched_count: 12,
            sold_count: 9,
            internal_price: 45.0,
            production_price: 22.0,
            sell_through_rate: 0.75,
            days_on_shelf: 25.0,
            category: "Shoes".to_string(),
        }
    }

    #[test]
    fn known_categoricals_resolve_through_the_vocab() {
        let artifact = test_artifact();
        let query = Query::parse("Nike Sneakers").unwrap();
        let values = assemble(&artifact, &query, &market(10), Some(&aggregate()));
        assert_eq!(values[0], 1.0, "category from the internal aggregate");
        assert_eq!(values[1], 1.0, "subcategory from a query token");
        assert_eq!(values[2], 1.0, "brand from a query token");
        assert_eq!(values[3], 0.0, "department is outside the query");
        assert_eq!(values[4], 22.0);
        assert_eq!(values[5], 25.0);
    }

    #[test]
    fn unknown_categoricals_fall_into_the_reserved_bucket() {
        let artifact = test_artifact();
        let query = Query::parse("mystery widget").unwrap();
        let values = assemble(&artifact, &query, &market(10), None);
        assert_eq!(values[0], artifact.unknown_id);
        assert_eq!(values[2], artifact.unknown_id);
    }

    #[test]
    fn missing_signals_are_imputed_with_training_means() {
        let artifact = test_artifact();
        let query = Query::parse("nike").unwrap();
        let values = assemble(&artifact, &query, &MarketSample::error("down"), None);
        assert_eq!(values[4], artifact.feature_means[4]);
        assert_eq!(values[5], artifact.feature_means[5]);
        assert_eq!(values[6], artifact.feature_means[6]);
        assert_eq!(values[7], artifact.feature_means[7]);
        assert_eq!(values[8], artifact.feature_means[8]);
    }

    #[test]
    fn confidence_grows_with_sample_sizes_and_never_hits_one() {
        let none = signal_confidence(&MarketSample::error("down"), None);
        assert_eq!(none, 0.0);

        let small = signal_confidence(&market(3), None);
        let large = signal_confidence(&market(25), None);
        assert!(small < large, "{small} should be below {large}");
        assert!(large < 0.45 + 1e-9);

        let both = signal_confidence(&market(25), Some(&aggregate()));
        assert!(both > large);
        assert!(both <= 0.95);
    }

    #[test]
    fn extreme_sell_through_shrinks_internal_confidence() {
        let mut agg = aggregate();
        let normal = signal_confidence(&MarketSample::error("down"), Some(&agg));
        agg.sell_through_rate = 0.95;
        let extreme = signal_confidence(&MarketSample::error("down"), Some(&agg));
        assert!(extreme < normal);
    }
}
