use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::api::latency::DecisionLatency;
use crate::cache::{normalize_key, RequestCache};
use crate::engine;
use crate::error::Result;
use crate::internal::MatchEngine;
use crate::ml::MlAdapter;
use crate::scrape::ScrapeSession;
use crate::types::{InternalAggregate, Recommendation};
use crate::upc::Query;

/// Composes the full pricing decision: validation, caching, the concurrent
/// internal-match and market-scrape fan-out, model inference, and the
/// recommendation engine.
#[derive(Clone)]
pub struct Pipeline {
    session: ScrapeSession,
    matcher: Arc<MatchEngine>,
    ml: Arc<MlAdapter>,
    cache: Arc<RequestCache>,
    latency: Arc<DecisionLatency>,
}

impl Pipeline {
    pub fn new(
        session: ScrapeSession,
        matcher: Arc<MatchEngine>,
        ml: Arc<MlAdapter>,
        cache: Arc<RequestCache>,
        latency: Arc<DecisionLatency>,
    ) -> Self {
        Self { session, matcher, ml, cache, latency }
    }

    /// Price one query. `internal_override`, when given, replaces the
    /// matching engine's output for this call and skips the shared cache:
    /// caller-supplied data must never be served to other callers.
    pub async fn recommend(
        &self,
        raw_query: &str,
        internal_override: Option<InternalAggregate>,
    ) -> Result<Recommendation> {
        let started = Instant::now();
        let query = Query::parse(raw_query)?;

        let result = if internal_override.is_some() {
            self.compute(query, internal_override).await
        } else {
            let key = normalize_key(&query.canonical);
            let this = self.clone();
            let query = query.clone();
            self.cache
                .get_or_compute(&key, move || async move { this.compute(query, None).await })
                .await
        };

        self.latency.observe(started.elapsed());
        result
    }

    async fn compute(
        &self,
        query: Query,
        internal_override: Option<InternalAggregate>,
    ) -> Result<Recommendation> {
        let (internal, market) = tokio::join!(
            async {
                match internal_override {
                    Some(provided) => Some(provided),
                    None => self.matcher.lookup(&query),
                }
            },
            self.session.fetch(&query.canonical),
        );

        let ml = self.ml.predict(&query, &market, internal.as_ref());
        let recommendation = engine::recommend(&query.canonical, &market, internal.as_ref(), &ml)?;

        info!(
            query = %recommendation.query,
            method = %recommendation.prediction_method,
            weighting = recommendation.internal_vs_market_weighting,
            confidence = recommendation.confidence_score,
            warnings = ?recommendation.warnings,
            "pricing decision"
        );

        Ok(recommendation)
    }
}
