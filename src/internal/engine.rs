use std::collections::HashMap;

use chrono::{NaiveDate, Utc};

use crate::types::{InternalAggregate, InternalRecord};
use crate::upc::Query;

/// Indexed read-only view of the internal sales records. Built once at
/// startup; reads take no locks.
pub struct MatchEngine {
    records: Vec<InternalRecord>,
    upc_index: HashMap<String, Vec<usize>>,
    max_matches: usize,
}

impl MatchEngine {
    pub fn new(records: Vec<InternalRecord>, max_matches: usize) -> Self {
        let mut upc_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            if let Some(upc) = &record.upc {
                upc_index.entry(upc.clone()).or_default().push(i);
            }
        }
        Self { records, upc_index, max_matches }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Match a query against the records and aggregate the best candidates.
    /// Returns None when nothing matches. Never fails.
    pub fn lookup(&self, query: &Query) -> Option<InternalAggregate> {
        let indices = if query.is_upc() {
            match self.upc_index.get(&query.canonical) {
                Some(hits) => self.rank_by_recency(hits),
                None => self.rank_by_tokens(&tokenize(&query.canonical)),
            }
        } else {
            self.rank_by_tokens(&tokenize(&query.canonical))
        };

        if indices.is_empty() {
            return None;
        }
        Some(self.aggregate(&indices))
    }

    /// Exact-UPC hits, most recently sold first, capped.
    fn rank_by_recency(&self, hits: &[usize]) -> Vec<usize> {
        let mut indices: Vec<usize> = hits.to_vec();
        indices.sort_by(|&a, &b| cmp_recency(&self.records[a], &self.records[b]));
        indices.truncate(self.max_matches);
        indices
    }

    /// Score every record by the number of distinct query tokens appearing
    /// as a substring of brand, category, subcategory, or department. Zero
    /// scores are excluded; ties break toward the most recent sold date.
    fn rank_by_tokens(&self, tokens: &[String]) -> Vec<usize> {
        if tokens.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(usize, usize)> = self
            .records
            .iter()
            .enumerate()
            .filter_map(|(i, record)| {
                let score = token_score(record, tokens);
                (score > 0).then_some((i, score))
            })
            .collect();

        scored.sort_by(|&(a, sa), &(b, sb)| {
            sb.cmp(&sa)
                .then_with(|| cmp_recency(&self.records[a], &self.records[b]))
        });
        scored.truncate(self.max_matches);
        scored.into_iter().map(|(i, _)| i).collect()
    }

    fn aggregate(&self, indices: &[usize]) -> InternalAggregate {
        let matched: Vec<&InternalRecord> = indices.iter().map(|&i| &self.records[i]).collect();
        let total = matched.len();

        let sold_prices: Vec<f64> = matched.iter().filter_map(|r| r.sold_price).collect();
        let sold_count = sold_prices.len();
        let production_price = mean(matched.iter().map(|r| r.production_price)).unwrap_or(0.0);
        let internal_price = mean(sold_prices.iter().copied()).unwrap_or(production_price);

        let sell_through_rate = sold_count as f64 / total as f64;

        // Mean days-to-sell over sold records; unsold records fall back to
        // their current shelf age.
        let days_on_shelf = mean(matched.iter().filter_map(|r| r.days_to_sell))
            .or_else(|| {
                let today = Utc::now().date_naive();
                mean(
                    matched
                        .iter()
                        .filter(|r| !r.is_sold())
                        .filter_map(|r| r.production_date.map(|d| age_days(d, today))),
                )
            })
            .unwrap_or(0.0);

        InternalAggregate {
            matched_count: total,
            sold_count,
            internal_price,
            production_price,
            sell_through_rate,
            days_on_shelf,
            category: modal_category(&matched),
        }
    }
}

/// Lowercase, strip punctuation, split on whitespace.
pub fn tokenize(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect()
}

fn token_score(record: &InternalRecord, tokens: &[String]) -> usize {
    let fields = [
        record.brand.to_lowercase(),
        record.category.to_lowercase(),
        record.subcategory.to_lowercase(),
        record.department.to_lowercase(),
    ];
    tokens
        .iter()
        .filter(|token| fields.iter().any(|f| f.contains(token.as_str())))
        .count()
}

/// Most recent sold date first; unsold records sort last.
fn cmp_recency(a: &InternalRecord, b: &InternalRecord) -> std::cmp::Ordering {
    match (b.sold_date, a.sold_date) {
        (Some(db), Some(da)) => db.cmp(&da),
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        sum += v;
        n += 1;
    }
    (n > 0).then(|| sum / n as f64)
}

fn age_days(production: NaiveDate, today: NaiveDate) -> f64 {
    (today - production).num_days().max(0) as f64
}

fn modal_category(matched: &[&InternalRecord]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in matched {
        *counts.entry(record.category.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(category, _)| category.to_string())
        .unwrap_or_default()
}
