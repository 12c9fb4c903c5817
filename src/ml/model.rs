use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::ml::features::{self, FEATURE_COUNT, FEATURE_NAMES};
use crate::types::{InternalAggregate, MarketSample, MlSignal};
use crate::upc::Query;

/// Serialized regressor artifact: boosted trees plus the training-time
/// constants inference depends on (per-column means for imputation and the
/// categorical vocabularies). An artifact missing any of these cannot be
/// used.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub feature_means: Vec<f64>,
    pub vocab: Vocabularies,
    /// Reserved id for categorical values outside the training vocabulary.
    pub unknown_id: f64,
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vocabularies {
    pub category: HashMap<String, f64>,
    pub subcategory: HashMap<String, f64>,
    pub brand: HashMap<String, f64>,
    pub department: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

/// One node of a regression tree. `feature < 0` marks a leaf carrying
/// `value`; interior nodes route `features[feature] < threshold` to `left`,
/// otherwise to `right`.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeNode {
    pub feature: i32,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub left: usize,
    #[serde(default)]
    pub right: usize,
    #[serde(default)]
    pub value: f64,
}

impl ModelArtifact {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.feature_names != FEATURE_NAMES {
            return Err(format!(
                "artifact feature order {:?} does not match the expected {:?}",
                self.feature_names, FEATURE_NAMES
            ));
        }
        if self.feature_means.len() != FEATURE_COUNT {
            return Err(format!(
                "artifact carries {} feature means, expected {FEATURE_COUNT}",
                self.feature_means.len()
            ));
        }
        if self.trees.is_empty() {
            return Err("artifact has no trees".to_string());
        }
        for (ti, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(format!("tree {ti} is empty"));
            }
            for (ni, node) in tree.nodes.iter().enumerate() {
                if node.feature >= 0 {
                    if node.feature as usize >= FEATURE_COUNT {
                        return Err(format!("tree {ti} node {ni} splits on unknown feature"));
                    }
                    if node.left >= tree.nodes.len() || node.right >= tree.nodes.len() {
                        return Err(format!("tree {ti} node {ni} has out-of-range children"));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn predict(&self, feature_values: &[f64; FEATURE_COUNT]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| walk(t, feature_values)).sum();
        self.base_score + sum
    }
}

fn walk(tree: &Tree, feature_values: &[f64; FEATURE_COUNT]) -> f64 {
    let mut idx = 0usize;
    // Bounded by node count; indices were validated at load.
    for _ in 0..tree.nodes.len() {
        let node = &tree.nodes[idx];
        if node.feature < 0 {
            return node.value;
        }
        idx = if feature_values[node.feature as usize] < node.threshold {
            node.left
        } else {
            node.right
        };
    }
    0.0
}

fn read_artifact(path: &str) -> crate::error::Result<ModelArtifact> {
    let raw = std::fs::read_to_string(path)?;
    let artifact: ModelArtifact = serde_json::from_str(&raw)?;
    artifact.validate().map_err(crate::error::AppError::ModelUnavailable)?;
    Ok(artifact)
}

enum AdapterState {
    /// No artifact configured at the model path.
    Absent,
    /// An artifact exists but failed to load or validate.
    Failed(String),
    Loaded(ModelArtifact),
}

/// Wraps the serialized regressor. Thread-safe: the artifact is immutable
/// after load and shared behind an Arc by the pipeline.
pub struct MlAdapter {
    state: AdapterState,
}

impl MlAdapter {
    /// Load the artifact at `path`. A missing file means the deployment runs
    /// without a model; a present-but-broken artifact degrades every call
    /// with a warning instead.
    pub fn load(path: &str) -> Self {
        if !Path::new(path).exists() {
            info!(path, "no model artifact; pricing runs on market and internal signals only");
            return Self { state: AdapterState::Absent };
        }
        let state = match read_artifact(path) {
            Ok(artifact) => {
                info!(path, trees = artifact.trees.len(), "model artifact loaded");
                AdapterState::Loaded(artifact)
            }
            Err(e) => {
                warn!("model unavailable: {e}");
                AdapterState::Failed(e.to_string())
            }
        };
        Self { state }
    }

    /// Adapter with no model, for deployments and tests without an artifact.
    pub fn disabled() -> Self {
        Self { state: AdapterState::Absent }
    }

    pub fn predict(
        &self,
        query: &Query,
        market: &MarketSample,
        internal: Option<&InternalAggregate>,
    ) -> MlSignal {
        let artifact = match &self.state {
            AdapterState::Absent => return MlSignal::Absent,
            AdapterState::Failed(reason) => return MlSignal::Degraded(reason.clone()),
            AdapterState::Loaded(artifact) => artifact,
        };
        let feature_values = features::assemble(artifact, query, market, internal);
        let price = artifact.predict(&feature_values).max(0.0);
        let confidence = features::signal_confidence(market, internal);
        MlSignal::Ready { price, confidence }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::market::build_sample;

    pub(crate) fn artifact_json() -> String {
        // One tree: market_median < 40 -> leaf 8, else leaf 13. Base 42.
        serde_json::json!({
            "feature_names": FEATURE_NAMES,
            "feature_means": [0.0, 0.0, 0.0, 0.0, 18.5, 31.0, 47.5, 12.0, 6.5],
            "vocab": {
                "category": {"shoes": 1.0, "tops": 2.0},
                "subcategory": {"sneakers": 1.0},
                "brand": {"nike": 1.0, "adidas": 2.0},
                "department": {"mens": 1.0, "womens": 2.0}
            },
            "unknown_id": 0.0,
            "base_score": 42.0,
            "trees": [{
                "nodes": [
                    {"feature": 6, "threshold": 40.0, "left": 1, "right": 2},
                    {"feature": -1, "value": -8.0},
                    {"feature": -1, "value": 13.0}
                ]
            }]
        })
        .to_string()
    }

    pub(crate) fn test_artifact() -> ModelArtifact {
        serde_json::from_str(&artifact_json()).unwrap()
    }

    #[test]
    fn tree_walk_routes_on_thresholds() {
        let artifact = test_artifact();
        let mut low = [0.0; FEATURE_COUNT];
        low[6] = 30.0;
        assert_eq!(artifact.predict(&low), 34.0);

        let mut high = [0.0; FEATURE_COUNT];
        high[6] = 55.0;
        assert_eq!(artifact.predict(&high), 55.0);
    }

    #[test]
    fn artifact_without_means_is_rejected() {
        let mut value: serde_json::Value = serde_json::from_str(&artifact_json()).unwrap();
        value["feature_means"] = serde_json::json!([1.0, 2.0]);
        let artifact: ModelArtifact = serde_json::from_value(value).unwrap();
        assert!(artifact.validate().is_err());
    }

    #[test]
    fn artifact_with_bad_children_is_rejected() {
        let mut value: serde_json::Value = serde_json::from_str(&artifact_json()).unwrap();
        value["trees"][0]["nodes"][0]["left"] = serde_json::json!(99);
        let artifact: ModelArtifact = serde_json::from_value(value).unwrap();
        assert!(artifact.validate().is_err());
    }

    #[test]
    fn missing_artifact_file_means_absent() {
        let adapter = MlAdapter::load("/nonexistent/model.json");
        let query = Query::parse("nike").unwrap();
        let sample = build_sample(Vec::new());
        assert!(matches!(adapter.predict(&query, &sample, None), MlSignal::Absent));
    }

    #[test]
    fn malformed_artifact_file_degrades() {
        let path = std::env::temp_dir().join("broken_pricing_model.json");
        std::fs::write(&path, "not json").unwrap();
        let adapter = MlAdapter::load(path.to_str().unwrap());
        let query = Query::parse("nike").unwrap();
        let sample = build_sample(Vec::new());
        assert!(matches!(
            adapter.predict(&query, &sample, None),
            MlSignal::Degraded(_)
        ));
        std::fs::remove_file(&path).ok();
    }
}
