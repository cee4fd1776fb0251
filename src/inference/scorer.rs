//! Pixel thresholding and scene-level anomaly scoring
//!
//! Two thresholds are applied independently: `pixel_threshold` decides which
//! pixels changed, `scene_threshold` decides whether the fraction of changed
//! pixels raises a scene-level alert.

use serde::{Deserialize, Serialize};

use crate::config::InferenceConfig;
use crate::inference::sliding::ChangeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneStatus {
    #[serde(rename = "Anomaly Detected")]
    AnomalyDetected,
    #[serde(rename = "Normal")]
    Normal,
}

impl SceneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneStatus::AnomalyDetected => "Anomaly Detected",
            SceneStatus::Normal => "Normal",
        }
    }
}

impl std::fmt::Display for SceneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scene-level prediction returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePredictionResponse {
    pub anomaly_score: f64,
    pub status: SceneStatus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeScorer {
    pub pixel_threshold: f64,
    pub scene_threshold: f64,
}

impl Default for ChangeScorer {
    fn default() -> Self {
        Self {
            pixel_threshold: 0.5,
            scene_threshold: 0.1,
        }
    }
}

impl ChangeScorer {
    pub fn new(pixel_threshold: f64, scene_threshold: f64) -> Self {
        Self {
            pixel_threshold,
            scene_threshold,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(config.pixel_threshold, config.scene_threshold)
    }

    /// Changed pixels: probability strictly above the pixel threshold
    pub fn binarize(&self, map: &ChangeMap) -> Vec<bool> {
        map.data()
            .iter()
            .map(|&p| p as f64 > self.pixel_threshold)
            .collect()
    }

    /// Fraction of changed pixels; 0.0 for an empty map
    pub fn anomaly_score(&self, mask: &[bool]) -> f64 {
        if mask.is_empty() {
            return 0.0;
        }
        mask.iter().filter(|&&m| m).count() as f64 / mask.len() as f64
    }

    pub fn classify(&self, anomaly_score: f64) -> SceneStatus {
        if anomaly_score > self.scene_threshold {
            SceneStatus::AnomalyDetected
        } else {
            SceneStatus::Normal
        }
    }

    pub fn score(&self, map: &ChangeMap) -> ScenePredictionResponse {
        let anomaly_score = self.anomaly_score(&self.binarize(map));
        ScenePredictionResponse {
            anomaly_score,
            status: self.classify(anomaly_score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_zero_map_is_normal() {
        let map = ChangeMap::zeros(64, 64);
        let response = ChangeScorer::default().score(&map);
        assert_eq!(response.anomaly_score, 0.0);
        assert_eq!(response.status, SceneStatus::Normal);
    }

    #[test]
    fn test_thresholds_are_independent() {
        // 3 of 10 pixels above 0.5
        let map = ChangeMap::new(
            2,
            5,
            vec![0.9, 0.6, 0.51, 0.5, 0.4, 0.0, 0.1, 0.2, 0.3, 0.49],
        )
        .unwrap();

        let default = ChangeScorer::default().score(&map);
        assert!((default.anomaly_score - 0.3).abs() < 1e-12);
        assert_eq!(default.status, SceneStatus::AnomalyDetected);

        let strict_scene = ChangeScorer::new(0.5, 0.3).score(&map);
        assert_eq!(strict_scene.status, SceneStatus::Normal);

        let loose_pixels = ChangeScorer::new(0.05, 0.1).score(&map);
        assert!((loose_pixels.anomaly_score - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_scene_threshold_is_strict() {
        let scorer = ChangeScorer::default();
        assert_eq!(scorer.classify(0.1), SceneStatus::Normal);
        assert_eq!(scorer.classify(0.1001), SceneStatus::AnomalyDetected);
    }

    #[test]
    fn test_response_json() {
        let response = ScenePredictionResponse {
            anomaly_score: 0.25,
            status: SceneStatus::AnomalyDetected,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "Anomaly Detected");
        assert_eq!(json["anomaly_score"], 0.25);

        let normal = serde_json::to_value(SceneStatus::Normal).unwrap();
        assert_eq!(normal, "Normal");
    }
}
