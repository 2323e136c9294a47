//! HTTP client for a remote pose service
//!
//! POST {base_url}/v1/pose (multipart: image, camera_id)
//! -> { "detected": bool, "landmarks": [{ "name"|"index", "x", "y", "visibility" }] }

use super::{Landmark, PerceptionEngine, Point, PointSet};
use crate::error::{Error, Result};
use crate::frame_buffer::Frame;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

/// Client settings
#[derive(Debug, Clone)]
pub struct PerceptionClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Landmarks below this visibility are treated as missing
    pub min_visibility: f64,
}

impl Default for PerceptionClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9100".to_string(),
            timeout: Duration::from_secs(5),
            min_visibility: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PoseResponse {
    #[serde(default)]
    detected: bool,
    #[serde(default)]
    landmarks: Vec<PoseLandmark>,
}

#[derive(Debug, Deserialize)]
struct PoseLandmark {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    index: Option<u8>,
    x: f64,
    y: f64,
    #[serde(default)]
    visibility: Option<f64>,
}

/// Remote pose service client
pub struct HttpPerceptionClient {
    client: reqwest::Client,
    config: PerceptionClientConfig,
}

impl HttpPerceptionClient {
    /// Create new client
    pub fn new(config: PerceptionClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Check pose service health
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.config.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn parse_response(&self, response: PoseResponse) -> Option<PointSet> {
        if !response.detected {
            return None;
        }

        let points: PointSet = response
            .landmarks
            .into_iter()
            .filter(|lm| lm.visibility.unwrap_or(1.0) >= self.config.min_visibility)
            .filter(|lm| lm.x.is_finite() && lm.y.is_finite())
            .filter_map(|lm| {
                let landmark = match (&lm.name, lm.index) {
                    (Some(name), _) => Landmark::from_name(name),
                    (None, Some(index)) => Landmark::from_index(index),
                    (None, None) => None,
                }?;
                Some((landmark, Point::new(lm.x, lm.y)))
            })
            .collect();

        if points.is_empty() {
            None
        } else {
            Some(points)
        }
    }
}

#[async_trait]
impl PerceptionEngine for HttpPerceptionClient {
    async fn extract(&self, camera_id: &str, frame: &Frame) -> Result<Option<PointSet>> {
        let url = format!("{}/v1/pose", self.config.base_url);

        let form = Form::new()
            .part(
                "image",
                Part::bytes(frame.data.to_vec())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("camera_id", camera_id.to_string());

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Perception(format!("pose request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Perception(format!(
                "pose service returned {} - {}",
                status, body
            )));
        }

        let response: PoseResponse = resp
            .json()
            .await
            .map_err(|e| Error::Perception(format!("invalid pose response: {}", e)))?;

        Ok(self.parse_response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpPerceptionClient {
        HttpPerceptionClient::new(PerceptionClientConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_named_and_indexed_landmarks() {
        let response: PoseResponse = serde_json::from_str(
            r#"{
                "detected": true,
                "landmarks": [
                    {"name": "LEFT_HIP", "x": 0.4, "y": 0.5, "visibility": 0.9},
                    {"index": 25, "x": 0.45, "y": 0.7},
                    {"name": "left_ankle", "x": 0.5, "y": 0.9, "visibility": 0.1},
                    {"name": "left_pinky", "x": 0.1, "y": 0.1}
                ]
            }"#,
        )
        .unwrap();

        let points = client().parse_response(response).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points.get(Landmark::LeftHip), Some(Point::new(0.4, 0.5)));
        assert_eq!(points.get(Landmark::LeftKnee), Some(Point::new(0.45, 0.7)));
        assert!(points.get(Landmark::LeftAnkle).is_none());
    }

    #[test]
    fn test_not_detected_is_none() {
        let response: PoseResponse =
            serde_json::from_str(r#"{"detected": false, "landmarks": []}"#).unwrap();
        assert!(client().parse_response(response).is_none());
    }

    #[test]
    fn test_all_filtered_is_none() {
        let response: PoseResponse = serde_json::from_str(
            r#"{"detected": true, "landmarks": [{"name": "nose", "x": 0.5, "y": 0.5, "visibility": 0.2}]}"#,
        )
        .unwrap();
        assert!(client().parse_response(response).is_none());
    }
}
