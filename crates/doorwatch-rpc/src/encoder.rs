//! HTTP client for the face localizer/encoder sidecar.
//!
//! Frames are sent as base64 8-bit grayscale. The sidecar answers with
//! boxes (`/v1/localize`) or one encoding per box (`/v1/encode`).

use crate::contracts::CONTRACT_VERSION;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use doorwatch_core::{BoundingBox, EncoderError, Embedding, FaceEncoder};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct FrameRequest<'a> {
    contract_version: u32,
    width: u32,
    height: u32,
    format: &'static str,
    pixels: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    faces: Option<&'a [BoundingBox]>,
}

#[derive(Debug, Deserialize)]
struct LocalizeReply {
    faces: Vec<BoundingBox>,
}

#[derive(Debug, Deserialize)]
struct EncodeReply {
    encodings: Vec<Vec<f32>>,
}

pub struct HttpFaceEncoder {
    base_url: String,
    client: Client,
}

impl HttpFaceEncoder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EncoderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EncoderError::Unavailable(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn post<R: DeserializeOwned>(
        &self,
        path: &str,
        body: &FrameRequest<'_>,
    ) -> Result<R, EncoderError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| EncoderError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EncoderError::Unavailable(format!("HTTP {status} from {path}")));
        }
        response
            .json()
            .map_err(|e| EncoderError::InvalidOutput(format!("{path}: {e}")))
    }
}

fn frame_request<'a>(
    frame: &[u8],
    width: u32,
    height: u32,
    faces: Option<&'a [BoundingBox]>,
) -> Result<FrameRequest<'a>, EncoderError> {
    let expected = (width as usize) * (height as usize);
    if frame.len() != expected {
        return Err(EncoderError::InvalidOutput(format!(
            "frame buffer is {} bytes, expected {expected}",
            frame.len()
        )));
    }
    Ok(FrameRequest {
        contract_version: CONTRACT_VERSION,
        width,
        height,
        format: "gray8",
        pixels: BASE64.encode(frame),
        faces,
    })
}

fn check_boxes(faces: Vec<BoundingBox>) -> Result<Vec<BoundingBox>, EncoderError> {
    for b in &faces {
        let values = [b.x, b.y, b.width, b.height];
        if values.iter().any(|v| !v.is_finite()) || b.width <= 0.0 || b.height <= 0.0 {
            return Err(EncoderError::InvalidOutput(format!("degenerate face box {b:?}")));
        }
    }
    Ok(faces)
}

fn check_encodings(encodings: Vec<Vec<f32>>, boxes: usize) -> Result<Vec<Embedding>, EncoderError> {
    if encodings.len() != boxes {
        return Err(EncoderError::InvalidOutput(format!(
            "{} encodings for {boxes} faces",
            encodings.len()
        )));
    }
    Ok(encodings.into_iter().map(Embedding::new).collect())
}

impl FaceEncoder for HttpFaceEncoder {
    fn localize(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, EncoderError> {
        let body = frame_request(frame, width, height, None)?;
        let reply: LocalizeReply = self.post("/v1/localize", &body)?;
        check_boxes(reply.faces)
    }

    fn encode(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, EncoderError> {
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let body = frame_request(frame, width, height, Some(faces))?;
        let reply: EncodeReply = self.post("/v1/encode", &body)?;
        check_encodings(reply.encodings, faces.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_request_encodes_pixels() {
        let req = frame_request(&[0, 255, 128, 1], 2, 2, None).unwrap();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["format"], "gray8");
        assert_eq!(json["pixels"], "AP+AAQ==");
        assert!(json.get("faces").is_none());
    }

    #[test]
    fn test_frame_request_rejects_wrong_length() {
        assert!(frame_request(&[0; 3], 2, 2, None).is_err());
    }

    #[test]
    fn test_encoding_count_must_match_boxes() {
        let err = check_encodings(vec![vec![0.1; 4]], 2).unwrap_err();
        assert!(matches!(err, EncoderError::InvalidOutput(_)));
        assert_eq!(check_encodings(vec![vec![0.1; 4]; 2], 2).unwrap().len(), 2);
    }

    #[test]
    fn test_degenerate_box_rejected() {
        let reply: LocalizeReply = serde_json::from_str(
            r#"{"faces": [{"x": 1.0, "y": 2.0, "width": 0.0, "height": 10.0}]}"#,
        )
        .unwrap();
        assert!(check_boxes(reply.faces).is_err());
    }
}
