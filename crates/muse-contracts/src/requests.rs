use serde::Deserialize;
use serde_json::{json, Value};

/// Inbound generation request body, shared by the image and video
/// handlers. Field names mirror the client JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub reference_image: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub remove_watermark: bool,
    #[serde(default)]
    pub is_test: bool,
}

impl GenerationRequest {
    /// Clip duration in seconds, parsed leniently ("8", "8s", "8 sec").
    /// Anything unparseable falls back to the 5 second default.
    pub fn duration_seconds(&self) -> u64 {
        let raw = self.duration.as_deref().unwrap_or_default().trim();
        let digits: String = raw.chars().take_while(|ch| ch.is_ascii_digit()).collect();
        digits.parse::<u64>().ok().filter(|value| *value > 0).unwrap_or(5)
    }
}

/// Terminal value handed back at the boundary: an HTTP-ish status plus
/// the JSON body the client sees. Never partially populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn image_success(url: &str) -> Self {
        Self {
            status: 200,
            body: json!({ "success": true, "image_url": url }),
        }
    }

    pub fn video_success(url: &str) -> Self {
        Self {
            status: 200,
            body: json!({ "success": true, "video_url": url }),
        }
    }

    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "success": false, "error": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.body
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Why a single creation call did not yield a usable job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionFailureReason {
    Transport,
    ProviderError,
    NoHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFailure {
    pub http_status: Option<u16>,
    pub provider_code: Option<i64>,
    pub provider_message: Option<String>,
    pub reason: SubmissionFailureReason,
}

impl SubmissionFailure {
    pub fn detail(&self) -> String {
        if let Some(message) = self
            .provider_message
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return message.to_string();
        }
        match self.reason {
            SubmissionFailureReason::Transport => "provider unreachable".to_string(),
            SubmissionFailureReason::ProviderError => match (self.provider_code, self.http_status) {
                (Some(code), _) => format!("provider error code {code}"),
                (None, Some(status)) => format!("provider returned HTTP {status}"),
                (None, None) => "provider error".to_string(),
            },
            SubmissionFailureReason::NoHandle => "provider returned no task handle".to_string(),
        }
    }
}

/// Job state derived from one polled status payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_client_field_names() -> anyhow::Result<()> {
        let request: GenerationRequest = serde_json::from_str(
            r#"{
                "prompt": "city at night",
                "model": "Kling 2.1",
                "aspectRatio": "9:16",
                "referenceImage": "https://cdn.example/ref.png",
                "duration": "8s",
                "removeWatermark": true,
                "isTest": true
            }"#,
        )?;
        assert_eq!(request.prompt, "city at night");
        assert_eq!(request.aspect_ratio.as_deref(), Some("9:16"));
        assert_eq!(request.duration_seconds(), 8);
        assert!(request.remove_watermark);
        assert!(request.is_test);
        Ok(())
    }

    #[test]
    fn missing_optional_fields_take_defaults() -> anyhow::Result<()> {
        let request: GenerationRequest = serde_json::from_str(r#"{ "prompt": "a fox" }"#)?;
        assert!(request.model.is_empty());
        assert!(request.aspect_ratio.is_none());
        assert!(!request.is_test);
        assert_eq!(request.duration_seconds(), 5);
        Ok(())
    }

    #[test]
    fn duration_parsing_is_lenient() {
        let mut request = GenerationRequest::default();
        for (raw, expected) in [
            (Some("10"), 10),
            (Some("8s"), 8),
            (Some("6 sec"), 6),
            (Some("fast"), 5),
            (Some("0"), 5),
            (None, 5),
        ] {
            request.duration = raw.map(str::to_string);
            assert_eq!(request.duration_seconds(), expected, "raw {raw:?}");
        }
    }

    #[test]
    fn failure_response_shape() {
        let response = ApiResponse::failure(408, "generation timed out");
        assert_eq!(response.status, 408);
        assert_eq!(response.body["success"], Value::Bool(false));
        assert_eq!(
            response.body["error"],
            Value::String("generation timed out".to_string())
        );
        assert!(!response.is_success());
        assert!(ApiResponse::image_success("https://x/y.png").is_success());
    }

    #[test]
    fn submission_failure_detail_prefers_provider_message() {
        let failure = SubmissionFailure {
            http_status: Some(500),
            provider_code: Some(500),
            provider_message: Some("content flagged".to_string()),
            reason: SubmissionFailureReason::ProviderError,
        };
        assert_eq!(failure.detail(), "content flagged");

        let bare = SubmissionFailure {
            http_status: Some(502),
            provider_code: None,
            provider_message: None,
            reason: SubmissionFailureReason::ProviderError,
        };
        assert_eq!(bare.detail(), "provider returned HTTP 502");
    }
}
