use crate::image_data::DEFAULT_IMAGE_MIME;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "imagen-3.0-generate-002";
const API_VERSION_PREFIX: &str = "/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";
const CHECK_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageStyle {
    #[default]
    Pixel,
    StickFigure,
}

impl ImageStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageStyle::Pixel => "PIXEL",
            ImageStyle::StickFigure => "STICK_FIGURE",
        }
    }

    /// Wraps the user prompt in the style's instruction text.
    pub fn apply(self, prompt: &str) -> String {
        match self {
            ImageStyle::Pixel => format!(
                "A vibrant 16-bit pixel art image, retro video game style, crisp pixels, \
                 limited color palette, no text. Subject: {prompt}"
            ),
            ImageStyle::StickFigure => format!(
                "A simple black stick figure drawing on a plain white background, \
                 minimalist hand-drawn line art, no shading, no text. Subject: {prompt}"
            ),
        }
    }
}

impl FromStr for ImageStyle {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PIXEL" | "PIXEL_ART" => Ok(ImageStyle::Pixel),
            "STICK_FIGURE" | "STICK" => Ok(ImageStyle::StickFigure),
            other => Err(format!(
                "Unknown style '{}'. Use 'pixel' or 'stick-figure'.",
                other
            )),
        }
    }
}

impl fmt::Display for ImageStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    Portrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Wide,
        AspectRatio::Tall,
        AspectRatio::Standard,
        AspectRatio::Portrait,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Wide => "16:9",
            AspectRatio::Tall => "9:16",
            AspectRatio::Standard => "4:3",
            AspectRatio::Portrait => "3:4",
        }
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let by_name = match trimmed.to_ascii_lowercase().as_str() {
            "square" => Some(AspectRatio::Square),
            "wide" => Some(AspectRatio::Wide),
            "tall" => Some(AspectRatio::Tall),
            _ => None,
        };
        by_name
            .or_else(|| {
                AspectRatio::ALL
                    .into_iter()
                    .find(|ratio| ratio.as_str() == trimmed)
            })
            .ok_or_else(|| {
                format!(
                    "Unknown aspect ratio '{}'. Use 1:1, 16:9, 9:16, 4:3 or 3:4.",
                    trimmed
                )
            })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    pub style: ImageStyle,
    pub aspect_ratio: AspectRatio,
}

/// One external generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub options: GenerationOptions,
    pub credential: &'a str,
}

/// Base64 image returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPayload {
    pub base64: String,
    pub mime: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    InvalidCredential,
    BillingRequired,
    RateLimited,
    Blocked,
    Timeout,
    Transport,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The external image-generation call the batch runner depends on.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedPayload, ProviderError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
    rai_filtered_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// HTTP client for the Imagen `:predict` endpoint of the Gemini API.
#[derive(Clone)]
pub struct ImagenClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout_seconds: u64,
}

impl ImagenClient {
    pub fn new(
        base_url: &str,
        model: &str,
        timeout_seconds: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            model: model.trim().to_string(),
            timeout_seconds,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Fetches the model description with the given key to see whether the
    /// key is accepted, without spending a generation.
    pub async fn check_credential(&self, credential: &str) -> CredentialStatus {
        let endpoint = build_model_endpoint(&self.base_url, &self.model, None);
        let response = self
            .client
            .get(&endpoint)
            .header(API_KEY_HEADER, credential.trim())
            .timeout(Duration::from_secs(CHECK_TIMEOUT_SECONDS))
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => CredentialStatus {
                ok: true,
                message: format!("Key accepted for model {}", self.model),
            },
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                CredentialStatus {
                    ok: false,
                    message: classify_api_error(status, &body).message,
                }
            }
            Err(error) => CredentialStatus {
                ok: false,
                message: self.transport_error(&endpoint, &error).message,
            },
        }
    }

    fn transport_error(&self, endpoint: &str, error: &reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            return ProviderError::new(
                ProviderErrorKind::Timeout,
                format!(
                    "Image request timed out at {} after {} seconds",
                    endpoint, self.timeout_seconds
                ),
            );
        }

        if error.is_connect() {
            return ProviderError::new(
                ProviderErrorKind::Transport,
                format!("Connection failed at {}: {}", endpoint, error),
            );
        }

        ProviderError::new(
            ProviderErrorKind::Transport,
            format!("Transport error at {}: {}", endpoint, error),
        )
    }
}

#[async_trait]
impl ImageGenerator for ImagenClient {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedPayload, ProviderError> {
        let endpoint = build_model_endpoint(&self.base_url, &self.model, Some("predict"));
        let body = build_predict_body(request);

        let response = self
            .client
            .post(&endpoint)
            .header(API_KEY_HEADER, request.credential.trim())
            .json(&body)
            .send()
            .await
            .map_err(|error| self.transport_error(&endpoint, &error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, &body));
        }

        let body: PredictResponse = response.json().await.map_err(|error| {
            ProviderError::new(
                ProviderErrorKind::Other,
                format!("Unreadable response from {}: {}", endpoint, error),
            )
        })?;
        extract_payload(body)
    }
}

fn build_predict_body(request: &GenerationRequest<'_>) -> serde_json::Value {
    json!({
        "instances": [
            { "prompt": request.options.style.apply(request.prompt) }
        ],
        "parameters": {
            "sampleCount": 1,
            "aspectRatio": request.options.aspect_ratio.as_str(),
            "outputMimeType": DEFAULT_IMAGE_MIME,
        }
    })
}

fn extract_payload(body: PredictResponse) -> Result<GeneratedPayload, ProviderError> {
    let mut filtered_reason = None;
    for prediction in body.predictions {
        match prediction.bytes_base64_encoded {
            Some(base64) if !base64.trim().is_empty() => {
                let mime = prediction
                    .mime_type
                    .filter(|mime| !mime.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
                return Ok(GeneratedPayload { base64, mime });
            }
            _ => {
                if filtered_reason.is_none() {
                    filtered_reason = prediction.rai_filtered_reason;
                }
            }
        }
    }

    let message = match filtered_reason {
        Some(reason) => format!("No image was generated: {}", reason),
        None => "No image was generated. The prompt may have been blocked.".to_string(),
    };
    Err(ProviderError::new(ProviderErrorKind::Blocked, message))
}

/// Maps a non-success response to a typed error. Messages for credential and
/// billing failures carry the "Invalid API Key" / "Billing Required" prefixes
/// that callers have historically matched on.
fn classify_api_error(status: StatusCode, body: &str) -> ProviderError {
    let (message, api_status) = match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.status),
        Err(_) => (body.trim().to_string(), None),
    };
    let message = if message.is_empty() {
        format!("Request failed with status {}", status)
    } else {
        message
    };
    let lowered = message.to_ascii_lowercase();

    if lowered.contains("api key not valid")
        || lowered.contains("api_key_invalid")
        || lowered.contains("api key expired")
        || status == StatusCode::UNAUTHORIZED
    {
        return ProviderError::new(
            ProviderErrorKind::InvalidCredential,
            format!("Invalid API Key: {}", message),
        );
    }

    if lowered.contains("billed users") || lowered.contains("billing") {
        return ProviderError::new(
            ProviderErrorKind::BillingRequired,
            format!("Billing Required: {}", message),
        );
    }

    if status == StatusCode::TOO_MANY_REQUESTS
        || api_status.as_deref() == Some("RESOURCE_EXHAUSTED")
    {
        return ProviderError::new(
            ProviderErrorKind::RateLimited,
            format!("Rate limited ({}): {}", status, message),
        );
    }

    ProviderError::new(
        ProviderErrorKind::Other,
        format!("Request failed with status {}: {}", status, message),
    )
}

fn build_model_endpoint(base_url: &str, model: &str, method: Option<&str>) -> String {
    match method {
        Some(method) => format!("{base_url}{API_VERSION_PREFIX}/models/{model}:{method}"),
        None => format!("{base_url}{API_VERSION_PREFIX}/models/{model}"),
    }
}

fn normalize_base_url(base_url: &str) -> String {
    let mut normalized = base_url.trim().trim_end_matches('/').to_string();
    if normalized.is_empty() {
        return DEFAULT_API_BASE.to_string();
    }

    while let Some(value) = normalized.strip_suffix(API_VERSION_PREFIX) {
        normalized = value.trim_end_matches('/').to_string();
    }

    if normalized.is_empty() {
        DEFAULT_API_BASE.to_string()
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_strips_version_prefix() {
        assert_eq!(
            normalize_base_url("https://generativelanguage.googleapis.com/v1beta/"),
            "https://generativelanguage.googleapis.com"
        );
        assert_eq!(normalize_base_url("   "), DEFAULT_API_BASE);
        assert_eq!(
            normalize_base_url("http://127.0.0.1:8080"),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn predict_endpoint_includes_model_and_method() {
        assert_eq!(
            build_model_endpoint("http://localhost", "imagen-x", Some("predict")),
            "http://localhost/v1beta/models/imagen-x:predict"
        );
        assert_eq!(
            build_model_endpoint("http://localhost", "imagen-x", None),
            "http://localhost/v1beta/models/imagen-x"
        );
    }

    #[test]
    fn predict_body_carries_style_and_ratio() {
        let request = GenerationRequest {
            prompt: "a cat",
            options: GenerationOptions {
                style: ImageStyle::StickFigure,
                aspect_ratio: AspectRatio::Tall,
            },
            credential: "k1",
        };
        let body = build_predict_body(&request);
        let prompt = body["instances"][0]["prompt"].as_str().unwrap();
        assert!(prompt.contains("stick figure"));
        assert!(prompt.ends_with("a cat"));
        assert_eq!(body["parameters"]["aspectRatio"], "9:16");
        assert_eq!(body["parameters"]["sampleCount"], 1);
    }

    #[test]
    fn invalid_key_response_is_classified() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
        let error = classify_api_error(StatusCode::BAD_REQUEST, body);
        assert_eq!(error.kind, ProviderErrorKind::InvalidCredential);
        assert!(error.message.starts_with("Invalid API Key"));
    }

    #[test]
    fn billing_response_is_classified() {
        let body = r#"{"error":{"code":400,"message":"Imagen API is only accessible to billed users at this time.","status":"FAILED_PRECONDITION"}}"#;
        let error = classify_api_error(StatusCode::BAD_REQUEST, body);
        assert_eq!(error.kind, ProviderErrorKind::BillingRequired);
        assert!(error.message.starts_with("Billing Required"));
    }

    #[test]
    fn rate_limit_and_unknown_errors_are_not_fatal_kinds() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let error = classify_api_error(StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(error.kind, ProviderErrorKind::RateLimited);

        let error = classify_api_error(StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded");
        assert_eq!(error.kind, ProviderErrorKind::Other);
        assert!(error.message.contains("upstream exploded"));
    }

    #[test]
    fn extract_payload_defaults_mime_and_reports_filtering() {
        let body: PredictResponse = serde_json::from_str(
            r#"{"predictions":[{"bytesBase64Encoded":"/9j/4AAQ"}]}"#,
        )
        .unwrap();
        let payload = extract_payload(body).unwrap();
        assert_eq!(payload.mime, "image/jpeg");
        assert_eq!(payload.base64, "/9j/4AAQ");

        let body: PredictResponse = serde_json::from_str(
            r#"{"predictions":[{"raiFilteredReason":"Filtered by safety policy"}]}"#,
        )
        .unwrap();
        let error = extract_payload(body).unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::Blocked);
        assert!(error.message.contains("safety policy"));

        let body: PredictResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(
            extract_payload(body).unwrap_err().kind,
            ProviderErrorKind::Blocked
        );
    }

    #[test]
    fn style_and_ratio_parse_from_cli_spellings() {
        assert_eq!("pixel".parse::<ImageStyle>().unwrap(), ImageStyle::Pixel);
        assert_eq!(
            "stick-figure".parse::<ImageStyle>().unwrap(),
            ImageStyle::StickFigure
        );
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::Wide);
        assert_eq!("tall".parse::<AspectRatio>().unwrap(), AspectRatio::Tall);
        assert!("2:1".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn options_default_to_square_pixel_art() {
        let options = GenerationOptions::default();
        assert_eq!(options.style, ImageStyle::Pixel);
        assert_eq!(options.aspect_ratio, AspectRatio::Square);
    }

    #[test]
    fn aspect_ratio_serializes_as_wire_string() {
        assert_eq!(
            serde_json::to_string(&AspectRatio::Portrait).unwrap(),
            "\"3:4\""
        );
    }
}
