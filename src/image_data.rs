//! Data-URI handling for generated image payloads.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

/// Content type the generation API produces when it does not say otherwise.
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ImageDataError {
    #[error("empty image payload")]
    Empty,
    #[error("malformed data URI payload")]
    MalformedUri,
    #[error("base64 decode failed: {0}")]
    Base64(String),
}

/// Builds a `data:` URI from an already base64-encoded payload.
///
/// Whitespace inside the payload (line-wrapped base64) is dropped.
pub fn data_uri_from_base64(mime: &str, payload: &str) -> String {
    let normalized: String = payload.chars().filter(|ch| !ch.is_whitespace()).collect();
    format!("data:{};base64,{}", normalize_mime(mime), normalized)
}

pub fn data_uri_from_bytes(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        normalize_mime(mime),
        BASE64_STANDARD.encode(bytes)
    )
}

/// Decodes either a `data:<mime>;base64,...` URI or a bare base64 string.
///
/// Returns the bytes and the MIME type, taken from the URI when present and
/// sniffed from the bytes otherwise.
pub fn decode_image_payload(payload: &str) -> Result<(Vec<u8>, String), ImageDataError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(ImageDataError::Empty);
    }

    let (mime, b64_data) = if let Some(rest) = trimmed.strip_prefix("data:") {
        let (mime, b64) = rest
            .split_once(";base64,")
            .ok_or(ImageDataError::MalformedUri)?;
        (Some(mime), b64)
    } else {
        (None, trimmed)
    };

    let normalized_b64: String = b64_data.chars().filter(|ch| !ch.is_whitespace()).collect();
    let decoded = BASE64_STANDARD
        .decode(normalized_b64.as_bytes())
        .map_err(|error| ImageDataError::Base64(error.to_string()))?;
    if decoded.is_empty() {
        return Err(ImageDataError::Empty);
    }

    let mime = mime
        .map(normalize_mime)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| mime_from_image_bytes(&decoded).to_string());

    Ok((decoded, mime))
}

pub fn is_data_uri(value: &str) -> bool {
    value.trim_start().starts_with("data:")
}

pub fn mime_from_image_bytes(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Gif) => "image/gif",
        _ => "application/octet-stream",
    }
}

pub fn extension_from_mime(mime: &str) -> Option<&'static str> {
    match normalize_mime(mime).as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpeg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

fn normalize_mime(mime: &str) -> String {
    mime.trim().to_ascii_lowercase()
}
