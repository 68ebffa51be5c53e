use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use std::path::Path;

use crate::types::ImagePayload;

const FALLBACK_MIME: &str = "image/png";

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed data URL")]
    MalformedDataUrl,
    #[error("only base64 data URLs are supported")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported payload URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("fetching payload failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("payload is empty")]
    Empty,
}

/// Turns the URLs carried by an activation request into image bytes.
#[derive(Clone, Default)]
pub struct PayloadResolver {
    client: Client,
}

impl PayloadResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn resolve(&self, url: &str) -> Result<ImagePayload, PayloadError> {
        let url = url.trim();
        let payload = if url.starts_with("data:") {
            decode_data_url(url)?
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch(url).await?
        } else {
            let scheme = url.split(':').next().unwrap_or_default();
            return Err(PayloadError::UnsupportedScheme(scheme.to_string()));
        };
        if payload.bytes.is_empty() {
            return Err(PayloadError::Empty);
        }
        Ok(payload)
    }

    async fn fetch(&self, url: &str) -> Result<ImagePayload, PayloadError> {
        tracing::debug!(url, "Fetching image payload");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(normalize_mime)
            .unwrap_or_else(|| FALLBACK_MIME.to_string());
        let bytes = response.bytes().await?.to_vec();
        Ok(ImagePayload { mime, bytes })
    }
}

/// `data:[<mime>][;params];base64,<data>`
pub fn decode_data_url(url: &str) -> Result<ImagePayload, PayloadError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or(PayloadError::MalformedDataUrl)?;
    let (meta, data) = rest.split_once(',').ok_or(PayloadError::MalformedDataUrl)?;

    let mut parts = meta.split(';');
    let mime = parts.next().map(normalize_mime).unwrap_or_default();
    if !parts.any(|p| p.eq_ignore_ascii_case("base64")) {
        return Err(PayloadError::NotBase64);
    }

    let bytes = STANDARD.decode(data.trim())?;
    Ok(ImagePayload {
        mime: if mime.is_empty() {
            FALLBACK_MIME.to_string()
        } else {
            mime
        },
        bytes,
    })
}

/// Read an image from disk and wrap it as a data URL, for the one-shot CLI.
pub fn file_to_data_url(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let mime = mime_for_extension(path);
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

fn mime_for_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => FALLBACK_MIME,
    }
}

fn normalize_mime(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
