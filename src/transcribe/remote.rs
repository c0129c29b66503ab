//! Remote speech-to-text via an OpenAI-compatible API
//!
//! Posts chunk audio to `/v1/audio/transcriptions` on an OpenAI-compatible
//! endpoint (whisper.cpp server, OpenAI, or a local gateway). Long chunks
//! mean long requests, so the default timeout is generous.

use super::{ResponseFormat, SttProvider};
use crate::config::SttConfig;
use crate::error::TranscribeError;
use std::path::Path;
use std::time::Duration;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "SESSIONSCRIBE_STT_API_KEY";

/// Provider client for OpenAI-compatible transcription endpoints
#[derive(Debug)]
pub struct RemoteProvider {
    /// Base endpoint URL (e.g., "https://api.openai.com")
    endpoint: String,
    /// Model name to send to the server
    model: String,
    /// Optional language hint ("en", "de", ...)
    language: Option<String>,
    /// Optional API key for authentication
    api_key: Option<String>,
    /// Per-request timeout
    timeout: Duration,
    /// Request word-level timestamps in verbose_json responses
    word_timestamps: bool,
}

impl RemoteProvider {
    pub fn new(config: &SttConfig) -> Result<Self, TranscribeError> {
        let endpoint = config.endpoint.clone();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(TranscribeError::ConfigError(format!(
                "stt.endpoint must start with http:// or https://, got: {}",
                endpoint
            )));
        }

        if endpoint.starts_with("http://")
            && !endpoint.contains("localhost")
            && !endpoint.contains("127.0.0.1")
            && !endpoint.contains("[::1]")
        {
            tracing::warn!(
                "STT endpoint uses HTTP without TLS. Audio will be transmitted unencrypted!"
            );
        }

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok());

        let timeout = Duration::from_secs(config.timeout_secs);

        tracing::info!(
            "Configured STT provider: endpoint={}, model={}, timeout={}s",
            endpoint,
            config.model,
            timeout.as_secs()
        );

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            language: config.language.clone(),
            api_key,
            timeout,
            word_timestamps: config.word_timestamps,
        })
    }

    /// Build the multipart form body for the API request
    fn build_multipart_body(
        &self,
        filename: &str,
        audio_data: &[u8],
        format: ResponseFormat,
    ) -> (String, Vec<u8>) {
        let boundary = format!(
            "----SessionscribeBoundary{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );

        let mut body = Vec::new();
        let text_field = |body: &mut Vec<u8>, name: &str, value: &str| {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            );
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        };

        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
        body.extend_from_slice(audio_data);
        body.extend_from_slice(b"\r\n");

        text_field(&mut body, "model", &self.model);
        if let Some(ref lang) = self.language {
            text_field(&mut body, "language", lang);
        }
        text_field(&mut body, "response_format", format.as_str());
        if format == ResponseFormat::VerboseJson && self.word_timestamps {
            text_field(&mut body, "timestamp_granularities[]", "word");
            text_field(&mut body, "timestamp_granularities[]", "segment");
        }

        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        (boundary, body)
    }
}

impl SttProvider for RemoteProvider {
    fn transcribe_file(
        &self,
        audio: &Path,
        format: ResponseFormat,
    ) -> Result<String, TranscribeError> {
        if !audio.exists() {
            return Err(TranscribeError::ChunkMissing(audio.to_path_buf()));
        }
        let audio_data = std::fs::read(audio)?;
        let filename = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav");

        tracing::debug!(
            "Submitting {} ({} bytes) as {}",
            filename,
            audio_data.len(),
            format.as_str()
        );

        let (boundary, body) = self.build_multipart_body(filename, &audio_data, format);
        let url = format!(
            "{}/v1/audio/transcriptions",
            self.endpoint.trim_end_matches('/')
        );

        let start = std::time::Instant::now();
        let mut request = ureq::post(&url).timeout(self.timeout).set(
            "Content-Type",
            &format!("multipart/form-data; boundary={}", boundary),
        );
        if let Some(ref key) = self.api_key {
            request = request.set("Authorization", &format!("Bearer {}", key));
        }

        let response = request.send_bytes(&body).map_err(|e| match e {
            ureq::Error::Status(429, resp) => {
                TranscribeError::RateLimited(resp.into_string().unwrap_or_default())
            }
            ureq::Error::Status(code, resp) => TranscribeError::Status {
                status: code,
                body: resp.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(t) => TranscribeError::Network(t.to_string()),
        })?;

        let raw = response
            .into_string()
            .map_err(|e| TranscribeError::Network(format!("reading response body: {}", e)))?;

        tracing::debug!(
            "Provider responded in {:.2}s ({} bytes)",
            start.elapsed().as_secs_f32(),
            raw.len()
        );
        Ok(raw)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SttConfig;

    fn test_config() -> SttConfig {
        SttConfig {
            endpoint: "http://localhost:8080".to_string(),
            ..SttConfig::default()
        }
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let config = SttConfig {
            endpoint: "localhost:8080".to_string(),
            ..SttConfig::default()
        };
        assert!(matches!(
            RemoteProvider::new(&config),
            Err(TranscribeError::ConfigError(_))
        ));
    }

    #[test]
    fn test_multipart_body_contains_fields() {
        let provider = RemoteProvider::new(&test_config()).unwrap();
        let (boundary, body) =
            provider.build_multipart_body("chunk_000.wav", b"RIFF", ResponseFormat::VerboseJson);
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains(&boundary));
        assert!(text.contains("name=\"file\"; filename=\"chunk_000.wav\""));
        assert!(text.contains("name=\"model\""));
        assert!(text.contains("name=\"response_format\""));
        assert!(text.contains("verbose_json"));
        assert!(text.contains("timestamp_granularities[]"));
        assert!(text.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn test_vtt_body_skips_granularities() {
        let provider = RemoteProvider::new(&test_config()).unwrap();
        let (_, body) =
            provider.build_multipart_body("chunk_000.wav", b"RIFF", ResponseFormat::Vtt);
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("timestamp_granularities"));
        assert!(text.contains("\r\nvtt\r\n"));
    }

    #[test]
    fn test_missing_chunk_is_fatal() {
        let provider = RemoteProvider::new(&test_config()).unwrap();
        let err = provider
            .transcribe_file(Path::new("/nonexistent/chunk.wav"), ResponseFormat::Vtt)
            .unwrap_err();
        assert!(matches!(err, TranscribeError::ChunkMissing(_)));
        assert!(!err.is_transient());
    }
}
