//! Gemini REST client for text translation and speech synthesis.
//!
//! Both operations go through `models/{model}:generateContent`:
//!
//! - **translate**: a text prompt with a system instruction asking for the
//!   translation only
//! - **synthesize**: `responseModalities: ["AUDIO"]` with a prebuilt voice;
//!   the reply carries base64 PCM16LE (24kHz mono) as `inlineData`
//!
//! When the translation quota is exhausted (HTTP 429 or a
//! `RESOURCE_EXHAUSTED` status) `translate` hands the input back unchanged
//! instead of failing. The interpreter detects that echo and switches to
//! degraded mode.

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::GeminiConfig;
use crate::voice::audio::DEFAULT_SAMPLE_RATE;
use crate::voice::producer::{SpeechSynthesizer, TranslationService};

const API_KEY_HEADER: &str = "x-goog-api-key";

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Default)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "responseModalities", skip_serializing_if = "Vec::is_empty")]
    response_modalities: Vec<String>,
    #[serde(rename = "speechConfig", skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
struct SpeechConfig {
    #[serde(rename = "voiceConfig")]
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
struct VoiceConfig {
    #[serde(rename = "prebuiltVoiceConfig")]
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
struct PrebuiltVoiceConfig {
    #[serde(rename = "voiceName")]
    voice_name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateContentResponse {
    fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()?
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    fn inline_audio(&self) -> Option<&InlineData> {
        self.candidates
            .first()?
            .content
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
    }
}

fn user_text(text: String) -> Content {
    Content {
        role: Some("user".into()),
        parts: vec![Part {
            text: Some(text),
            inline_data: None,
        }],
    }
}

fn translation_request(text: &str, target_language: &str) -> GenerateContentRequest {
    let instruction = format!(
        "You are a live interpreter. Translate the user's message into {target_language}. \
         Reply with the translation only, without quotes, notes or explanations."
    );
    GenerateContentRequest {
        contents: vec![user_text(text.to_string())],
        system_instruction: Some(Content {
            role: None,
            parts: vec![Part {
                text: Some(instruction),
                inline_data: None,
            }],
        }),
        generation_config: GenerationConfig {
            temperature: Some(0.2),
            ..GenerationConfig::default()
        },
    }
}

fn speech_request(text: &str, language: &str, voice_id: &str) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![user_text(format!("Say in {language}: {text}"))],
        system_instruction: None,
        generation_config: GenerationConfig {
            temperature: None,
            response_modalities: vec!["AUDIO".into()],
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice_id.to_string(),
                    },
                },
            }),
        },
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Gemini-backed [`TranslationService`] and [`SpeechSynthesizer`].
pub struct GeminiClient {
    api_key: Option<String>,
    base_url: String,
    translation_model: String,
    tts_model: String,
    sample_rate: u32,
    client: reqwest::Client,
}

enum Outcome {
    Ok(GenerateContentResponse),
    QuotaExhausted,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            translation_model: config.translation_model.clone(),
            tts_model: config.tts_model.clone(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
                .connect_timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Sample rate the TTS model is expected to return.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, model: &str, body: &GenerateContentRequest) -> anyhow::Result<Outcome> {
        let Some(api_key) = self.api_key.as_deref() else {
            anyhow::bail!("Gemini API key is not configured (set GEMINI_API_KEY)");
        };
        let url = format!("{}/models/{model}:generateContent", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {model} failed"))?;

        let status = resp.status();
        if status.is_success() {
            let parsed: GenerateContentResponse = resp
                .json()
                .await
                .with_context(|| format!("malformed response from {model}"))?;
            return Ok(Outcome::Ok(parsed));
        }

        let detail = resp.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || detail.contains("RESOURCE_EXHAUSTED") {
            return Ok(Outcome::QuotaExhausted);
        }
        anyhow::bail!("{model} returned {status}: {}", truncate(&detail, 200))
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl TranslationService for GeminiClient {
    async fn translate(&self, text: &str, target_language: &str) -> anyhow::Result<String> {
        let request = translation_request(text, target_language);
        match self.generate(&self.translation_model, &request).await? {
            Outcome::Ok(resp) => resp
                .text()
                .ok_or_else(|| anyhow::anyhow!("translation response contained no text")),
            Outcome::QuotaExhausted => {
                tracing::warn!(
                    model = %self.translation_model,
                    "translation quota exhausted; passing text through untranslated"
                );
                Ok(text.to_string())
            }
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, text: &str, language: &str, voice_id: &str) -> anyhow::Result<Vec<u8>> {
        let request = speech_request(text, language, voice_id);
        let resp = match self.generate(&self.tts_model, &request).await? {
            Outcome::Ok(resp) => resp,
            Outcome::QuotaExhausted => anyhow::bail!("speech synthesis quota exhausted"),
        };

        let audio = resp
            .inline_audio()
            .ok_or_else(|| anyhow::anyhow!("speech response contained no audio"))?;
        let pcm = base64::engine::general_purpose::STANDARD
            .decode(&audio.data)
            .context("speech response audio is not valid base64")?;
        tracing::debug!(
            bytes = pcm.len(),
            mime = %audio.mime_type,
            voice = voice_id,
            "speech synthesized"
        );
        Ok(pcm)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_request_json_shape() {
        let json = serde_json::to_value(translation_request("Hello", "French")).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Hello");
        assert!(json["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("French"));
        assert!(json["generationConfig"].get("responseModalities").is_none());
    }

    #[test]
    fn speech_request_json_shape() {
        let json = serde_json::to_value(speech_request("Bonjour", "French", "Kore")).unwrap();
        assert_eq!(json["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn response_text_joins_parts() {
        let resp: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Bon"},{"text":"jour "}]}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.text().as_deref(), Some("Bonjour"));

        let empty: GenerateContentResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(empty.text().is_none());
        assert!(empty.inline_audio().is_none());
    }

    #[tokio::test]
    async fn missing_key_is_an_error() {
        let client = GeminiClient::new(&GeminiConfig::default());
        assert!(!client.has_api_key());
        let err = client.translate("Hello", "French").await.unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
