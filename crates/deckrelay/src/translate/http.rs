//! HTTP-backed translator client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TranslateError;
use crate::translate::Translator;

#[derive(Serialize)]
struct TranslateRequest<'a> {
    texts: &'a [String],
    target_language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translations: Vec<String>,
}

/// Talks to a JSON translation endpoint: posts a batch of texts and a
/// target language, receives the translations in matching order.
pub struct HttpTranslator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTranslator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate_batch(
        &self,
        texts: &[String],
        target_language: &str,
        model: Option<&str>,
    ) -> Result<Vec<String>, TranslateError> {
        let body = TranslateRequest {
            texts,
            target_language,
            model,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranslateError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TranslateError::InvalidResponse(format!(
                "translation endpoint returned {}: {}",
                status, detail
            )));
        }

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::InvalidResponse(e.to_string()))?;

        if parsed.translations.len() != texts.len() {
            return Err(TranslateError::InvalidResponse(format!(
                "expected {} translations, got {}",
                texts.len(),
                parsed.translations.len()
            )));
        }

        Ok(parsed.translations)
    }
}
