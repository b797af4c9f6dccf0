use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use serde::de::DeserializeOwned;
use shared::{
    error::ApiError,
    protocol::{
        ChatRequest, ChatResponse, DiagnosisResponse, CHAT_PATH, DIAGNOSE_IMAGE_FIELD,
        DIAGNOSE_LANGUAGE_FIELD, DIAGNOSE_PATH, DIAGNOSE_PLANT_TYPE_FIELD,
    },
};
use tracing::debug;

use crate::{
    config::{ClientSettings, ConfigError},
    error::ExchangeError,
    ChatService, DiagnosisRequest, DiagnosisService,
};

const DEFAULT_IMAGE_MIME: &str = "application/octet-stream";
const MAX_ERROR_DETAIL_CHARS: usize = 200;

/// Talks to the chat and diagnosis services over HTTP.
pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: base_url.into(),
        })
    }

    /// Resolves the base address once, here.
    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ConfigError> {
        let base_url = settings.resolve_backend_base()?;
        Self::with_timeout(base_url, settings.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatService for HttpBackend {
    async fn send_chat(&self, request: ChatRequest) -> Result<ChatResponse, ExchangeError> {
        let response = self
            .http
            .post(format!("{}{CHAT_PATH}", self.base_url))
            .json(&request)
            .send()
            .await?;
        decode_json(response).await
    }
}

#[async_trait]
impl DiagnosisService for HttpBackend {
    async fn diagnose(
        &self,
        request: DiagnosisRequest,
    ) -> Result<DiagnosisResponse, ExchangeError> {
        let DiagnosisRequest {
            image,
            plant_type,
            language,
        } = request;
        let mime_type = image
            .mime_type
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
        let size_bytes = image.bytes.len();
        let part = Part::bytes(image.bytes)
            .file_name(image.filename)
            .mime_str(&mime_type)?;
        let form = Form::new()
            .part(DIAGNOSE_IMAGE_FIELD, part)
            .text(DIAGNOSE_PLANT_TYPE_FIELD, plant_type)
            .text(DIAGNOSE_LANGUAGE_FIELD, language.code());

        debug!("diagnose: uploading image size_bytes={size_bytes} mime={mime_type}");
        let response = self
            .http
            .post(format!("{}{DIAGNOSE_PATH}", self.base_url))
            .multipart(form)
            .send()
            .await?;
        decode_json(response).await
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ExchangeError::Status {
            status: status.as_u16(),
            message: describe_error_body(&body),
        });
    }
    serde_json::from_str(&body).map_err(|err| ExchangeError::Decode(err.to_string()))
}

fn describe_error_body(body: &str) -> String {
    if let Some(api_error) = ApiError::from_body(body) {
        return match api_error.code {
            Some(code) => format!("{code}: {}", api_error.message),
            None => api_error.message,
        };
    }
    body.trim().chars().take(MAX_ERROR_DETAIL_CHARS).collect()
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
