use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{Language, SessionId};

pub const CHAT_PATH: &str = "/api/chat";
pub const DIAGNOSE_PATH: &str = "/api/diagnose";

/// Multipart field names of the diagnose form.
pub const DIAGNOSE_IMAGE_FIELD: &str = "image";
pub const DIAGNOSE_PLANT_TYPE_FIELD: &str = "plant_type";
pub const DIAGNOSE_LANGUAGE_FIELD: &str = "language";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: SessionId,
    pub message: String,
    pub language: Language,
}

/// Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

impl ChatResponse {
    /// The reply text when the service actually produced one.
    pub fn reply_text(&self) -> Option<&str> {
        self.reply.as_deref().filter(|reply| !reply.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_disease: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub recommendations: Vec<String>,
}

/// Services send `null` as readily as they omit the key.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_uses_snake_case_wire_names() {
        let request = ChatRequest {
            session_id: SessionId::generate(),
            message: "hi".to_string(),
            language: Language::Fr,
        };
        let value = serde_json::to_value(&request).expect("json");
        assert_eq!(value["message"], "hi");
        assert_eq!(value["language"], "fr");
        assert_eq!(value["session_id"], request.session_id.as_str());
    }

    #[test]
    fn empty_or_missing_reply_has_no_text() {
        let missing: ChatResponse = serde_json::from_str("{}").expect("json");
        let empty: ChatResponse = serde_json::from_str(r#"{"reply":""}"#).expect("json");
        let null: ChatResponse = serde_json::from_str(r#"{"reply":null}"#).expect("json");
        assert_eq!(missing.reply_text(), None);
        assert_eq!(empty.reply_text(), None);
        assert_eq!(null.reply_text(), None);
    }

    #[test]
    fn chat_response_ignores_extra_fields() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"reply":"Hola","session_id":"abc","tokens":12}"#)
                .expect("json");
        assert_eq!(response.reply_text(), Some("Hola"));
    }

    #[test]
    fn diagnosis_fields_default_when_absent() {
        let response: DiagnosisResponse = serde_json::from_str("{}").expect("json");
        assert_eq!(response, DiagnosisResponse::default());
    }

    #[test]
    fn diagnosis_null_fields_decode_as_absent() {
        let response: DiagnosisResponse = serde_json::from_str(
            r#"{"title":null,"predicted_disease":"Rust","confidence":null,"recommendations":null}"#,
        )
        .expect("json");
        assert_eq!(response.title, None);
        assert_eq!(response.predicted_disease.as_deref(), Some("Rust"));
        assert_eq!(response.confidence, None);
        assert!(response.recommendations.is_empty());
    }
}
