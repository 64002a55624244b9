//! Chat-completions wire types for the upstream classification service.

use serde::{Deserialize, Serialize};

use crate::types::QuotaDetails;

/// Chat-completions request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Item count for proxy-side metering. Only sent without an own key.
    #[serde(rename = "postCount", default, skip_serializing_if = "Option::is_none")]
    pub post_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(content: MessageContent) -> Self {
        Self {
            role: "user".into(),
            content,
        }
    }
}

/// Message content (string or array).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Content part for multimodal messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Chat-completions response. Only the fields the pipeline reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Trimmed content of the first choice.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Body of an HTTP 429 from the proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
    pub daily_limit: Option<u64>,
    pub current_usage: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_time: Option<String>,
}

impl QuotaErrorBody {
    pub const DAILY_LIMIT: &'static str = "Daily limit exceeded";

    pub fn is_daily_limit(&self) -> bool {
        self.error.as_deref() == Some(Self::DAILY_LIMIT)
    }

    pub fn into_details(self) -> QuotaDetails {
        QuotaDetails {
            message: self.message,
            daily_limit: self.daily_limit,
            current_usage: self.current_usage,
            remaining: self.remaining,
            reset_time: self.reset_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_post_count_when_unset() {
        let request = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user(MessageContent::Text("hi".into()))],
            max_tokens: 10,
            temperature: 0.0,
            post_count: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("postCount").is_none());
        assert_eq!(json["messages"][0]["content"], "hi");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn parts_serialize_with_type_tags() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "1. a".into() },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "https://x/y.png".into(),
                },
            },
        ]);
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json[0]["type"], "text");
        assert_eq!(json[1]["type"], "image_url");
        assert_eq!(json[1]["image_url"]["url"], "https://x/y.png");
    }

    #[test]
    fn quota_body_parses_camel_case() {
        let body: QuotaErrorBody = serde_json::from_str(
            r#"{"error":"Daily limit exceeded","message":"m","dailyLimit":100,"currentUsage":100,"remaining":0,"resetTime":"2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(body.is_daily_limit());
        let details = body.into_details();
        assert_eq!(details.daily_limit, Some(100));
        assert_eq!(details.reset_time.as_deref(), Some("2025-01-01T00:00:00Z"));
    }
}
