use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Notification channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelType {
    Email,
    Sms,
    InApp,
}

impl ChannelType {
    pub const ALL: [ChannelType; 3] = [ChannelType::Email, ChannelType::Sms, ChannelType::InApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Sms => "sms",
            ChannelType::InApp => "in-app",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = ChannelType::ALL.iter().map(|c| c.as_str()).collect();
                AppError::Validation(format!(
                    "Invalid notification type '{}'. Valid types: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

/// Notification delivery status.
///
/// `Queued → Sending → {Sent | Failed}`; `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    Sending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Failed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Queued => write!(f, "queued"),
            DeliveryStatus::Sending => write!(f, "sending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A tracked notification and its delivery state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub subject: Option<String>,
    #[serde(rename = "message")]
    pub body: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Create a fresh `queued` record with a server-assigned id.
    pub fn new(notification: NewNotification) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            channel_type: notification.channel_type,
            subject: notification.subject,
            body: notification.body,
            status: DeliveryStatus::Queued,
            attempt_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Raw submission body as received from a caller.
///
/// Every field is optional so that validation can report all missing fields
/// at once instead of failing on the first one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// String or number; numbers are normalized to their decimal form.
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(rename = "type", default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Ids are server-assigned; any value here is rejected.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

/// A submission that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: String,
    pub channel_type: ChannelType,
    pub subject: Option<String>,
    pub body: String,
}

impl NotificationRequest {
    /// Validate the request, naming every missing or invalid field.
    pub fn validate(self) -> Result<NewNotification, AppError> {
        if self.id.as_ref().is_some_and(|v| !v.is_null()) {
            return Err(AppError::Validation(
                "Field 'id' is server-assigned and must not be supplied".to_string(),
            ));
        }

        let user_id = match self.user_id {
            Some(serde_json::Value::String(s)) => Some(s.trim().to_string()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "Invalid user_id: expected a string or number, got {}",
                    other
                )));
            }
        }
        .filter(|s| !s.is_empty());

        let channel_type = self.channel_type.filter(|s| !s.trim().is_empty());
        let body = self.message.filter(|s| !s.trim().is_empty());

        let mut missing = Vec::new();
        if user_id.is_none() {
            missing.push("user_id");
        }
        if channel_type.is_none() {
            missing.push("type");
        }
        if body.is_none() {
            missing.push("message");
        }

        let (Some(user_id), Some(channel_type), Some(body)) = (user_id, channel_type, body) else {
            return Err(AppError::Validation(format!(
                "Missing field(s): {}",
                missing.join(", ")
            )));
        };

        let channel_type = channel_type.parse::<ChannelType>()?;
        let subject = self.subject.filter(|s| !s.is_empty());

        Ok(NewNotification {
            user_id,
            channel_type,
            subject,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> NotificationRequest {
        serde_json::from_value(value).unwrap()
    }

    fn validation_message(err: AppError) -> String {
        match err {
            AppError::Validation(msg) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_request() {
        let new = request(json!({
            "user_id": "42",
            "type": "in-app",
            "subject": "Hi",
            "message": "hello!"
        }))
        .validate()
        .unwrap();
        assert_eq!(new.user_id, "42");
        assert_eq!(new.channel_type, ChannelType::InApp);
        assert_eq!(new.subject.as_deref(), Some("Hi"));
        assert_eq!(new.body, "hello!");
    }

    #[test]
    fn test_numeric_user_id_is_normalized() {
        let new = request(json!({"user_id": 7, "type": "sms", "message": "x"}))
            .validate()
            .unwrap();
        assert_eq!(new.user_id, "7");
    }

    #[test]
    fn test_missing_fields_are_all_named() {
        let err = request(json!({"type": "email", "message": ""}))
            .validate()
            .unwrap_err();
        assert_eq!(validation_message(err), "Missing field(s): user_id, message");
    }

    #[test]
    fn test_missing_message() {
        let err = request(json!({"user_id": "1", "type": "email"}))
            .validate()
            .unwrap_err();
        assert!(validation_message(err).contains("message"));
    }

    #[test]
    fn test_invalid_type() {
        let err = request(json!({"user_id": "1", "type": "carrier-pigeon", "message": "coo"}))
            .validate()
            .unwrap_err();
        let msg = validation_message(err);
        assert!(msg.contains("Invalid notification type"));
        assert!(msg.contains("carrier-pigeon"));
    }

    #[test]
    fn test_client_supplied_id_rejected() {
        let err = request(json!({"id": 5, "user_id": "1", "type": "sms", "message": "x"}))
            .validate()
            .unwrap_err();
        assert!(validation_message(err).contains("'id'"));
    }

    #[test]
    fn test_non_scalar_user_id_rejected() {
        let err = request(json!({"user_id": ["a"], "type": "sms", "message": "x"}))
            .validate()
            .unwrap_err();
        assert!(validation_message(err).contains("user_id"));
    }

    #[test]
    fn test_record_serialized_shape() {
        let record = NotificationRecord::new(NewNotification {
            user_id: "1".to_string(),
            channel_type: ChannelType::InApp,
            subject: None,
            body: "hello".to_string(),
        });
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["user_id"], "1");
        assert_eq!(value["type"], "in-app");
        assert_eq!(value["message"], "hello");
        assert_eq!(value["status"], "queued");
        assert_eq!(value["attempt_count"], 0);
        assert!(value["subject"].is_null());
        assert!(value["timestamp"].is_string());
        assert!(value["id"].is_string());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(DeliveryStatus::Sent.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::Queued.is_terminal());
        assert!(!DeliveryStatus::Sending.is_terminal());
    }
}
