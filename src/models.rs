use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Exact body POSTed to the registration endpoint.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PushSubscriptionRecord {
    pub endpoint: String,
    pub keys: PushKeys,
}

/// Standard base64 encodings of the subscription's key buffers.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NotificationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotificationData {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: NotificationData,
}

impl NotificationPayload {
    /// Shallow-merges a decoded push body over `self`.
    ///
    /// `title`, `icon` and `badge` only accept non-empty strings so the
    /// defaults always survive. `data` is replaced wholesale: an object
    /// becomes the new data, anything else leaves no routing URL.
    pub fn merge(mut self, payload: PushPayload) -> Self {
        match payload {
            PushPayload::Empty => {}
            PushPayload::Text(text) => self.body = text,
            PushPayload::Structured(fields) => {
                for (key, value) in fields {
                    match (key.as_str(), value) {
                        ("title", Value::String(v)) if !v.is_empty() => self.title = v,
                        ("icon", Value::String(v)) if !v.is_empty() => self.icon = v,
                        ("badge", Value::String(v)) if !v.is_empty() => self.badge = v,
                        ("body", Value::String(v)) => self.body = v,
                        ("data", Value::Object(mut extra)) => {
                            let url = match extra.remove("url") {
                                Some(Value::String(url)) => Some(url),
                                _ => None,
                            };
                            self.data = NotificationData { url, extra };
                        }
                        ("data", other) => {
                            tracing::debug!("push data is not an object: {other}");
                            self.data = NotificationData {
                                url: None,
                                extra: Map::new(),
                            };
                        }
                        (other, _) => tracing::debug!("ignoring push field {other}"),
                    }
                }
            }
        }
        self
    }
}

/// Decoded form of a push message body.
#[derive(Debug, Clone, PartialEq)]
pub enum PushPayload {
    Empty,
    Structured(Map<String, Value>),
    Text(String),
}

impl PushPayload {
    /// Classifies raw push bytes. A JSON object is structured; valid JSON
    /// of any other kind carries no fields and is empty. Only a body that
    /// fails to parse as JSON is plain text.
    pub fn parse(raw: Option<&[u8]>) -> Self {
        let Some(raw) = raw else {
            return Self::Empty;
        };
        match serde_json::from_slice::<Value>(raw) {
            Ok(Value::Object(fields)) => Self::Structured(fields),
            Ok(other) => {
                tracing::debug!("push body is JSON but not an object: {other}");
                Self::Empty
            }
            Err(_) => Self::Text(String::from_utf8_lossy(raw).into_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Unsupported,
    Unknown,
    Unsubscribed,
    Subscribed,
    Pending,
}

/// Snapshot handed to UI surfaces that display subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    pub state: SubscriptionState,
    pub supported: bool,
    pub subscribed: bool,
    pub pending: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TestNotificationData {
    pub timestamp: i64,
    pub url: String,
}

/// Body of an authenticated test send.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TestNotification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub data: TestNotificationData,
}

impl TestNotification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, timestamp: i64) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: "/favicon.ico".to_string(),
            badge: "/favicon.ico".to_string(),
            tag: "admin-notification".to_string(),
            data: TestNotificationData {
                timestamp,
                url: "/admin".to_string(),
            },
        }
    }
}
