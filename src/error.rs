use thiserror::Error;

/// Malformed key material. Only the compiled-in VAPID key is ever decoded,
/// so this is fatal rather than recoverable.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 key material: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// A platform facility on the foreground side rejected a request.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("worker registration failed: {0}")]
    Registration(String),
    #[error("push manager failed: {0}")]
    PushManager(String),
    #[error("permission prompt failed: {0}")]
    Permission(String),
    #[error("subscription is missing the {0} key")]
    MissingKey(&'static str),
}

/// A platform facility inside the worker context rejected a request.
#[derive(Debug, Error)]
#[error("{operation} failed: {message}")]
pub struct HostError {
    pub operation: &'static str,
    pub message: String,
}

impl HostError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded with {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("push notifications are not supported on this platform")]
    UnsupportedCapability,
    #[error("notification permission was not granted")]
    PermissionDenied,
    #[error("subscription could not be registered with the server: {0}")]
    Registration(#[source] ApiError),
    #[error("another subscription operation is already in flight")]
    OperationInFlight,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Failure surfaced through the worker's unhandled-rejection channel.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("could not render notification: {0}")]
    DeliveryRender(#[source] HostError),
    #[error("could not route notification click: {0}")]
    ClientRouting(#[source] HostError),
    #[error("lifecycle step failed: {0}")]
    Lifecycle(#[source] HostError),
}
