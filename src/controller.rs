use std::cell::RefCell;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::{
    api::ApiClient,
    codec::{encode_standard, VapidKey, APPLICATION_SERVER_KEY},
    error::{ControllerError, PlatformError},
    models::{PushKeys, PushSubscriptionRecord, SubscriptionState, SubscriptionStatus, TestNotification},
    state::{InFlight, SubscriptionSession},
};

/// Answer from the notification permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Prompt dismissed without a decision.
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyName {
    P256dh,
    Auth,
}

impl KeyName {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyName::P256dh => "p256dh",
            KeyName::Auth => "auth",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub user_visible_only: bool,
    pub application_server_key: VapidKey,
}

/// Foreground platform facilities the controller drives.
#[allow(async_fn_in_trait)]
pub trait PushPlatform {
    type Subscription: PlatformSubscription;

    fn supports_workers(&self) -> bool;
    fn supports_push_manager(&self) -> bool;
    async fn register_worker(&self, script: &str, scope: &str) -> Result<(), PlatformError>;
    /// Resolves once a worker for this scope is active.
    async fn worker_ready(&self) -> Result<(), PlatformError>;
    async fn request_permission(&self) -> Result<Permission, PlatformError>;
    async fn get_subscription(&self) -> Result<Option<Self::Subscription>, PlatformError>;
    async fn subscribe(&self, options: &SubscribeOptions)
        -> Result<Self::Subscription, PlatformError>;
}

/// Live handle to a push-service subscription.
#[allow(async_fn_in_trait)]
pub trait PlatformSubscription {
    fn endpoint(&self) -> &str;
    fn key(&self, name: KeyName) -> Option<Vec<u8>>;
    async fn unsubscribe(&self) -> Result<bool, PlatformError>;
}

/// Source of the bearer token for authenticated sends.
pub trait CredentialStore {
    fn bearer_token(&self) -> Option<String>;
}

impl CredentialStore for Option<String> {
    fn bearer_token(&self) -> Option<String> {
        self.clone()
    }
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub worker_script: String,
    pub worker_scope: String,
    pub application_server_key: &'static str,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            worker_script: "/sw.js".to_string(),
            worker_scope: "/".to_string(),
            application_server_key: APPLICATION_SERVER_KEY,
        }
    }
}

/// Builds the registration body from a platform subscription, re-encoding
/// both keys as standard base64.
pub fn subscription_record<S: PlatformSubscription>(
    subscription: &S,
) -> Result<PushSubscriptionRecord, PlatformError> {
    let key = |name: KeyName| {
        subscription
            .key(name)
            .map(|bytes| encode_standard(&bytes))
            .ok_or(PlatformError::MissingKey(name.as_str()))
    };
    Ok(PushSubscriptionRecord {
        endpoint: subscription.endpoint().to_string(),
        keys: PushKeys {
            p256dh: key(KeyName::P256dh)?,
            auth: key(KeyName::Auth)?,
        },
    })
}

/// Foreground state machine for the push subscription.
///
/// Subscribe and unsubscribe are mutually exclusive: while one is in
/// flight the state reads `Pending` and a second call is refused.
pub struct SubscriptionController<P: PushPlatform, C> {
    platform: P,
    api: ApiClient,
    credentials: C,
    options: ControllerOptions,
    session: RefCell<SubscriptionSession<P::Subscription>>,
}

impl<P: PushPlatform, C: CredentialStore> SubscriptionController<P, C> {
    pub fn new(
        platform: P,
        api: ApiClient,
        credentials: C,
        options: ControllerOptions,
        session: SubscriptionSession<P::Subscription>,
    ) -> Self {
        Self {
            platform,
            api,
            credentials,
            options,
            session: RefCell::new(session),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn state(&self) -> SubscriptionState {
        self.session.borrow().state
    }

    pub fn status(&self) -> SubscriptionStatus {
        let session = self.session.borrow();
        SubscriptionStatus {
            state: session.state,
            supported: session.supported,
            subscribed: session.handle.is_some(),
            pending: session.state == SubscriptionState::Pending,
        }
    }

    /// Endpoint of the live subscription, if any.
    pub fn endpoint(&self) -> Option<String> {
        self.session
            .borrow()
            .handle
            .as_ref()
            .map(|handle| handle.endpoint().to_string())
    }

    fn platform_supported(&self) -> bool {
        self.platform.supports_workers() && self.platform.supports_push_manager()
    }

    /// Checks platform support and, when present, reflects any existing
    /// subscription. Never creates one.
    pub async fn detect_capability(&self) -> SubscriptionState {
        let supported = self.platform_supported();
        self.session.borrow_mut().supported = supported;
        if !supported {
            info!("push notifications unsupported on this platform");
            self.session.borrow_mut().state = SubscriptionState::Unsupported;
            return SubscriptionState::Unsupported;
        }
        self.query_subscription().await
    }

    /// Mirrors the push manager's current subscription into the state.
    /// Failures are logged and leave the state as it was.
    pub async fn query_subscription(&self) -> SubscriptionState {
        let existing = async {
            self.platform.worker_ready().await?;
            self.platform.get_subscription().await
        };
        match existing.await {
            Ok(handle) => {
                let mut session = self.session.borrow_mut();
                if session.state == SubscriptionState::Pending {
                    debug!("operation in flight, not overwriting state");
                    return session.state;
                }
                session.state = if handle.is_some() {
                    SubscriptionState::Subscribed
                } else {
                    SubscriptionState::Unsubscribed
                };
                session.handle = handle;
                debug!("subscription state is {:?}", session.state);
                session.state
            }
            Err(err) => {
                error!("error checking subscription: {err}");
                self.state()
            }
        }
    }

    /// Registers the worker, asks for permission, subscribes with the push
    /// service and registers the result with the server.
    ///
    /// A server failure leaves the platform subscription in place; it is not
    /// rolled back.
    pub async fn subscribe(&self) -> Result<(), ControllerError> {
        if !self.platform_supported() {
            return Err(ControllerError::UnsupportedCapability);
        }
        self.session.borrow_mut().supported = true;

        let Some(token) = InFlight::begin(&self.session) else {
            warn!("subscribe refused, another operation is in flight");
            return Err(ControllerError::OperationInFlight);
        };

        match self.create_subscription().await {
            Ok(subscription) => {
                info!("subscribed at {}", subscription.endpoint());
                token.finish(SubscriptionState::Subscribed, Some(subscription));
                Ok(())
            }
            Err(err) => {
                error!("error subscribing to push notifications: {err}");
                Err(err)
            }
        }
    }

    async fn create_subscription(&self) -> Result<P::Subscription, ControllerError> {
        self.platform
            .register_worker(&self.options.worker_script, &self.options.worker_scope)
            .await?;
        self.platform.worker_ready().await?;

        let permission = self.platform.request_permission().await?;
        if permission != Permission::Granted {
            warn!("notification permission answered {permission:?}");
            return Err(ControllerError::PermissionDenied);
        }

        let application_server_key = VapidKey::from_url_safe(self.options.application_server_key)?;
        let subscription = self
            .platform
            .subscribe(&SubscribeOptions {
                user_visible_only: true,
                application_server_key,
            })
            .await?;

        let record = subscription_record(&subscription)?;
        self.api
            .register(&record)
            .await
            .map_err(ControllerError::Registration)?;
        Ok(subscription)
    }

    /// Revokes the live subscription. Returns `false` when there is nothing
    /// to revoke or the platform refuses. The server is not told; it learns
    /// from failed deliveries.
    pub async fn unsubscribe(&self) -> bool {
        if self.session.borrow().handle.is_none() {
            return false;
        }
        let Some(token) = InFlight::begin(&self.session) else {
            warn!("unsubscribe refused, another operation is in flight");
            return false;
        };
        let handle = self.session.borrow_mut().handle.take();
        let Some(handle) = handle else {
            return false;
        };

        let revoked = handle.unsubscribe().await;
        match revoked {
            Ok(removed) => {
                if !removed {
                    warn!("platform reported no subscription to revoke, clearing handle anyway");
                }
                info!("unsubscribed from push notifications");
                token.finish(SubscriptionState::Unsubscribed, None);
                true
            }
            Err(err) => {
                error!("error unsubscribing: {err}");
                self.session.borrow_mut().handle = Some(handle);
                false
            }
        }
    }

    /// Asks the server to push a notification to every subscriber. Success
    /// is the HTTP status alone.
    pub async fn send_test_notification(&self, title: &str, body: &str) -> bool {
        let notification = TestNotification::new(title, body, Utc::now().timestamp_millis());
        let token = self.credentials.bearer_token();
        if token.is_none() {
            warn!("no admin token available, sending without authorization");
        }

        match self.api.send(&notification, token.as_deref()).await {
            Ok(status) if status.is_success() => true,
            Ok(status) => {
                warn!("send rejected with {status}");
                false
            }
            Err(err) => {
                error!("error sending notification: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::tests::{spawn_backend, Recorded},
        sim::{BrowserCall, SimulatedBrowser},
    };
    use futures_util::future::join;
    use std::{sync::Arc, time::Duration};
    use tokio::sync::Mutex;

    type Controller = SubscriptionController<SimulatedBrowser, Option<String>>;

    async fn setup(status: u16, token: Option<&str>) -> (Controller, Arc<Mutex<Recorded>>) {
        let (base, recorded) = spawn_backend(status).await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).unwrap();
        let controller = SubscriptionController::new(
            SimulatedBrowser::new(),
            api,
            token.map(str::to_string),
            ControllerOptions::default(),
            SubscriptionSession::default(),
        );
        (controller, recorded)
    }

    #[tokio::test]
    async fn detect_marks_unsupported_platform() {
        let (controller, _) = setup(200, None).await;
        controller.platform().set_capabilities(true, false);
        assert_eq!(
            controller.detect_capability().await,
            SubscriptionState::Unsupported
        );
        assert!(!controller.status().supported);
        assert!(controller.platform().calls().is_empty());
    }

    #[tokio::test]
    async fn detect_does_not_create_subscription() {
        let (controller, _) = setup(200, None).await;
        controller.platform().register_worker("/sw.js", "/").await.unwrap();
        assert_eq!(
            controller.detect_capability().await,
            SubscriptionState::Unsubscribed
        );
        assert_eq!(
            controller.detect_capability().await,
            SubscriptionState::Unsubscribed
        );
        assert!(!controller.platform().has_subscription());
    }

    #[tokio::test]
    async fn query_failure_leaves_state_unchanged() {
        let (controller, _) = setup(200, None).await;
        // No worker registered, so the ready wait fails.
        assert_eq!(controller.detect_capability().await, SubscriptionState::Unknown);
        assert_eq!(controller.state(), SubscriptionState::Unknown);
    }

    #[tokio::test]
    async fn subscribe_runs_full_flow() {
        let (controller, recorded) = setup(200, None).await;
        controller.subscribe().await.unwrap();

        assert_eq!(controller.state(), SubscriptionState::Subscribed);
        let status = controller.status();
        assert!(status.subscribed && !status.pending);

        let calls = controller.platform().calls();
        assert_eq!(
            calls[..3],
            [
                BrowserCall::RegisterWorker {
                    script: "/sw.js".to_string(),
                    scope: "/".to_string()
                },
                BrowserCall::WorkerReady,
                BrowserCall::RequestPermission,
            ]
        );
        assert_eq!(
            calls[3],
            BrowserCall::Subscribe {
                user_visible_only: true,
                key_len: 65
            }
        );

        let recorded = recorded.lock().await;
        assert_eq!(recorded.subscribes.len(), 1);
        let body = &recorded.subscribes[0];
        assert_eq!(body["endpoint"].as_str(), controller.endpoint().as_deref());
        let p256dh = body["keys"]["p256dh"].as_str().unwrap();
        let auth = body["keys"]["auth"].as_str().unwrap();
        assert_eq!(base64::decode(p256dh).unwrap().len(), 65);
        assert_eq!(base64::decode(auth).unwrap().len(), 16);
    }

    #[tokio::test]
    async fn subscribe_without_capability_touches_nothing() {
        let (controller, recorded) = setup(200, None).await;
        controller.platform().set_capabilities(false, true);
        let err = controller.subscribe().await.unwrap_err();

        assert!(matches!(err, ControllerError::UnsupportedCapability));
        assert!(controller.platform().calls().is_empty());
        assert!(recorded.lock().await.subscribes.is_empty());
    }

    #[tokio::test]
    async fn subscribe_with_denied_permission_creates_nothing() {
        for answer in [Permission::Denied, Permission::Default] {
            let (controller, recorded) = setup(200, None).await;
            controller.platform().answer_permission(answer);
            let err = controller.subscribe().await.unwrap_err();

            assert!(matches!(err, ControllerError::PermissionDenied));
            assert!(!controller.platform().has_subscription());
            assert!(recorded.lock().await.subscribes.is_empty());
            assert_eq!(controller.state(), SubscriptionState::Unknown);
        }
    }

    #[tokio::test]
    async fn registration_failure_keeps_platform_subscription() {
        let (controller, _) = setup(500, None).await;
        let err = controller.subscribe().await.unwrap_err();

        assert!(matches!(err, ControllerError::Registration(_)));
        assert_eq!(controller.state(), SubscriptionState::Unknown);
        assert!(controller.platform().has_subscription());
        assert_eq!(
            controller.detect_capability().await,
            SubscriptionState::Subscribed
        );
    }

    #[tokio::test]
    async fn platform_failure_is_reported() {
        let (controller, _) = setup(200, None).await;
        controller.platform().fail_subscribe();
        let err = controller.subscribe().await.unwrap_err();
        assert!(matches!(err, ControllerError::Platform(_)));
        assert!(!controller.status().pending);
    }

    #[tokio::test]
    async fn bad_application_key_is_a_codec_error() {
        let (base, _) = spawn_backend(200).await;
        let controller = SubscriptionController::new(
            SimulatedBrowser::new(),
            ApiClient::new(&base, Duration::from_secs(5)).unwrap(),
            None::<String>,
            ControllerOptions {
                application_server_key: "a",
                ..ControllerOptions::default()
            },
            SubscriptionSession::default(),
        );
        let err = controller.subscribe().await.unwrap_err();
        assert!(matches!(err, ControllerError::Codec(_)));
    }

    #[tokio::test]
    async fn overlapping_subscribe_is_refused() {
        let (controller, recorded) = setup(200, None).await;
        let (first, second) = tokio::join!(controller.subscribe(), controller.subscribe());

        let refused = [&first, &second]
            .iter()
            .filter(|result| matches!(result, Err(ControllerError::OperationInFlight)))
            .count();
        assert_eq!(refused, 1);
        assert!(first.is_ok() || second.is_ok());
        assert_eq!(recorded.lock().await.subscribes.len(), 1);
        assert_eq!(controller.state(), SubscriptionState::Subscribed);
    }

    #[tokio::test]
    async fn overlapping_unsubscribe_revokes_once() {
        let (controller, _) = setup(200, None).await;
        controller.platform().suspend_unsubscribe();
        controller.subscribe().await.unwrap();

        let (first, second) = join(controller.unsubscribe(), controller.unsubscribe()).await;

        assert!(first);
        assert!(!second);
        let revocations = controller
            .platform()
            .calls()
            .into_iter()
            .filter(|call| *call == BrowserCall::Unsubscribe)
            .count();
        assert_eq!(revocations, 1);
        assert_eq!(controller.state(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test]
    async fn unsubscribe_during_subscribe_is_refused() {
        let (controller, recorded) = setup(200, None).await;
        controller.subscribe().await.unwrap();

        let (subscribed, unsubscribed) =
            join(controller.subscribe(), controller.unsubscribe()).await;

        subscribed.unwrap();
        assert!(!unsubscribed);
        assert!(!controller.platform().calls().contains(&BrowserCall::Unsubscribe));
        assert!(controller.platform().has_subscription());
        assert_eq!(controller.state(), SubscriptionState::Subscribed);
        assert_eq!(recorded.lock().await.subscribes.len(), 2);
    }

    #[tokio::test]
    async fn query_during_subscribe_leaves_pending_state() {
        let (controller, _) = setup(200, None).await;
        controller.subscribe().await.unwrap();
        let endpoint = controller.endpoint();

        let (subscribed, queried) =
            join(controller.subscribe(), controller.query_subscription()).await;

        subscribed.unwrap();
        assert_eq!(queried, SubscriptionState::Pending);
        assert_eq!(controller.state(), SubscriptionState::Subscribed);
        assert_eq!(controller.endpoint(), endpoint);
        assert!(controller.status().subscribed);
    }

    #[tokio::test]
    async fn unsubscribe_without_handle_is_negative() {
        let (controller, _) = setup(200, None).await;
        assert!(!controller.unsubscribe().await);
        assert!(!controller.platform().calls().contains(&BrowserCall::Unsubscribe));
    }

    #[tokio::test]
    async fn unsubscribe_revokes_and_clears_handle() {
        let (controller, recorded) = setup(200, None).await;
        controller.subscribe().await.unwrap();
        assert!(controller.unsubscribe().await);

        assert_eq!(controller.state(), SubscriptionState::Unsubscribed);
        assert!(controller.endpoint().is_none());
        assert!(!controller.platform().has_subscription());
        // Removal is not reported to the server.
        assert_eq!(recorded.lock().await.subscribes.len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_of_revoked_subscription_clears_handle() {
        let (controller, _) = setup(200, None).await;
        controller.subscribe().await.unwrap();
        let elsewhere = controller.platform().get_subscription().await.unwrap().unwrap();
        assert!(elsewhere.unsubscribe().await.unwrap());

        assert!(controller.unsubscribe().await);
        assert_eq!(controller.state(), SubscriptionState::Unsubscribed);
        assert!(controller.endpoint().is_none());
    }

    #[tokio::test]
    async fn failed_unsubscribe_keeps_handle() {
        let (controller, _) = setup(200, None).await;
        controller.platform().fail_unsubscribe();
        controller.subscribe().await.unwrap();
        assert!(!controller.unsubscribe().await);

        assert_eq!(controller.state(), SubscriptionState::Subscribed);
        assert!(controller.endpoint().is_some());
    }

    #[tokio::test]
    async fn send_test_notification_reports_status() {
        let (controller, recorded) = setup(200, Some("tok")).await;
        assert!(controller.send_test_notification("Hi", "There").await);

        let recorded = recorded.lock().await;
        let (auth, body) = &recorded.sends[0];
        assert_eq!(auth.as_deref(), Some("Bearer tok"));
        assert_eq!(body["title"], "Hi");
        assert_eq!(body["data"]["url"], "/admin");
        assert!(body["data"]["timestamp"].as_i64().is_some());
    }

    #[tokio::test]
    async fn send_test_notification_fails_on_rejection() {
        let (controller, recorded) = setup(401, None).await;
        assert!(!controller.send_test_notification("Hi", "There").await);
        assert_eq!(recorded.lock().await.sends[0].0, None);
    }

    #[tokio::test]
    async fn send_test_notification_fails_when_unreachable() {
        let controller: Controller = SubscriptionController::new(
            SimulatedBrowser::new(),
            ApiClient::new("http://127.0.0.1:1/", Duration::from_secs(2)).unwrap(),
            None,
            ControllerOptions::default(),
            SubscriptionSession::default(),
        );
        assert!(!controller.send_test_notification("Hi", "There").await);
    }
}
