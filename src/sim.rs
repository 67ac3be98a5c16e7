//! In-process stand-ins for the browser, used by the CLI and the tests.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use url::{Origin, Url};
use uuid::Uuid;

use crate::{
    controller::{KeyName, Permission, PlatformSubscription, PushPlatform, SubscribeOptions},
    error::{HostError, PlatformError},
    worker::{ClientId, NotificationHandle, NotificationRequest, WindowClient, WorkerHost},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserCall {
    RegisterWorker { script: String, scope: String },
    WorkerReady,
    RequestPermission,
    GetSubscription,
    Subscribe { user_visible_only: bool, key_len: usize },
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SubscriptionData {
    endpoint: String,
    p256dh: Vec<u8>,
    auth: Vec<u8>,
}

#[derive(Debug)]
struct BrowserState {
    calls: Vec<BrowserCall>,
    worker_script: Option<String>,
    subscription: Option<SubscriptionData>,
}

/// Foreground platform with a push service that lives in memory.
///
/// `worker_ready` fails instead of waiting forever when no worker has been
/// registered yet.
#[derive(Debug)]
pub struct SimulatedBrowser {
    supports_workers: Cell<bool>,
    supports_push: Cell<bool>,
    permission: Cell<Permission>,
    fail_subscribe: Cell<bool>,
    fail_unsubscribe: Cell<bool>,
    suspend_unsubscribe: Cell<bool>,
    inner: Rc<RefCell<BrowserState>>,
}

impl Default for SimulatedBrowser {
    fn default() -> Self {
        Self {
            supports_workers: Cell::new(true),
            supports_push: Cell::new(true),
            permission: Cell::new(Permission::Granted),
            fail_subscribe: Cell::new(false),
            fail_unsubscribe: Cell::new(false),
            suspend_unsubscribe: Cell::new(false),
            inner: Rc::new(RefCell::new(BrowserState {
                calls: Vec::new(),
                worker_script: None,
                subscription: None,
            })),
        }
    }
}

impl SimulatedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_capabilities(&self, workers: bool, push: bool) {
        self.supports_workers.set(workers);
        self.supports_push.set(push);
    }

    pub fn answer_permission(&self, permission: Permission) {
        self.permission.set(permission);
    }

    pub fn fail_subscribe(&self) {
        self.fail_subscribe.set(true);
    }

    pub fn fail_unsubscribe(&self) {
        self.fail_unsubscribe.set(true);
    }

    /// Makes revocation yield to the executor once before it completes, as
    /// a round trip to the push service would.
    pub fn suspend_unsubscribe(&self) {
        self.suspend_unsubscribe.set(true);
    }

    pub fn calls(&self) -> Vec<BrowserCall> {
        self.inner.borrow().calls.clone()
    }

    /// Whether the push service currently holds a subscription.
    pub fn has_subscription(&self) -> bool {
        self.inner.borrow().subscription.is_some()
    }

    fn record(&self, call: BrowserCall) {
        self.inner.borrow_mut().calls.push(call);
    }

    fn handle(&self, data: SubscriptionData) -> SimulatedSubscription {
        SimulatedSubscription {
            data,
            browser: self.inner.clone(),
            fail_unsubscribe: self.fail_unsubscribe.get(),
            suspend: self.suspend_unsubscribe.get(),
        }
    }
}

impl PushPlatform for SimulatedBrowser {
    type Subscription = SimulatedSubscription;

    fn supports_workers(&self) -> bool {
        self.supports_workers.get()
    }

    fn supports_push_manager(&self) -> bool {
        self.supports_push.get()
    }

    async fn register_worker(&self, script: &str, scope: &str) -> Result<(), PlatformError> {
        self.record(BrowserCall::RegisterWorker {
            script: script.to_string(),
            scope: scope.to_string(),
        });
        self.inner.borrow_mut().worker_script = Some(script.to_string());
        Ok(())
    }

    async fn worker_ready(&self) -> Result<(), PlatformError> {
        self.record(BrowserCall::WorkerReady);
        if self.inner.borrow().worker_script.is_none() {
            return Err(PlatformError::Registration(
                "no worker registered".to_string(),
            ));
        }
        Ok(())
    }

    async fn request_permission(&self) -> Result<Permission, PlatformError> {
        self.record(BrowserCall::RequestPermission);
        Ok(self.permission.get())
    }

    async fn get_subscription(&self) -> Result<Option<SimulatedSubscription>, PlatformError> {
        self.record(BrowserCall::GetSubscription);
        let existing = self.inner.borrow().subscription.clone();
        Ok(existing.map(|data| self.handle(data)))
    }

    async fn subscribe(
        &self,
        options: &SubscribeOptions,
    ) -> Result<SimulatedSubscription, PlatformError> {
        self.record(BrowserCall::Subscribe {
            user_visible_only: options.user_visible_only,
            key_len: options.application_server_key.as_bytes().len(),
        });
        if self.fail_subscribe.get() {
            return Err(PlatformError::PushManager(
                "push service unavailable".to_string(),
            ));
        }
        if !options.user_visible_only {
            return Err(PlatformError::PushManager(
                "silent push is not allowed".to_string(),
            ));
        }

        let data = {
            let mut inner = self.inner.borrow_mut();
            inner
                .subscription
                .get_or_insert_with(|| {
                    let mut p256dh = vec![0x04];
                    for _ in 0..4 {
                        p256dh.extend_from_slice(Uuid::new_v4().as_bytes());
                    }
                    SubscriptionData {
                        endpoint: format!("https://push.simulated.invalid/{}", Uuid::new_v4()),
                        p256dh,
                        auth: Uuid::new_v4().as_bytes().to_vec(),
                    }
                })
                .clone()
        };
        Ok(self.handle(data))
    }
}

#[derive(Debug)]
pub struct SimulatedSubscription {
    data: SubscriptionData,
    browser: Rc<RefCell<BrowserState>>,
    fail_unsubscribe: bool,
    suspend: bool,
}

impl PlatformSubscription for SimulatedSubscription {
    fn endpoint(&self) -> &str {
        &self.data.endpoint
    }

    fn key(&self, name: KeyName) -> Option<Vec<u8>> {
        match name {
            KeyName::P256dh => Some(self.data.p256dh.clone()),
            KeyName::Auth => Some(self.data.auth.clone()),
        }
    }

    async fn unsubscribe(&self) -> Result<bool, PlatformError> {
        if self.suspend {
            tokio::task::yield_now().await;
        }
        let mut browser = self.browser.borrow_mut();
        browser.calls.push(BrowserCall::Unsubscribe);
        if self.fail_unsubscribe {
            return Err(PlatformError::PushManager(
                "unsubscribe rejected".to_string(),
            ));
        }
        if browser.subscription.as_ref() == Some(&self.data) {
            browser.subscription = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    SkipWaiting,
    ClaimClients,
    ShowNotification(NotificationRequest),
    CloseNotification(String),
    MatchWindowClients { include_uncontrolled: bool },
    Focus(ClientId),
    Navigate(ClientId, String),
    OpenWindow(String),
}

/// Worker host that records every call and keeps a list of open windows.
#[derive(Debug)]
pub struct SimulatedWorkerHost {
    location: Url,
    clients: RefCell<Vec<WindowClient>>,
    calls: RefCell<Vec<HostCall>>,
    fail_show: Cell<bool>,
}

impl SimulatedWorkerHost {
    pub fn new(location: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            location: Url::parse(location)?,
            clients: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            fail_show: Cell::new(false),
        })
    }

    pub fn add_client(&self, id: &str, url: &str) {
        self.clients.borrow_mut().push(WindowClient {
            id: ClientId(id.to_string()),
            url: url.to_string(),
        });
    }

    pub fn fail_show_notification(&self) {
        self.fail_show.set(true);
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.borrow().clone()
    }

    pub fn shown(&self) -> Vec<NotificationRequest> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                HostCall::ShowNotification(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        self.calls.borrow_mut().push(call);
    }

    fn find(&self, id: &ClientId) -> Result<(), HostError> {
        if self.clients.borrow().iter().any(|client| &client.id == id) {
            Ok(())
        } else {
            Err(HostError::new("client lookup", format!("no window {}", id.0)))
        }
    }
}

impl WorkerHost for SimulatedWorkerHost {
    fn origin(&self) -> Origin {
        self.location.origin()
    }

    fn close_notification(&self, notification: &NotificationHandle) {
        self.record(HostCall::CloseNotification(notification.id.clone()));
    }

    async fn skip_waiting(&self) -> Result<(), HostError> {
        self.record(HostCall::SkipWaiting);
        Ok(())
    }

    async fn claim_clients(&self) -> Result<(), HostError> {
        self.record(HostCall::ClaimClients);
        Ok(())
    }

    async fn show_notification(&self, request: NotificationRequest) -> Result<(), HostError> {
        self.record(HostCall::ShowNotification(request));
        if self.fail_show.get() {
            return Err(HostError::new(
                "showNotification",
                "notification permission revoked",
            ));
        }
        Ok(())
    }

    async fn match_window_clients(
        &self,
        include_uncontrolled: bool,
    ) -> Result<Vec<WindowClient>, HostError> {
        self.record(HostCall::MatchWindowClients {
            include_uncontrolled,
        });
        Ok(self.clients.borrow().clone())
    }

    async fn focus(&self, client: &ClientId) -> Result<(), HostError> {
        self.record(HostCall::Focus(client.clone()));
        self.find(client)
    }

    async fn navigate(&self, client: &ClientId, url: &str) -> Result<(), HostError> {
        self.record(HostCall::Navigate(client.clone(), url.to_string()));
        self.find(client)?;
        if let Some(window) = self
            .clients
            .borrow_mut()
            .iter_mut()
            .find(|window| &window.id == client)
        {
            window.url = self.location.join(url).map_or_else(|_| url.to_string(), String::from);
        }
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<(), HostError> {
        self.record(HostCall::OpenWindow(url.to_string()));
        let id = ClientId(Uuid::new_v4().to_string());
        let url = self.location.join(url).map_or_else(|_| url.to_string(), String::from);
        self.clients.borrow_mut().push(WindowClient { id, url });
        Ok(())
    }
}
