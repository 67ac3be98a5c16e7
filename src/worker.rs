//! Background notification worker.
//!
//! The runtime has no page access. It renders pushed messages as
//! notifications and routes clicks back to an open window of the app, or a
//! new one. Every handler hands its asynchronous work to the event's
//! [`ExtendableEvent`] so the host keeps the worker alive until that work
//! settles.

use std::cell::Cell;

use futures_util::{
    future::LocalBoxFuture,
    stream::{FuturesUnordered, StreamExt},
    FutureExt,
};
use serde::Serialize;
use tracing::{debug, error, info};
use url::{Origin, Url};

use crate::{
    error::{HostError, WorkerError},
    models::{NotificationData, NotificationPayload, PushPayload},
};

pub const ACTION_OPEN: &str = "open";
pub const ACTION_CLOSE: &str = "close";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

/// An open window of the application as enumerated by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
    pub id: ClientId,
    pub url: String,
}

/// A rendered notification as seen by click and close events.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationHandle {
    pub id: String,
    pub data: Option<NotificationData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Everything the host needs to display one notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: NotificationData,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

/// Worker-side platform facilities.
#[allow(async_fn_in_trait)]
pub trait WorkerHost {
    /// Origin the worker script was served from.
    fn origin(&self) -> Origin;
    fn close_notification(&self, notification: &NotificationHandle);
    async fn skip_waiting(&self) -> Result<(), HostError>;
    async fn claim_clients(&self) -> Result<(), HostError>;
    async fn show_notification(&self, request: NotificationRequest) -> Result<(), HostError>;
    async fn match_window_clients(
        &self,
        include_uncontrolled: bool,
    ) -> Result<Vec<WindowClient>, HostError>;
    async fn focus(&self, client: &ClientId) -> Result<(), HostError>;
    async fn navigate(&self, client: &ClientId, url: &str) -> Result<(), HostError>;
    async fn open_window(&self, url: &str) -> Result<(), HostError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    Installed,
    Activating,
    Active,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationClickEvent {
    pub notification: NotificationHandle,
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationCloseEvent {
    pub notification: NotificationHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Install,
    Activate,
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
    NotificationClose(NotificationCloseEvent),
}

impl WorkerEvent {
    fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Push(_) => "push",
            WorkerEvent::NotificationClick(_) => "notificationclick",
            WorkerEvent::NotificationClose(_) => "notificationclose",
        }
    }
}

/// Lifetime extension for one event. Work registered with `wait_until` is
/// driven to completion by `settle`; nothing else keeps the worker alive.
pub struct ExtendableEvent<'a> {
    pending: FuturesUnordered<LocalBoxFuture<'a, Result<(), WorkerError>>>,
}

impl<'a> ExtendableEvent<'a> {
    pub fn new() -> Self {
        Self {
            pending: FuturesUnordered::new(),
        }
    }

    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = Result<(), WorkerError>> + 'a,
    {
        self.pending.push(work.boxed_local());
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Runs every registered task to completion and reports the first
    /// failure, if any.
    pub async fn settle(mut self) -> Result<(), WorkerError> {
        let mut first_error = None;
        while let Some(result) = self.pending.next().await {
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for ExtendableEvent<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub default_payload: NotificationPayload,
    /// Click target when the notification carries no URL.
    pub fallback_url: String,
    pub open_label: String,
    pub close_label: String,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            default_payload: NotificationPayload {
                title: "КрымБлок".to_string(),
                body: "Новое уведомление".to_string(),
                icon: "/favicon.ico".to_string(),
                badge: "/favicon.ico".to_string(),
                data: NotificationData::with_url("/"),
            },
            fallback_url: "/admin".to_string(),
            open_label: "Открыть".to_string(),
            close_label: "Закрыть".to_string(),
        }
    }
}

pub struct WorkerRuntime<H> {
    host: H,
    options: WorkerOptions,
    lifecycle: Cell<LifecycleState>,
}

impl<H: WorkerHost> WorkerRuntime<H> {
    pub fn new(host: H, options: WorkerOptions) -> Self {
        Self {
            host,
            options,
            lifecycle: Cell::new(LifecycleState::Installing),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    /// Routes an event to its handler and waits for all work it registered.
    /// Failures are logged and returned to the host's unhandled-rejection
    /// channel.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<(), WorkerError> {
        let name = event.name();
        let mut lifetime = ExtendableEvent::new();
        match event {
            WorkerEvent::Install => self.on_install(&mut lifetime),
            WorkerEvent::Activate => self.on_activate(&mut lifetime),
            WorkerEvent::Push(event) => self.on_push(event, &mut lifetime),
            WorkerEvent::NotificationClick(event) => {
                self.on_notification_click(event, &mut lifetime)
            }
            WorkerEvent::NotificationClose(event) => self.on_notification_close(&event),
        }
        lifetime.settle().await.inspect_err(|err| {
            error!("unhandled failure in {name} handler: {err}");
        })
    }

    /// Supersedes any previous worker version without waiting for its
    /// clients to close.
    pub fn on_install<'a>(&'a self, lifetime: &mut ExtendableEvent<'a>) {
        info!("worker installing");
        self.lifecycle.set(LifecycleState::Installing);
        lifetime.wait_until(async move {
            self.host
                .skip_waiting()
                .await
                .map_err(WorkerError::Lifecycle)?;
            self.lifecycle.set(LifecycleState::Installed);
            Ok(())
        });
    }

    /// Takes control of every window already open in scope.
    pub fn on_activate<'a>(&'a self, lifetime: &mut ExtendableEvent<'a>) {
        info!("worker activating");
        self.lifecycle.set(LifecycleState::Activating);
        lifetime.wait_until(async move {
            self.host
                .claim_clients()
                .await
                .map_err(WorkerError::Lifecycle)?;
            self.lifecycle.set(LifecycleState::Active);
            info!("worker active");
            Ok(())
        });
    }

    pub fn on_push<'a>(&'a self, event: PushEvent, lifetime: &mut ExtendableEvent<'a>) {
        let payload = PushPayload::parse(event.data.as_deref());
        debug!("push received: {payload:?}");
        let request = self.notification_request(payload);
        lifetime.wait_until(async move {
            self.host
                .show_notification(request)
                .await
                .map_err(WorkerError::DeliveryRender)
        });
    }

    pub fn on_notification_click<'a>(
        &'a self,
        event: NotificationClickEvent,
        lifetime: &mut ExtendableEvent<'a>,
    ) {
        debug!(
            "notification {} clicked with action {:?}",
            event.notification.id, event.action
        );
        self.host.close_notification(&event.notification);

        if event.action.as_deref() == Some(ACTION_CLOSE) {
            return;
        }

        let target = event
            .notification
            .data
            .and_then(|data| data.url)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.options.fallback_url.clone());
        lifetime.wait_until(async move {
            self.focus_or_open(&target)
                .await
                .map_err(WorkerError::ClientRouting)
        });
    }

    /// Observation point only; dismissal changes nothing.
    pub fn on_notification_close(&self, event: &NotificationCloseEvent) {
        debug!(
            "notification {} dismissed without interaction",
            event.notification.id
        );
    }

    fn notification_request(&self, payload: PushPayload) -> NotificationRequest {
        let merged = self.options.default_payload.clone().merge(payload);
        NotificationRequest {
            title: merged.title,
            body: merged.body,
            icon: merged.icon,
            badge: merged.badge,
            data: merged.data,
            require_interaction: true,
            actions: vec![
                NotificationAction {
                    action: ACTION_OPEN.to_string(),
                    title: self.options.open_label.clone(),
                },
                NotificationAction {
                    action: ACTION_CLOSE.to_string(),
                    title: self.options.close_label.clone(),
                },
            ],
        }
    }

    /// The first window on our own origin, in host enumeration order, is
    /// focused and navigated. Otherwise a new window is opened.
    async fn focus_or_open(&self, target: &str) -> Result<(), HostError> {
        let origin = self.host.origin();
        let clients = self.host.match_window_clients(true).await?;
        let existing = clients.into_iter().find(|client| {
            Url::parse(&client.url)
                .map(|url| url.origin() == origin)
                .unwrap_or(false)
        });

        match existing {
            Some(client) => {
                debug!("reusing window {} for {target}", client.id.0);
                self.host.focus(&client.id).await?;
                self.host.navigate(&client.id, target).await
            }
            None => {
                debug!("opening new window for {target}");
                self.host.open_window(target).await
            }
        }
    }
}
