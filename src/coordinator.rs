use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::AuthStrategy;
use crate::diff::diff_snapshots;
use crate::normalize::normalize;
use crate::protocol;
use crate::session::SessionClient;
use crate::types::*;
use crate::{Error, Result};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Consecutive failed polls before the user is told the session expired.
pub const FAILURE_NOTIFY_THRESHOLD: u32 = 3;

pub const COOKIE_EXPIRED_NOTIFICATION_ID: &str = "melcloud_home_cookie_expired";

const COMMAND_CHANNEL_SIZE: usize = 32;

type SnapshotCallback = Box<dyn Fn(&Snapshot) + Send + Sync>;
type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SessionCallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
}

/// Persistent user-facing notifications. Delivery is best effort: errors are
/// logged by the coordinator and never fail a poll.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<()>;
    async fn dismiss(&self, notification_id: &str) -> Result<()>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn create(&self, notification: &Notification) -> Result<()> {
        warn!(id = %notification.id, title = %notification.title, "{}", notification.message);
        Ok(())
    }

    async fn dismiss(&self, notification_id: &str) -> Result<()> {
        info!(id = notification_id, "notification dismissed");
        Ok(())
    }
}

/// What observers see: the last good snapshot plus the outcome of the most
/// recent poll. A failed poll leaves `snapshot` untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateState {
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_update_success: bool,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureState {
    pub consecutive_failures: u32,
    pub notification_sent: bool,
}

/// A write to one unit, expressed in the service's partial-state vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetTargetTemperature { unit_id: String, temperature: i64 },
    SetPower { unit_id: String, on: bool, zone1: Option<Zone1Mode> },
    SetTankWaterTemperature { unit_id: String, temperature: i64 },
    SetForcedHotWater { unit_id: String, enabled: bool },
    SetOperationModeZone1 { unit_id: String, mode: Zone1Mode },
}

impl Command {
    pub fn unit_id(&self) -> &str {
        match self {
            Command::SetTargetTemperature { unit_id, .. }
            | Command::SetPower { unit_id, .. }
            | Command::SetTankWaterTemperature { unit_id, .. }
            | Command::SetForcedHotWater { unit_id, .. }
            | Command::SetOperationModeZone1 { unit_id, .. } => unit_id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Command::SetTargetTemperature { .. } => "set_target_temperature",
            Command::SetPower { .. } => "set_power",
            Command::SetTankWaterTemperature { .. } => "set_tank_water_temperature",
            Command::SetForcedHotWater { .. } => "set_forced_hot_water",
            Command::SetOperationModeZone1 { .. } => "set_operation_mode_zone1",
        }
    }

    pub fn state(&self) -> Value {
        match self {
            Command::SetTargetTemperature { temperature, .. } => {
                protocol::set_target_temperature_data(*temperature)
            }
            Command::SetPower { on, zone1, .. } => protocol::set_power_data(*on, *zone1),
            Command::SetTankWaterTemperature { temperature, .. } => {
                protocol::set_tank_water_temperature_data(*temperature)
            }
            Command::SetForcedHotWater { enabled, .. } => {
                protocol::set_forced_hot_water_data(*enabled)
            }
            Command::SetOperationModeZone1 { mode, .. } => {
                protocol::set_operation_mode_zone1_data(*mode)
            }
        }
    }
}

pub struct CoordinatorBuilder {
    session: SessionClient,
    auth: AuthStrategy,
    notifier: Option<Arc<dyn Notifier>>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    event_callbacks: Vec<EventCallback>,
    session_callbacks: Vec<SessionCallback>,
}

impl CoordinatorBuilder {
    pub fn new(session: SessionClient, auth: AuthStrategy) -> Self {
        Self {
            session,
            auth,
            notifier: None,
            snapshot_callbacks: Vec::new(),
            event_callbacks: Vec::new(),
            session_callbacks: Vec::new(),
        }
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&Snapshot) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    /// Called with the new `Cookie` value after a successful re-login, so the
    /// host can store it back into the account configuration.
    pub fn on_session_refreshed(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.session_callbacks.push(Box::new(f));
        self
    }

    pub fn build(self) -> Coordinator {
        let (state, _) = watch::channel(UpdateState::default());
        Coordinator {
            session: self.session,
            auth: self.auth,
            failures: FailureState::default(),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            state,
            snapshot_callbacks: self.snapshot_callbacks,
            event_callbacks: self.event_callbacks,
            session_callbacks: self.session_callbacks,
        }
    }
}

/// Owns the session, the failure counters and the published snapshot for one
/// account. Every method takes `&mut self`; the run loop is the only caller
/// once spawned, so polls, logins and writes never overlap.
pub struct Coordinator {
    session: SessionClient,
    auth: AuthStrategy,
    failures: FailureState,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<UpdateState>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    event_callbacks: Vec<EventCallback>,
    session_callbacks: Vec<SessionCallback>,
}

impl Coordinator {
    pub fn builder(session: SessionClient, auth: AuthStrategy) -> CoordinatorBuilder {
        CoordinatorBuilder::new(session, auth)
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.state.borrow().snapshot.clone()
    }

    pub fn failures(&self) -> FailureState {
        self.failures
    }

    pub fn session(&self) -> &SessionClient {
        &self.session
    }

    /// Install a cookie supplied by the operator. Clears the failure counters
    /// and the expired-session notification; the next poll shows whether the
    /// cookie works.
    pub async fn update_cookie(&mut self, cookie: &str) {
        self.session.set_cookie(cookie);
        if let Err(e) = self.notifier.dismiss(COOKIE_EXPIRED_NOTIFICATION_ID).await {
            warn!(error = %e, "could not dismiss notification");
        }
        self.failures = FailureState::default();
        info!("session cookie replaced");
    }

    /// One poll: fetch (re-logging in once on a rejected session when
    /// credentials are configured), then publish or record the failure.
    pub async fn refresh(&mut self) -> Result<Arc<Snapshot>> {
        match self.fetch_with_reauth().await {
            Ok(context) => {
                self.record_success().await;
                Ok(self.publish(context))
            }
            Err(e) => {
                self.record_failure(&e).await;
                let failures = self.failures.consecutive_failures;
                self.state.send_modify(|s| {
                    s.last_update_success = false;
                    s.consecutive_failures = failures;
                });
                Err(Error::UpdateFailed {
                    failures,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Send one command. The snapshot is left alone; the next poll shows the
    /// effect.
    pub async fn execute(&mut self, command: &Command) -> Result<()> {
        let unit_id = command.unit_id();
        let unit_type = self.unit_type_of(unit_id);
        let state = command.state();
        self.session.record_command(command.action(), unit_id, &state);

        match self.session.apply_unit_state(unit_type, unit_id, &state).await {
            Ok(()) => {
                debug!(unit_id, action = command.action(), "command accepted");
                Ok(())
            }
            Err(e) => {
                error!(unit_id, action = command.action(), error = %e, "command failed");
                Err(e)
            }
        }
    }

    /// Type of a unit per the latest snapshot; unknown ids are air-to-water.
    fn unit_type_of(&self, unit_id: &str) -> UnitType {
        self.state
            .borrow()
            .snapshot
            .as_ref()
            .and_then(|s| s.device(unit_id))
            .map(|d| d.unit_type)
            .unwrap_or(UnitType::AirToWater)
    }

    async fn fetch_with_reauth(&mut self) -> Result<UserContext> {
        let first = self.session.fetch_user_context().await;
        if !matches!(first, Err(Error::Unauthorized)) {
            return first;
        }
        let AuthStrategy::Credentials(login) = &self.auth else {
            debug!("session rejected, no credentials to log in again");
            return first;
        };

        info!("session rejected, logging in again");
        let cookie = match login.login().await {
            Ok(cookie) => cookie,
            Err(e) => {
                warn!(error = %e, "re-login failed");
                return Err(e);
            }
        };
        self.session.set_cookie(cookie.as_str());
        for cb in &self.session_callbacks {
            guarded("on_session_refreshed", || cb(&cookie));
        }

        self.session.fetch_user_context().await
    }

    async fn record_failure(&mut self, err: &Error) {
        self.failures.consecutive_failures += 1;
        let failures = self.failures.consecutive_failures;
        warn!(failures, error = %err, "update failed");

        if failures >= FAILURE_NOTIFY_THRESHOLD && !self.failures.notification_sent {
            self.failures.notification_sent = true;
            let notification = self.session_expired_notification();
            if let Err(e) = self.notifier.create(&notification).await {
                warn!(error = %e, "could not deliver notification");
            }
            warn!(failures, "session looks expired, user notified");
        }
    }

    async fn record_success(&mut self) {
        let failures = self.failures.consecutive_failures;
        if failures > 0 {
            if let Err(e) = self.notifier.dismiss(COOKIE_EXPIRED_NOTIFICATION_ID).await {
                warn!(error = %e, "could not dismiss notification");
            }
            info!(failures, "connection restored");
        }
        self.failures = FailureState::default();
    }

    fn publish(&mut self, context: UserContext) -> Arc<Snapshot> {
        let devices = normalize(&context);
        let snapshot = Arc::new(Snapshot {
            context,
            devices,
            fetched_at: Utc::now(),
        });

        let events = {
            let current = self.state.borrow();
            let previous = current
                .snapshot
                .as_ref()
                .map(|s| s.devices.as_slice())
                .unwrap_or(&[]);
            diff_snapshots(previous, &snapshot.devices)
        };

        let published = Arc::clone(&snapshot);
        self.state.send_modify(move |s| {
            s.snapshot = Some(published);
            s.last_update_success = true;
            s.consecutive_failures = 0;
        });

        for event in &events {
            for cb in &self.event_callbacks {
                guarded("on_event", || cb(event));
            }
        }
        for cb in &self.snapshot_callbacks {
            guarded("on_snapshot", || cb(&snapshot));
        }

        debug!(devices = snapshot.devices.len(), events = events.len(), "published snapshot");
        snapshot
    }

    fn session_expired_notification(&self) -> Notification {
        let message = match &self.auth {
            AuthStrategy::Token => {
                "The MELCloud Home session cookie has stopped working. \
                 Extract a new cookie from melcloudhome.com and update the account configuration."
            }
            AuthStrategy::Credentials(_) => {
                "MELCloud Home could not be reached with the configured account. \
                 Check the username and password in the account configuration."
            }
        };
        Notification {
            id: COOKIE_EXPIRED_NOTIFICATION_ID.to_string(),
            title: "MELCloud Home - session expired".to_string(),
            message: message.to_string(),
        }
    }
}

/// Observer callbacks run on the poll task; a panic in one must not end it.
fn guarded(hook: &'static str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(hook, "observer callback panicked");
    }
}

enum Request {
    Command(Command),
    UpdateCookie(String),
}

struct HandleInner {
    requests: mpsc::Sender<Request>,
    refresh: Arc<Notify>,
    state: watch::Receiver<UpdateState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Per-account context handed to entity adapters and service handlers.
/// Cheap to clone.
#[derive(Clone)]
pub struct AccountHandle {
    inner: Arc<HandleInner>,
}

impl AccountHandle {
    /// Run the first refresh, which must succeed, then start the loop.
    pub async fn start(mut coordinator: Coordinator, scan_interval: Duration) -> Result<Self> {
        if let Err(e) = coordinator.refresh().await {
            error!(error = %e, "initial refresh failed");
            // Rejected sessions and failed logins need the operator, so they
            // are returned as such rather than as a retryable update failure.
            return Err(match e {
                Error::UpdateFailed { source, .. }
                    if matches!(*source, Error::Unauthorized | Error::Login(_)) =>
                {
                    *source
                }
                other => other,
            });
        }
        Ok(Self::spawn(coordinator, scan_interval))
    }

    /// Move the coordinator onto its own task. The first scheduled poll fires
    /// one interval from now; use `request_refresh` for an earlier one.
    pub fn spawn(coordinator: Coordinator, scan_interval: Duration) -> Self {
        let (requests, request_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let refresh = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let state = coordinator.subscribe();

        let task = tokio::spawn(run(
            coordinator,
            scan_interval,
            request_rx,
            Arc::clone(&refresh),
            cancel.clone(),
        ));

        Self {
            inner: Arc::new(HandleInner {
                requests,
                refresh,
                state,
                cancel,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Ask for an out-of-cycle poll. Requests made while a poll is running
    /// collapse into a single follow-up poll.
    pub fn request_refresh(&self) {
        self.inner.refresh.notify_one();
    }

    /// Queue a command. Fire and forget: failures are logged, and a refresh is
    /// requested after the command runs either way.
    pub fn send(&self, command: Command) {
        if let Err(e) = self.inner.requests.try_send(Request::Command(command)) {
            warn!(error = %e, "command dropped");
        }
    }

    /// Replace the session cookie of a running account, dismiss the
    /// expired-session notification and poll with the new cookie.
    pub fn update_cookie(&self, cookie: impl Into<String>) {
        let request = Request::UpdateCookie(cookie.into());
        if let Err(e) = self.inner.requests.try_send(request) {
            warn!(error = %e, "cookie update dropped");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.inner.state.clone()
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.state.borrow().snapshot.clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.inner.state.borrow().last_update_success
    }

    pub fn is_running(&self) -> bool {
        if self.inner.cancel.is_cancelled() {
            return false;
        }
        match self.inner.task.try_lock() {
            Ok(task) => task.as_ref().is_some_and(|t| !t.is_finished()),
            Err(_) => false,
        }
    }

    /// Stop scheduling polls, wait for an in-flight one to finish, and drop
    /// the HTTP clients.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = self.inner.task.lock().await.take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "coordinator task ended abnormally");
        }
    }
}

async fn run(
    mut coordinator: Coordinator,
    scan_interval: Duration,
    mut requests: mpsc::Receiver<Request>,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + scan_interval, scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(request) = requests.recv() => {
                match request {
                    // Already logged by execute; the follow-up poll is the feedback.
                    Request::Command(command) => {
                        let _ = coordinator.execute(&command).await;
                    }
                    Request::UpdateCookie(cookie) => coordinator.update_cookie(&cookie).await,
                }
                refresh.notify_one();
            }
            () = refresh.notified() => {
                poll(&mut coordinator).await;
                ticker.reset();
            }
            _ = ticker.tick() => poll(&mut coordinator).await,
        }
    }

    debug!("coordinator stopped");
}

async fn poll(coordinator: &mut Coordinator) {
    if let Err(e) = coordinator.refresh().await {
        debug!(error = %e, "poll failed, keeping previous snapshot");
    }
}
