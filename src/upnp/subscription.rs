/// Subscription manager: owns every event subscription from the first
/// SUBSCRIBE to the final UNSUBSCRIBE.
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::device::{DeviceDescription, ServiceDescriptor};
use super::error::SubscriptionError;

/// Renew every this many idle ticks (12 × 10 s)
pub const RENEW_EVERY_TICKS: u32 = 12;

/// Leases closer than this to expiry are renewed on the next tick instead of
/// waiting for the renewal period (two idle ticks)
const EXPIRY_MARGIN: Duration = Duration::from_secs(20);

/// A time-bounded grant from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub sid: String,
    pub timeout: Duration,
    pub granted_at: Instant,
}

impl Lease {
    pub fn expires_at(&self) -> Instant {
        self.granted_at + self.timeout
    }

    /// True if the lease lapses before `now + margin`
    pub fn expires_within(&self, now: Instant, margin: Duration) -> bool {
        self.expires_at() <= now + margin
    }
}

/// The device side of event subscriptions
pub trait EventSource {
    fn subscribe(
        &self,
        service: &ServiceDescriptor,
        callback_url: &str,
    ) -> impl Future<Output = Result<Lease, SubscriptionError>> + Send;

    fn renew(
        &self,
        service: &ServiceDescriptor,
        lease: &Lease,
    ) -> impl Future<Output = Result<Lease, SubscriptionError>> + Send;

    fn unsubscribe(
        &self,
        service: &ServiceDescriptor,
        lease: &Lease,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unsubscribed,
    Subscribing,
    Active,
    Renewing,
    /// Last renewal failed; assumed usable until the device says otherwise
    Stale,
}

/// Subscription record for one service
#[derive(Debug)]
pub struct Session {
    pub service: ServiceDescriptor,
    /// Path on the local NOTIFY listener this service posts to
    pub callback_path: String,
    lease: Option<Lease>,
    phase: SessionPhase,
}

impl Session {
    fn new(index: usize, service: ServiceDescriptor) -> Self {
        Self {
            callback_path: format!("/notify/{}/{}", index, service.short_name()),
            service,
            lease: None,
            phase: SessionPhase::Unsubscribed,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    fn holds_lease(&self) -> bool {
        matches!(self.phase, SessionPhase::Active | SessionPhase::Stale) && self.lease.is_some()
    }
}

pub struct SubscriptionManager<S> {
    source: S,
    sessions: Vec<Session>,
    callback_base: String,
    ticks: u32,
}

impl<S: EventSource> SubscriptionManager<S> {
    /// Resolve every requested service before anything is subscribed, so an
    /// unknown name fails without leaving partial subscriptions behind.
    pub fn resolve(
        source: S,
        device: &DeviceDescription,
        service_names: &[String],
    ) -> Result<Self, SubscriptionError> {
        let services = device.resolve_services(service_names)?;
        let sessions = services
            .into_iter()
            .enumerate()
            .map(|(i, service)| Session::new(i, service))
            .collect();
        Ok(Self {
            source,
            sessions,
            callback_base: String::new(),
            ticks: 0,
        })
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Subscribe every session. `callback_base` is `http://host:port` of the
    /// local NOTIFY listener. A rejected service is logged and retried at the
    /// next renewal; the others carry on.
    pub async fn subscribe_all(&mut self, callback_base: &str) {
        self.callback_base = callback_base.trim_end_matches('/').to_string();
        for session in &mut self.sessions {
            subscribe_session(&self.source, &self.callback_base, session).await;
        }
        let active = self
            .sessions
            .iter()
            .filter(|s| s.phase() == SessionPhase::Active)
            .count();
        info!("{}/{} subscription(s) active", active, self.sessions.len());
    }

    /// Advance the renewal counter by one idle tick; renews everything on
    /// every `RENEW_EVERY_TICKS`th tick. In between, an active lease the
    /// device granted for less than the renewal period is renewed before it
    /// lapses. Returns true when any renewal ran.
    pub async fn on_idle_tick(&mut self) -> bool {
        self.ticks += 1;
        if self.ticks >= RENEW_EVERY_TICKS {
            self.ticks = 0;
            self.renew_all().await;
            return true;
        }

        let now = Instant::now();
        let mut renewed = false;
        for session in &mut self.sessions {
            let expiring = session.phase == SessionPhase::Active
                && session
                    .lease
                    .as_ref()
                    .is_some_and(|lease| lease.expires_within(now, EXPIRY_MARGIN));
            if expiring {
                debug!(
                    service = session.service.service_id.as_str(),
                    "Lease about to expire, renewing early"
                );
                renew_session(&self.source, &self.callback_base, session).await;
                renewed = true;
            }
        }
        renewed
    }

    /// Renew each leased session once; sessions without a lease get a
    /// fresh SUBSCRIBE.
    pub async fn renew_all(&mut self) {
        debug!("Renewing {} subscription(s)", self.sessions.len());
        for session in &mut self.sessions {
            if session.holds_lease() {
                renew_session(&self.source, &self.callback_base, session).await;
            } else if !self.callback_base.is_empty() {
                subscribe_session(&self.source, &self.callback_base, session).await;
            }
        }
    }

    /// Best-effort UNSUBSCRIBE of every leased session, bounded by `timeout`.
    pub async fn unsubscribe_all(&mut self, timeout: Duration) {
        let source = &self.source;
        let sessions = &mut self.sessions;
        let result = tokio::time::timeout(timeout, async move {
            for session in sessions.iter_mut() {
                if let Some(lease) = session.lease.take() {
                    if let Err(e) = source.unsubscribe(&session.service, &lease).await {
                        debug!(
                            service = session.service.service_id.as_str(),
                            error = %e,
                            "UNSUBSCRIBE failed"
                        );
                    }
                }
                session.phase = SessionPhase::Unsubscribed;
            }
        })
        .await;

        if result.is_err() {
            warn!("Unsubscribe timed out after {}s", timeout.as_secs());
        }
        for session in &mut self.sessions {
            session.lease = None;
            session.phase = SessionPhase::Unsubscribed;
        }
    }
}

async fn subscribe_session<S: EventSource>(source: &S, callback_base: &str, session: &mut Session) {
    session.phase = SessionPhase::Subscribing;
    let callback = format!("{}{}", callback_base, session.callback_path);
    match source.subscribe(&session.service, &callback).await {
        Ok(lease) => {
            info!(
                service = session.service.service_id.as_str(),
                "Subscribed, lease {}s",
                lease.timeout.as_secs()
            );
            session.lease = Some(lease);
            session.phase = SessionPhase::Active;
        }
        Err(e) => {
            warn!(
                service = session.service.service_id.as_str(),
                error = %e,
                "Unable to subscribe"
            );
            session.lease = None;
            session.phase = SessionPhase::Unsubscribed;
        }
    }
}

async fn renew_session<S: EventSource>(source: &S, callback_base: &str, session: &mut Session) {
    let Some(lease) = session.lease.clone() else {
        return;
    };
    session.phase = SessionPhase::Renewing;
    match source.renew(&session.service, &lease).await {
        Ok(renewed) => {
            debug!(
                service = session.service.service_id.as_str(),
                "Renewed subscription"
            );
            session.lease = Some(renewed);
            session.phase = SessionPhase::Active;
        }
        Err(e) if e.is_precondition_failed() => {
            warn!(
                service = session.service.service_id.as_str(),
                "Device dropped our subscription, subscribing again"
            );
            subscribe_session(source, callback_base, session).await;
            if session.phase != SessionPhase::Active {
                // keep the old SID around; the device may still honour it
                session.lease = Some(lease);
                session.phase = SessionPhase::Stale;
            }
        }
        Err(e) => {
            warn!(
                service = session.service.service_id.as_str(),
                error = %e,
                "Renewal failed, retrying next period"
            );
            session.phase = SessionPhase::Stale;
        }
    }
}
