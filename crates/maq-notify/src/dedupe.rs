use std::time::{Duration, Instant};
use tracing::debug;

/// Content duplicates arriving within this window are one delivery event.
pub const DUPLICATE_WINDOW: Duration = Duration::from_millis(2000);

/// A logical notification as seen by the receiving endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Where a delivery arrived from. The push platform can hand the same event
/// to a foreground handler and a background/service-worker handler; the
/// deduper exists because of that defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Foreground,
    Push,
    BackgroundMessage,
}

impl Channel {
    fn lock_duration(self) -> Duration {
        match self {
            Channel::Foreground => Duration::from_millis(1000),
            Channel::Push | Channel::BackgroundMessage => Duration::from_millis(2000),
        }
    }
}

/// The deployed handlers disagreed on when the one-visible-notification
/// lock applied; the variants are one policy with a strategy knob instead.
/// Content-window suppression applies under every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPolicy {
    /// Lock on every shown notification, all channels. Default.
    LockAndContent,
    /// No lock; only the (title, body) window.
    ContentOnly,
    /// Lock engaged only when this endpoint is flagged mobile (the
    /// service-worker variant, which sniffed the user agent).
    MobileLock { mobile: bool },
}

impl Default for DedupPolicy {
    fn default() -> Self {
        DedupPolicy::LockAndContent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Show,
    SuppressedByLock,
    SuppressedDuplicate,
}

impl Decision {
    pub fn is_shown(self) -> bool {
        matches!(self, Decision::Show)
    }
}

/// Suppresses near-duplicate deliveries of the same logical notification.
///
/// State is instance-owned so independent endpoints can be modeled side by
/// side. The lock is a stored deadline compared against the arrival time;
/// it clears itself the same way the deployed deferred callback did,
/// without needing a timer.
#[derive(Debug)]
pub struct Deduper {
    policy: DedupPolicy,
    window: Duration,
    last_shown: Option<(Notification, Instant)>,
    lock_until: Option<Instant>,
}

impl Deduper {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            window: DUPLICATE_WINDOW,
            last_shown: None,
            lock_until: None,
        }
    }

    /// Decides whether a delivery arriving at `now` is surfaced. A shown
    /// notification updates the last-shown triple and, policy permitting,
    /// engages the lock for the channel's duration.
    pub fn observe(
        &mut self,
        notification: &Notification,
        channel: Channel,
        now: Instant,
    ) -> Decision {
        if self.lock_applies() {
            if let Some(until) = self.lock_until {
                if now < until {
                    debug!(event = "notification_suppressed", reason = "lock");
                    return Decision::SuppressedByLock;
                }
            }
        }
        if let Some((last, shown_at)) = &self.last_shown {
            if last == notification && now.duration_since(*shown_at) < self.window {
                debug!(event = "notification_suppressed", reason = "duplicate");
                return Decision::SuppressedDuplicate;
            }
        }
        if self.lock_applies() {
            self.lock_until = Some(now + channel.lock_duration());
        }
        self.last_shown = Some((notification.clone(), now));
        Decision::Show
    }

    fn lock_applies(&self) -> bool {
        match self.policy {
            DedupPolicy::LockAndContent => true,
            DedupPolicy::ContentOnly => false,
            DedupPolicy::MobileLock { mobile } => mobile,
        }
    }
}
