// Realtime channel lifecycle for the open conversation.
//
// Idle -> Connecting -> Subscribed -> Closing -> Idle. At most one channel is
// live; opening another retires the previous token first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quad_storage_traits::SubscriptionId;
use tokio::task::JoinHandle;

use crate::state::ChannelStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelPhase {
    Idle,
    Connecting,
    Subscribed,
    Closing,
}

/// Bounded exponential reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Backoff {
    pub(crate) base: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) max_attempts: u32,
}

impl Backoff {
    /// Delay before retrying after the `failures`-th consecutive failure.
    pub(crate) fn delay_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// What is left to release on the transport after a channel is torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClosedChannel {
    pub(crate) conversation_id: String,
    pub(crate) subscription: Option<SubscriptionId>,
}

#[derive(Debug)]
struct ActiveChannel {
    token: u64,
    conversation_id: String,
    phase: ChannelPhase,
    alive: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    subscription: Option<SubscriptionId>,
    // Consecutive failures since the last successful subscribe.
    failures: u32,
    ever_subscribed: bool,
    unavailable: bool,
}

impl ActiveChannel {
    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[derive(Debug)]
pub(crate) struct ChannelSessionManager {
    backoff: Backoff,
    next_token: u64,
    active: Option<ActiveChannel>,
}

impl ChannelSessionManager {
    pub(crate) fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            next_token: 0,
            active: None,
        }
    }

    /// Start a channel for `conversation_id`, tearing down any previous one.
    ///
    /// Returns the new token, the liveness flag its worker must observe, and the
    /// torn-down channel (if any) so the caller can release it remotely.
    pub(crate) fn open(
        &mut self,
        conversation_id: &str,
    ) -> (u64, Arc<AtomicBool>, Option<ClosedChannel>) {
        let closed = self.close();
        self.next_token = self.next_token.wrapping_add(1);
        let token = self.next_token;
        let alive = Arc::new(AtomicBool::new(true));
        self.active = Some(ActiveChannel {
            token,
            conversation_id: conversation_id.to_string(),
            phase: ChannelPhase::Connecting,
            alive: alive.clone(),
            worker: None,
            subscription: None,
            failures: 0,
            ever_subscribed: false,
            unavailable: false,
        });
        tracing::debug!(token, %conversation_id, "channel_connecting");
        (token, alive, closed)
    }

    /// Mark the current channel as `Closing`. Its worker stops forwarding
    /// events immediately; `close` finishes the teardown.
    pub(crate) fn begin_close(&mut self) -> bool {
        let Some(channel) = self.active.as_mut() else {
            return false;
        };
        channel.phase = ChannelPhase::Closing;
        channel.alive.store(false, Ordering::SeqCst);
        true
    }

    /// Tear the current channel down. Its token never matches again.
    pub(crate) fn close(&mut self) -> Option<ClosedChannel> {
        self.begin_close();
        let mut channel = self.active.take()?;
        channel.stop_worker();
        tracing::debug!(
            token = channel.token,
            conversation_id = %channel.conversation_id,
            phase = ?channel.phase,
            "channel_closing"
        );
        Some(ClosedChannel {
            conversation_id: channel.conversation_id,
            subscription: channel.subscription,
        })
    }

    pub(crate) fn phase(&self) -> ChannelPhase {
        self.active
            .as_ref()
            .map(|c| c.phase)
            .unwrap_or(ChannelPhase::Idle)
    }

    pub(crate) fn is_current(&self, token: u64) -> bool {
        self.active.as_ref().is_some_and(|c| c.token == token)
    }

    pub(crate) fn conversation_id(&self) -> Option<&str> {
        self.active.as_ref().map(|c| c.conversation_id.as_str())
    }

    /// Token and conversation of a channel waiting to (re)subscribe.
    pub(crate) fn connecting(&self, token: u64) -> Option<(String, Arc<AtomicBool>)> {
        let c = self.active.as_ref()?;
        if c.token != token || c.phase != ChannelPhase::Connecting || c.unavailable {
            return None;
        }
        Some((c.conversation_id.clone(), c.alive.clone()))
    }

    pub(crate) fn attach_worker(&mut self, token: u64, worker: JoinHandle<()>) {
        match self.active.as_mut() {
            Some(c) if c.token == token => {
                c.stop_worker();
                c.worker = Some(worker);
            }
            _ => worker.abort(),
        }
    }

    /// Record a successful subscribe. Returns `Some(true)` when this is a
    /// resubscribe after a drop, `None` for a stale token.
    pub(crate) fn on_subscribed(
        &mut self,
        token: u64,
        subscription: SubscriptionId,
    ) -> Option<bool> {
        let c = self.active.as_mut().filter(|c| c.token == token)?;
        let resubscribed = c.ever_subscribed;
        c.phase = ChannelPhase::Subscribed;
        c.subscription = Some(subscription);
        c.failures = 0;
        c.ever_subscribed = true;
        c.unavailable = false;
        Some(resubscribed)
    }

    /// Record a subscribe failure or a drop of a live channel.
    pub(crate) fn on_failure(&mut self, token: u64) -> Option<FailureDecision> {
        let backoff = self.backoff;
        let c = self.active.as_mut().filter(|c| c.token == token)?;
        if c.unavailable {
            return None;
        }
        c.stop_worker();
        c.subscription = None;
        c.phase = ChannelPhase::Connecting;
        c.failures += 1;
        if c.failures >= backoff.max_attempts {
            c.unavailable = true;
            return Some(FailureDecision::Exhausted {
                attempts: c.failures,
            });
        }
        Some(FailureDecision::Retry {
            attempt: c.failures + 1,
            delay: backoff.delay_for(c.failures),
        })
    }

    pub(crate) fn subscription(&self) -> Option<(&str, SubscriptionId)> {
        let c = self.active.as_ref()?;
        if c.phase != ChannelPhase::Subscribed {
            return None;
        }
        Some((c.conversation_id.as_str(), c.subscription?))
    }

    pub(crate) fn status(&self) -> ChannelStatus {
        let Some(c) = self.active.as_ref() else {
            return ChannelStatus::Idle;
        };
        if c.unavailable {
            return ChannelStatus::Unavailable {
                attempts: c.failures,
            };
        }
        match c.phase {
            ChannelPhase::Idle => ChannelStatus::Idle,
            ChannelPhase::Connecting => ChannelStatus::Connecting {
                attempt: c.failures + 1,
            },
            ChannelPhase::Subscribed => ChannelStatus::Subscribed,
            ChannelPhase::Closing => ChannelStatus::Closing,
        }
    }
}
