use crate::platform::EchoPolicy;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    None,
    /// Hard mute while our own reply is playing
    Muted,
    /// Tail after unmute that still swallows in-flight echo
    Grace,
}

/// Decides whether recognizer output is the user or our own speaker echo.
///
/// Times are passed in so the gate can be driven by a paused clock.
#[derive(Debug, Clone)]
pub struct EchoGate {
    policy: EchoPolicy,
    muted_at: Option<Instant>,
    grace_until: Option<Instant>,
}

impl EchoGate {
    pub fn new(policy: EchoPolicy) -> Self {
        Self {
            policy,
            muted_at: None,
            grace_until: None,
        }
    }

    pub fn policy(&self) -> &EchoPolicy {
        &self.policy
    }

    pub fn mute(&mut self, now: Instant) {
        self.muted_at = Some(now);
        self.grace_until = None;
    }

    /// Starts the grace window. No-op unless currently hard-muted, so an
    /// unmute arriving after a barge-in cannot re-suppress live speech.
    pub fn unmute(&mut self, now: Instant) {
        if self.muted_at.take().is_some() {
            self.grace_until = Some(now + self.policy.grace_window);
        }
    }

    pub fn barge_in(&mut self) {
        self.muted_at = None;
        self.grace_until = None;
    }

    pub fn reset(&mut self) {
        self.barge_in();
    }

    pub fn suppression(&self, now: Instant) -> Suppression {
        if self.muted_at.is_some() {
            Suppression::Muted
        } else if self.grace_until.is_some_and(|until| now < until) {
            Suppression::Grace
        } else {
            Suppression::None
        }
    }

    pub fn is_suppressed(&self, now: Instant) -> bool {
        self.suppression(now) != Suppression::None
    }

    /// Voice onset counts as barge-in only during a hard mute that has lasted
    /// long enough for the initial playback echo to have passed.
    pub fn accepts_barge_in(&self, now: Instant) -> bool {
        self.policy.barge_in_enabled
            && self
                .muted_at
                .is_some_and(|muted_at| now.duration_since(muted_at) >= self.policy.barge_in_min_elapsed)
    }
}
