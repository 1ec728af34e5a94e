//! Playback state machine.
//!
//! Pure and synchronous: the runtime feeds it ticks, surface signals and
//! resolved content, and acts on what it returns. Time is passed in so the
//! transitions can be tested without a clock.

use std::time::Duration;
use tokio::time::Instant;

use crate::content_source::Resolution;
use crate::error::PlaybackError;
use crate::models::{ContentItem, EmergencyDirective};

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerState {
    /// Nothing committed yet (or the rotation was preempted).
    Idle,
    /// Waiting for the surface to confirm the asset; the countdown is not
    /// running.
    Loading { since: Instant, attempt: u32 },
    Showing { ends_at: Instant },
    /// Current item is done; the next one has been or is about to be
    /// requested.
    Transitioning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyShowing {
    pub directive: EmergencyDirective,
    pub ends_at: Instant,
}

/// Identifies one "resolve and commit" operation. Tickets are issued in
/// increasing order; only the latest one may commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceTicket(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum Commit {
    /// Ticket was superseded while its resolution was in flight.
    Stale,
    Emergency(EmergencyDirective),
    Present { generation: u64, item: ContentItem },
}

#[derive(Debug)]
pub enum AssetFailure {
    /// Signal did not belong to the current item.
    Ignored,
    Retry { attempt: u32 },
    GiveUp(PlaybackError),
}

#[derive(Debug)]
pub enum TickOutcome {
    Nothing,
    ContentExpired,
    StuckLoad(PlaybackError),
    EmergencyExpired,
}

pub struct PlayerStateMachine {
    state: PlayerState,
    current: Option<ContentItem>,
    /// Generation of the committed item.
    generation: u64,
    /// Latest ticket handed out.
    issued: u64,
    is_content_changing: bool,
    /// An advance was refused while guarded; replayed on release.
    pending_advance: bool,
    emergency: Option<EmergencyShowing>,
    /// Url of the last asset the surface confirmed, so re-committing the same
    /// media does not wait for a load that will not happen again.
    last_resolved_media_url: Option<String>,
    retry_limit: u32,
    watchdog: Duration,
}

impl PlayerStateMachine {
    pub fn new(retry_limit: u32, watchdog: Duration) -> Self {
        Self {
            state: PlayerState::Idle,
            current: None,
            generation: 0,
            issued: 0,
            is_content_changing: false,
            pending_advance: false,
            emergency: None,
            last_resolved_media_url: None,
            retry_limit: retry_limit.max(1),
            watchdog,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn current(&self) -> Option<&ContentItem> {
        self.current.as_ref()
    }

    pub fn emergency(&self) -> Option<&EmergencyShowing> {
        self.emergency.as_ref()
    }

    #[cfg(test)]
    pub fn is_content_changing(&self) -> bool {
        self.is_content_changing
    }

    /// Whether a background content refresh should resolve now: only when
    /// nothing real is on screen.
    pub fn wants_refresh(&self) -> bool {
        if self.emergency.is_some() || self.is_content_changing {
            return false;
        }
        match (&self.state, &self.current) {
            (PlayerState::Idle, _) => true,
            (PlayerState::Showing { .. }, Some(item)) => item.is_placeholder(),
            _ => false,
        }
    }

    /// Enters the "content changing" section. `None` while another advance
    /// is in flight or an emergency is showing. A request refused by the
    /// guard is remembered and handed back by `release_guard`.
    pub fn begin_advance(&mut self) -> Option<AdvanceTicket> {
        if self.is_content_changing {
            tracing::debug!("Advance already in progress, deferring request");
            self.pending_advance = true;
            return None;
        }
        if self.emergency.is_some() {
            tracing::debug!("Emergency showing, rotation suspended");
            return None;
        }
        self.is_content_changing = true;
        self.pending_advance = false;
        self.issued += 1;
        Some(AdvanceTicket(self.issued))
    }

    /// Whether `ticket` is still the latest one handed out.
    pub fn is_current(&self, ticket: AdvanceTicket) -> bool {
        ticket.0 == self.issued
    }

    pub fn commit(
        &mut self,
        ticket: AdvanceTicket,
        resolution: Resolution,
        now: Instant,
    ) -> Commit {
        if !self.is_current(ticket) {
            tracing::debug!(
                "Discarding stale resolution (ticket {}, latest {})",
                ticket.0,
                self.issued
            );
            return Commit::Stale;
        }

        match resolution {
            Resolution::Emergency(directive) => {
                self.enter_emergency(directive.clone(), now);
                Commit::Emergency(directive)
            }
            Resolution::Content(item) => {
                self.generation = ticket.0;
                let already_loaded = item.kind.needs_asset()
                    && item.url.is_some()
                    && item.url == self.last_resolved_media_url;

                self.state = if item.kind.needs_asset() && !already_loaded {
                    PlayerState::Loading {
                        since: now,
                        attempt: 1,
                    }
                } else {
                    PlayerState::Showing {
                        ends_at: now + secs(item.duration),
                    }
                };
                if !item.kind.needs_asset() {
                    self.last_resolved_media_url = None;
                }

                tracing::info!(
                    "Now showing '{}' ({:?}, {}, {}s)",
                    item.title,
                    item.kind,
                    item.source.as_str(),
                    item.duration
                );
                self.current = Some(item.clone());
                Commit::Present {
                    generation: self.generation,
                    item,
                }
            }
        }
    }

    /// Leaves the "content changing" section opened by `ticket`. Returns
    /// true when the committed item already finished while guarded and the
    /// caller must advance now.
    pub fn release_guard(&mut self, ticket: AdvanceTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.is_content_changing = false;
        let replay = self.pending_advance && self.state == PlayerState::Transitioning;
        self.pending_advance = false;
        replay
    }

    /// Asset confirmed on screen: start the countdown.
    pub fn asset_ready(&mut self, generation: u64, now: Instant) -> bool {
        if generation != self.generation {
            return false;
        }
        let PlayerState::Loading { .. } = self.state else {
            return false;
        };
        let Some(item) = &self.current else {
            return false;
        };

        self.last_resolved_media_url = item.url.clone();
        self.state = PlayerState::Showing {
            ends_at: now + secs(item.duration),
        };
        true
    }

    pub fn asset_failed(&mut self, generation: u64, reason: &str, now: Instant) -> AssetFailure {
        if generation != self.generation {
            return AssetFailure::Ignored;
        }
        let Some(item) = &self.current else {
            return AssetFailure::Ignored;
        };
        self.last_resolved_media_url = None;

        match self.state {
            PlayerState::Loading { attempt, .. } if attempt < self.retry_limit => {
                tracing::warn!(
                    "Asset for '{}' failed ({}), retry {}/{}",
                    item.id,
                    reason,
                    attempt + 1,
                    self.retry_limit
                );
                self.state = PlayerState::Loading {
                    since: now,
                    attempt: attempt + 1,
                };
                AssetFailure::Retry {
                    attempt: attempt + 1,
                }
            }
            PlayerState::Loading { attempt, .. } => {
                let error = PlaybackError::AssetLoadFailure {
                    content_id: item.id.clone(),
                    attempts: attempt,
                };
                self.state = PlayerState::Transitioning;
                AssetFailure::GiveUp(error)
            }
            // A video that breaks mid-playback ends early
            PlayerState::Showing { .. } => {
                let error = PlaybackError::AssetLoadFailure {
                    content_id: item.id.clone(),
                    attempts: 1,
                };
                self.state = PlayerState::Transitioning;
                AssetFailure::GiveUp(error)
            }
            _ => AssetFailure::Ignored,
        }
    }

    /// Video reached its natural end.
    pub fn media_ended(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        match self.state {
            PlayerState::Showing { .. } | PlayerState::Loading { .. } => {
                self.state = PlayerState::Transitioning;
                true
            }
            _ => false,
        }
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if let Some(emergency) = &self.emergency {
            if now >= emergency.ends_at {
                tracing::info!("Emergency '{}' expired", emergency.directive.id);
                self.emergency = None;
                return TickOutcome::EmergencyExpired;
            }
            return TickOutcome::Nothing;
        }

        match self.state {
            PlayerState::Loading { since, .. } => {
                let waited = now.duration_since(since);
                if waited < self.watchdog {
                    return TickOutcome::Nothing;
                }
                let content_id = self
                    .current
                    .as_ref()
                    .map(|c| c.id.clone())
                    .unwrap_or_default();
                self.state = PlayerState::Transitioning;
                self.last_resolved_media_url = None;
                TickOutcome::StuckLoad(PlaybackError::StuckLoad { content_id, waited })
            }
            PlayerState::Showing { ends_at } if now >= ends_at => {
                self.state = PlayerState::Transitioning;
                TickOutcome::ContentExpired
            }
            _ => TickOutcome::Nothing,
        }
    }

    /// Emergency found by the background check. Returns false if one is
    /// already showing.
    pub fn preempt(&mut self, directive: EmergencyDirective, now: Instant) -> bool {
        if self.emergency.is_some() {
            return false;
        }
        self.enter_emergency(directive, now);
        true
    }

    fn enter_emergency(&mut self, directive: EmergencyDirective, now: Instant) {
        let ends_at = now + secs(directive.duration);
        self.emergency = Some(EmergencyShowing { directive, ends_at });
        // Invalidate any resolution still in flight and drop the rotation
        // item; it resumes from the cycle position on expiry.
        self.issued += 1;
        self.is_content_changing = false;
        self.pending_advance = false;
        self.state = PlayerState::Idle;
        self.current = None;
        self.last_resolved_media_url = None;
    }
}

fn secs(duration: u32) -> Duration {
    Duration::from_secs(u64::from(duration.max(1)))
}
