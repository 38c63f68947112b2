//! Stepped volume fades with interference detection.
//!
//! A fade session ramps one output toward a target level, one step per
//! interval, re-reading the live volume every tick. Two abort conditions
//! are checked before each step:
//!
//! - **Collision**: the live level drifted away from the target by more
//!   than one step since this controller last set it. Somebody else is
//!   turning the knob; hands off, the external change wins.
//! - **Stall**: the zone is no longer playing or loading. Playback was
//!   stopped externally; the starting volume is restored.
//!
//! Stop/Standby fades keep playback running at the starting volume while
//! ramping down, and issue the deferred transport command only once the
//! floor is reached — never stop-then-fade.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::rule::Action;
use crate::tracing::prelude::*;
use crate::transport::{
    ControlCommand, PlayState, Transport, TransportError, VolumeMode, ZoneProperty,
};

/// How a fade session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeEnd {
    /// Target level reached; any deferred stop has been issued.
    Reached,
    /// External volume interference; aborted without touching the level.
    Collision,
    /// Playback stopped externally; starting volume restored.
    Stalled,
    /// Cancelled by a re-trigger or configuration change.
    Cancelled,
    /// The target zone or its volume control disappeared.
    ZoneVanished,
    /// A remote command failed; abandoned without retry.
    RemoteFailed,
}

/// Parameters of one fade session.
#[derive(Debug, Clone)]
pub struct FadePlan {
    pub rule_index: usize,
    pub zone_id: String,
    pub output_id: String,
    pub action: Action,
    pub start: i32,
    pub target: i32,
    /// The output's native step size (1 where the remote exposes none).
    pub step: i32,
    pub minutes: u32,
    /// The output's volume floor. A Stop/Standby fade reaching it issues
    /// the deferred transport command.
    pub floor: i32,
    /// False for secondary-output sessions: they ramp volume only and
    /// leave the zone-level stop to the primary session.
    pub defer_stop: bool,
}

/// Owns all fade sessions, at most one per rule index.
pub struct FadeController {
    transport: Arc<dyn Transport>,
    sessions: Mutex<HashMap<usize, CancellationToken>>,
}

impl FadeController {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a fade for the plan's rule index. A session already running
    /// for that index is cancelled first (rule re-trigger).
    pub fn start(&self, plan: FadePlan) -> JoinHandle<FadeEnd> {
        let token = CancellationToken::new();
        if let Some(previous) = self.sessions.lock().insert(plan.rule_index, token.clone()) {
            previous.cancel();
        }
        tokio::spawn(run(self.transport.clone(), plan, token))
    }

    pub fn cancel(&self, rule_index: usize) {
        if let Some(token) = self.sessions.lock().remove(&rule_index) {
            token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        for (_, token) in self.sessions.lock().drain() {
            token.cancel();
        }
    }
}

async fn run(transport: Arc<dyn Transport>, plan: FadePlan, token: CancellationToken) -> FadeEnd {
    let step = plan.step.max(1);
    let span = (plan.target - plan.start).abs();
    if span == 0 {
        return FadeEnd::Reached;
    }

    let steps = (span / step).max(1) as u64;
    let interval = Duration::from_millis((u64::from(plan.minutes) * 60_000 / steps).max(1));
    let sign: i32 = if plan.target >= plan.start { 1 } else { -1 };

    debug!(
        rule = plan.rule_index,
        start = plan.start,
        target = plan.target,
        steps,
        interval_ms = interval.as_millis() as u64,
        "fade started"
    );

    let mut level = plan.start;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; consume it so steps are
    // spaced one full interval apart.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => return FadeEnd::Cancelled,
            _ = ticker.tick() => {}
        }

        let Some(zone) = transport.zone_by_output_id(&plan.output_id).await else {
            warn!(rule = plan.rule_index, output = %plan.output_id, "fade target vanished");
            return FadeEnd::ZoneVanished;
        };
        let Some(live) = zone.volume_of(&plan.output_id).map(|v| v.value) else {
            warn!(rule = plan.rule_index, output = %plan.output_id, "output lost volume control");
            return FadeEnd::ZoneVanished;
        };

        // Allow one step of drift (our own last set may still be settling).
        if (live - level) * sign < -step {
            info!(
                rule = plan.rule_index,
                live,
                expected = level,
                "external volume change detected; fade terminated"
            );
            return FadeEnd::Collision;
        }

        if !matches!(zone.state, PlayState::Playing | PlayState::Loading) {
            info!(
                rule = plan.rule_index,
                state = ?zone.state,
                "playback stopped externally; fade aborted"
            );
            if let Err(error) = transport
                .change_volume(&plan.output_id, VolumeMode::Absolute, plan.start)
                .await
            {
                warn!(rule = plan.rule_index, %error, "failed to restore starting volume");
            }
            return FadeEnd::Stalled;
        }

        if level != plan.target {
            level += sign * step;
            if (plan.target - level) * sign < 0 {
                level = plan.target;
            }
            if let Err(error) = transport
                .change_volume(&plan.output_id, VolumeMode::Absolute, level)
                .await
            {
                warn!(rule = plan.rule_index, %error, "volume step failed; fade abandoned");
                return FadeEnd::RemoteFailed;
            }
            continue;
        }

        // Level reached.
        if plan.defer_stop
            && matches!(plan.action, Action::Stop | Action::Standby)
            && level == plan.floor
            && zone.state == PlayState::Playing
        {
            finish_stop(&*transport, &plan).await;
        }
        debug!(rule = plan.rule_index, "fade complete");
        return FadeEnd::Reached;
    }
}

/// Issue the deferred pause at the end of a Stop/Standby fade, restore
/// the pre-fade volume, and follow with standby where requested.
async fn finish_stop(transport: &dyn Transport, plan: &FadePlan) {
    match transport.control(&plan.zone_id, ControlCommand::Pause).await {
        Ok(()) => {
            // Keep the next manual play from starting at the floor.
            if let Err(error) = transport
                .change_volume(&plan.output_id, VolumeMode::Absolute, plan.start)
                .await
            {
                warn!(rule = plan.rule_index, %error, "failed to restore pre-fade volume");
            }
            if plan.action == Action::Standby {
                standby_after_stop(transport, &plan.zone_id, &plan.output_id).await;
            }
        }
        Err(error) => warn!(rule = plan.rule_index, %error, "deferred pause failed"),
    }
}

/// Issue standby once playback has actually stopped. An output without
/// standby support falls back to the pause/stop already issued.
pub(crate) async fn standby_after_stop(transport: &dyn Transport, zone_id: &str, output_id: &str) {
    loop {
        match transport.zone_by_output_id(output_id).await {
            Some(zone) if zone.state == PlayState::Playing => {
                if let Err(error) = transport
                    .wait_zone_property_changed(zone_id, &[ZoneProperty::State])
                    .await
                {
                    warn!(zone = zone_id, %error, "zone wait failed; skipping standby");
                    return;
                }
            }
            Some(_) => break,
            None => return,
        }
    }

    match transport.standby(output_id).await {
        Ok(()) => {}
        Err(TransportError::StandbyUnsupported(_)) => {
            debug!(output = output_id, "standby unsupported; pause already issued");
        }
        Err(error) => warn!(output = output_id, %error, "standby failed"),
    }
}
