//! Timer dispatch loop.
//!
//! The scheduler owns one armed timer per active rule. Applying a
//! configuration re-validates every slot against the live outputs,
//! disarms everything and re-arms the active rules at their next
//! occurrence. A firing runs the action pipeline (resolve zone,
//! negotiate the source, set up volume or fade, issue the transport
//! command) as a detached task so concurrent alarms interleave freely,
//! then re-arms.
//!
//! Timers report back through an internal channel tagged with a
//! per-rule generation counter; a firing whose generation no longer
//! matches the armed state is stale and ignored.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Local};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigSnapshot;
use crate::fade::{FadeController, FadePlan};
use crate::negotiate::Negotiator;
use crate::occurrence::next_occurrence;
use crate::queue::{Occurrence, PendingQueue};
use crate::rule::{
    AlarmRule, Action, FieldError, MAX_GROUP_OUTPUTS, OutputRef, Pattern, SecondaryRule,
    SourceType, Transition, secondary_index,
};
use crate::tracing::prelude::*;
use crate::transport::{Browse, ControlCommand, PlayState, Transport, VolumeMode, Zone};

/// Status line when no rule is armed.
const STATUS_IDLE: &str = "No active Alarms";

/// Number of pending-queue lines rendered by default.
pub const UPCOMING_LINES: usize = 5;

pub(crate) type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// The scheduler task is gone; no further commands can be served.
#[derive(Debug, Error)]
#[error("scheduler stopped")]
pub struct EngineStopped;

/// Validation failures for one configuration slot.
pub type SlotErrors = (usize, Vec<FieldError>);

enum EngineCommand {
    Apply {
        snapshot: ConfigSnapshot,
        reply: oneshot::Sender<Vec<SlotErrors>>,
    },
    Status {
        reply: oneshot::Sender<String>,
    },
    Upcoming {
        max: usize,
        reply: oneshot::Sender<String>,
    },
}

/// Cloneable handle for the configuration surface.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<EngineCommand>,
}

impl SchedulerHandle {
    /// Replace the rule set. Returns field-level validation errors per
    /// slot; slots with errors are not armed, the rest are.
    pub async fn apply_configuration(
        &self,
        snapshot: ConfigSnapshot,
    ) -> Result<Vec<SlotErrors>, EngineStopped> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineCommand::Apply { snapshot, reply })
            .await
            .map_err(|_| EngineStopped)?;
        response.await.map_err(|_| EngineStopped)
    }

    /// One-line summary of the next pending alarm.
    pub async fn status(&self) -> Result<String, EngineStopped> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineCommand::Status { reply })
            .await
            .map_err(|_| EngineStopped)?;
        response.await.map_err(|_| EngineStopped)
    }

    /// Multi-line rendering of the pending queue, at most `max` entries.
    pub async fn upcoming(&self, max: usize) -> Result<String, EngineStopped> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineCommand::Upcoming { max, reply })
            .await
            .map_err(|_| EngineStopped)?;
        response.await.map_err(|_| EngineStopped)
    }
}

struct Fired {
    index: usize,
    generation: u64,
}

struct Armed {
    token: CancellationToken,
    generation: u64,
}

pub struct Scheduler {
    transport: Arc<dyn Transport>,
    negotiator: Arc<Negotiator>,
    fades: Arc<FadeController>,
    commands: mpsc::Receiver<EngineCommand>,
    fired_tx: mpsc::Sender<Fired>,
    fired_rx: mpsc::Receiver<Fired>,
    rules: HashMap<usize, AlarmRule>,
    armed: HashMap<usize, Armed>,
    generations: HashMap<usize, u64>,
    /// Guards for in-flight action pipelines (track-boundary waits
    /// included); cancelled wholesale on configuration changes.
    deferred: HashMap<usize, CancellationToken>,
    queue: PendingQueue,
    clock: Clock,
}

impl Scheduler {
    pub fn new(transport: Arc<dyn Transport>, browse: Arc<dyn Browse>) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (fired_tx, fired_rx) = mpsc::channel(16);
        let scheduler = Self {
            negotiator: Arc::new(Negotiator::new(browse)),
            fades: Arc::new(FadeController::new(transport.clone())),
            transport,
            commands: command_rx,
            fired_tx,
            fired_rx,
            rules: HashMap::new(),
            armed: HashMap::new(),
            generations: HashMap::new(),
            deferred: HashMap::new(),
            queue: PendingQueue::new(),
            clock: Arc::new(Local::now),
        };
        let handle = SchedulerHandle {
            commands: command_tx,
        };
        (scheduler, handle)
    }

    #[cfg(test)]
    pub(crate) fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(command) = self.commands.recv() => self.handle_command(command).await,
                Some(fired) = self.fired_rx.recv() => self.handle_firing(fired),
                else => break,
            }
        }
        self.disarm_all();
        self.fades.cancel_all();
        for (_, token) in self.deferred.drain() {
            token.cancel();
        }
        info!("scheduler stopped");
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Apply { snapshot, reply } => {
                let errors = self.apply(snapshot).await;
                let _ = reply.send(errors);
            }
            EngineCommand::Status { reply } => {
                let _ = reply.send(self.status_text());
            }
            EngineCommand::Upcoming { max, reply } => {
                let _ = reply.send(self.queue.describe(max));
            }
        }
    }

    /// Validate all slots against the live outputs and re-arm.
    async fn apply(&mut self, snapshot: ConfigSnapshot) -> Vec<SlotErrors> {
        let slots = snapshot.into_slots();
        let mut errors = Vec::new();
        self.rules.clear();

        for (index, slot) in slots.iter().enumerate() {
            let volume_range = match &slot.output {
                Some(output) => self
                    .transport
                    .zone_by_output_id(&output.output_id)
                    .await
                    .and_then(|zone| zone.volume_of(&output.output_id).map(|v| (v.min, v.max))),
                None => None,
            };
            match crate::rule::validate(slot, index, volume_range) {
                Ok(rule) => {
                    if rule.active && rule.output.is_some() {
                        self.rules.insert(index, rule);
                    }
                }
                Err(field_errors) => errors.push((index, field_errors)),
            }
        }

        info!(active = self.rules.len(), "configuration applied");
        self.fades.cancel_all();
        for (_, token) in self.deferred.drain() {
            token.cancel();
        }
        self.negotiator.reset();
        self.rearm_all();
        errors
    }

    fn disarm_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.token.cancel();
        }
    }

    /// Arm every active rule at its next occurrence and rebuild the
    /// pending queue.
    fn rearm_all(&mut self) {
        self.disarm_all();
        self.queue.clear();
        let now = (self.clock)();

        let rules: Vec<AlarmRule> = self.rules.values().filter(|r| r.active).cloned().collect();
        for rule in rules {
            // A play fade starts early so the configured volume is
            // reached at the configured time.
            let lead = if rule.action == Action::Play {
                Duration::minutes(i64::from(rule.transition.fade_minutes()))
            } else {
                Duration::zero()
            };
            let fires_at = next_occurrence(&rule.time, rule.pattern, lead, now);

            let generation = {
                let counter = self.generations.entry(rule.index).or_insert(0);
                *counter += 1;
                *counter
            };
            let token = CancellationToken::new();
            let delay = (fires_at - now).to_std().unwrap_or_default();
            let fired_tx = self.fired_tx.clone();
            let timer_token = token.clone();
            let index = rule.index;
            tokio::spawn(async move {
                tokio::select! {
                    _ = timer_token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        let _ = fired_tx.send(Fired { index, generation }).await;
                    }
                }
            });
            self.armed.insert(index, Armed { token, generation });

            let label = format!(
                "{}{}",
                if rule.transition.fade_minutes() > 0 {
                    "Faded "
                } else {
                    ""
                },
                rule.action
            );
            debug!(rule = index, %fires_at, label, "alarm armed");
            self.queue.insert(Occurrence {
                rule_index: index,
                fires_at,
                label,
            });
        }
    }

    fn handle_firing(&mut self, fired: Fired) {
        let current = self.armed.get(&fired.index).map(|a| a.generation);
        if current != Some(fired.generation) {
            debug!(rule = fired.index, "stale firing ignored");
            return;
        }

        // Every armed rule due by now fires in queue order (instant,
        // then ascending rule index) before the single re-arm pass bumps
        // their generations; rules sharing an instant must not lose
        // their firing to the re-arm. Their own timer messages, where
        // already in flight, are rejected as stale above.
        let now = (self.clock)();
        let due: Vec<usize> = self
            .queue
            .iter()
            .take_while(|o| o.fires_at <= now)
            .map(|o| o.rule_index)
            .collect();
        for index in due {
            let Some(armed) = self.armed.remove(&index) else {
                continue;
            };
            armed.token.cancel();
            self.dispatch(index, now);
        }

        self.rearm_all();
    }

    fn dispatch(&mut self, index: usize, now: DateTime<Local>) {
        let Some(rule) = self.rules.get(&index).cloned() else {
            return;
        };
        info!(rule = index, action = %rule.action, "alarm fired");

        if pattern_exhausted(rule.pattern, rule.repeat, now) {
            if let Some(rule) = self.rules.get_mut(&index) {
                rule.active = false;
            }
            debug!(rule = index, "recurrence exhausted; rule deactivated");
        }

        // The remote pipeline runs detached so other rules' timers keep
        // flowing; the guard token stops deferred work on the next
        // configuration change.
        let token = CancellationToken::new();
        self.deferred.insert(index, token.clone());
        let firing = Firing {
            transport: self.transport.clone(),
            negotiator: self.negotiator.clone(),
            fades: self.fades.clone(),
            rule,
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = execute(firing) => {}
            }
        });
    }

    fn status_text(&self) -> String {
        match self.queue.next() {
            Some(next) => format!(
                "Next Alarm ({}):\n{}",
                next.label,
                next.fires_at.format("%a %b %e %Y %H:%M")
            ),
            None => STATUS_IDLE.to_string(),
        }
    }
}

/// A non-repeating rule deactivates after the last firing of its cycle:
/// immediately for Once and single weekdays, Sunday for weekends, Friday
/// for workday patterns, Saturday for daily ones.
fn pattern_exhausted(pattern: Pattern, repeat: bool, now: DateTime<Local>) -> bool {
    if repeat {
        return false;
    }
    let day = now.weekday().num_days_from_sunday();
    match pattern {
        Pattern::Weekend => day == 0,
        Pattern::MonFri => day == 5,
        Pattern::Daily => day == 6,
        _ => true,
    }
}

struct Firing {
    transport: Arc<dyn Transport>,
    negotiator: Arc<Negotiator>,
    fades: Arc<FadeController>,
    rule: AlarmRule,
}

/// The action pipeline for one firing. Any failed step exits early; the
/// rule stays scheduled for its next occurrence regardless.
async fn execute(firing: Firing) {
    let Firing {
        transport,
        negotiator,
        fades,
        rule,
    } = firing;
    let Some(output) = rule.output.clone() else {
        return;
    };

    let Some(zone) = transport.zone_by_output_id(&output.output_id).await else {
        warn!(rule = rule.index, output = %output.name, "configured output has no zone; skipping");
        return;
    };
    if rule.action == Action::Play && !zone.is_play_allowed {
        warn!(rule = rule.index, zone = %zone.name, "zone does not allow play; skipping");
        return;
    }

    // Resolve the configured source before touching the transport. A
    // successful catalog activation starts playback by itself.
    let mut negotiated = false;
    if rule.action == Action::Play {
        if let Some(source) = &rule.source {
            let session = format!("alarm-{}", rule.index);
            match negotiator.select(&session, &zone.zone_id, source).await {
                Ok(()) => negotiated = source.source_type != SourceType::Queue,
                Err(error) => {
                    warn!(rule = rule.index, %error, "source negotiation failed; alarm skipped");
                    return;
                }
            }
        }
    }

    // Re-read the zone: negotiation may have changed its state.
    let zone = transport
        .zone_by_output_id(&output.output_id)
        .await
        .unwrap_or(zone);

    let fade_minutes = rule.transition.fade_minutes();
    let volume = zone.volume_of(&output.output_id).cloned();
    let mut end_volume = rule.volume;
    let mut instant_action = rule.action;

    if let Some(volume) = volume.as_ref().filter(|_| {
        rule.action != Action::Transfer && fade_minutes > 0
    }) {
        let start = if zone.state == PlayState::Playing {
            volume.value
        } else {
            volume.min
        };
        if matches!(rule.action, Action::Stop | Action::Standby) {
            end_volume = volume.min;
        }
        if end_volume != start {
            fades.start(FadePlan {
                rule_index: rule.index,
                zone_id: zone.zone_id.clone(),
                output_id: output.output_id.clone(),
                action: rule.action,
                start,
                target: end_volume,
                step: volume.step.max(1),
                minutes: fade_minutes,
                floor: volume.min,
                defer_stop: true,
            });
            if zone.state == PlayState::Playing
                && matches!(rule.action, Action::Stop | Action::Standby)
            {
                // Keep playing through the fade-out; the fade issues the
                // deferred pause at the floor.
                instant_action = Action::None;
            }
            end_volume = start;
        }
    }

    if rule.transition == Transition::TrackBoundary
        && matches!(rule.action, Action::Stop | Action::Standby)
        && zone.state == PlayState::Playing
    {
        debug!(rule = rule.index, "deferring stop to the track boundary");
        if let Err(error) = transport
            .wait_zone_property_changed(
                &zone.zone_id,
                &[crate::transport::ZoneProperty::NowPlaying],
            )
            .await
        {
            warn!(rule = rule.index, %error, "track boundary wait failed; skipping");
            return;
        }
    }

    match instant_action {
        Action::Play => {
            if volume.is_some() {
                if let Err(error) = transport
                    .change_volume(&output.output_id, VolumeMode::Absolute, end_volume)
                    .await
                {
                    warn!(rule = rule.index, %error, "wake volume failed; skipping");
                    return;
                }
            }
            if zone.state != PlayState::Playing && !negotiated {
                if let Err(error) = transport.control(&zone.zone_id, ControlCommand::Play).await {
                    warn!(rule = rule.index, %error, "play command failed");
                    return;
                }
            }
        }
        Action::Stop | Action::Standby => {
            if zone.state == PlayState::Playing {
                if let Err(error) = transport.control(&zone.zone_id, ControlCommand::Pause).await {
                    warn!(rule = rule.index, %error, "pause command failed");
                    return;
                }
            }
            if instant_action == Action::Standby {
                crate::fade::standby_after_stop(&*transport, &zone.zone_id, &output.output_id)
                    .await;
            }
        }
        Action::Transfer => {
            let Some(transfer) = rule.transfer.as_ref() else {
                return;
            };
            let Some(target_zone) = transport.zone_by_output_id(&transfer.output_id).await else {
                warn!(rule = rule.index, output = %transfer.name, "transfer target has no zone; skipping");
                return;
            };
            if let Err(error) = transport
                .change_volume(&transfer.output_id, VolumeMode::Absolute, end_volume)
                .await
            {
                warn!(rule = rule.index, %error, "transfer target volume failed");
            }
            if let Err(error) = transport
                .transfer_zone(&zone.zone_id, &target_zone.zone_id)
                .await
            {
                warn!(rule = rule.index, %error, "zone transfer failed");
                return;
            }
        }
        Action::None => {}
    }

    apply_secondaries(&*transport, &fades, &rule, &zone, &output.output_id).await;
}

/// Drive the volume of every other output grouped in the rule's zone.
/// Sub-rules mirror the parent's action and transition but fade from
/// their own live level; the zone-level transport command is the
/// parent's alone.
async fn apply_secondaries(
    transport: &dyn Transport,
    fades: &FadeController,
    rule: &AlarmRule,
    zone: &Zone,
    primary: &str,
) {
    let extras: Vec<_> = zone
        .outputs
        .iter()
        .filter(|o| o.output_id != primary)
        .collect();
    if extras.len() > MAX_GROUP_OUTPUTS {
        warn!(
            rule = rule.index,
            zone = %zone.name,
            ignored = extras.len() - MAX_GROUP_OUTPUTS,
            "zone group larger than supported; extra outputs ignored"
        );
    }

    let secondaries: Vec<(SecondaryRule, &crate::transport::Output)> = extras
        .into_iter()
        .take(MAX_GROUP_OUTPUTS)
        .enumerate()
        .map(|(slot, output)| {
            (
                SecondaryRule {
                    index: secondary_index(rule.index, slot),
                    parent: rule.index,
                    output: OutputRef {
                        output_id: output.output_id.clone(),
                        name: output.name.clone(),
                    },
                },
                output,
            )
        })
        .collect();

    let fade_minutes = rule.transition.fade_minutes();
    for (secondary, output) in secondaries {
        let Some(volume) = output.volume.as_ref() else {
            continue;
        };
        let target = if matches!(rule.action, Action::Stop | Action::Standby) {
            volume.min
        } else {
            rule.volume.clamp(volume.min, volume.max)
        };

        if fade_minutes > 0 && rule.action != Action::Transfer {
            let start = if zone.state == PlayState::Playing {
                volume.value
            } else {
                volume.min
            };
            if start != target {
                fades.start(FadePlan {
                    rule_index: secondary.index,
                    zone_id: zone.zone_id.clone(),
                    output_id: secondary.output.output_id.clone(),
                    action: rule.action,
                    start,
                    target,
                    step: volume.step.max(1),
                    minutes: fade_minutes,
                    floor: volume.min,
                    defer_stop: false,
                });
            }
        } else if rule.action == Action::Play {
            if let Err(error) = transport
                .change_volume(&secondary.output.output_id, VolumeMode::Absolute, target)
                .await
            {
                warn!(
                    rule = secondary.index,
                    output = %secondary.output.name,
                    %error,
                    "grouped output volume failed"
                );
            }
        }
    }
}
