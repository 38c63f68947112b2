//! Alarm scheduling and playback-transition engine.
//!
//! The engine turns per-slot alarm configuration into armed timers and,
//! at firing time, into playback transitions against a remote audio
//! system: start playing a configured source, fade a zone out and stop
//! it, transfer playback to another zone, or put an output into standby.
//!
//! The remote system is reached exclusively through the [`transport`]
//! seams; this crate carries no protocol code. Wire up a
//! [`scheduler::Scheduler`] with implementations of
//! [`transport::Transport`] and [`transport::Browse`], run it, and drive
//! it through the [`scheduler::SchedulerHandle`].

pub mod config;
pub mod fade;
pub mod negotiate;
pub mod occurrence;
pub mod queue;
pub mod rule;
pub mod scheduler;
pub mod timespec;
pub mod tracing;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{CONFIG_REV, ConfigSnapshot, RuleSlot};
pub use rule::{Action, AlarmRule, FieldError, Pattern, SourceSpec, SourceType, Transition};
pub use scheduler::{EngineStopped, Scheduler, SchedulerHandle};
pub use timespec::TimeSpec;
