//! Configuration shapes the engine consumes.
//!
//! Persistent storage and the schema-upgrade chain belong to the
//! configuration layer outside this crate; the engine receives a flat
//! snapshot of per-slot rule fields and requires it to be schema-current.
//! A snapshot at any other revision is reset to defaults with a warning,
//! never partially interpreted.

use serde::{Deserialize, Serialize};

use crate::rule::{Action, OutputRef, Pattern, SourceSpec, Transition};
use crate::tracing::prelude::*;

/// Schema revision this engine understands.
pub const CONFIG_REV: u32 = 1;

/// Raw per-slot rule fields as stored by the configuration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSlot {
    pub active: bool,
    pub output: Option<OutputRef>,
    pub action: Action,
    pub pattern: Pattern,
    pub wake_time: String,
    pub wake_volume: i32,
    pub transition: Transition,
    pub repeat: bool,
    pub transfer: Option<OutputRef>,
    pub source: Option<SourceSpec>,
}

impl Default for RuleSlot {
    fn default() -> Self {
        Self {
            active: false,
            output: None,
            action: Action::Play,
            pattern: Pattern::Once,
            wake_time: "07:00".into(),
            wake_volume: 30,
            transition: Transition::Instant,
            repeat: false,
            transfer: None,
            source: None,
        }
    }
}

/// A full configuration snapshot: revision plus one slot per alarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub revision: u32,
    pub rules: Vec<RuleSlot>,
}

impl ConfigSnapshot {
    pub fn new(rules: Vec<RuleSlot>) -> Self {
        Self {
            revision: CONFIG_REV,
            rules,
        }
    }

    /// Extract the rule slots, enforcing the schema contract: anything
    /// not at [`CONFIG_REV`] is replaced by defaults of the same length.
    pub fn into_slots(self) -> Vec<RuleSlot> {
        if self.revision == CONFIG_REV {
            return self.rules;
        }

        warn!(
            revision = self.revision,
            expected = CONFIG_REV,
            "configuration snapshot not schema-current; resetting to defaults"
        );
        vec![RuleSlot::default(); self.rules.len()]
    }
}
