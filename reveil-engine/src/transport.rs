//! Collaborator seams: remote playback control and catalog browsing.
//!
//! The engine never speaks the remote protocol itself. Everything it needs
//! from the playback system is expressed as two async traits, [`Transport`]
//! for zone/output control and [`Browse`] for hierarchical catalog
//! navigation. The real client lives outside this crate; tests and the
//! simulator provide in-memory implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque output identifier assigned by the remote system.
pub type OutputId = String;

/// Opaque zone identifier assigned by the remote system.
pub type ZoneId = String;

/// Playback state of a zone as reported by the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    /// Transient state while the remote is lining up a stream. Treated
    /// like `Playing` by interference checks.
    Loading,
    Paused,
    Stopped,
}

/// Volume information for one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub value: i32,
    pub min: i32,
    pub max: i32,
    /// Native step size of the output's volume control. Most outputs
    /// report 1; fixed-step hardware may report more.
    pub step: i32,
}

/// One physical output belonging to a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub output_id: OutputId,
    pub name: String,
    pub volume: Option<VolumeInfo>,
}

/// A playback zone: one or more grouped outputs sharing a play state.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub zone_id: ZoneId,
    pub name: String,
    pub state: PlayState,
    pub is_play_allowed: bool,
    pub outputs: Vec<Output>,
}

impl Zone {
    /// Volume information for a specific output in this zone.
    pub fn volume_of(&self, output_id: &str) -> Option<&VolumeInfo> {
        self.outputs
            .iter()
            .find(|o| o.output_id == output_id)
            .and_then(|o| o.volume.as_ref())
    }
}

/// Transport control commands the engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Play,
    Pause,
    Stop,
}

/// How a volume level argument is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeMode {
    Absolute,
    Relative,
}

/// Zone properties the engine can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneProperty {
    /// The now-playing item changed (track boundary).
    NowPlaying,
    /// The play state changed.
    State,
}

/// Errors reported by the remote transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("no zone for output {0}")]
    ZoneNotFound(OutputId),

    #[error("output {0} does not support standby")]
    StandbyUnsupported(OutputId),

    #[error("remote refused the request: {0}")]
    Refused(String),

    #[error("connection to the remote core lost")]
    Disconnected,
}

/// Remote zone/output control.
///
/// All calls are request/response exchanges against the remote core; any
/// of them may fail transiently. The engine treats a failure as the end
/// of the current action step and never retries on its own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve the zone currently containing the given output, if any.
    async fn zone_by_output_id(&self, output_id: &str) -> Option<Zone>;

    /// Issue a transport command against a zone.
    async fn control(&self, zone_id: &str, command: ControlCommand) -> Result<(), TransportError>;

    /// Change the volume of a single output.
    async fn change_volume(
        &self,
        output_id: &str,
        mode: VolumeMode,
        level: i32,
    ) -> Result<(), TransportError>;

    /// Put an output into standby. Outputs without standby support
    /// report [`TransportError::StandbyUnsupported`].
    async fn standby(&self, output_id: &str) -> Result<(), TransportError>;

    /// Move the playing content from one zone to another.
    async fn transfer_zone(&self, from_zone_id: &str, to_zone_id: &str)
        -> Result<(), TransportError>;

    /// Resolve once any of the given properties change on the zone.
    /// There is no timeout; a vanished zone reports an error instead.
    async fn wait_zone_property_changed(
        &self,
        zone_id: &str,
        properties: &[ZoneProperty],
    ) -> Result<(), TransportError>;
}

/// Hint describing what browsing into an item yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemHint {
    /// Descending opens another list.
    List,
    /// Descending performs an action and ends the traversal.
    Action,
    /// Descending opens a short list of actions.
    ActionList,
}

/// One entry in a catalog list.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseItem {
    pub title: String,
    pub item_key: Option<String>,
    pub hint: ItemHint,
}

/// Metadata for the currently open catalog list.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseList {
    pub title: String,
    pub level: u32,
    pub count: usize,
}

/// Result of a [`Browse::browse`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowseOutcome {
    /// A list was opened; fetch entries with [`Browse::load`].
    List(BrowseList),
    /// The remote displayed a message instead of a list.
    Message { is_error: bool, message: String },
    /// A terminal action completed; nothing further to navigate.
    Complete,
}

/// Options for a [`Browse::browse`] call.
#[derive(Debug, Clone, Default)]
pub struct BrowseOpts {
    /// Isolates concurrent traversals from each other. Each negotiation
    /// session uses its own key so cursors never interleave.
    pub session_key: String,
    /// Descend into this item; `None` browses the current level.
    pub item_key: Option<String>,
    /// Reset the traversal to the catalog root first.
    pub pop_all: bool,
    /// Zone to apply play actions to.
    pub zone_id: Option<ZoneId>,
}

/// Options for a [`Browse::load`] call.
#[derive(Debug, Clone, Default)]
pub struct LoadOpts {
    pub session_key: String,
    pub offset: usize,
    pub count: usize,
}

/// One page of entries from the currently open list.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub items: Vec<BrowseItem>,
    pub list: BrowseList,
}

/// Errors reported by the remote catalog.
#[derive(Debug, Clone, Error)]
pub enum BrowseError {
    #[error("unexpected browse result: {0}")]
    Unexpected(String),

    #[error("remote refused the request: {0}")]
    Refused(String),

    #[error("connection to the remote core lost")]
    Disconnected,
}

/// Hierarchical catalog navigation, paginated and session-keyed.
#[async_trait]
pub trait Browse: Send + Sync {
    async fn browse(&self, opts: &BrowseOpts) -> Result<BrowseOutcome, BrowseError>;

    async fn load(&self, opts: &LoadOpts) -> Result<LoadResult, BrowseError>;
}
