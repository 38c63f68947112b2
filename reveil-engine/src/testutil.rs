//! In-memory Transport and Browse implementations for tests.
//!
//! The mock transport keeps a mutable zone table and records every command
//! with the (paused-clock) instant it was issued, so tests can assert both
//! ordering and spacing. The mock browse serves a scripted catalog tree
//! with per-session cursors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::transport::{
    Browse, BrowseError, BrowseItem, BrowseList, BrowseOpts, BrowseOutcome, ControlCommand,
    ItemHint, LoadOpts, LoadResult, Output, PlayState, Transport, TransportError, VolumeInfo,
    VolumeMode, Zone, ZoneProperty,
};

/// A command the engine issued against the mock transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Issued {
    Control {
        zone_id: String,
        command: ControlCommand,
    },
    Volume {
        output_id: String,
        level: i32,
    },
    Standby {
        output_id: String,
    },
    Transfer {
        from: String,
        to: String,
    },
}

#[derive(Default)]
struct TransportState {
    zones: Vec<Zone>,
    issued: Vec<(Instant, Issued)>,
    standby_unsupported: bool,
    fail_volume: bool,
}

#[derive(Default)]
pub struct MockTransport {
    state: Mutex<TransportState>,
    changed: Notify,
}

/// Build a zone whose outputs all have a 0..=100 volume range, step 1.
pub fn zone(zone_id: &str, state: PlayState, outputs: &[(&str, i32)]) -> Zone {
    Zone {
        zone_id: zone_id.to_string(),
        name: zone_id.to_string(),
        state,
        is_play_allowed: true,
        outputs: outputs
            .iter()
            .map(|(output_id, value)| Output {
                output_id: output_id.to_string(),
                name: output_id.to_string(),
                volume: Some(VolumeInfo {
                    value: *value,
                    min: 0,
                    max: 100,
                    step: 1,
                }),
            })
            .collect(),
    }
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_zone(&self, zone: Zone) {
        self.state.lock().zones.push(zone);
    }

    pub fn remove_zone(&self, zone_id: &str) {
        self.state.lock().zones.retain(|z| z.zone_id != zone_id);
    }

    pub fn set_zone_state(&self, zone_id: &str, state: PlayState) {
        if let Some(zone) = self
            .state
            .lock()
            .zones
            .iter_mut()
            .find(|z| z.zone_id == zone_id)
        {
            zone.state = state;
        }
        self.changed.notify_waiters();
    }

    /// Simulate an external hand on the volume knob.
    pub fn set_output_volume(&self, output_id: &str, value: i32) {
        let mut state = self.state.lock();
        for zone in &mut state.zones {
            for output in &mut zone.outputs {
                if output.output_id == output_id {
                    if let Some(volume) = &mut output.volume {
                        volume.value = value;
                    }
                }
            }
        }
    }

    pub fn set_standby_unsupported(&self, flag: bool) {
        self.state.lock().standby_unsupported = flag;
    }

    pub fn set_fail_volume(&self, flag: bool) {
        self.state.lock().fail_volume = flag;
    }

    /// Wake anything waiting on a zone property change (track boundary).
    pub fn signal_zone_change(&self) {
        self.changed.notify_waiters();
    }

    pub fn issued(&self) -> Vec<Issued> {
        self.state.lock().issued.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn issued_with_instants(&self) -> Vec<(Instant, Issued)> {
        self.state.lock().issued.clone()
    }

    /// All absolute volume levels pushed to the given output, in order.
    pub fn volume_levels(&self, output_id: &str) -> Vec<i32> {
        self.state
            .lock()
            .issued
            .iter()
            .filter_map(|(_, c)| match c {
                Issued::Volume {
                    output_id: id,
                    level,
                } if id == output_id => Some(*level),
                _ => None,
            })
            .collect()
    }

    fn record(&self, command: Issued) {
        self.state.lock().issued.push((Instant::now(), command));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn zone_by_output_id(&self, output_id: &str) -> Option<Zone> {
        self.state
            .lock()
            .zones
            .iter()
            .find(|z| z.outputs.iter().any(|o| o.output_id == output_id))
            .cloned()
    }

    async fn control(&self, zone_id: &str, command: ControlCommand) -> Result<(), TransportError> {
        self.record(Issued::Control {
            zone_id: zone_id.to_string(),
            command,
        });
        let state = match command {
            ControlCommand::Play => PlayState::Playing,
            ControlCommand::Pause => PlayState::Paused,
            ControlCommand::Stop => PlayState::Stopped,
        };
        self.set_zone_state(zone_id, state);
        Ok(())
    }

    async fn change_volume(
        &self,
        output_id: &str,
        mode: VolumeMode,
        level: i32,
    ) -> Result<(), TransportError> {
        if self.state.lock().fail_volume {
            return Err(TransportError::Refused("volume change refused".into()));
        }
        self.record(Issued::Volume {
            output_id: output_id.to_string(),
            level,
        });
        let mut state = self.state.lock();
        for zone in &mut state.zones {
            for output in &mut zone.outputs {
                if output.output_id == output_id {
                    if let Some(volume) = &mut output.volume {
                        volume.value = match mode {
                            VolumeMode::Absolute => level,
                            VolumeMode::Relative => volume.value + level,
                        };
                    }
                }
            }
        }
        Ok(())
    }

    async fn standby(&self, output_id: &str) -> Result<(), TransportError> {
        if self.state.lock().standby_unsupported {
            return Err(TransportError::StandbyUnsupported(output_id.to_string()));
        }
        self.record(Issued::Standby {
            output_id: output_id.to_string(),
        });
        Ok(())
    }

    async fn transfer_zone(
        &self,
        from_zone_id: &str,
        to_zone_id: &str,
    ) -> Result<(), TransportError> {
        self.record(Issued::Transfer {
            from: from_zone_id.to_string(),
            to: to_zone_id.to_string(),
        });
        Ok(())
    }

    async fn wait_zone_property_changed(
        &self,
        zone_id: &str,
        _properties: &[ZoneProperty],
    ) -> Result<(), TransportError> {
        if !self
            .state
            .lock()
            .zones
            .iter()
            .any(|z| z.zone_id == zone_id)
        {
            return Err(TransportError::ZoneNotFound(zone_id.to_string()));
        }
        self.changed.notified().await;
        Ok(())
    }
}

/// One node of the scripted catalog tree.
#[derive(Debug, Clone)]
pub struct CatalogNode {
    pub title: String,
    pub hint: ItemHint,
    pub children: Vec<CatalogNode>,
}

impl CatalogNode {
    pub fn list(title: &str, children: Vec<CatalogNode>) -> Self {
        Self {
            title: title.to_string(),
            hint: ItemHint::List,
            children,
        }
    }

    pub fn action(title: &str) -> Self {
        Self {
            title: title.to_string(),
            hint: ItemHint::Action,
            children: Vec::new(),
        }
    }
}

#[derive(Default)]
struct BrowseState {
    root: Vec<CatalogNode>,
    /// Per-session cursor: child-index path from the root.
    cursors: HashMap<String, Vec<usize>>,
    /// Titles of activated action nodes, as `path/to/action`.
    activated: Vec<String>,
    /// Cap on page size regardless of the requested count, to exercise
    /// pagination.
    page_limit: Option<usize>,
    fail_load: bool,
}

#[derive(Default)]
pub struct MockBrowse {
    state: Mutex<BrowseState>,
}

impl MockBrowse {
    pub fn new(root: Vec<CatalogNode>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrowseState {
                root,
                ..Default::default()
            }),
        })
    }

    pub fn set_page_limit(&self, limit: usize) {
        self.state.lock().page_limit = Some(limit);
    }

    pub fn set_fail_load(&self, flag: bool) {
        self.state.lock().fail_load = flag;
    }

    pub fn activated(&self) -> Vec<String> {
        self.state.lock().activated.clone()
    }

    fn parse_key(key: &str) -> Vec<usize> {
        key.split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().expect("well-formed item key"))
            .collect()
    }

    fn key_of(path: &[usize]) -> String {
        path.iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn locate<'a>(root: &'a [CatalogNode], path: &[usize]) -> Option<&'a CatalogNode> {
    let (&first, rest) = path.split_first()?;
    let mut node = root.get(first)?;
    for &index in rest {
        node = node.children.get(index)?;
    }
    Some(node)
}

fn children_at<'a>(root: &'a [CatalogNode], path: &[usize]) -> Option<&'a [CatalogNode]> {
    if path.is_empty() {
        Some(root)
    } else {
        locate(root, path).map(|n| n.children.as_slice())
    }
}

fn title_path(root: &[CatalogNode], path: &[usize]) -> String {
    let mut titles = Vec::new();
    let mut nodes = root;
    for &index in path {
        let node = &nodes[index];
        titles.push(node.title.clone());
        nodes = &node.children;
    }
    titles.join("/")
}

#[async_trait]
impl Browse for MockBrowse {
    async fn browse(&self, opts: &BrowseOpts) -> Result<BrowseOutcome, BrowseError> {
        let mut state = self.state.lock();

        let path = if let Some(key) = &opts.item_key {
            Self::parse_key(key)
        } else if opts.pop_all {
            Vec::new()
        } else {
            state.cursors.get(&opts.session_key).cloned().unwrap_or_default()
        };

        let node_hint = locate(&state.root, &path).map(|n| n.hint);
        if node_hint == Some(ItemHint::Action) {
            let title = title_path(&state.root, &path);
            state.activated.push(title);
            return Ok(BrowseOutcome::Complete);
        }

        let Some(children) = children_at(&state.root, &path) else {
            return Err(BrowseError::Unexpected(format!(
                "no catalog node at {path:?}"
            )));
        };
        let list = BrowseList {
            title: if path.is_empty() {
                "Explore".to_string()
            } else {
                title_path(&state.root, &path)
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            },
            level: path.len() as u32,
            count: children.len(),
        };
        state.cursors.insert(opts.session_key.clone(), path);
        Ok(BrowseOutcome::List(list))
    }

    async fn load(&self, opts: &LoadOpts) -> Result<LoadResult, BrowseError> {
        let state = self.state.lock();
        if state.fail_load {
            return Err(BrowseError::Refused("load refused".into()));
        }

        let path = state
            .cursors
            .get(&opts.session_key)
            .cloned()
            .unwrap_or_default();
        let children = children_at(&state.root, &path)
            .ok_or_else(|| BrowseError::Unexpected("cursor points nowhere".into()))?;

        let count = state
            .page_limit
            .map_or(opts.count, |limit| opts.count.min(limit));
        let end = (opts.offset + count).min(children.len());
        let items = children
            .get(opts.offset..end)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let mut child_path = path.clone();
                child_path.push(opts.offset + i);
                BrowseItem {
                    title: node.title.clone(),
                    item_key: Some(Self::key_of(&child_path)),
                    hint: node.hint,
                }
            })
            .collect();

        Ok(LoadResult {
            items,
            list: BrowseList {
                title: title_path(&state.root, &path),
                level: path.len() as u32,
                count: children.len(),
            },
        })
    }
}
