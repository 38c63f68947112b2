//! Scheduling demo against an in-memory playback system.
//!
//! Wires the engine to a simulated zone so the firing pipeline can be
//! watched without a live audio system: an alarm is armed a configurable
//! number of minutes out with a short fade-in, and every command the
//! engine issues is logged as it lands.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use reveil_engine::rule::{OutputRef, Transition};
use reveil_engine::transport::{
    Browse, BrowseError, BrowseList, BrowseOpts, BrowseOutcome, ControlCommand, LoadOpts,
    LoadResult, Output, PlayState, Transport, TransportError, VolumeInfo, VolumeMode, Zone,
    ZoneProperty,
};
use reveil_engine::{ConfigSnapshot, RuleSlot, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    reveil_engine::tracing::init();

    let args: Vec<String> = env::args().collect();
    let minutes: u16 = match args.get(1).map(String::as_str) {
        None => 1,
        Some("-h" | "--help") => {
            eprintln!("Usage: reveil-sim [minutes]");
            eprintln!();
            eprintln!("Arms a faded play alarm the given number of minutes out");
            eprintln!("(default 1) against a simulated zone and logs what the");
            eprintln!("engine does when it fires.");
            eprintln!();
            eprintln!("Environment:");
            eprintln!("  REVEIL_LOG    log filter (default: info)");
            std::process::exit(1);
        }
        Some(value) => value.parse()?,
    };

    let transport = Arc::new(SimTransport::new(Zone {
        zone_id: "sim-zone".into(),
        name: "Kitchen".into(),
        state: PlayState::Stopped,
        is_play_allowed: true,
        outputs: vec![Output {
            output_id: "sim-out".into(),
            name: "Kitchen".into(),
            volume: Some(VolumeInfo {
                value: 12,
                min: 0,
                max: 100,
                step: 1,
            }),
        }],
    }));

    let (scheduler, handle) = Scheduler::new(transport.clone(), Arc::new(SimBrowse));
    let shutdown = CancellationToken::new();
    let engine = tokio::spawn(scheduler.run(shutdown.clone()));

    let slot = RuleSlot {
        active: true,
        output: Some(OutputRef {
            output_id: "sim-out".into(),
            name: "Kitchen".into(),
        }),
        wake_time: format!("+0:{minutes:02}"),
        wake_volume: 40,
        transition: Transition::Fading { minutes: 1 },
        ..RuleSlot::default()
    };

    let errors = handle.apply_configuration(ConfigSnapshot::new(vec![slot])).await?;
    for (index, fields) in errors {
        for error in fields {
            eprintln!("slot {index}: {error}");
        }
    }

    info!("{}", handle.status().await?);

    // Watch the firing and the minute-long fade play out.
    let mut ticker = tokio::time::interval(Duration::from_secs(15));
    for _ in 0..((u64::from(minutes) + 2) * 4) {
        ticker.tick().await;
        info!(volume = transport.volume(), state = ?transport.state());
    }

    info!("{}", handle.status().await?);
    shutdown.cancel();
    engine.await?;
    Ok(())
}

/// One simulated zone that logs every command the engine issues.
struct SimTransport {
    zone: Mutex<Zone>,
}

impl SimTransport {
    fn new(zone: Zone) -> Self {
        Self {
            zone: Mutex::new(zone),
        }
    }

    fn volume(&self) -> i32 {
        self.zone.lock().outputs[0]
            .volume
            .as_ref()
            .map(|v| v.value)
            .unwrap_or_default()
    }

    fn state(&self) -> PlayState {
        self.zone.lock().state
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn zone_by_output_id(&self, output_id: &str) -> Option<Zone> {
        let zone = self.zone.lock();
        zone.outputs
            .iter()
            .any(|o| o.output_id == output_id)
            .then(|| zone.clone())
    }

    async fn control(&self, zone_id: &str, command: ControlCommand) -> Result<(), TransportError> {
        info!(zone = zone_id, ?command, "control");
        self.zone.lock().state = match command {
            ControlCommand::Play => PlayState::Playing,
            ControlCommand::Pause => PlayState::Paused,
            ControlCommand::Stop => PlayState::Stopped,
        };
        Ok(())
    }

    async fn change_volume(
        &self,
        output_id: &str,
        mode: VolumeMode,
        level: i32,
    ) -> Result<(), TransportError> {
        info!(output = output_id, ?mode, level, "change volume");
        let mut zone = self.zone.lock();
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
        Ok(())
    }

    async fn standby(&self, output_id: &str) -> Result<(), TransportError> {
        info!(output = output_id, "standby");
        Ok(())
    }

    async fn transfer_zone(
        &self,
        from_zone_id: &str,
        to_zone_id: &str,
    ) -> Result<(), TransportError> {
        info!(from = from_zone_id, to = to_zone_id, "transfer");
        Ok(())
    }

    async fn wait_zone_property_changed(
        &self,
        _zone_id: &str,
        _properties: &[ZoneProperty],
    ) -> Result<(), TransportError> {
        // The simulated zone only changes through engine commands.
        std::future::pending().await
    }
}

/// Empty catalog; the demo alarm plays the zone's queue.
struct SimBrowse;

#[async_trait]
impl Browse for SimBrowse {
    async fn browse(&self, _opts: &BrowseOpts) -> Result<BrowseOutcome, BrowseError> {
        Ok(BrowseOutcome::List(BrowseList {
            title: "Explore".into(),
            level: 0,
            count: 0,
        }))
    }

    async fn load(&self, _opts: &LoadOpts) -> Result<LoadResult, BrowseError> {
        Ok(LoadResult {
            items: Vec::new(),
            list: BrowseList {
                title: "Explore".into(),
                level: 0,
                count: 0,
            },
        })
    }
}
