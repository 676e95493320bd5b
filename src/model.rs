use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::error::{GlimmerError, GlimmerResult};

/// Channels in one DMX universe; every frame carries exactly this many values.
pub const UNIVERSE_SIZE: usize = 512;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Show {
    pub name: String,
    pub universe: u16,
    pub frame_duration: u64, // milliseconds per frame
    pub start_scene: usize,  // 1-based
    #[serde(default)]
    pub dimmer_channels: BTreeSet<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artnet: Option<ArtnetConfig>,
    pub scenes: Vec<Scene>,
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ArtnetConfig {
    /// Unicast target; broadcast when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Ipv4Addr>,
    #[serde(default)]
    pub subnet: u8, // 0..=15
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Scene {
    pub name: String,
    pub trigger_keys: BTreeSet<char>,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub order: PlayOrder,
    #[serde(default)]
    pub switch_channels: BTreeSet<u16>, // snap instantly, never fade
    pub steps: Vec<Step>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayOrder {
    #[default]
    Linear,
    Random,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Step {
    pub values: Vec<u8>, // exactly UNIVERSE_SIZE entries
    #[serde(default)]
    pub hold: u64, // milliseconds
    #[serde(default)]
    pub fade: u64, // milliseconds
}

impl Show {
    pub fn validate(&self) -> GlimmerResult<()> {
        if self.frame_duration == 0 {
            return Err(GlimmerError::validation("frame_duration must be >= 1 ms"));
        }
        if self.scenes.is_empty() {
            return Err(GlimmerError::validation(
                "show must contain at least one scene",
            ));
        }
        if self.start_scene == 0 || self.start_scene > self.scenes.len() {
            return Err(GlimmerError::validation(format!(
                "start_scene {} is out of range (show has {} scenes)",
                self.start_scene,
                self.scenes.len()
            )));
        }
        for &ch in &self.dimmer_channels {
            if !channel_in_universe(ch) {
                return Err(GlimmerError::validation(format!(
                    "dimmer channel {ch} is outside 1..={UNIVERSE_SIZE}"
                )));
            }
        }
        if let Some(artnet) = &self.artnet {
            if artnet.subnet > 15 {
                return Err(GlimmerError::validation(format!(
                    "artnet subnet {} is outside 0..=15",
                    artnet.subnet
                )));
            }
        }

        for scene in &self.scenes {
            if scene.steps.is_empty() {
                return Err(GlimmerError::validation(format!(
                    "scene '{}' has no steps",
                    scene.name
                )));
            }
            for &ch in &scene.switch_channels {
                if !channel_in_universe(ch) {
                    return Err(GlimmerError::validation(format!(
                        "scene '{}' switch channel {ch} is outside 1..={UNIVERSE_SIZE}",
                        scene.name
                    )));
                }
            }
            for (index, step) in scene.steps.iter().enumerate() {
                if step.values.len() != UNIVERSE_SIZE {
                    return Err(GlimmerError::validation(format!(
                        "scene '{}' step {} has {} channel values (expected {UNIVERSE_SIZE})",
                        scene.name,
                        index + 1,
                        step.values.len()
                    )));
                }
            }
        }

        Ok(())
    }
}

fn channel_in_universe(ch: u16) -> bool {
    (1..=UNIVERSE_SIZE as u16).contains(&ch)
}
