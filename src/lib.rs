#![forbid(unsafe_code)]

pub mod engine;
pub mod error;
pub mod input;
pub mod model;
pub mod sink;
pub mod sink_artnet;

pub use engine::{DIMMER_MAX, Engine};
pub use error::{GlimmerError, GlimmerResult};
pub use input::{InputReader, Key, StopSignal};
pub use model::{ArtnetConfig, PlayOrder, Scene, Show, Step, UNIVERSE_SIZE};
pub use sink::{DmxSink, MemorySink, create_sink};
pub use sink_artnet::ArtnetSink;
