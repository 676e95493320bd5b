use std::io::{self, Write as _};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use rand::Rng as _;

use crate::error::GlimmerResult;
use crate::input::{Key, StopSignal};
use crate::model::{PlayOrder, Show, UNIVERSE_SIZE};
use crate::sink::DmxSink;

/// Master dimmer maximum; levels are tenths of full brightness.
pub const DIMMER_MAX: u8 = 10;

/// The render engine.
///
/// Owns the whole playback state (frame buffer, fade/hold counters, target
/// step, master dimmer) exclusively on one thread. Every tick it polls at
/// most one key from the reader, advances the scene/step state machine,
/// recomputes the frame and hands it to the sink.
pub struct Engine<'a> {
    show: &'a Show,
    keys: Receiver<Key>,
    reader_stop: StopSignal,

    scene: usize,
    step: usize,
    frame: [u8; UNIVERSE_SIZE],
    fade_frames: u64,
    hold_frames: u64,
    /// Whether the target step's values have been copied into the frame
    /// buffer since the fade finished.
    rendered: bool,
    dimmer: u8,
    stop: bool,
}

impl<'a> Engine<'a> {
    /// Build the engine for a validated show and activate the start
    /// scene's first step.
    pub fn new(show: &'a Show, keys: Receiver<Key>, reader_stop: StopSignal) -> GlimmerResult<Self> {
        show.validate()?;

        let mut engine = Engine {
            show,
            keys,
            reader_stop,
            scene: show.start_scene - 1,
            step: 0,
            frame: [0; UNIVERSE_SIZE],
            fade_frames: 0,
            hold_frames: 0,
            rendered: false,
            dimmer: DIMMER_MAX,
            stop: false,
        };
        engine.advance_step(true);
        Ok(engine)
    }

    /// Run the frame loop until a quit key stops it, then close the sink.
    ///
    /// A tick that finishes early sleeps for the remainder of the frame
    /// duration; a tick that overruns continues immediately and reports
    /// the overrun.
    #[tracing::instrument(skip(self, sink), fields(show = %self.show.name))]
    pub fn run(&mut self, sink: &mut dyn DmxSink) {
        let frame_duration = Duration::from_millis(self.show.frame_duration);

        while !self.stop {
            let start = Instant::now();
            self.tick(sink);
            let elapsed = start.elapsed();
            if elapsed < frame_duration {
                thread::sleep(frame_duration - elapsed);
            } else {
                print!("\rSlow frame encountered: {} ms", elapsed.as_millis());
                flush_stdout();
            }
        }

        sink.close();
    }

    /// One engine tick: poll input, recompute the frame, stream it.
    ///
    /// A sink failure is reported and otherwise ignored; it must never
    /// stop or delay playback.
    pub fn tick(&mut self, sink: &mut dyn DmxSink) {
        if let Ok(key) = self.keys.try_recv() {
            self.handle_key(key);
        }
        self.compute_frame();
        if let Err(err) = sink.stream(self.show.universe, &self.frame) {
            tracing::warn!("frame not streamed: {err}");
        }
    }

    pub fn frame(&self) -> &[u8; UNIVERSE_SIZE] {
        &self.frame
    }

    pub fn dimmer(&self) -> u8 {
        self.dimmer
    }

    /// 0-based index of the active scene.
    pub fn scene_index(&self) -> usize {
        self.scene
    }

    /// 0-based index of the target step within the active scene.
    pub fn step_index(&self) -> usize {
        self.step
    }

    pub fn is_stopped(&self) -> bool {
        self.stop
    }

    fn handle_key(&mut self, key: Key) {
        match key {
            Key::Char('q') | Key::Interrupt => {
                println!("\nShutting down...");
                self.stop = true;
                self.reader_stop.request();
            }
            Key::Char('+') => {
                if self.dimmer < DIMMER_MAX {
                    self.dimmer += 1;
                    print!("\rDimmer: {}%", u16::from(self.dimmer) * 10);
                    flush_stdout();
                }
            }
            Key::Char('-') => {
                if self.dimmer > 0 {
                    self.dimmer -= 1;
                    print!("\rDimmer: {}%", u16::from(self.dimmer) * 10);
                    flush_stdout();
                }
            }
            Key::Char(c) => {
                let hit = self
                    .show
                    .scenes
                    .iter()
                    .position(|scene| scene.trigger_keys.contains(&c));
                match hit {
                    Some(index) => {
                        self.scene = index;
                        self.advance_step(true);
                    }
                    None => {
                        print!("\rUnknown key pressed: {c}");
                        flush_stdout();
                    }
                }
            }
        }
    }

    /// Switch to a new target step: step 0 when entering a scene, else the
    /// scene's playback order decides.
    ///
    /// A non-repeating linear scene stays on its last step untouched, with
    /// no counter reset and no status line, until a new scene is triggered.
    fn advance_step(&mut self, new_scene: bool) {
        let show = self.show;
        let scene = &show.scenes[self.scene];

        if new_scene {
            self.step = 0;
        } else {
            match scene.order {
                PlayOrder::Random => {
                    // resample until different; a single-step scene keeps
                    // its only step
                    if scene.steps.len() > 1 {
                        let mut rng = rand::rng();
                        let mut next = rng.random_range(0..scene.steps.len());
                        while next == self.step {
                            next = rng.random_range(0..scene.steps.len());
                        }
                        self.step = next;
                    }
                }
                PlayOrder::Linear => {
                    if self.step + 1 < scene.steps.len() {
                        self.step += 1;
                    } else if scene.repeat {
                        self.step = 0;
                    } else {
                        return;
                    }
                }
            }
        }

        let step = &scene.steps[self.step];
        self.rendered = false;
        self.hold_frames = frames_for(step.hold, show.frame_duration);
        self.fade_frames = frames_for(step.fade, show.frame_duration);
        tracing::debug!(
            scene = %scene.name,
            step = self.step,
            hold_frames = self.hold_frames,
            fade_frames = self.fade_frames,
            "step activated"
        );

        print!(
            "\rPlaying scene: {:<20} Step: {:02}/{:02}",
            scene.name,
            self.step + 1,
            scene.steps.len()
        );
        flush_stdout();
    }

    /// Recompute the frame buffer for this tick.
    fn compute_frame(&mut self) {
        let show = self.show;
        let scene = &show.scenes[self.scene];
        let step = &scene.steps[self.step];

        if self.fade_frames > 0 {
            for (i, &target) in step.values.iter().enumerate() {
                let ch = (i + 1) as u16;
                if show.dimmer_channels.contains(&ch) {
                    // dimmer channels fade toward the dimmed target
                    self.frame[i] =
                        approach(self.frame[i], dimmed(target, self.dimmer), self.fade_frames);
                } else if scene.switch_channels.contains(&ch) {
                    self.frame[i] = target;
                } else {
                    self.frame[i] = approach(self.frame[i], target, self.fade_frames);
                }
            }
            self.fade_frames -= 1;
        } else {
            if !self.rendered {
                self.frame.copy_from_slice(&step.values);
                self.rendered = true;
            }
            // the master dimmer can change mid-hold, so dimmer channels
            // are recomputed every tick even after the copy above
            for &ch in &show.dimmer_channels {
                let i = usize::from(ch) - 1;
                self.frame[i] = dimmed(step.values[i], self.dimmer);
            }
            if self.hold_frames > 0 {
                self.hold_frames -= 1;
            } else {
                self.advance_step(false);
            }
        }
    }
}

/// Frames needed to cover `duration_ms` at the show's frame duration.
fn frames_for(duration_ms: u64, frame_duration_ms: u64) -> u64 {
    (duration_ms as f64 / frame_duration_ms as f64).round() as u64
}

/// Move `current` one frame toward `target`, spreading the remaining
/// distance evenly over `frames_left`. Recomputing against the live
/// distance each tick means rounding error cannot accumulate: the final
/// fade frame lands exactly on the target.
fn approach(current: u8, target: u8, frames_left: u64) -> u8 {
    let delta = ((f64::from(target) - f64::from(current)) / frames_left as f64).round();
    (f64::from(current) + delta).clamp(0.0, 255.0) as u8
}

/// Scale a channel value by a dimmer level in tenths.
fn dimmed(value: u8, level: u8) -> u8 {
    (f64::from(value) * f64::from(level) / 10.0).round() as u8
}

fn flush_stdout() {
    let _ = io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Scene, Step};
    use crate::sink::MemorySink;
    use crossbeam::channel::{self, Sender};
    use std::collections::BTreeSet;

    fn step_with(values: &[(u16, u8)], hold: u64, fade: u64) -> Step {
        let mut step = Step {
            values: vec![0; UNIVERSE_SIZE],
            hold,
            fade,
        };
        for &(ch, value) in values {
            step.values[usize::from(ch) - 1] = value;
        }
        step
    }

    fn one_scene_show(scene: Scene) -> Show {
        Show {
            name: "test".to_string(),
            universe: 7,
            frame_duration: 10,
            start_scene: 1,
            dimmer_channels: BTreeSet::new(),
            artnet: None,
            scenes: vec![scene],
        }
    }

    fn scene(name: &str, steps: Vec<Step>) -> Scene {
        Scene {
            name: name.to_string(),
            trigger_keys: BTreeSet::new(),
            repeat: false,
            order: PlayOrder::Linear,
            switch_channels: BTreeSet::new(),
            steps,
        }
    }

    fn engine(show: &Show) -> (Engine<'_>, Sender<Key>) {
        let (tx, rx) = channel::unbounded();
        let engine = Engine::new(show, rx, StopSignal::new()).unwrap();
        (engine, tx)
    }

    #[test]
    fn approach_lands_exactly_on_target() {
        let mut value = 3u8;
        for frames_left in (1..=3).rev() {
            value = approach(value, 10, frames_left);
        }
        assert_eq!(value, 10);

        // downward fades converge too
        let mut value = 200u8;
        for frames_left in (1..=7).rev() {
            value = approach(value, 13, frames_left);
        }
        assert_eq!(value, 13);
    }

    #[test]
    fn frames_for_rounds_to_nearest() {
        assert_eq!(frames_for(1000, 25), 40);
        assert_eq!(frames_for(24, 10), 2);
        assert_eq!(frames_for(26, 10), 3);
        assert_eq!(frames_for(0, 10), 0);
    }

    #[test]
    fn dimmed_scales_in_tenths() {
        assert_eq!(dimmed(255, 10), 255);
        assert_eq!(dimmed(255, 5), 128);
        assert_eq!(dimmed(255, 0), 0);
        assert_eq!(dimmed(10, 3), 3);
    }

    #[test]
    fn fade_converges_within_fade_frame_budget() {
        // fade 40 ms at 10 ms frames = 4 fade frames
        let show = one_scene_show(scene("fade", vec![step_with(&[(1, 200)], 1000, 40)]));
        let (mut engine, _tx) = engine(&show);

        for _ in 0..4 {
            engine.compute_frame();
        }
        assert_eq!(engine.frame[0], 200);
        assert_eq!(engine.fade_frames, 0);
    }

    #[test]
    fn switch_channels_snap_on_first_tick() {
        let mut sc = scene("switch", vec![step_with(&[(5, 180), (6, 180)], 1000, 100)]);
        sc.switch_channels = BTreeSet::from([5]);
        let show = one_scene_show(sc);
        let (mut engine, _tx) = engine(&show);

        engine.compute_frame();
        assert_eq!(engine.frame[4], 180); // switch channel, no interpolation
        assert!(engine.frame[5] < 180); // plain channel still fading
    }

    #[test]
    fn dimmer_channel_fades_toward_dimmed_target() {
        // listed as both dimmer and switch: the dimmer path wins
        let mut sc = scene("both", vec![step_with(&[(2, 100)], 1000, 100)]);
        sc.switch_channels = BTreeSet::from([2]);
        let mut show = one_scene_show(sc);
        show.dimmer_channels = BTreeSet::from([2]);

        let (mut engine, tx) = engine(&show);
        for _ in 0..5 {
            tx.send(Key::Char('-')).unwrap();
            engine.tick(&mut MemorySink::new());
        }
        // dimmer now 5; the channel is approaching 50, not snapped to 100
        assert_eq!(engine.dimmer, 5);
        assert!(engine.frame[1] < 100);
    }

    #[test]
    fn hold_copies_once_then_only_recomputes_dimmer_channels() {
        let mut show = one_scene_show(scene(
            "hold",
            vec![step_with(&[(1, 100), (2, 100)], 1000, 0)],
        ));
        show.dimmer_channels = BTreeSet::from([1]);
        let (mut engine, tx) = engine(&show);

        engine.compute_frame();
        assert_eq!(engine.frame[0], 100);
        assert_eq!(engine.frame[1], 100);
        assert!(engine.rendered);

        // poke a non-dimmer channel: holding must not re-copy it
        engine.frame[1] = 42;
        engine.compute_frame();
        assert_eq!(engine.frame[1], 42);

        // but the dimmer channel follows dimmer changes immediately
        tx.send(Key::Char('-')).unwrap();
        engine.tick(&mut MemorySink::new());
        assert_eq!(engine.frame[0], 90);
    }

    #[test]
    fn dimmer_never_leaves_bounds() {
        let show = one_scene_show(scene("bounds", vec![step_with(&[], 1000, 0)]));
        let (mut engine, _tx) = engine(&show);

        for _ in 0..15 {
            engine.handle_key(Key::Char('+'));
        }
        assert_eq!(engine.dimmer, DIMMER_MAX);
        for _ in 0..25 {
            engine.handle_key(Key::Char('-'));
        }
        assert_eq!(engine.dimmer, 0);
    }

    #[test]
    fn linear_scene_without_repeat_holds_last_step() {
        let steps = vec![
            step_with(&[(1, 10)], 0, 0),
            step_with(&[(1, 20)], 0, 0),
            step_with(&[(1, 30)], 0, 0),
        ];
        let show = one_scene_show(scene("linear", steps));
        let (mut engine, _tx) = engine(&show);

        engine.compute_frame();
        assert_eq!(engine.step, 1);
        engine.compute_frame();
        assert_eq!(engine.step, 2);
        for _ in 0..10 {
            engine.compute_frame();
        }
        assert_eq!(engine.step, 2);
        assert_eq!(engine.frame[0], 30);
    }

    #[test]
    fn repeating_linear_scene_wraps_to_first_step() {
        let steps = vec![step_with(&[(1, 10)], 0, 0), step_with(&[(1, 20)], 0, 0)];
        let mut sc = scene("repeat", steps);
        sc.repeat = true;
        let show = one_scene_show(sc);
        let (mut engine, _tx) = engine(&show);

        engine.compute_frame();
        assert_eq!(engine.step, 1);
        engine.compute_frame();
        assert_eq!(engine.step, 0);
    }

    #[test]
    fn random_never_repeats_previous_step() {
        let steps = (0..4).map(|_| step_with(&[], 0, 0)).collect();
        let mut sc = scene("random", steps);
        sc.order = PlayOrder::Random;
        let show = one_scene_show(sc);
        let (mut engine, _tx) = engine(&show);

        let mut previous = engine.step;
        for _ in 0..100 {
            engine.advance_step(false);
            assert_ne!(engine.step, previous);
            previous = engine.step;
        }
    }

    #[test]
    fn random_single_step_scene_keeps_its_step() {
        let mut sc = scene("solo", vec![step_with(&[], 0, 0)]);
        sc.order = PlayOrder::Random;
        let show = one_scene_show(sc);
        let (mut engine, _tx) = engine(&show);

        engine.advance_step(false);
        assert_eq!(engine.step, 0);
    }

    #[test]
    fn trigger_key_switches_scene_and_interrupts_fade() {
        let mut first = scene("first", vec![step_with(&[(1, 200)], 1000, 1000)]);
        first.trigger_keys = BTreeSet::from(['1']);
        let mut second = scene("second", vec![step_with(&[(1, 50)], 0, 0)]);
        second.trigger_keys = BTreeSet::from(['2']);

        let mut show = one_scene_show(first);
        show.scenes.push(second);
        let (mut engine, _tx) = engine(&show);

        engine.compute_frame(); // mid-fade of scene one
        assert!(engine.fade_frames > 0);

        engine.handle_key(Key::Char('2'));
        assert_eq!(engine.scene, 1);
        assert_eq!(engine.step, 0);
        assert_eq!(engine.fade_frames, 0);
        assert!(!engine.rendered);

        engine.compute_frame();
        assert_eq!(engine.frame[0], 50);
    }

    #[test]
    fn first_matching_scene_wins_on_shared_trigger() {
        let mut first = scene("first", vec![step_with(&[], 0, 0)]);
        first.trigger_keys = BTreeSet::from(['x']);
        let mut second = scene("second", vec![step_with(&[], 0, 0)]);
        second.trigger_keys = BTreeSet::from(['x']);

        let mut show = one_scene_show(first);
        show.scenes.push(second);
        show.start_scene = 2;
        let (mut engine, _tx) = engine(&show);
        assert_eq!(engine.scene, 1);

        engine.handle_key(Key::Char('x'));
        assert_eq!(engine.scene, 0);
    }

    #[test]
    fn unknown_key_changes_nothing() {
        let show = one_scene_show(scene("only", vec![step_with(&[(1, 9)], 1000, 0)]));
        let (mut engine, _tx) = engine(&show);
        engine.compute_frame();

        let frame_before = *engine.frame();
        engine.handle_key(Key::Char('z'));
        assert_eq!(*engine.frame(), frame_before);
        assert_eq!(engine.scene, 0);
        assert!(!engine.stop);
    }

    #[test]
    fn quit_key_stops_engine_and_signals_reader() {
        let show = one_scene_show(scene("only", vec![step_with(&[], 0, 0)]));
        let (tx, rx) = channel::unbounded();
        let reader_stop = StopSignal::new();
        let mut engine = Engine::new(&show, rx, reader_stop.clone()).unwrap();

        tx.send(Key::Char('q')).unwrap();
        let mut sink = MemorySink::new();
        engine.tick(&mut sink);

        assert!(engine.is_stopped());
        assert!(reader_stop.is_requested());
        // the quit tick still rendered and streamed a frame
        assert_eq!(sink.frames().len(), 1);
    }

    #[test]
    fn interrupt_key_stops_engine() {
        let show = one_scene_show(scene("only", vec![step_with(&[], 0, 0)]));
        let (mut engine, _tx) = engine(&show);
        engine.handle_key(Key::Interrupt);
        assert!(engine.is_stopped());
    }

    #[test]
    fn tick_streams_universe_from_show() {
        let show = one_scene_show(scene("only", vec![step_with(&[(1, 33)], 1000, 0)]));
        let (mut engine, _tx) = engine(&show);

        let mut sink = MemorySink::new();
        engine.tick(&mut sink);
        let (universe, frame) = sink.frames()[0];
        assert_eq!(universe, 7);
        assert_eq!(frame[0], 33);
    }
}
