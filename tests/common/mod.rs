//! Test infrastructure for dectalk-rs integration tests.
//!
//! Provides engines backed by the simulated runtime and helpers for
//! inspecting captured audio.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

pub use dectalk_rs::capture::CaptureStats;
pub use dectalk_rs::config::EngineOptions;
pub use dectalk_rs::event::{Event, EventBus, Subscriber};
pub use dectalk_rs::native::sim::{SimConfig, SimStats, SimulatedEngine, Waveform, MSG_ERROR};
pub use dectalk_rs::native::{NativeEngine, MMSYSERR_ERROR, MMSYSERR_INVALPARAM};
pub use dectalk_rs::phoneme::PhonemeEvent;
pub use dectalk_rs::voice::{Language, SpeakerParams, Voice};
pub use dectalk_rs::wav::HEADER_SIZE;
pub use dectalk_rs::{CaptureError, Engine, EngineState, Lifecycle, TtsError};

/// Text long enough to fill several default-sized capture buffers.
pub const PANGRAM: &str = "The quick brown fox jumps over the lazy dog";

/// Bytes of PCM the simulated engine renders per phoneme at its default duration.
pub const BYTES_PER_PHONEME: usize = 11025 * 60 / 1000 * 2;

/// A simulated runtime writing a sample counter, so gaps and reorders show.
pub fn ramp_engine() -> SimulatedEngine {
    SimulatedEngine::new(SimConfig {
        waveform: Waveform::Ramp,
        ..SimConfig::default()
    })
}

pub fn test_options() -> EngineOptions {
    EngineOptions::default()
}

pub fn start(sim: &SimulatedEngine) -> Engine {
    start_with(sim, test_options())
}

pub fn start_with(sim: &SimulatedEngine, options: EngineOptions) -> Engine {
    Engine::start(Arc::new(sim.clone()), options).expect("engine should start")
}

/// Registers a listener that records every phoneme it hears.
pub fn record_phonemes(engine: &Engine) -> Arc<Mutex<Vec<char>>> {
    let heard = Arc::new(Mutex::new(Vec::new()));
    let sink = heard.clone();
    engine.set_phoneme_listener(move |event: PhonemeEvent| {
        sink.lock().unwrap().push(event.phoneme);
    });
    heard
}

pub fn heard(phonemes: &Arc<Mutex<Vec<char>>>) -> String {
    phonemes.lock().unwrap().iter().collect()
}

/// Decodes 16-bit little-endian PCM.
pub fn samples(pcm: &[u8]) -> Vec<u16> {
    pcm.chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Asserts the ramp waveform counts up by one from `start` without gaps.
pub fn assert_continuous(pcm: &[u8], start: u16) {
    for (i, sample) in samples(pcm).into_iter().enumerate() {
        let expected = start.wrapping_add(i as u16);
        assert_eq!(sample, expected, "discontinuity at sample {i}");
    }
}

/// Collects every event currently queued for `subscriber`.
pub fn drain_events(subscriber: &mut Subscriber) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = subscriber.try_recv() {
        events.push(event);
    }
    events
}
