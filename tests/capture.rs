//! Integration tests for in-memory capture.

mod common;

use common::*;
use std::fs::File;
use std::io::{self, Read, Write};

const PANGRAM_BYTES: usize = 43 * BYTES_PER_PHONEME;

#[test]
fn test_capture_spans_several_buffers() {
    let sim = ramp_engine();
    let engine = start(&sim);

    let pcm = engine.speak_to_memory(PANGRAM).unwrap();

    assert_eq!(pcm.len(), PANGRAM_BYTES);
    assert!(pcm.len() > 16384);
    assert_eq!(pcm.len() % 2, 0);
    assert_eq!(sim.stats().bytes_written, pcm.len() as u64);
    assert_continuous(&pcm, 0);
    assert!(!engine.state().capturing);
}

#[test]
fn test_capture_stats() {
    let sim = ramp_engine();
    let engine = start(&sim);

    let capture = engine.capture(Vec::new()).unwrap();
    assert!(engine.state().capturing);
    capture.speak(PANGRAM).unwrap();
    capture.sync().unwrap();
    let (pcm, stats) = capture.finish().unwrap();

    let full = PANGRAM_BYTES / 16384;
    assert_eq!(
        stats,
        CaptureStats {
            notifications: full + 1,
            full_buffers: full,
            bytes: pcm.len() as u64,
        }
    );
    let sim_stats = sim.stats();
    assert_eq!(sim_stats.buffers_posted, full);
    assert_eq!(sim_stats.buffers_added, full + 1);
    assert_eq!(sim_stats.buffers_returned, 1);
}

#[test]
fn test_small_buffer_keeps_order() {
    let sim = ramp_engine();
    let engine = start_with(
        &sim,
        EngineOptions {
            buffer_capacity: 100,
            ..test_options()
        },
    );

    let pcm = engine.speak_to_memory("order matters").unwrap();

    assert_eq!(pcm.len(), 13 * BYTES_PER_PHONEME);
    assert_continuous(&pcm, 0);
}

#[test]
fn test_consecutive_captures_continue_the_stream() {
    let sim = ramp_engine();
    let engine = start(&sim);

    let first = engine.speak_to_memory("one").unwrap();
    let second = engine.speak_to_memory("two").unwrap();

    assert_continuous(&first, 0);
    assert_continuous(&second, (first.len() / 2) as u16);
}

#[test]
fn test_several_utterances_in_one_capture() {
    let sim = ramp_engine();
    let engine = start(&sim);

    let capture = engine.capture(Vec::new()).unwrap();
    capture.speak("first").unwrap();
    capture.speak("second").unwrap();
    capture.sync().unwrap();
    let (pcm, _) = capture.finish().unwrap();

    assert_eq!(pcm.len(), 11 * BYTES_PER_PHONEME);
    assert_continuous(&pcm, 0);
}

#[test]
fn test_empty_utterance() {
    let sim = ramp_engine();
    let engine = start(&sim);

    let pcm = engine.speak_to_memory("").unwrap();

    assert!(pcm.is_empty());
    assert!(!engine.state().capturing);
}

#[test]
fn test_phonemes_heard_while_capturing() {
    let sim = ramp_engine();
    let engine = start(&sim);
    let phonemes = record_phonemes(&engine);

    engine.speak_to_memory("hey you").unwrap();

    assert_eq!(heard(&phonemes), "hey_you");
}

#[test]
fn test_second_capture_rejected() {
    let sim = ramp_engine();
    let engine = start(&sim);

    let first = engine.capture(Vec::new()).unwrap();
    assert!(matches!(
        engine.capture(Vec::new()),
        Err(TtsError::ProtocolViolation(_))
    ));
    assert!(matches!(
        engine.speak_to_memory("no"),
        Err(TtsError::ProtocolViolation(_))
    ));

    first.speak("yes").unwrap();
    first.sync().unwrap();
    let (pcm, _) = first.finish().unwrap();
    assert_eq!(pcm.len(), 3 * BYTES_PER_PHONEME);
}

#[test]
fn test_dropped_capture_allows_new_one() {
    let sim = ramp_engine();
    let engine = start(&sim);

    {
        let capture = engine.capture(Vec::new()).unwrap();
        capture.speak(PANGRAM).unwrap();
    }
    assert!(!engine.state().capturing);

    let pcm = engine.speak_to_memory("again").unwrap();
    assert_eq!(pcm.len(), 5 * BYTES_PER_PHONEME);
}

#[test]
fn test_open_in_memory_failure() {
    let sim = ramp_engine();
    let engine = start(&sim);
    sim.fail_next("open_in_memory", MMSYSERR_ERROR);

    assert!(matches!(
        engine.capture(Vec::new()),
        Err(TtsError::NativeCall {
            call: "TextToSpeechOpenInMemory",
            ..
        })
    ));
    assert!(!engine.state().capturing);
    assert_eq!(engine.speak_to_memory("ok").unwrap().len(), 2 * BYTES_PER_PHONEME);
}

#[test]
fn test_rejected_buffer_leaves_in_memory_mode() {
    let sim = ramp_engine();
    let engine = start(&sim);
    sim.fail_next("add_buffer", MMSYSERR_ERROR);

    assert!(matches!(
        engine.capture(Vec::new()),
        Err(TtsError::NativeCall {
            call: "TextToSpeechAddBuffer",
            ..
        })
    ));
    assert!(!engine.state().capturing);
    assert_eq!(engine.speak_to_memory("ok").unwrap().len(), 2 * BYTES_PER_PHONEME);
}

#[test]
fn test_zero_capacity_rejected() {
    let sim = ramp_engine();
    let engine = start_with(
        &sim,
        EngineOptions {
            buffer_capacity: 0,
            ..test_options()
        },
    );

    assert!(matches!(
        engine.capture(Vec::new()),
        Err(TtsError::ProtocolViolation(_))
    ));
    assert!(!engine.state().capturing);
}

#[test]
fn test_failed_close_parks_buffer_until_shutdown() {
    let sim = ramp_engine();
    let mut engine = start(&sim);

    let capture = engine.capture(Vec::new()).unwrap();
    capture.speak("abc").unwrap();
    capture.sync().unwrap();
    sim.fail_next("return_buffer", MMSYSERR_ERROR);
    sim.fail_next("close_in_memory", MMSYSERR_ERROR);

    // The engine may still write to the sink, so it stays with the parked buffer
    assert!(matches!(
        capture.finish(),
        Err(CaptureError {
            error: TtsError::NativeCall {
                call: "TextToSpeechCloseInMemory",
                ..
            },
            sink: None,
        })
    ));
    assert!(!engine.state().capturing);

    engine.shutdown().unwrap();
    assert_eq!(sim.stats().live_sessions, 0);
}

#[test]
fn test_shutdown_closes_open_capture() {
    let sim = ramp_engine();
    let mut engine = start(&sim);

    let capture = engine.capture(Vec::new()).unwrap();
    capture.speak("abc").unwrap();
    capture.sync().unwrap();
    std::mem::forget(capture);

    engine.shutdown().unwrap();
    assert!(!engine.state().capturing);
    assert_eq!(sim.stats().buffers_returned, 1);
}

/// A sink that fails once it has taken `limit` bytes.
struct LimitedSink {
    taken: Vec<u8>,
    limit: usize,
}

impl Write for LimitedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.taken.len() + buf.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "sink full"));
        }
        self.taken.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_sink_failure_surfaces_at_finish() {
    let sim = ramp_engine();
    let engine = start(&sim);

    let capture = engine
        .capture(LimitedSink {
            taken: Vec::new(),
            limit: 16384,
        })
        .unwrap();
    capture.speak(PANGRAM).unwrap();
    // Speech still runs to completion after the sink fails
    capture.sync().unwrap();

    let Err(failed) = capture.finish() else {
        panic!("finish should report the sink failure");
    };
    assert!(matches!(failed.error, TtsError::Io(_)));
    // Everything accepted before the failure is still there
    let sink = failed.sink.unwrap();
    assert_eq!(sink.taken.len(), 16384);
    assert_continuous(&sink.taken, 0);
    assert!(!engine.state().capturing);
    assert_eq!(sim.stats().bytes_written, PANGRAM_BYTES as u64);

    let pcm = engine.speak_to_memory("fine").unwrap();
    assert_eq!(pcm.len(), 4 * BYTES_PER_PHONEME);
}

#[test]
fn test_speak_to_writer_file() {
    let sim = ramp_engine();
    let engine = start(&sim);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.pcm");

    let file = engine
        .speak_to_writer(File::create(&path).unwrap(), "file")
        .unwrap();
    drop(file);

    let mut pcm = Vec::new();
    File::open(&path).unwrap().read_to_end(&mut pcm).unwrap();
    assert_eq!(pcm.len(), 4 * BYTES_PER_PHONEME);
    assert_continuous(&pcm, 0);
}

#[test]
fn test_speak_to_wav() {
    let sim = ramp_engine();
    let engine = start(&sim);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.wav");

    engine.speak_to_wav(&path, "hello").unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + 5 * BYTES_PER_PHONEME);
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");
    assert_continuous(&bytes[HEADER_SIZE..], 0);

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().sample_rate, 11025);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().bits_per_sample, 16);
    assert_eq!(reader.duration() as usize, 5 * BYTES_PER_PHONEME / 2);
}

#[test]
fn test_buffer_events_on_bus() {
    let sim = ramp_engine();
    let bus = EventBus::new();
    let mut subscriber = bus.subscribe();
    let engine =
        Engine::start_with_bus(std::sync::Arc::new(sim.clone()), test_options(), Some(bus))
            .unwrap();

    engine.speak_to_memory(PANGRAM).unwrap();

    let drained: Vec<Event> = drain_events(&mut subscriber)
        .into_iter()
        .filter(|e| matches!(e, Event::BufferDrained { .. }))
        .collect();
    assert_eq!(drained.len(), PANGRAM_BYTES / 16384);
    assert!(drained.iter().all(|e| *e
        == Event::BufferDrained {
            bytes: 16384,
            full: true
        }));
}
