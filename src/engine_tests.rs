//! Unit tests for the engine module

#[cfg(test)]
mod tests {
    use crate::capture::{CaptureStats, TtsBufferT};
    use crate::config::EngineOptions;
    use crate::engine::Engine;
    use crate::error::TtsError;
    use crate::native::MMSYSERR_ERROR;
    use crate::test_support::{engine_write, RecordingEngine};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    fn start(native: &Arc<RecordingEngine>) -> Engine {
        Engine::start(native.clone(), EngineOptions::default()).unwrap()
    }

    /// Runs `f` on its own thread and fails if it does not return in time.
    fn within_deadline<T, F>(f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(f());
        });
        rx.recv_timeout(Duration::from_secs(5))
            .expect("engine call did not return")
    }

    #[test]
    fn test_fresh_engine_is_not_speaking() {
        let native = Arc::new(RecordingEngine::default());
        let engine = start(&native);

        // [:phone on] went out, but it is not speech
        assert!(native.calls().contains(&"speak"));
        assert!(!engine.state().speaking);

        engine.speak("hello").unwrap();
        assert!(engine.state().speaking);
    }

    #[test]
    fn test_nul_in_text_rejected() {
        let native = Arc::new(RecordingEngine::default());
        let engine = start(&native);
        let spoken = native.calls().iter().filter(|c| **c == "speak").count();

        assert!(matches!(engine.speak("a\0b"), Err(TtsError::InvalidText)));

        assert_eq!(
            native.calls().iter().filter(|c| **c == "speak").count(),
            spoken
        );
        assert!(!engine.state().speaking);
    }

    #[test]
    fn test_buffer_posted_during_add_buffer() {
        let native = Arc::new(RecordingEngine::default());
        native.post_buffer_during("add_buffer");
        let engine_native = native.clone();

        let stats = within_deadline(move || {
            let engine = start(&engine_native);
            let capture = engine.capture(Vec::new()).unwrap();
            let (pcm, stats) = capture.finish().unwrap();
            assert!(pcm.is_empty());
            stats
        });

        assert_eq!(stats.notifications, 1);
        assert!(!native.calls().contains(&"return_buffer"));
    }

    #[test]
    fn test_buffer_posted_during_return_buffer() {
        let native = Arc::new(RecordingEngine::default());
        native.post_buffer_during("return_buffer");
        let engine_native = native.clone();

        let (pcm, stats) = within_deadline(move || {
            let engine = start(&engine_native);
            let capture = engine.capture(Vec::new()).unwrap();
            let loaned = engine_native.added()[0] as *mut TtsBufferT;
            unsafe { engine_write(loaned, &[1, 2, 3, 4]) };
            capture.finish().unwrap()
        });

        assert_eq!(pcm, vec![1, 2, 3, 4]);
        assert_eq!(
            stats,
            CaptureStats {
                notifications: 1,
                full_buffers: 0,
                bytes: 4,
            }
        );
    }

    #[test]
    fn test_speak_to_memory_with_synchronous_posts() {
        let native = Arc::new(RecordingEngine::default());
        native.post_buffer_during("add_buffer");
        native.post_buffer_during("return_buffer");
        let engine_native = native.clone();

        let pcm = within_deadline(move || start(&engine_native).speak_to_memory("hi"));

        assert!(pcm.unwrap().is_empty());
    }

    #[test]
    fn test_rejected_buffer_clears_capture_slot() {
        let native = Arc::new(RecordingEngine::default());
        let engine = start(&native);
        native.fail("add_buffer", MMSYSERR_ERROR);

        assert!(matches!(
            engine.capture(Vec::new()),
            Err(TtsError::NativeCall {
                call: "TextToSpeechAddBuffer",
                ..
            })
        ));
        assert!(!engine.state().capturing);
        assert!(native.calls().contains(&"close_in_memory"));

        let capture = engine.capture(Vec::new()).unwrap();
        assert!(capture.finish().is_ok());
    }

    #[test]
    fn test_failed_return_keeps_sink() {
        let native = Arc::new(RecordingEngine::default());
        let engine = start(&native);
        let capture = engine.capture(vec![7u8]).unwrap();
        native.fail("return_buffer", MMSYSERR_ERROR);

        let failed = capture.finish().unwrap_err();

        assert!(matches!(
            failed.error,
            TtsError::NativeCall {
                call: "TextToSpeechReturnBuffer",
                ..
            }
        ));
        // In-memory mode was left, so the sink is no longer shared
        assert_eq!(failed.sink, Some(vec![7]));
        assert!(!engine.state().capturing);
    }
}
