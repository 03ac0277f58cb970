//! A live binding to the speech engine.
//!
//! [`Engine::start`] walks the startup sequence (language selection, native
//! startup with the callback router, default voice and rate) and only returns
//! a fully usable engine. Dropping it shuts the native session down.
//!
//! Phoneme listeners and capture buffers are serviced on the engine's own
//! callback thread; see [`Engine::set_phoneme_listener`] and [`Capture`].

use crate::{
    capture::{BufferState, CaptureBuffer, CaptureSession, CaptureStats, Drained},
    config::EngineOptions,
    constants::{TTS_LANG_ERROR, TTS_NOT_SUPPORTED, VOLUME_MAIN, WAVE_FORMAT_1M16},
    error::{check, CaptureError, Result, TtsError},
    event::EventBus,
    native::{NativeEngine, NativeHandle, TTS_FORCE},
    phoneme::PhonemeEvent,
    router::{self, CallbackRouter, PoisonlessLock},
    voice::{Language, SpeakerParams, Voice},
    wav,
};
use std::ffi::CString;
use std::io::Write;
use std::os::raw::c_int;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Where an engine is in its startup/teardown sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    LanguageSelecting,
    Started,
    Active,
    ShutDown,
}

/// Snapshot of an engine's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineState {
    pub lifecycle: Lifecycle,
    /// Text was submitted and not yet synced or reset
    pub speaking: bool,
    pub capturing: bool,
}

pub struct Engine {
    native: Arc<dyn NativeEngine>,
    handle: Option<NativeHandle>,
    router: Arc<CallbackRouter>,
    router_id: u32,
    lifecycle: Lifecycle,
    options: EngineOptions,
    speaking: AtomicBool,
    capturing: AtomicBool,
    /// Sessions whose buffer the engine may still reference
    parked: Mutex<Vec<CaptureSession>>,
}

impl Engine {
    /// Starts an engine with the given options.
    pub fn start(native: Arc<dyn NativeEngine>, options: EngineOptions) -> Result<Engine> {
        Self::start_with_bus(native, options, None)
    }

    /// Starts an engine that also publishes its observations on `bus`.
    pub fn start_with_bus(
        native: Arc<dyn NativeEngine>,
        options: EngineOptions,
        bus: Option<EventBus>,
    ) -> Result<Engine> {
        let mut lifecycle = Lifecycle::Uninitialized;
        trace!("Engine {lifecycle:?}, starting");

        if let Some(code) = options.language.code() {
            lifecycle = Lifecycle::LanguageSelecting;
            debug!("Engine {lifecycle:?}: {code}");
            select_language(native.as_ref(), code)?;
        }

        let router = Arc::new(CallbackRouter::new(native.message_kinds(), bus));
        let router_id = router::register(router.clone());

        let handle = match native.startup(
            options.device_id,
            0,
            router::tts_callback,
            router_id as c_int,
        ) {
            Ok(handle) => handle,
            Err(code) => {
                router::unregister(router_id);
                return Err(TtsError::NativeCall {
                    call: "TextToSpeechStartupEx",
                    code,
                });
            }
        };
        lifecycle = Lifecycle::Started;
        debug!("Engine {lifecycle:?} with handle {:p}", handle.as_raw());

        // From here on, Drop takes care of the native session on failure
        let mut engine = Engine {
            native,
            handle: Some(handle),
            router,
            router_id,
            lifecycle,
            options,
            speaking: AtomicBool::new(false),
            capturing: AtomicBool::new(false),
            parked: Mutex::new(Vec::new()),
        };
        engine.apply_defaults()?;
        engine.lifecycle = Lifecycle::Active;

        info!(
            "Engine started (language: {}, voice: {:?}, rate: {})",
            engine.options.language, engine.options.voice, engine.options.rate
        );
        Ok(engine)
    }

    fn apply_defaults(&self) -> Result<()> {
        self.set_voice(self.options.voice)?;
        self.set_rate(self.options.rate)?;
        if let Some(volume) = self.options.volume {
            self.set_volume(volume)?;
        }
        if self.options.enable_phonemes {
            self.submit_text("[:phone on]")?;
        }
        Ok(())
    }

    fn handle(&self) -> Result<NativeHandle> {
        self.handle.ok_or(TtsError::ShutDown)
    }

    pub fn language(&self) -> Language {
        self.options.language
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn state(&self) -> EngineState {
        EngineState {
            lifecycle: self.lifecycle,
            speaking: self.speaking.load(Ordering::Acquire),
            capturing: self.capturing.load(Ordering::Acquire),
        }
    }

    /// Engine error messages observed on the callback thread.
    pub fn errors_observed(&self) -> u64 {
        self.router.errors_observed()
    }

    /// Registers `listener` for phoneme marks, replacing any previous one.
    ///
    /// The listener runs synchronously on the engine's callback thread. It
    /// must return quickly and must not call back into this engine.
    pub fn set_phoneme_listener<F>(&self, listener: F)
    where
        F: Fn(PhonemeEvent) + Send + Sync + 'static,
    {
        self.router.set_listener(Some(Arc::new(listener)));
    }

    pub fn clear_phoneme_listener(&self) {
        self.router.set_listener(None);
    }

    /// Queues `text` and starts speaking if idle. Returns immediately.
    ///
    /// To replace whatever is being spoken, call [`Engine::reset`] first.
    ///
    /// Text containing a NUL byte is rejected with [`TtsError::InvalidText`].
    pub fn speak(&self, text: &str) -> Result<()> {
        self.submit_text(text)?;
        self.speaking.store(true, Ordering::Release);
        Ok(())
    }

    /// Queues text or an inline command without marking the engine as speaking.
    fn submit_text(&self, text: &str) -> Result<()> {
        let handle = self.handle()?;
        let text = CString::new(text).map_err(|_| TtsError::InvalidText)?;
        check(
            "TextToSpeechSpeakA",
            self.native.speak(handle, &text, TTS_FORCE),
        )
    }

    /// Blocks until all queued text has been processed.
    pub fn sync(&self) -> Result<()> {
        let handle = self.handle()?;
        check("TextToSpeechSync", self.native.sync(handle))?;
        self.speaking.store(false, Ordering::Release);
        Ok(())
    }

    /// Flushes queued text and stops audio output immediately.
    pub fn reset(&self) -> Result<()> {
        let handle = self.handle()?;
        check("TextToSpeechReset", self.native.reset(handle, false))?;
        self.speaking.store(false, Ordering::Release);
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        check("TextToSpeechPause", self.native.pause(self.handle()?))
    }

    pub fn resume(&self) -> Result<()> {
        check("TextToSpeechResume", self.native.resume(self.handle()?))
    }

    pub fn voice(&self) -> Result<Voice> {
        let mut raw = 0;
        check(
            "TextToSpeechGetSpeaker",
            self.native.get_speaker(self.handle()?, &mut raw),
        )?;
        Voice::from_raw(raw).ok_or(TtsError::NativeCall {
            call: "TextToSpeechGetSpeaker",
            code: raw,
        })
    }

    pub fn set_voice(&self, voice: Voice) -> Result<()> {
        check(
            "TextToSpeechSetSpeaker",
            self.native.set_speaker(self.handle()?, voice as u32),
        )
    }

    /// Speaking rate in words per minute.
    pub fn rate(&self) -> Result<u32> {
        let mut rate = 0;
        check(
            "TextToSpeechGetRate",
            self.native.get_rate(self.handle()?, &mut rate),
        )?;
        Ok(rate)
    }

    pub fn set_rate(&self, rate: u32) -> Result<()> {
        check(
            "TextToSpeechSetRate",
            self.native.set_rate(self.handle()?, rate),
        )
    }

    pub fn volume(&self) -> Result<i32> {
        let mut volume = 0;
        check(
            "TextToSpeechGetVolume",
            self.native
                .get_volume(self.handle()?, VOLUME_MAIN, &mut volume),
        )?;
        Ok(volume)
    }

    pub fn set_volume(&self, volume: i32) -> Result<()> {
        check(
            "TextToSpeechSetVolume",
            self.native.set_volume(self.handle()?, VOLUME_MAIN, volume),
        )
    }

    pub fn speaker_params(&self) -> Result<SpeakerParams> {
        let mut params = SpeakerParams::default();
        check(
            "TextToSpeechGetSpeakerParams",
            self.native.get_speaker_params(self.handle()?, &mut params),
        )?;
        Ok(params)
    }

    pub fn set_speaker_params(&self, params: &SpeakerParams) -> Result<()> {
        check(
            "TextToSpeechSetSpeakerParams",
            self.native.set_speaker_params(self.handle()?, params),
        )
    }

    /// Redirects synthesized audio into `sink` until the returned capture is
    /// finished or dropped.
    ///
    /// Only one capture may be open per engine; a second attempt fails with
    /// [`TtsError::ProtocolViolation`] and leaves the first untouched.
    pub fn capture<W>(&self, sink: W) -> Result<Capture<'_, W>>
    where
        W: Write + Send + 'static,
    {
        let sink = SharedSink::new(sink);
        self.open_capture(Box::new(sink.clone()))?;
        Ok(Capture {
            engine: self,
            sink,
            open: true,
        })
    }

    fn open_capture(&self, sink: Box<dyn Write + Send>) -> Result<()> {
        let handle = self.handle()?;

        if self
            .capturing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TtsError::ProtocolViolation(
                "a capture session is already active",
            ));
        }

        let opened = self.install_capture(handle, sink);
        if opened.is_err() {
            self.capturing.store(false, Ordering::Release);
        }
        opened
    }

    fn install_capture(&self, handle: NativeHandle, sink: Box<dyn Write + Send>) -> Result<()> {
        let buffer = CaptureBuffer::new(
            self.options.buffer_capacity,
            self.options.max_phoneme_changes,
            self.options.max_index_marks,
        )?;

        check(
            "TextToSpeechOpenInMemory",
            self.native.open_in_memory(handle, WAVE_FORMAT_1M16),
        )?;

        let mut session = CaptureSession::new(self.native.clone(), handle, buffer, sink);
        let loaned = session.loan()?;

        // The engine may post the buffer from inside AddBuffer, so the session
        // is published first and the slot stays unlocked during the call
        *self.router.capture() = Some(session);
        let status = unsafe { self.native.add_buffer(handle, loaned) };

        if let Err(e) = check("TextToSpeechAddBuffer", status) {
            // Rejected, so the engine never took it
            if let Some(mut session) = self.router.capture().take() {
                session.release();
            }
            if let Err(close) = check(
                "TextToSpeechCloseInMemory",
                self.native.close_in_memory(handle),
            ) {
                warn!("Failed to leave in-memory mode after a rejected buffer: {close}");
            }
            return Err(e);
        }
        trace!("Submitted capture buffer {loaned:p}");

        debug!(
            "Capture opened with a {} byte buffer",
            self.options.buffer_capacity
        );
        Ok(())
    }

    /// Reclaims the outstanding buffer, leaves in-memory mode and frees the
    /// buffer once the engine has acknowledged.
    ///
    /// Call after [`Engine::sync`], or trailing audio still being synthesized
    /// is cut off.
    fn close_capture(&self) -> Result<CaptureStats> {
        let handle = self.handle()?;

        // The final buffer may be posted from inside ReturnBuffer or
        // CloseInMemory, so the slot is only locked between native calls
        let loaned = match self.router.capture().as_ref() {
            Some(session) => session.buffer().state() == BufferState::Loaned,
            None => {
                return Err(TtsError::ProtocolViolation("no capture session is active"));
            }
        };
        let reclaimed = if loaned {
            self.return_outstanding(handle)
        } else {
            Ok(None)
        };

        let closed = check(
            "TextToSpeechCloseInMemory",
            self.native.close_in_memory(handle),
        );

        let session = self.router.capture().take();
        self.capturing.store(false, Ordering::Release);

        let Some(mut session) = session else {
            return Err(TtsError::ProtocolViolation("capture session vanished"));
        };

        if let Err(e) = closed {
            if session.buffer().state() == BufferState::Loaned {
                warn!("Engine did not leave in-memory mode, keeping capture buffer until shutdown");
                self.parked.plock().push(session);
            }
            return Err(e);
        }

        session.release();
        let stats = session.finish();
        reclaimed?;
        let stats = stats?;

        debug!(
            "Capture closed: {} bytes in {} buffers",
            stats.bytes, stats.notifications
        );
        Ok(stats)
    }

    /// Asks the engine for the partially filled buffer and drains it.
    fn return_outstanding(&self, handle: NativeHandle) -> Result<Option<Drained>> {
        let mut returned = ptr::null_mut();
        check("TextToSpeechReturnBuffer", unsafe {
            self.native.return_buffer(handle, &mut returned)
        })?;

        match self.router.capture().as_mut() {
            Some(session) => session.take_returned(returned),
            None => Err(TtsError::ProtocolViolation("capture session vanished")),
        }
    }

    /// Tears down a capture that was not finished normally.
    fn abort_capture(&self) {
        if let Err(e) = self.reset() {
            warn!("Failed to reset engine while aborting capture: {e}");
        }
        if let Err(e) = self.close_capture() {
            warn!("Failed to close capture: {e}");
        }
    }

    /// Speaks `text` into memory and returns the PCM bytes.
    pub fn speak_to_memory(&self, text: &str) -> Result<Vec<u8>> {
        self.speak_to_writer(Vec::new(), text)
    }

    /// Speaks `text` into `writer`, streaming each buffer as it fills.
    ///
    /// Use [`Engine::capture`] to get the writer back when closing fails.
    pub fn speak_to_writer<W>(&self, writer: W, text: &str) -> Result<W>
    where
        W: Write + Send + 'static,
    {
        let capture = self.capture(writer)?;
        capture.speak(text)?;
        capture.sync()?;
        let (writer, _) = capture.finish()?;
        Ok(writer)
    }

    /// Speaks `text` into a WAV file at `path`.
    pub fn speak_to_wav<P: AsRef<Path>>(&self, path: P, text: &str) -> Result<()> {
        let pcm = self.speak_to_memory(text)?;
        wav::write_wav_file(path, &pcm)
    }

    /// Shuts the native session down. Safe to call more than once.
    ///
    /// Every teardown step runs even if an earlier one failed; the first
    /// error is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle else {
            return Ok(());
        };
        let mut first_error = None;

        if self.capturing.load(Ordering::Acquire) {
            if let Err(e) = self.reset() {
                first_error.get_or_insert(e);
            }
            if let Err(e) = self.close_capture() {
                first_error.get_or_insert(e);
            }
        }

        let status = self.native.shutdown(handle);
        let shut_down = check("TextToSpeechShutdown", status);
        router::unregister(self.router_id);
        self.router.set_listener(None);
        self.handle = None;
        self.lifecycle = Lifecycle::ShutDown;

        let mut leftovers: Vec<CaptureSession> = self.parked.plock().drain(..).collect();
        leftovers.extend(self.router.capture().take());
        match &shut_down {
            Ok(()) => {
                // The engine is gone, so nothing references these buffers anymore
                for session in &mut leftovers {
                    session.release();
                }
            }
            Err(_) if !leftovers.is_empty() => {
                error!("Engine failed to shut down, leaking {} capture buffers", leftovers.len());
            }
            Err(_) => {}
        }
        drop(leftovers);

        if let Err(e) = shut_down {
            first_error.get_or_insert(e);
        }

        info!("Engine shut down");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Error while shutting down engine: {e}");
        }
    }
}

fn select_language(native: &dyn NativeEngine, code: &str) -> Result<()> {
    let lang = CString::new(code).map_err(|_| TtsError::LanguageNotFound(code.to_string()))?;
    let lang_id = native.start_lang(&lang);

    if lang_id & TTS_LANG_ERROR != 0 {
        return Err(match lang_id {
            TTS_NOT_SUPPORTED => TtsError::LanguageUnsupported,
            _ => TtsError::LanguageNotFound(code.to_string()),
        });
    }

    if !native.select_lang(None, lang_id) {
        return Err(TtsError::LanguageLoadFailed(code.to_string()));
    }

    Ok(())
}

/// The caller's sink, shared with the capture session on the callback thread.
struct SharedSink<W>(Arc<Mutex<W>>);

impl<W> Clone for SharedSink<W> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<W> SharedSink<W> {
    fn new(sink: W) -> Self {
        Self(Arc::new(Mutex::new(sink)))
    }

    fn into_inner(self) -> Result<W> {
        match Arc::try_unwrap(self.0) {
            Ok(sink) => Ok(sink.into_inner().unwrap_or_else(|e| e.into_inner())),
            Err(_) => Err(TtsError::ProtocolViolation(
                "capture sink is still referenced",
            )),
        }
    }
}

impl<W: Write> Write for SharedSink<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.plock().write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.0.plock().write_all(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.plock().flush()
    }
}

/// An open capture session.
///
/// Audio spoken while this is alive ends up in the sink, in synthesis order.
/// [`Capture::finish`] syncs nothing by itself: call [`Capture::sync`] after
/// the last [`Capture::speak`]. Dropping an unfinished capture resets the
/// engine and closes the session, discarding pending speech.
///
/// If an error occurs mid-session, bytes already written to the sink stay
/// there. [`Capture::finish`] returns the sink with the error, so the
/// truncated prefix can still be read.
pub struct Capture<'e, W: Write + Send + 'static> {
    engine: &'e Engine,
    sink: SharedSink<W>,
    open: bool,
}

impl<W: Write + Send + 'static> Capture<'_, W> {
    pub fn speak(&self, text: &str) -> Result<()> {
        self.engine.speak(text)
    }

    pub fn sync(&self) -> Result<()> {
        self.engine.sync()
    }

    /// Counters so far.
    pub fn stats(&self) -> CaptureStats {
        self.engine
            .router
            .capture()
            .as_ref()
            .map(|session| session.stats())
            .unwrap_or_default()
    }

    /// Closes the session and hands back the sink.
    ///
    /// On failure the sink comes back inside the [`CaptureError`], unless the
    /// engine did not leave in-memory mode and may still write to it.
    pub fn finish(mut self) -> std::result::Result<(W, CaptureStats), CaptureError<W>> {
        self.open = false;
        let sink = self.sink.clone();
        let engine = self.engine;
        drop(self);

        match engine.close_capture() {
            Ok(stats) => match sink.into_inner() {
                Ok(sink) => Ok((sink, stats)),
                Err(error) => Err(CaptureError { error, sink: None }),
            },
            Err(error) => Err(CaptureError {
                error,
                sink: sink.into_inner().ok(),
            }),
        }
    }
}

impl<W: Write + Send + 'static> Drop for Capture<'_, W> {
    fn drop(&mut self) {
        if self.open {
            self.engine.abort_capture();
        }
    }
}
