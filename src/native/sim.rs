//! In-process stand-in for the DECtalk runtime.
//!
//! Behaves like the real engine where the adapter can observe it: each
//! session gets its own worker thread that synthesizes queued text off the
//! caller's stack and reports back through the registered `extern "C"`
//! callback. In in-memory mode the worker fills the submitted buffer, posts
//! the buffer message when it is full and then blocks until a buffer is
//! submitted again. Audio is a placeholder tone (or a sample counter, for
//! checking continuity); this is not a synthesizer.

use super::{
    MessageKinds, NativeCallback, NativeEngine, NativeHandle, MMSYSERR_ERROR,
    MMSYSERR_INVALHANDLE, MMSYSERR_INVALPARAM, MMSYSERR_NOERROR,
};
use crate::{
    capture::{TtsBufferT, TtsPhonemeT},
    constants::{SAMPLE_RATE, TTS_NOT_AVAILABLE, TTS_NOT_SUPPORTED, WAVE_FORMAT_1M16},
    phoneme::PhonemeMark,
    router::PoisonlessLock,
    voice::{Sex, SpeakerParams, Voice},
};
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::{HashMap, VecDeque};
use std::ffi::{c_void, CStr};
use std::os::raw::{c_int, c_uint};
use std::ptr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

pub const MSG_INDEX: u32 = 0xC1A0;
pub const MSG_ERROR: u32 = 0xC1A1;
pub const MSG_BUFFER: u32 = 0xC1A2;
pub const MSG_PHONEME: u32 = 0xC1A3;

const MIN_RATE: u32 = 75;
const MAX_RATE: u32 = 600;

/// What the worker writes for each phoneme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Waveform {
    /// A short tone per phoneme, silence for pauses
    #[default]
    Tone,
    /// Sample values counting up by one per sample across the whole session
    Ramp,
}

#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Language codes `start_lang` accepts
    pub languages: Vec<String>,
    /// When false, `start_lang` reports `TTS_NOT_SUPPORTED`
    pub multi_language: bool,
    /// Length of every phoneme in milliseconds
    pub phoneme_duration: u16,
    pub waveform: Waveform,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            languages: ["US", "UK", "SP", "LA", "GR", "FR"]
                .iter()
                .map(|l| l.to_string())
                .collect(),
            multi_language: true,
            phoneme_duration: 60,
            waveform: Waveform::default(),
        }
    }
}

/// Counters over the lifetime of a `SimulatedEngine`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub start_lang_calls: usize,
    pub startups: usize,
    pub shutdowns: usize,
    pub live_sessions: usize,
    pub phonemes_posted: usize,
    pub buffers_added: usize,
    pub buffers_posted: usize,
    pub buffers_returned: usize,
    pub bytes_written: u64,
}

enum Job {
    Speak(String),
    Post {
        l_param1: c_int,
        l_param2: c_int,
        message: u32,
    },
}

struct BufferPtr(*mut TtsBufferT);

// Only dereferenced by the worker while the buffer is loaned to us.
unsafe impl Send for BufferPtr {}

struct Session {
    callback: NativeCallback,
    parameter: c_uint,
    queue: VecDeque<Job>,
    busy: bool,
    paused: bool,
    generation: u64,
    in_memory: bool,
    buffer: Option<BufferPtr>,
    bytes_total: u64,
    sample_clock: u16,
    speaker: u32,
    rate: u32,
    volume: c_int,
    params: SpeakerParams,
    worker: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct State {
    sessions: HashMap<usize, Session>,
    next_handle: usize,
    faults: HashMap<&'static str, u32>,
    selected_language: Option<String>,
    stats: SimStats,
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
    config: SimConfig,
}

impl Shared {
    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        match self.changed.wait(guard) {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }
}

#[derive(Clone)]
pub struct SimulatedEngine {
    shared: Arc<Shared>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimulatedEngine {
    pub fn new(config: SimConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    next_handle: 1,
                    ..State::default()
                }),
                changed: Condvar::new(),
                config,
            }),
        }
    }

    /// Makes the next call to `call` (by `NativeEngine` method name) return `status`.
    pub fn fail_next(&self, call: &'static str, status: u32) {
        self.shared.state.plock().faults.insert(call, status);
    }

    /// Queues a raw message to every live session, as if the engine posted it.
    pub fn post_message(&self, l_param1: c_int, l_param2: c_int, message: u32) {
        let mut state = self.shared.state.plock();
        for session in state.sessions.values_mut() {
            session.queue.push_back(Job::Post {
                l_param1,
                l_param2,
                message,
            });
        }
        self.shared.changed.notify_all();
    }

    pub fn stats(&self) -> SimStats {
        let state = self.shared.state.plock();
        SimStats {
            live_sessions: state.sessions.len(),
            ..state.stats
        }
    }

    pub fn selected_language(&self) -> Option<String> {
        self.shared.state.plock().selected_language.clone()
    }

    fn fault(&self, call: &'static str) -> Option<u32> {
        self.shared.state.plock().faults.remove(call)
    }

    /// Runs `f` on the session behind `handle`, honouring injected faults.
    fn with_session(
        &self,
        call: &'static str,
        handle: NativeHandle,
        f: impl FnOnce(&mut Session) -> u32,
    ) -> u32 {
        let mut state = self.shared.state.plock();
        if let Some(status) = state.faults.remove(call) {
            return status;
        }
        let status = match state.sessions.get_mut(&id(handle)) {
            Some(session) => f(session),
            None => MMSYSERR_INVALHANDLE,
        };
        self.shared.changed.notify_all();
        status
    }
}

fn id(handle: NativeHandle) -> usize {
    handle.as_raw() as usize
}

impl NativeEngine for SimulatedEngine {
    fn message_kinds(&self) -> MessageKinds {
        MessageKinds {
            phoneme: MSG_PHONEME,
            buffer: MSG_BUFFER,
            error: MSG_ERROR,
            index: MSG_INDEX,
        }
    }

    fn start_lang(&self, lang: &CStr) -> u32 {
        let mut state = self.shared.state.plock();
        state.stats.start_lang_calls += 1;

        if let Some(status) = state.faults.remove("start_lang") {
            return status;
        }
        if !self.shared.config.multi_language {
            return TTS_NOT_SUPPORTED;
        }

        let lang = lang.to_string_lossy();
        match self.shared.config.languages.iter().position(|l| *l == lang) {
            Some(index) => index as u32 + 1,
            None => TTS_NOT_AVAILABLE,
        }
    }

    fn select_lang(&self, _handle: Option<NativeHandle>, lang_id: u32) -> bool {
        if self.fault("select_lang").is_some() {
            return false;
        }

        let languages = &self.shared.config.languages;
        match languages.get((lang_id as usize).wrapping_sub(1)) {
            Some(lang) => {
                self.shared.state.plock().selected_language = Some(lang.clone());
                true
            }
            None => false,
        }
    }

    fn startup(
        &self,
        _device_id: u32,
        _options: u32,
        callback: NativeCallback,
        callback_parameter: c_int,
    ) -> Result<NativeHandle, u32> {
        let mut state = self.shared.state.plock();
        if let Some(status) = state.faults.remove("startup") {
            return Err(status);
        }

        let handle_id = state.next_handle;
        state.next_handle += 1;
        state.stats.startups += 1;

        let shared = self.shared.clone();
        let worker = thread::Builder::new()
            .name(format!("sim-tts-{handle_id}"))
            .spawn(move || run_worker(shared, handle_id))
            .map_err(|e| {
                error!("Failed to spawn engine worker: {e}");
                MMSYSERR_ERROR
            })?;

        state.sessions.insert(
            handle_id,
            Session {
                callback,
                parameter: callback_parameter as c_uint,
                queue: VecDeque::new(),
                busy: false,
                paused: false,
                generation: 0,
                in_memory: false,
                buffer: None,
                bytes_total: 0,
                sample_clock: 0,
                speaker: Voice::Paul as u32,
                rate: 180,
                volume: 100,
                params: paul(),
                worker: Some(worker),
            },
        );
        self.shared.changed.notify_all();

        Ok(NativeHandle::from_raw(handle_id as *mut c_void))
    }

    fn shutdown(&self, handle: NativeHandle) -> u32 {
        let worker = {
            let mut state = self.shared.state.plock();
            if let Some(status) = state.faults.remove("shutdown") {
                return status;
            }
            let Some(mut session) = state.sessions.remove(&id(handle)) else {
                return MMSYSERR_INVALHANDLE;
            };
            state.stats.shutdowns += 1;
            self.shared.changed.notify_all();
            session.worker.take()
        };

        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                error!("Engine worker panicked");
            }
        }

        MMSYSERR_NOERROR
    }

    fn set_speaker(&self, handle: NativeHandle, speaker: u32) -> u32 {
        self.with_session("set_speaker", handle, |s| match Voice::from_raw(speaker) {
            Some(_) => {
                s.speaker = speaker;
                MMSYSERR_NOERROR
            }
            None => MMSYSERR_INVALPARAM,
        })
    }

    fn get_speaker(&self, handle: NativeHandle, speaker: &mut u32) -> u32 {
        self.with_session("get_speaker", handle, |s| {
            *speaker = s.speaker;
            MMSYSERR_NOERROR
        })
    }

    fn set_rate(&self, handle: NativeHandle, rate: u32) -> u32 {
        self.with_session("set_rate", handle, |s| {
            if !(MIN_RATE..=MAX_RATE).contains(&rate) {
                return MMSYSERR_INVALPARAM;
            }
            s.rate = rate;
            MMSYSERR_NOERROR
        })
    }

    fn get_rate(&self, handle: NativeHandle, rate: &mut u32) -> u32 {
        self.with_session("get_rate", handle, |s| {
            *rate = s.rate;
            MMSYSERR_NOERROR
        })
    }

    fn set_volume(&self, handle: NativeHandle, _kind: c_int, volume: c_int) -> u32 {
        self.with_session("set_volume", handle, |s| {
            if !(0..=100).contains(&volume) {
                return MMSYSERR_INVALPARAM;
            }
            s.volume = volume;
            MMSYSERR_NOERROR
        })
    }

    fn get_volume(&self, handle: NativeHandle, _kind: c_int, volume: &mut c_int) -> u32 {
        self.with_session("get_volume", handle, |s| {
            *volume = s.volume;
            MMSYSERR_NOERROR
        })
    }

    fn get_speaker_params(&self, handle: NativeHandle, params: &mut SpeakerParams) -> u32 {
        self.with_session("get_speaker_params", handle, |s| {
            *params = s.params;
            MMSYSERR_NOERROR
        })
    }

    fn set_speaker_params(&self, handle: NativeHandle, params: &SpeakerParams) -> u32 {
        self.with_session("set_speaker_params", handle, |s| {
            s.params = *params;
            MMSYSERR_NOERROR
        })
    }

    fn speak(&self, handle: NativeHandle, text: &CStr, _flags: u32) -> u32 {
        let text = text.to_string_lossy().into_owned();
        self.with_session("speak", handle, |s| {
            s.queue.push_back(Job::Speak(text));
            MMSYSERR_NOERROR
        })
    }

    fn pause(&self, handle: NativeHandle) -> u32 {
        self.with_session("pause", handle, |s| {
            s.paused = true;
            MMSYSERR_NOERROR
        })
    }

    fn resume(&self, handle: NativeHandle) -> u32 {
        self.with_session("resume", handle, |s| {
            s.paused = false;
            MMSYSERR_NOERROR
        })
    }

    fn reset(&self, handle: NativeHandle, _reset_mode: bool) -> u32 {
        self.with_session("reset", handle, |s| {
            s.queue.retain(|job| matches!(job, Job::Post { .. }));
            s.generation += 1;
            s.paused = false;
            MMSYSERR_NOERROR
        })
    }

    fn sync(&self, handle: NativeHandle) -> u32 {
        let mut state = self.shared.state.plock();
        if let Some(status) = state.faults.remove("sync") {
            return status;
        }

        loop {
            let idle = match state.sessions.get(&id(handle)) {
                Some(s) => s.queue.is_empty() && !s.busy,
                None => return MMSYSERR_INVALHANDLE,
            };
            if idle {
                return MMSYSERR_NOERROR;
            }
            state = self.shared.wait(state);
        }
    }

    fn open_in_memory(&self, handle: NativeHandle, format: u32) -> u32 {
        self.with_session("open_in_memory", handle, |s| {
            if format != WAVE_FORMAT_1M16 {
                return MMSYSERR_INVALPARAM;
            }
            if s.in_memory {
                return MMSYSERR_ERROR;
            }
            s.in_memory = true;
            MMSYSERR_NOERROR
        })
    }

    fn close_in_memory(&self, handle: NativeHandle) -> u32 {
        let mut final_post = None;
        let status = self.with_session("close_in_memory", handle, |s| {
            if !s.in_memory {
                return MMSYSERR_ERROR;
            }
            s.in_memory = false;
            if s.buffer.take().is_some() {
                // The stream is over; the last partial buffer goes back
                final_post = Some((s.callback, s.parameter));
            }
            MMSYSERR_NOERROR
        });

        if let Some((callback, parameter)) = final_post {
            self.shared.state.plock().stats.buffers_posted += 1;
            callback(0, 0, parameter, MSG_BUFFER);
        }
        status
    }

    unsafe fn add_buffer(&self, handle: NativeHandle, buffer: *mut TtsBufferT) -> u32 {
        let mut state = self.shared.state.plock();
        if let Some(status) = state.faults.remove("add_buffer") {
            return status;
        }
        let state = &mut *state;

        let Some(session) = state.sessions.get_mut(&id(handle)) else {
            return MMSYSERR_INVALHANDLE;
        };
        if buffer.is_null() || !session.in_memory {
            return MMSYSERR_INVALPARAM;
        }
        if session.buffer.is_some() {
            // This engine keeps a single buffer at a time
            return MMSYSERR_ERROR;
        }

        session.buffer = Some(BufferPtr(buffer));
        state.stats.buffers_added += 1;
        self.shared.changed.notify_all();
        MMSYSERR_NOERROR
    }

    unsafe fn return_buffer(&self, handle: NativeHandle, buffer: &mut *mut TtsBufferT) -> u32 {
        let mut state = self.shared.state.plock();
        if let Some(status) = state.faults.remove("return_buffer") {
            return status;
        }
        let state = &mut *state;

        let Some(session) = state.sessions.get_mut(&id(handle)) else {
            return MMSYSERR_INVALHANDLE;
        };

        *buffer = match session.buffer.take() {
            Some(BufferPtr(ptr)) => {
                state.stats.buffers_returned += 1;
                ptr
            }
            None => ptr::null_mut(),
        };
        MMSYSERR_NOERROR
    }
}

fn run_worker(shared: Arc<Shared>, handle_id: usize) {
    debug!("Engine worker {handle_id} started");

    loop {
        let (job, callback, parameter, generation) = {
            let mut state = shared.state.plock();
            loop {
                let Some(session) = state.sessions.get_mut(&handle_id) else {
                    debug!("Engine worker {handle_id} exiting");
                    return;
                };
                if !session.paused {
                    if let Some(job) = session.queue.pop_front() {
                        session.busy = true;
                        break (job, session.callback, session.parameter, session.generation);
                    }
                }
                state = shared.wait(state);
            }
        };

        match job {
            Job::Speak(text) => {
                Synth {
                    shared: &shared,
                    handle_id,
                    callback,
                    parameter,
                    generation,
                }
                .speak(&text);
            }
            Job::Post {
                l_param1,
                l_param2,
                message,
            } => callback(l_param1, l_param2, parameter, message),
        }

        let mut state = shared.state.plock();
        if let Some(session) = state.sessions.get_mut(&handle_id) {
            session.busy = false;
        }
        shared.changed.notify_all();
    }
}

/// One utterance being rendered by a worker.
struct Synth<'a> {
    shared: &'a Shared,
    handle_id: usize,
    callback: NativeCallback,
    parameter: c_uint,
    generation: u64,
}

impl Synth<'_> {
    fn speak(&self, text: &str) {
        let phonemes = phonemes(text);
        let duration = self.shared.config.phoneme_duration;

        for (i, &phoneme) in phonemes.iter().enumerate() {
            if !self.wait_ready() {
                trace!("Utterance on session {} cancelled", self.handle_id);
                return;
            }

            let mark = PhonemeMark {
                phoneme,
                next_phoneme: phonemes.get(i + 1).copied().unwrap_or(b'_'),
                duration,
            };
            self.shared.state.plock().stats.phonemes_posted += 1;
            (self.callback)(0, mark.encode() as i32, self.parameter, MSG_PHONEME);

            let pcm = self.render(&mark);
            if !self.write_pcm(&mark, &pcm) {
                return;
            }
        }
    }

    /// Blocks while paused. False once the utterance was reset away or the
    /// session shut down.
    fn wait_ready(&self) -> bool {
        let mut state = self.shared.state.plock();
        loop {
            let paused = match state.sessions.get(&self.handle_id) {
                Some(s) if s.generation == self.generation => s.paused,
                _ => return false,
            };
            if !paused {
                return true;
            }
            state = self.shared.wait(state);
        }
    }

    fn render(&self, mark: &PhonemeMark) -> Vec<u8> {
        let samples = SAMPLE_RATE as usize * mark.duration as usize / 1000;
        let mut pcm = Vec::with_capacity(samples * 2);

        match self.shared.config.waveform {
            Waveform::Tone => {
                let frequency = 90.0 + mark.phoneme as f64 * 3.0;
                for n in 0..samples {
                    let sample = if mark.phoneme == b'_' {
                        0
                    } else {
                        tone(n as f64 * frequency / SAMPLE_RATE as f64)
                    };
                    // Writing to a Vec cannot fail
                    let _ = pcm.write_i16::<LittleEndian>(sample);
                }
            }
            Waveform::Ramp => {
                let mut state = self.shared.state.plock();
                if let Some(session) = state.sessions.get_mut(&self.handle_id) {
                    for _ in 0..samples {
                        let _ = pcm.write_u16::<LittleEndian>(session.sample_clock);
                        session.sample_clock = session.sample_clock.wrapping_add(1);
                    }
                }
            }
        }

        pcm
    }

    /// Copies `pcm` into loaned buffers, posting each one as it fills.
    ///
    /// Blocks while in in-memory mode without a buffer. Returns false when
    /// the utterance was cancelled.
    fn write_pcm(&self, mark: &PhonemeMark, mut pcm: &[u8]) -> bool {
        let mut marked = false;

        while !pcm.is_empty() {
            let filled = {
                let mut guard = self.shared.state.plock();
                loop {
                    let has_buffer = match guard.sessions.get(&self.handle_id) {
                        Some(s) if s.generation != self.generation => return false,
                        None => return false,
                        // Played on the audio device
                        Some(s) if !s.in_memory => return true,
                        Some(s) => s.buffer.is_some(),
                    };
                    if has_buffer {
                        break;
                    }
                    guard = self.shared.wait(guard);
                }

                let state = &mut *guard;
                let Some(session) = state.sessions.get_mut(&self.handle_id) else {
                    return false;
                };
                let Some(BufferPtr(buffer)) = session.buffer else {
                    return false;
                };

                let header = unsafe { &mut *buffer };
                let offset = header.buffer_length as usize;
                let room = (header.max_buffer_length as usize).saturating_sub(offset);
                let n = room.min(pcm.len());

                if !marked
                    && !header.phoneme_array.is_null()
                    && header.phoneme_change_count < header.max_phoneme_changes
                {
                    let slot = header.phoneme_change_count as usize;
                    unsafe {
                        *header.phoneme_array.add(slot) = TtsPhonemeT::new(
                            mark.phoneme as u32,
                            (session.bytes_total / 2) as u32,
                            mark.duration as u32,
                        );
                    }
                    header.phoneme_change_count += 1;
                    marked = true;
                }

                unsafe {
                    ptr::copy_nonoverlapping(pcm.as_ptr(), (header.data as *mut u8).add(offset), n);
                }
                header.buffer_length += n as u32;
                session.bytes_total += n as u64;
                state.stats.bytes_written += n as u64;
                pcm = &pcm[n..];

                if header.buffer_length >= header.max_buffer_length {
                    session.buffer = None;
                    state.stats.buffers_posted += 1;
                    true
                } else {
                    false
                }
            };

            if filled {
                (self.callback)(0, 0, self.parameter, MSG_BUFFER);
            }
        }

        true
    }
}

/// Letters become phonemes, runs of anything else a single pause.
/// Inline `[...]` commands are skipped.
fn phonemes(text: &str) -> Vec<u8> {
    let mut phonemes = Vec::new();
    let mut in_command = false;

    for b in text.bytes() {
        match b {
            b'[' => in_command = true,
            b']' => in_command = false,
            _ if in_command => {}
            b if b.is_ascii_alphanumeric() => phonemes.push(b.to_ascii_lowercase()),
            _ => {
                if phonemes.last().is_some_and(|&p| p != b'_') {
                    phonemes.push(b'_');
                }
            }
        }
    }

    phonemes
}

const AMPLITUDE: f64 = 0.5;

fn tone(phase: f64) -> i16 {
    let sample = (phase * std::f64::consts::PI * 2.0).sin();
    (sample * i16::MAX as f64 * AMPLITUDE) as i16
}

/// The engine's default speaker definition.
fn paul() -> SpeakerParams {
    SpeakerParams {
        sex: Sex::Male,
        smoothness: 3,
        assertiveness: 100,
        average_pitch: 122,
        breathiness: 0,
        richness: 70,
        num_fixed_samp_og: 0,
        laryngealization: 0,
        head_size: 100,
        formant4_res_freq: 3300,
        formant4_bandwidth: 260,
        formant5_res_freq: 3650,
        formant5_bandwidth: 330,
        parallel4_freq: 3300,
        parallel5_freq: 3650,
        gain_frication: 70,
        gain_aspiration: 70,
        gain_voicing: 65,
        gain_nasalization: 74,
        gain_cfr1: 68,
        gain_cfr2: 60,
        gain_cfr3: 48,
        gain_cfr4: 64,
        loudness: 86,
        spectral_tilt: 0,
        baseline_fall: 18,
        lax_breathiness: 0,
        quickness: 40,
        hat_rise: 18,
        stress_rise: 32,
        glottal_speed: 0,
        output_gain_multiplier: 0,
    }
}
