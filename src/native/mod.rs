//! The native engine boundary.
//!
//! `NativeEngine` mirrors the DECtalk `TextToSpeech*` C API one call per
//! method, with status codes returned as-is. Everything above this trait
//! works against it, so the real library (`ffi`, behind the `native`
//! feature) and the in-process simulation (`sim`) are interchangeable.

#[cfg(all(feature = "native", windows))]
pub mod ffi;
pub mod sim;

use crate::capture::TtsBufferT;
use crate::voice::SpeakerParams;
use std::ffi::{c_void, CStr};
use std::os::raw::{c_int, c_uint};

/// `MMSYSERR_NOERROR`
pub const MMSYSERR_NOERROR: u32 = 0;
/// `MMSYSERR_ERROR`
pub const MMSYSERR_ERROR: u32 = 1;
/// `MMSYSERR_INVALHANDLE`
pub const MMSYSERR_INVALHANDLE: u32 = 5;
/// `MMSYSERR_INVALPARAM`
pub const MMSYSERR_INVALPARAM: u32 = 11;

/// `TTS_FORCE`: queue the text and start speaking if idle.
pub const TTS_FORCE: u32 = 1;

/// The routine the engine calls for every posted message.
///
/// Arguments are `(lParam1, lParam2, dwCallbackParameter, uiMsg)`.
pub type NativeCallback = extern "C" fn(c_int, c_int, c_uint, c_uint);

/// Opaque `LPTTS_HANDLE_T` returned by startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NativeHandle(*mut c_void);

// The engine serializes access to its handle internally; the pointer itself
// is only ever passed back to the engine.
unsafe impl Send for NativeHandle {}
unsafe impl Sync for NativeHandle {}

impl NativeHandle {
    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub fn as_raw(&self) -> *mut c_void {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// Message identifiers the engine tags its callback invocations with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageKinds {
    pub phoneme: u32,
    pub buffer: u32,
    pub error: u32,
    pub index: u32,
}

/// One-to-one binding of the engine's C API.
///
/// Every method returning `u32` returns the native status code unchanged.
pub trait NativeEngine: Send + Sync {
    /// Resolves the registered message identifiers used by the callback.
    fn message_kinds(&self) -> MessageKinds;

    /// `TextToSpeechStartLang`: returns a language id or a `TTS_LANG_ERROR` status.
    fn start_lang(&self, lang: &CStr) -> u32;

    /// `TextToSpeechSelectLang`
    fn select_lang(&self, handle: Option<NativeHandle>, lang_id: u32) -> bool;

    /// `TextToSpeechStartupEx`: registers `callback` and returns the new handle.
    fn startup(
        &self,
        device_id: u32,
        options: u32,
        callback: NativeCallback,
        callback_parameter: c_int,
    ) -> Result<NativeHandle, u32>;

    fn shutdown(&self, handle: NativeHandle) -> u32;

    fn set_speaker(&self, handle: NativeHandle, speaker: u32) -> u32;
    fn get_speaker(&self, handle: NativeHandle, speaker: &mut u32) -> u32;
    fn set_rate(&self, handle: NativeHandle, rate: u32) -> u32;
    fn get_rate(&self, handle: NativeHandle, rate: &mut u32) -> u32;
    fn set_volume(&self, handle: NativeHandle, kind: c_int, volume: c_int) -> u32;
    fn get_volume(&self, handle: NativeHandle, kind: c_int, volume: &mut c_int) -> u32;

    /// Copies the current speaker definition out of the engine.
    fn get_speaker_params(&self, handle: NativeHandle, params: &mut SpeakerParams) -> u32;
    /// Replaces the current speaker definition.
    fn set_speaker_params(&self, handle: NativeHandle, params: &SpeakerParams) -> u32;

    /// `TextToSpeechSpeakA`
    fn speak(&self, handle: NativeHandle, text: &CStr, flags: u32) -> u32;
    fn pause(&self, handle: NativeHandle) -> u32;
    fn resume(&self, handle: NativeHandle) -> u32;
    fn reset(&self, handle: NativeHandle, reset_mode: bool) -> u32;
    /// Blocks until all queued text has been spoken.
    fn sync(&self, handle: NativeHandle) -> u32;

    fn open_in_memory(&self, handle: NativeHandle, format: u32) -> u32;
    fn close_in_memory(&self, handle: NativeHandle) -> u32;

    /// `TextToSpeechAddBuffer`
    ///
    /// # Safety
    ///
    /// `buffer` and the memory it points to must stay valid and unmoved
    /// until the engine hands it back through the buffer message,
    /// `return_buffer` or `close_in_memory`.
    unsafe fn add_buffer(&self, handle: NativeHandle, buffer: *mut TtsBufferT) -> u32;

    /// `TextToSpeechReturnBuffer`: reclaims the buffer currently being filled.
    ///
    /// Writes a null pointer when the engine holds no buffer.
    ///
    /// # Safety
    ///
    /// The returned pointer is one previously passed to `add_buffer`.
    unsafe fn return_buffer(&self, handle: NativeHandle, buffer: &mut *mut TtsBufferT) -> u32;
}
