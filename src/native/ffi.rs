//! Bindings to the FonixTalk / DECtalk runtime (`FonixTalk.dll`).

#![allow(non_snake_case)]

use super::{MessageKinds, NativeCallback, NativeEngine, NativeHandle};
use crate::{
    capture::TtsBufferT,
    constants::{MSG_NAME_BUFFER, MSG_NAME_ERROR, MSG_NAME_INDEX, MSG_NAME_PHONEME},
    voice::SpeakerParams,
};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int, c_uint};
use std::ptr;

type TtsHandle = *mut c_void;

#[link(name = "FonixTalk")]
extern "system" {
    fn TextToSpeechStartLang(lang: *const c_char) -> c_uint;
    fn TextToSpeechSelectLang(handle: TtsHandle, lang: c_uint) -> c_int;
    fn TextToSpeechStartupEx(
        handle: *mut TtsHandle,
        device_number: c_uint,
        device_options: u32,
        callback: NativeCallback,
        callback_parameter: c_int,
    ) -> c_uint;
    fn TextToSpeechShutdown(handle: TtsHandle) -> c_uint;
    fn TextToSpeechSetSpeaker(handle: TtsHandle, speaker: c_uint) -> c_uint;
    fn TextToSpeechGetSpeaker(handle: TtsHandle, speaker: *mut c_uint) -> c_uint;
    fn TextToSpeechSetRate(handle: TtsHandle, rate: c_uint) -> c_uint;
    fn TextToSpeechGetRate(handle: TtsHandle, rate: *mut c_uint) -> c_uint;
    fn TextToSpeechSetVolume(handle: TtsHandle, kind: c_int, volume: c_int) -> c_uint;
    fn TextToSpeechGetVolume(handle: TtsHandle, kind: c_int, volume: *mut c_int) -> c_uint;
    fn TextToSpeechSetSpeakerParams(handle: TtsHandle, params: *mut SpeakerParams) -> c_uint;
    fn TextToSpeechGetSpeakerParams(
        handle: TtsHandle,
        index: c_uint,
        current: *mut *mut SpeakerParams,
        low_limit: *mut *mut SpeakerParams,
        high_limit: *mut *mut SpeakerParams,
        default: *mut *mut SpeakerParams,
    ) -> c_uint;
    fn TextToSpeechSpeakA(handle: TtsHandle, text: *const c_char, flags: c_uint) -> c_uint;
    fn TextToSpeechPause(handle: TtsHandle) -> c_uint;
    fn TextToSpeechResume(handle: TtsHandle) -> c_uint;
    fn TextToSpeechReset(handle: TtsHandle, reset: c_int) -> c_uint;
    fn TextToSpeechSync(handle: TtsHandle) -> c_uint;
    fn TextToSpeechOpenInMemory(handle: TtsHandle, format: c_uint) -> c_uint;
    fn TextToSpeechCloseInMemory(handle: TtsHandle) -> c_uint;
    fn TextToSpeechAddBuffer(handle: TtsHandle, buffer: *mut TtsBufferT) -> c_uint;
    fn TextToSpeechReturnBuffer(handle: TtsHandle, buffer: *mut *mut TtsBufferT) -> c_uint;
}

#[link(name = "user32")]
extern "system" {
    fn RegisterWindowMessageA(name: *const c_char) -> c_uint;
}

fn register_message(name: &str) -> u32 {
    // Names are compile-time constants without NUL bytes
    match CString::new(name) {
        Ok(name) => unsafe { RegisterWindowMessageA(name.as_ptr()) },
        Err(_) => 0,
    }
}

/// The DECtalk runtime loaded from `FonixTalk.dll`.
pub struct FonixTalk {
    kinds: MessageKinds,
}

impl FonixTalk {
    pub fn new() -> Self {
        let kinds = MessageKinds {
            phoneme: register_message(MSG_NAME_PHONEME),
            buffer: register_message(MSG_NAME_BUFFER),
            error: register_message(MSG_NAME_ERROR),
            index: register_message(MSG_NAME_INDEX),
        };
        debug!("Registered engine message kinds: {kinds:?}");
        Self { kinds }
    }
}

impl Default for FonixTalk {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for FonixTalk {
    fn message_kinds(&self) -> MessageKinds {
        self.kinds
    }

    fn start_lang(&self, lang: &CStr) -> u32 {
        unsafe { TextToSpeechStartLang(lang.as_ptr()) }
    }

    fn select_lang(&self, handle: Option<NativeHandle>, lang_id: u32) -> bool {
        let handle = handle.map_or(ptr::null_mut(), |h| h.as_raw());
        unsafe { TextToSpeechSelectLang(handle, lang_id) != 0 }
    }

    fn startup(
        &self,
        device_id: u32,
        options: u32,
        callback: NativeCallback,
        callback_parameter: c_int,
    ) -> Result<NativeHandle, u32> {
        let mut handle = ptr::null_mut();
        let status = unsafe {
            TextToSpeechStartupEx(&mut handle, device_id, options, callback, callback_parameter)
        };
        match status {
            0 if !handle.is_null() => Ok(NativeHandle::from_raw(handle)),
            0 => Err(super::MMSYSERR_ERROR),
            status => Err(status),
        }
    }

    fn shutdown(&self, handle: NativeHandle) -> u32 {
        unsafe { TextToSpeechShutdown(handle.as_raw()) }
    }

    fn set_speaker(&self, handle: NativeHandle, speaker: u32) -> u32 {
        unsafe { TextToSpeechSetSpeaker(handle.as_raw(), speaker) }
    }

    fn get_speaker(&self, handle: NativeHandle, speaker: &mut u32) -> u32 {
        unsafe { TextToSpeechGetSpeaker(handle.as_raw(), speaker) }
    }

    fn set_rate(&self, handle: NativeHandle, rate: u32) -> u32 {
        unsafe { TextToSpeechSetRate(handle.as_raw(), rate) }
    }

    fn get_rate(&self, handle: NativeHandle, rate: &mut u32) -> u32 {
        unsafe { TextToSpeechGetRate(handle.as_raw(), rate) }
    }

    fn set_volume(&self, handle: NativeHandle, kind: c_int, volume: c_int) -> u32 {
        unsafe { TextToSpeechSetVolume(handle.as_raw(), kind, volume) }
    }

    fn get_volume(&self, handle: NativeHandle, kind: c_int, volume: &mut c_int) -> u32 {
        unsafe { TextToSpeechGetVolume(handle.as_raw(), kind, volume) }
    }

    fn get_speaker_params(&self, handle: NativeHandle, params: &mut SpeakerParams) -> u32 {
        let current = match current_params(handle) {
            Ok(current) => current,
            Err(status) => return status,
        };
        *params = unsafe { ptr::read(current) };
        0
    }

    fn set_speaker_params(&self, handle: NativeHandle, params: &SpeakerParams) -> u32 {
        // The engine only accepts its own definition block, so write into it
        let current = match current_params(handle) {
            Ok(current) => current,
            Err(status) => return status,
        };
        unsafe {
            ptr::write(current, *params);
            TextToSpeechSetSpeakerParams(handle.as_raw(), current)
        }
    }

    fn speak(&self, handle: NativeHandle, text: &CStr, flags: u32) -> u32 {
        unsafe { TextToSpeechSpeakA(handle.as_raw(), text.as_ptr(), flags) }
    }

    fn pause(&self, handle: NativeHandle) -> u32 {
        unsafe { TextToSpeechPause(handle.as_raw()) }
    }

    fn resume(&self, handle: NativeHandle) -> u32 {
        unsafe { TextToSpeechResume(handle.as_raw()) }
    }

    fn reset(&self, handle: NativeHandle, reset_mode: bool) -> u32 {
        unsafe { TextToSpeechReset(handle.as_raw(), reset_mode as c_int) }
    }

    fn sync(&self, handle: NativeHandle) -> u32 {
        unsafe { TextToSpeechSync(handle.as_raw()) }
    }

    fn open_in_memory(&self, handle: NativeHandle, format: u32) -> u32 {
        unsafe { TextToSpeechOpenInMemory(handle.as_raw(), format) }
    }

    fn close_in_memory(&self, handle: NativeHandle) -> u32 {
        unsafe { TextToSpeechCloseInMemory(handle.as_raw()) }
    }

    unsafe fn add_buffer(&self, handle: NativeHandle, buffer: *mut TtsBufferT) -> u32 {
        TextToSpeechAddBuffer(handle.as_raw(), buffer)
    }

    unsafe fn return_buffer(&self, handle: NativeHandle, buffer: &mut *mut TtsBufferT) -> u32 {
        TextToSpeechReturnBuffer(handle.as_raw(), buffer)
    }
}

fn current_params(handle: NativeHandle) -> Result<*mut SpeakerParams, u32> {
    let mut current = ptr::null_mut();
    let mut low = ptr::null_mut();
    let mut high = ptr::null_mut();
    let mut default = ptr::null_mut();

    let status = unsafe {
        TextToSpeechGetSpeakerParams(
            handle.as_raw(),
            0,
            &mut current,
            &mut low,
            &mut high,
            &mut default,
        )
    };

    match status {
        0 if !current.is_null() => Ok(current),
        0 => Err(super::MMSYSERR_ERROR),
        status => Err(status),
    }
}
