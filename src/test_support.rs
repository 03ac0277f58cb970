//! Shared helpers for unit tests.

use crate::capture::TtsBufferT;
use crate::native::{MessageKinds, NativeCallback, NativeEngine, NativeHandle};
use crate::router::PoisonlessLock;
use crate::voice::SpeakerParams;
use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::os::raw::{c_int, c_uint};
use std::ptr;
use std::sync::Mutex;

pub const KINDS: MessageKinds = MessageKinds {
    phoneme: 0xC001,
    buffer: 0xC002,
    error: 0xC003,
    index: 0xC004,
};

/// A `NativeEngine` that does nothing but record what it was asked to do.
///
/// Buffers are never written; tests play the engine's part by writing into
/// the submitted buffer themselves.
#[derive(Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<&'static str>>,
    added: Mutex<Vec<usize>>,
    holding: Mutex<Option<usize>>,
    faults: Mutex<HashMap<&'static str, u32>>,
    callback: Mutex<Option<(NativeCallback, c_int)>>,
    posting: Mutex<Vec<&'static str>>,
}

impl RecordingEngine {
    pub fn handle() -> NativeHandle {
        NativeHandle::from_raw(0x1000 as *mut c_void)
    }

    pub fn fail(&self, call: &'static str, status: u32) {
        self.faults.plock().insert(call, status);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.plock().clone()
    }

    /// Addresses passed to `add_buffer`, in order.
    pub fn added(&self) -> Vec<usize> {
        self.added.plock().clone()
    }

    /// Plays the engine posting its buffer: it no longer holds it.
    pub fn hand_back(&self) -> Option<usize> {
        self.holding.plock().take()
    }

    /// Makes `call` hand the buffer back by posting the buffer message from
    /// inside the call, on the caller's thread.
    pub fn post_buffer_during(&self, call: &'static str) {
        self.posting.plock().push(call);
    }

    fn posts_during(&self, call: &'static str) -> bool {
        self.posting.plock().contains(&call)
    }

    fn post_buffer(&self) {
        let registered = *self.callback.plock();
        if let Some((callback, parameter)) = registered {
            callback(0, 0, parameter as c_uint, KINDS.buffer);
        }
    }

    fn record(&self, call: &'static str) -> u32 {
        self.calls.plock().push(call);
        self.faults.plock().remove(call).unwrap_or(0)
    }
}

impl NativeEngine for RecordingEngine {
    fn message_kinds(&self) -> MessageKinds {
        KINDS
    }

    fn start_lang(&self, _lang: &CStr) -> u32 {
        self.record("start_lang");
        1
    }

    fn select_lang(&self, _handle: Option<NativeHandle>, _lang_id: u32) -> bool {
        self.record("select_lang") == 0
    }

    fn startup(
        &self,
        _device_id: u32,
        _options: u32,
        callback: NativeCallback,
        callback_parameter: c_int,
    ) -> Result<NativeHandle, u32> {
        match self.record("startup") {
            0 => {
                *self.callback.plock() = Some((callback, callback_parameter));
                Ok(Self::handle())
            }
            status => Err(status),
        }
    }

    fn shutdown(&self, _handle: NativeHandle) -> u32 {
        self.record("shutdown")
    }

    fn set_speaker(&self, _handle: NativeHandle, _speaker: u32) -> u32 {
        self.record("set_speaker")
    }

    fn get_speaker(&self, _handle: NativeHandle, _speaker: &mut u32) -> u32 {
        self.record("get_speaker")
    }

    fn set_rate(&self, _handle: NativeHandle, _rate: u32) -> u32 {
        self.record("set_rate")
    }

    fn get_rate(&self, _handle: NativeHandle, _rate: &mut u32) -> u32 {
        self.record("get_rate")
    }

    fn set_volume(&self, _handle: NativeHandle, _kind: c_int, _volume: c_int) -> u32 {
        self.record("set_volume")
    }

    fn get_volume(&self, _handle: NativeHandle, _kind: c_int, _volume: &mut c_int) -> u32 {
        self.record("get_volume")
    }

    fn get_speaker_params(&self, _handle: NativeHandle, _params: &mut SpeakerParams) -> u32 {
        self.record("get_speaker_params")
    }

    fn set_speaker_params(&self, _handle: NativeHandle, _params: &SpeakerParams) -> u32 {
        self.record("set_speaker_params")
    }

    fn speak(&self, _handle: NativeHandle, _text: &CStr, _flags: u32) -> u32 {
        self.record("speak")
    }

    fn pause(&self, _handle: NativeHandle) -> u32 {
        self.record("pause")
    }

    fn resume(&self, _handle: NativeHandle) -> u32 {
        self.record("resume")
    }

    fn reset(&self, _handle: NativeHandle, _reset_mode: bool) -> u32 {
        self.record("reset")
    }

    fn sync(&self, _handle: NativeHandle) -> u32 {
        self.record("sync")
    }

    fn open_in_memory(&self, _handle: NativeHandle, _format: u32) -> u32 {
        self.record("open_in_memory")
    }

    fn close_in_memory(&self, _handle: NativeHandle) -> u32 {
        let status = self.record("close_in_memory");
        if status == 0 {
            self.holding.plock().take();
        }
        status
    }

    unsafe fn add_buffer(&self, _handle: NativeHandle, buffer: *mut TtsBufferT) -> u32 {
        let status = self.record("add_buffer");
        if status != 0 {
            return status;
        }
        self.added.plock().push(buffer as usize);
        if self.posts_during("add_buffer") {
            self.post_buffer();
        } else {
            *self.holding.plock() = Some(buffer as usize);
        }
        status
    }

    unsafe fn return_buffer(&self, _handle: NativeHandle, buffer: &mut *mut TtsBufferT) -> u32 {
        let status = self.record("return_buffer");
        if status != 0 {
            return status;
        }
        let held = self.holding.plock().take();
        *buffer = match held {
            Some(_) if self.posts_during("return_buffer") => {
                self.post_buffer();
                ptr::null_mut()
            }
            Some(address) => address as *mut TtsBufferT,
            None => ptr::null_mut(),
        };
        status
    }
}

/// Plays the engine writing `bytes` into the buffer at `buffer`.
///
/// # Safety
///
/// `buffer` must be a live buffer currently loaned to the engine.
pub unsafe fn engine_write(buffer: *mut TtsBufferT, bytes: &[u8]) {
    let header = &mut *buffer;
    let offset = header.buffer_length as usize;
    assert!(offset + bytes.len() <= header.max_buffer_length as usize);
    ptr::copy_nonoverlapping(
        bytes.as_ptr(),
        (header.data as *mut u8).add(offset),
        bytes.len(),
    );
    header.buffer_length += bytes.len() as u32;
}
