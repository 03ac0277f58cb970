//! Pinned capture buffer and the drain/resubmit protocol.
//!
//! While the engine is in in-memory mode it writes PCM into a `TTS_BUFFER_T`
//! we hand it with `TextToSpeechAddBuffer`, and posts the buffer message once
//! the buffer is full or the stream ends. The buffer header and its data
//! region are heap allocations that are never moved or resized, and a
//! [`BufferState`] flag records who may touch them right now.

use crate::error::{check, Result, TtsError};
use crate::native::{NativeEngine, NativeHandle};
use std::io::Write;
use std::os::raw::c_char;
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// `TTS_PHONEME_T`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TtsPhonemeT {
    pub phoneme: u32,
    pub phoneme_sample_number: u32,
    pub phoneme_duration: u32,
    reserved: u32,
}

impl TtsPhonemeT {
    pub fn new(phoneme: u32, sample_number: u32, duration: u32) -> Self {
        Self {
            phoneme,
            phoneme_sample_number: sample_number,
            phoneme_duration: duration,
            reserved: 0,
        }
    }
}

/// `TTS_INDEX_T`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TtsIndexT {
    pub index_value: u32,
    pub sample_number: u32,
    reserved: u32,
}

/// `TTS_BUFFER_T`, the descriptor shared with the engine.
#[derive(Debug)]
#[repr(C)]
pub struct TtsBufferT {
    pub data: *mut c_char,
    pub phoneme_array: *mut TtsPhonemeT,
    pub index_array: *mut TtsIndexT,

    pub max_buffer_length: u32,
    pub max_phoneme_changes: u32,
    pub max_index_marks: u32,

    pub buffer_length: u32,
    pub phoneme_change_count: u32,
    pub index_mark_count: u32,

    reserved: u32,
}

/// Who may access the buffer memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    /// Submitted to the engine; only the engine writes to it.
    Loaned,
    /// Back with us; safe to read, reset or free.
    Owned,
}

/// Result of draining one buffer notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Drained {
    pub bytes: usize,
    pub full: bool,
}

/// Fixed-capacity, fixed-address buffer handed to the engine.
pub struct CaptureBuffer {
    header: NonNull<TtsBufferT>,
    data: NonNull<[u8]>,
    phonemes: NonNull<[TtsPhonemeT]>,
    indices: NonNull<[TtsIndexT]>,
    state: BufferState,
}

// All pointers are uniquely owned by this value; access is serialized by the
// state flag and the capture slot mutex.
unsafe impl Send for CaptureBuffer {}

impl CaptureBuffer {
    pub fn new(capacity: usize, max_phoneme_changes: usize, max_index_marks: usize) -> Result<Self> {
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(TtsError::ProtocolViolation("capture buffer capacity out of range"));
        }

        let data = leak_slice(vec![0u8; capacity]);
        let phonemes = leak_slice(vec![TtsPhonemeT::default(); max_phoneme_changes]);
        let indices = leak_slice(vec![TtsIndexT::default(); max_index_marks]);

        let header = Box::new(TtsBufferT {
            data: data.as_ptr() as *mut c_char,
            phoneme_array: slice_ptr_or_null(phonemes),
            index_array: slice_ptr_or_null(indices),
            max_buffer_length: capacity as u32,
            max_phoneme_changes: max_phoneme_changes as u32,
            max_index_marks: max_index_marks as u32,
            buffer_length: 0,
            phoneme_change_count: 0,
            index_mark_count: 0,
            reserved: 0,
        });

        Ok(Self {
            // Box::into_raw never returns null
            header: NonNull::from(Box::leak(header)),
            data,
            phonemes,
            indices,
            state: BufferState::Owned,
        })
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Address handed to the engine. Stable for the lifetime of `self`.
    pub fn as_ptr(&self) -> *mut TtsBufferT {
        self.header.as_ptr()
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn header(&self) -> Result<&TtsBufferT> {
        match self.state {
            BufferState::Owned => Ok(unsafe { self.header.as_ref() }),
            BufferState::Loaned => Err(TtsError::ProtocolViolation("buffer is loaned to the engine")),
        }
    }

    fn header_mut(&mut self) -> Result<&mut TtsBufferT> {
        match self.state {
            BufferState::Owned => Ok(unsafe { self.header.as_mut() }),
            BufferState::Loaned => Err(TtsError::ProtocolViolation("buffer is loaned to the engine")),
        }
    }

    /// Bytes the engine reported writing, clamped to the capacity.
    pub fn len(&self) -> Result<usize> {
        let reported = self.header()?.buffer_length as usize;
        if reported > self.capacity() {
            warn!(
                "Engine reported {reported} bytes in a {} byte buffer",
                self.capacity()
            );
        }
        Ok(reported.min(self.capacity()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn is_full(&self) -> Result<bool> {
        Ok(self.len()? == self.capacity())
    }

    /// The filled part of the data region.
    pub fn bytes(&self) -> Result<&[u8]> {
        let len = self.len()?;
        Ok(unsafe { &self.data.as_ref()[..len] })
    }

    /// Phoneme changes the engine recorded alongside the samples.
    pub fn phoneme_changes(&self) -> Result<&[TtsPhonemeT]> {
        let count = (self.header()?.phoneme_change_count as usize).min(self.phonemes.len());
        Ok(unsafe { &self.phonemes.as_ref()[..count] })
    }

    /// Zeroes the fill length and mark counts.
    pub fn reset(&mut self) -> Result<()> {
        let header = self.header_mut()?;
        header.buffer_length = 0;
        header.phoneme_change_count = 0;
        header.index_mark_count = 0;
        Ok(())
    }

    /// Transfers write access to the engine and returns the address to submit.
    pub fn loan(&mut self) -> Result<*mut TtsBufferT> {
        if self.state == BufferState::Loaned {
            return Err(TtsError::ProtocolViolation("buffer is already loaned"));
        }
        self.state = BufferState::Loaned;
        Ok(self.as_ptr())
    }

    /// Takes write access back, after the engine returned the buffer.
    pub fn reclaim(&mut self) {
        self.state = BufferState::Owned;
    }

    /// Appends the filled bytes to `sink` and resets the buffer.
    pub fn drain_into(&mut self, sink: &mut dyn Write) -> Result<Drained> {
        let full = self.is_full()?;
        let bytes = self.bytes()?;
        let drained = Drained {
            bytes: bytes.len(),
            full,
        };
        let written = sink.write_all(bytes);
        self.reset()?;
        written?;
        Ok(drained)
    }
}

impl Drop for CaptureBuffer {
    fn drop(&mut self) {
        if self.state == BufferState::Loaned {
            // The engine may still write here. Leaking is the only sound option.
            error!("Capture buffer dropped while loaned to the engine, leaking it");
            return;
        }
        unsafe {
            drop(Box::from_raw(self.header.as_ptr()));
            drop(Box::from_raw(self.data.as_ptr()));
            drop(Box::from_raw(self.phonemes.as_ptr()));
            drop(Box::from_raw(self.indices.as_ptr()));
        }
    }
}

fn leak_slice<T>(items: Vec<T>) -> NonNull<[T]> {
    NonNull::from(Box::leak(items.into_boxed_slice()))
}

fn slice_ptr_or_null<T>(slice: NonNull<[T]>) -> *mut T {
    if slice.len() == 0 {
        ptr::null_mut()
    } else {
        slice.as_ptr() as *mut T
    }
}

/// Counters kept over the lifetime of a capture session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Buffer notifications drained, including the final partial one.
    pub notifications: usize,
    /// Notifications that reported a full buffer and were resubmitted.
    pub full_buffers: usize,
    /// Total bytes appended to the sink.
    pub bytes: u64,
}

/// One engine session redirected into one sink through one buffer.
pub struct CaptureSession {
    engine: Arc<dyn NativeEngine>,
    handle: NativeHandle,
    buffer: CaptureBuffer,
    sink: Box<dyn Write + Send>,
    stats: CaptureStats,
    failure: Option<TtsError>,
}

impl CaptureSession {
    pub fn new(
        engine: Arc<dyn NativeEngine>,
        handle: NativeHandle,
        buffer: CaptureBuffer,
        sink: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            engine,
            handle,
            buffer,
            sink,
            stats: CaptureStats::default(),
            failure: None,
        }
    }

    pub fn buffer(&self) -> &CaptureBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Hands the buffer to the engine as its current write destination.
    pub fn submit(&mut self) -> Result<()> {
        let ptr = self.buffer.loan()?;
        let status = unsafe { self.engine.add_buffer(self.handle, ptr) };
        if let Err(e) = check("TextToSpeechAddBuffer", status) {
            // Rejected, so the engine never took it
            self.buffer.reclaim();
            return Err(e);
        }
        trace!("Submitted capture buffer {ptr:p}");
        Ok(())
    }

    /// Handles a buffer message: drain, reset and resubmit if it was full.
    ///
    /// Runs on the engine's callback thread. Errors are recorded and
    /// reported when the session is closed. A full buffer is resubmitted
    /// even if the sink failed, otherwise the engine stalls waiting for one.
    pub fn on_buffer_filled(&mut self) -> Option<Drained> {
        self.buffer.reclaim();
        let full = self.buffer.is_full().unwrap_or(false);

        let drained = match self.drain() {
            Ok(drained) => Some(drained),
            Err(e) => {
                error!("Failed to drain capture buffer: {e}");
                self.record_failure(e);
                None
            }
        };

        if full {
            if let Err(e) = self.submit() {
                error!("Failed to resubmit capture buffer: {e}");
                self.record_failure(e);
            }
        }

        drained
    }

    fn drain(&mut self) -> Result<Drained> {
        let drained = Drained {
            bytes: self.buffer.len()?,
            full: self.buffer.is_full()?,
        };
        // The buffer is consumed even when the sink rejects it
        let written = self.buffer.drain_into(&mut self.sink);

        self.stats.notifications += 1;
        self.stats.bytes += drained.bytes as u64;
        if drained.full {
            self.stats.full_buffers += 1;
        }
        trace!(
            "Drained {} bytes from capture buffer (full: {})",
            drained.bytes,
            drained.full
        );
        written
    }

    /// Marks the buffer as handed over without calling into the engine.
    ///
    /// The caller passes the returned address to `TextToSpeechAddBuffer`
    /// itself, and calls [`CaptureSession::release`] if that is rejected.
    pub fn loan(&mut self) -> Result<*mut TtsBufferT> {
        self.buffer.loan()
    }

    /// Takes back the buffer after `TextToSpeechReturnBuffer` wrote
    /// `returned`, and drains it without resubmitting.
    ///
    /// A null `returned` means the engine had already posted the buffer. If
    /// that message has not been handled yet, whatever it carried is drained
    /// here instead.
    pub fn take_returned(&mut self, returned: *mut TtsBufferT) -> Result<Option<Drained>> {
        if !returned.is_null() && returned != self.buffer.as_ptr() {
            return Err(TtsError::ProtocolViolation("engine returned a foreign buffer"));
        }
        if returned.is_null() && self.buffer.state() == BufferState::Owned {
            return Ok(None);
        }

        self.buffer.reclaim();
        if returned.is_null() && self.buffer.is_empty()? {
            return Ok(None);
        }
        self.drain().map(Some)
    }

    /// Marks the buffer as no longer referenced by the engine.
    ///
    /// Only valid once the engine has left in-memory mode or shut down.
    pub fn release(&mut self) {
        self.buffer.reclaim();
    }

    fn record_failure(&mut self, e: TtsError) {
        if self.failure.is_none() {
            self.failure = Some(e);
        }
    }

    /// Flushes the sink and reports the first failure seen on the callback thread.
    pub fn finish(mut self) -> Result<CaptureStats> {
        let flushed = self.sink.flush();
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        flushed?;
        Ok(self.stats)
    }
}
