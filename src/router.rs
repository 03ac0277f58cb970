//! Demultiplexing of the engine's single callback.
//!
//! The engine reports phoneme marks, filled buffers, errors and index marks
//! through one `extern "C"` routine, on a thread it owns. [`tts_callback`]
//! finds the [`CallbackRouter`] of the session that registered it (via the
//! callback parameter given at startup), [`dispatch`] classifies the message
//! and the router runs the matching handler.

use crate::{
    capture::{CaptureSession, Drained},
    event::{Event, EventBus},
    native::MessageKinds,
    phoneme::{self, PhonemeEvent},
};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::os::raw::{c_int, c_uint};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Caller-supplied phoneme observer.
pub type PhonemeListener = Arc<dyn Fn(PhonemeEvent) + Send + Sync>;

/// What a callback invocation is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Phoneme,
    BufferFilled,
    Error,
    Index,
    Unknown,
}

impl MessageKinds {
    pub fn classify(&self, message: u32) -> MessageKind {
        if message == self.phoneme {
            MessageKind::Phoneme
        } else if message == self.buffer {
            MessageKind::BufferFilled
        } else if message == self.error {
            MessageKind::Error
        } else if message == self.index {
            MessageKind::Index
        } else {
            MessageKind::Unknown
        }
    }
}

/// Outcome of classifying one callback invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Routed {
    Phoneme(PhonemeEvent),
    BufferFilled,
    /// `kind` is the engine's error class, `code` the accompanying status.
    ErrorObserved { kind: i32, code: i32 },
    /// Index marks and message kinds we don't handle.
    Ignored,
}

/// Classifies a raw callback invocation. Has no side effects.
pub fn dispatch(kinds: &MessageKinds, l_param1: i32, l_param2: i32, message: u32) -> Routed {
    match kinds.classify(message) {
        MessageKind::Phoneme => Routed::Phoneme(phoneme::decode(l_param2)),
        MessageKind::BufferFilled => Routed::BufferFilled,
        MessageKind::Error => Routed::ErrorObserved {
            kind: l_param1,
            code: l_param2,
        },
        MessageKind::Index | MessageKind::Unknown => Routed::Ignored,
    }
}

/// Per-session state the callback thread acts upon.
pub struct CallbackRouter {
    kinds: MessageKinds,
    listener: RwLock<Option<PhonemeListener>>,
    capture: Mutex<Option<CaptureSession>>,
    bus: Option<EventBus>,
    errors_observed: AtomicU64,
}

impl CallbackRouter {
    pub fn new(kinds: MessageKinds, bus: Option<EventBus>) -> Self {
        Self {
            kinds,
            listener: RwLock::new(None),
            capture: Mutex::new(None),
            bus,
            errors_observed: AtomicU64::new(0),
        }
    }

    pub fn kinds(&self) -> &MessageKinds {
        &self.kinds
    }

    pub fn set_listener(&self, listener: Option<PhonemeListener>) {
        match self.listener.write() {
            Ok(mut l) => *l = listener,
            Err(e) => *e.into_inner() = listener,
        }
    }

    fn listener(&self) -> Option<PhonemeListener> {
        match self.listener.read() {
            Ok(l) => l.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    /// The capture slot. At most one session lives here at a time.
    pub fn capture(&self) -> MutexGuard<'_, Option<CaptureSession>> {
        self.capture.plock()
    }

    /// Number of engine error messages seen so far.
    pub fn errors_observed(&self) -> u64 {
        self.errors_observed.load(Ordering::Relaxed)
    }

    /// Entry point from the engine thread.
    pub fn route(&self, l_param1: i32, l_param2: i32, message: u32) -> Routed {
        let routed = dispatch(&self.kinds, l_param1, l_param2, message);

        match routed {
            Routed::Phoneme(event) => self.on_phoneme(event),
            Routed::BufferFilled => self.on_buffer_filled(),
            Routed::ErrorObserved { kind, code } => self.on_error(kind, code),
            Routed::Ignored => trace!("Ignoring engine message {message:#x}"),
        }

        routed
    }

    fn on_phoneme(&self, event: PhonemeEvent) {
        trace!("Phoneme {:?} for {}", event.phoneme, event.duration);

        if let Some(listener) = self.listener() {
            listener(event);
        }
        self.publish(Event::Phoneme(event));
    }

    fn on_buffer_filled(&self) {
        // Held across resubmission so the caller never sees a half-reset buffer
        let mut capture = self.capture.plock();

        let Some(session) = capture.as_mut() else {
            warn!("Buffer message without an active capture session");
            return;
        };

        if let Some(Drained { bytes, full }) = session.on_buffer_filled() {
            self.publish(Event::BufferDrained { bytes, full });
        }
    }

    fn on_error(&self, kind: i32, code: i32) {
        self.errors_observed.fetch_add(1, Ordering::Relaxed);
        warn!("Engine reported error (kind {kind}, status {code:#x})");
        self.publish(Event::EngineError { kind, code });
    }

    fn publish(&self, event: Event) {
        if let Some(bus) = &self.bus {
            bus.send(event);
        }
    }
}

lazy_static! {
    static ref ROUTERS: Mutex<HashMap<u32, Arc<CallbackRouter>>> = Mutex::new(HashMap::new());
}

static NEXT_ROUTER_ID: AtomicU32 = AtomicU32::new(1);

/// Makes `router` reachable from [`tts_callback`] and returns its callback parameter.
pub fn register(router: Arc<CallbackRouter>) -> u32 {
    let id = NEXT_ROUTER_ID.fetch_add(1, Ordering::Relaxed);
    ROUTERS.plock().insert(id, router);
    id
}

pub fn unregister(id: u32) -> Option<Arc<CallbackRouter>> {
    ROUTERS.plock().remove(&id)
}

/// The routine registered with `TextToSpeechStartupEx`.
///
/// Never unwinds into the engine: panics raised by handlers or listeners are
/// caught and logged.
pub extern "C" fn tts_callback(
    l_param1: c_int,
    l_param2: c_int,
    callback_parameter: c_uint,
    message: c_uint,
) {
    let router = ROUTERS.plock().get(&callback_parameter).cloned();

    let Some(router) = router else {
        trace!("Engine message {message:#x} for unknown session {callback_parameter}");
        return;
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        router.route(l_param1, l_param2, message);
    }));

    if result.is_err() {
        error!("Panic while handling engine message {message:#x}");
    }
}

pub trait PoisonlessLock<T> {
    fn plock(&self) -> MutexGuard<'_, T>;
}

impl<T> PoisonlessLock<T> for Mutex<T> {
    fn plock(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(l) => l,
            Err(e) => e.into_inner(),
        }
    }
}
