use thiserror::Error;

/// All errors produced by the engine adapter.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("this version of DECtalk does not support multiple languages")]
    LanguageUnsupported,

    #[error("language {0:?} was not found")]
    LanguageNotFound(String),

    #[error("language {0:?} failed to load")]
    LanguageLoadFailed(String),

    #[error("{call} failed with status {code:#x}")]
    NativeCall { call: &'static str, code: u32 },

    #[error("capture protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("engine has been shut down")]
    ShutDown,

    #[error("text contains an interior NUL byte")]
    InvalidText,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, TtsError>;

/// A capture that failed to close cleanly.
///
/// Bytes written before the failure stay in the sink, which is handed back
/// here unless the engine may still be writing to it.
#[derive(Error)]
#[error("{error}")]
pub struct CaptureError<W> {
    pub error: TtsError,
    pub sink: Option<W>,
}

impl<W> std::fmt::Debug for CaptureError<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureError")
            .field("error", &self.error)
            .field("sink", &self.sink.as_ref().map(|_| ".."))
            .finish()
    }
}

impl<W> From<CaptureError<W>> for TtsError {
    fn from(e: CaptureError<W>) -> Self {
        e.error
    }
}

/// Turns a native status code into a `Result`.
///
/// `0` is `MMSYSERR_NOERROR`; anything else is engine-specific.
pub fn check(call: &'static str, code: u32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(TtsError::NativeCall { call, code })
    }
}
