// Audio format produced by the engine in in-memory mode
pub const SAMPLE_RATE: u32 = 11025; // 11.025 kHz sample rate
pub const BIT_DEPTH: u16 = 16; // 16 bits per sample
pub const CHANNELS: u16 = 1; // Mono

/// `WAVE_FORMAT_1M16`: 11025 Hz, mono, 16-bit.
pub const WAVE_FORMAT_1M16: u32 = 0x0000_0004;

/// Default capture buffer size in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16384;

/// Let the engine pick the default wave output device.
pub const WAVE_MAPPER: u32 = 0xFFFF_FFFF;

// TextToSpeechStartLang status values
pub const TTS_LANG_ERROR: u32 = 0x4000;
pub const TTS_NOT_SUPPORTED: u32 = 0x7FFF;
pub const TTS_NOT_AVAILABLE: u32 = 0x7FFE;

/// Volume type selector for TextToSpeechSetVolume / GetVolume (main volume).
pub const VOLUME_MAIN: i32 = 1;

/// Registered window message names the engine posts to the callback.
pub const MSG_NAME_INDEX: &str = "DECtalkIndexMessage";
pub const MSG_NAME_ERROR: &str = "DECtalkErrorMessage";
pub const MSG_NAME_BUFFER: &str = "DECtalkBufferMessage";
pub const MSG_NAME_PHONEME: &str = "DECtalkVisualMessage";
