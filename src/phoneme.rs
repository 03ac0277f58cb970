//! Decoding of phoneme marks posted by the engine.
//!
//! The engine packs a phoneme mark into the second `LONG` argument of the
//! callback. In native memory it is laid out as
//!
//! ```text
//! byte 0      byte 1       bytes 2..3
//! +---------+------------+-------------------+
//! | phoneme | next phon. | duration (u16 LE) |
//! +---------+------------+-------------------+
//! ```
//!
//! The engine is little-endian on every platform it ships for, so reading
//! the record as a `u32` puts byte 0 in the low bits. Decoding is plain
//! masking on that integer; nothing reinterprets memory.

use serde::Serialize;

/// A decoded phoneme mark, including the lookahead phoneme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhonemeMark {
    pub phoneme: u8,
    pub next_phoneme: u8,
    pub duration: u16,
}

impl PhonemeMark {
    pub fn decode(value: u32) -> Self {
        Self {
            phoneme: (value & 0xFF) as u8,
            next_phoneme: ((value >> 8) & 0xFF) as u8,
            duration: ((value >> 16) & 0xFFFF) as u16,
        }
    }

    /// Inverse of [`PhonemeMark::decode`].
    pub fn encode(&self) -> u32 {
        (self.phoneme as u32) | ((self.next_phoneme as u32) << 8) | ((self.duration as u32) << 16)
    }

    pub fn event(&self) -> PhonemeEvent {
        PhonemeEvent {
            phoneme: self.phoneme as char,
            duration: self.duration as u32,
        }
    }
}

/// A phoneme timing event as seen by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PhonemeEvent {
    /// Engine phoneme code, treated as a character.
    pub phoneme: char,
    /// Duration in engine time units.
    pub duration: u32,
}

/// Decodes the callback's raw `LONG` payload into a caller-visible event.
pub fn decode(raw: i32) -> PhonemeEvent {
    PhonemeMark::decode(raw as u32).event()
}
