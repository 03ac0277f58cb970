//! Voices, languages and speaker parameters understood by the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The built-in DECtalk speakers.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[repr(u32)]
pub enum Voice {
    #[default]
    Paul = 0,
    Betty = 1,
    Harry = 2,
    Frank = 3,
    Dennis = 4,
    Kit = 5,
    Ursula = 6,
    Rita = 7,
    Wendy = 8,
}

impl Voice {
    pub const ALL: [Voice; 9] = [
        Voice::Paul,
        Voice::Betty,
        Voice::Harry,
        Voice::Frank,
        Voice::Dennis,
        Voice::Kit,
        Voice::Ursula,
        Voice::Rita,
        Voice::Wendy,
    ];

    pub fn from_raw(raw: u32) -> Option<Voice> {
        Self::ALL.get(raw as usize).copied()
    }
}

/// Language resources the engine may load at startup.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum Language {
    /// Skip language selection and use whatever the engine defaults to
    None,
    #[default]
    #[serde(rename = "US")]
    EnglishUs,
    #[serde(rename = "UK")]
    EnglishUk,
    #[serde(rename = "SP")]
    SpanishCastilian,
    #[serde(rename = "LA")]
    SpanishLatinAmerican,
    #[serde(rename = "GR")]
    German,
    #[serde(rename = "FR")]
    French,
    /// Any other code, passed to the engine verbatim
    #[serde(untagged)]
    Other(LanguageCode),
}

/// A two-letter language code not covered by the named variants.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageCode([u8; 2]);

impl TryFrom<String> for LanguageCode {
    type Error = String;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        match code.as_bytes() {
            [a, b] if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
                Ok(LanguageCode([a.to_ascii_uppercase(), b.to_ascii_uppercase()]))
            }
            _ => Err(format!("invalid language code: {code:?}")),
        }
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> String {
        code.as_str().to_string()
    }
}

impl LanguageCode {
    pub fn as_str(&self) -> &str {
        // Constructed from ASCII letters only
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl Language {
    /// The code passed to `TextToSpeechStartLang`, or `None` to skip selection.
    pub fn code(&self) -> Option<&str> {
        match self {
            Language::None => None,
            Language::EnglishUs => Some("US"),
            Language::EnglishUk => Some("UK"),
            Language::SpanishCastilian => Some("SP"),
            Language::SpanishLatinAmerican => Some("LA"),
            Language::German => Some("GR"),
            Language::French => Some("FR"),
            Language::Other(code) => Some(code.as_str()),
        }
    }

    pub fn parse(code: &str) -> Option<Language> {
        let language = match code.to_ascii_uppercase().as_str() {
            "" => Language::None,
            "US" => Language::EnglishUs,
            "UK" => Language::EnglishUk,
            "SP" => Language::SpanishCastilian,
            "LA" => Language::SpanishLatinAmerican,
            "GR" => Language::German,
            "FR" => Language::French,
            other => Language::Other(LanguageCode::try_from(other.to_string()).ok()?),
        };
        Some(language)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code().unwrap_or("default"))
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[repr(i16)]
pub enum Sex {
    Female = 0,
    #[default]
    Male = 1,
}

/// Speaker definition as laid out by the engine (`SPDEFS`).
///
/// Units follow the DECtalk `[:dv]` command reference.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[repr(C)]
pub struct SpeakerParams {
    pub sex: Sex,
    /// Smoothness, %
    pub smoothness: i16,
    /// Assertiveness, %
    pub assertiveness: i16,
    /// Average pitch, Hz
    pub average_pitch: i16,
    /// Breathiness, dB
    pub breathiness: i16,
    /// Richness, %
    pub richness: i16,
    /// Number of fixed samples of open glottis
    pub num_fixed_samp_og: i16,
    /// Laryngealization, %
    pub laryngealization: i16,
    /// Head size, %
    pub head_size: i16,
    pub formant4_res_freq: i16,
    pub formant4_bandwidth: i16,
    pub formant5_res_freq: i16,
    pub formant5_bandwidth: i16,
    pub parallel4_freq: i16,
    pub parallel5_freq: i16,
    pub gain_frication: i16,
    pub gain_aspiration: i16,
    pub gain_voicing: i16,
    pub gain_nasalization: i16,
    pub gain_cfr1: i16,
    pub gain_cfr2: i16,
    pub gain_cfr3: i16,
    pub gain_cfr4: i16,
    /// Gain input to cascade 1st formant, dB
    pub loudness: i16,
    /// f0-dependent spectral tilt, % of max
    pub spectral_tilt: i16,
    /// Baseline fall, Hz
    pub baseline_fall: i16,
    /// Lax breathiness, %
    pub lax_breathiness: i16,
    /// Quickness, %
    pub quickness: i16,
    /// Hat rise, Hz
    pub hat_rise: i16,
    /// Stress rise, Hz
    pub stress_rise: i16,
    pub glottal_speed: i16,
    /// Output gain multiplier for FVTM
    pub output_gain_multiplier: i16,
}
