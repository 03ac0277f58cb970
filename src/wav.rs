//! WAV container for captured PCM.

use crate::{
    constants::{BIT_DEPTH, CHANNELS, SAMPLE_RATE},
    error::Result,
};
use byteorder::{ByteOrder, LittleEndian};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

/// Size of the canonical RIFF/WAVE header hound writes for this format.
pub const HEADER_SIZE: usize = 44;

/// The format the engine produces in in-memory mode.
pub fn spec() -> WavSpec {
    WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BIT_DEPTH,
        sample_format: SampleFormat::Int,
    }
}

/// Writes `pcm` (16-bit little-endian mono) as a complete WAV file.
pub fn write_wav<W: Write + Seek>(writer: W, pcm: &[u8]) -> Result<()> {
    if pcm.len() % 2 != 0 {
        warn!("Dropping trailing odd byte from {} bytes of PCM", pcm.len());
    }

    let mut writer = WavWriter::new(writer, spec())?;
    let mut samples = writer.get_i16_writer(pcm.len() as u32 / 2);
    for chunk in pcm.chunks_exact(2) {
        samples.write_sample(LittleEndian::read_i16(chunk));
    }
    samples.flush()?;
    writer.finalize()?;

    Ok(())
}

pub fn write_wav_file<P: AsRef<Path>>(path: P, pcm: &[u8]) -> Result<()> {
    let file = BufWriter::new(File::create(path.as_ref())?);
    write_wav(file, pcm)?;
    debug!("Wrote {} bytes of PCM to {}", pcm.len(), path.as_ref().display());
    Ok(())
}

/// Header for a stream whose length isn't known up front, e.g. a pipe.
pub fn header_for_stream() -> Vec<u8> {
    spec().into_header_for_infinite_file()
}
