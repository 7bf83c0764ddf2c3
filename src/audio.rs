use crate::error::Result;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

pub fn wav_duration_seconds(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    let duration = frames / spec.sample_rate as f64;
    Ok(duration)
}

/// Wraps raw 16-bit little-endian mono PCM into a WAV file.
pub fn write_pcm_wav(path: &Path, pcm: &[u8], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for pair in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    writer.finalize()?;
    Ok(())
}
