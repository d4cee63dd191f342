//! WAV import/export for takes
//!
//! Target recordings and DI signals come in as WAV files; captured takes go
//! out as WAV next to the session report. Samples are kept at their native
//! rate; a session rejects takes whose rate differs from its own.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::audio::take::AudioTake;
use crate::error::{Result, StompError};

/// Minimum usable duration of an imported take
const MIN_DURATION_SECS: f64 = 0.05;

fn wav_error(context: &str, e: hound::Error) -> StompError {
    StompError::InvalidAudio {
        reason: format!("{}: {}", context, e),
    }
}

/// Read a WAV file into a take
///
/// # Errors
/// * `FileNotFound` - If the file does not exist
/// * `InvalidAudio` - If the file is not valid WAV or is too short
pub fn read_wav(path: &Path) -> Result<AudioTake> {
    if !path.exists() {
        return Err(StompError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let reader = WavReader::open(path).map_err(|e| wav_error("Failed to open WAV file", e))?;
    let spec = reader.spec();
    let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;

    let take = AudioTake::new(samples, spec.sample_rate, spec.channels)?;
    if take.duration_secs() < MIN_DURATION_SECS {
        return Err(StompError::InvalidAudio {
            reason: format!("{:.3}s is too short to analyse", take.duration_secs()),
        });
    }
    log::debug!(
        "Read {} ({} Hz, {} ch, {:.2}s)",
        path.display(),
        take.sample_rate(),
        take.channel_count(),
        take.duration_secs()
    );
    Ok(take)
}

/// Write a take as WAV with the given bit depth (16, 24 or 32-bit float)
pub fn write_wav(take: &AudioTake, path: &Path, bit_depth: u16) -> Result<()> {
    let spec = WavSpec {
        channels: take.channel_count(),
        sample_rate: take.sample_rate(),
        bits_per_sample: bit_depth,
        sample_format: if bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let mut writer =
        WavWriter::create(path, spec).map_err(|e| wav_error("Failed to create WAV file", e))?;

    match bit_depth {
        16 => {
            for sample in take.samples() {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer
                    .write_sample(scaled)
                    .map_err(|e| wav_error("Failed to write sample", e))?;
            }
        }
        24 => {
            for sample in take.samples() {
                // 24-bit stored as i32 in hound
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer
                    .write_sample(scaled)
                    .map_err(|e| wav_error("Failed to write sample", e))?;
            }
        }
        32 => {
            for sample in take.samples() {
                writer
                    .write_sample(*sample)
                    .map_err(|e| wav_error("Failed to write sample", e))?;
            }
        }
        other => {
            return Err(StompError::InvalidAudio {
                reason: format!("{}-bit audio (only 16, 24, 32 supported)", other),
            });
        }
    }

    writer
        .finalize()
        .map_err(|e| wav_error("Failed to finalize WAV file", e))?;
    Ok(())
}

fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| wav_error("Failed to read float samples", e)),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                24 => 8388608.0,
                32 => 2147483648.0,
                other => {
                    return Err(StompError::InvalidAudio {
                        reason: format!("{}-bit integer audio", other),
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| wav_error("Failed to read integer samples", e))
        }
    }
}
