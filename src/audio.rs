//! Audio preprocessing for the recognition uplink
//!
//! Normalizes captured audio to mono 16 kHz PCM16 and slices it into
//! fixed-duration segments. Resampling is linear interpolation over a
//! uniform time grid; recognition accuracy tolerates the approximation.

use crate::config::TARGET_SAMPLE_RATE;
use crate::{Error, Result};

/// A buffer of captured audio samples
///
/// Samples are mono f32 in `[-1, 1]`. Stereo input is downmixed at
/// construction so the invariant holds for the buffer's whole lifetime.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a buffer from interleaved samples
    ///
    /// Two-channel input is downmixed to mono by per-sample averaging.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] for an unsupported channel count or a zero
    /// sample rate.
    pub fn from_interleaved(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::Audio("sample rate must be non-zero".to_string()));
        }
        let samples = match channels {
            1 => samples,
            2 => samples
                .chunks_exact(2)
                .map(|pair| (pair[0] + pair[1]) / 2.0)
                .collect(),
            n => {
                return Err(Error::Audio(format!("unsupported channel count: {n}")));
            }
        };
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Read a WAV file into a buffer
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the file cannot be decoded.
    pub fn from_wav_file(path: &std::path::Path) -> Result<Self> {
        let mut reader =
            hound::WavReader::open(path).map_err(|e| Error::Audio(e.to_string()))?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?,
            hound::SampleFormat::Int => reader
                .samples::<i16>()
                .map(|s| s.map(|v| f32::from(v) / 32768.0))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?,
        };
        Self::from_interleaved(samples, spec.sample_rate, spec.channels)
    }

    /// The sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The mono samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Whether the buffer holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Resample to `target_rate` if needed, consuming the buffer
    ///
    /// Linear interpolation over a uniformly spaced time grid scaled by the
    /// rate ratio. A no-op when the rates already match.
    #[must_use]
    pub fn resampled(self, target_rate: u32) -> Self {
        if self.samples.is_empty() {
            return Self {
                samples: Vec::new(),
                sample_rate: target_rate,
            };
        }
        if self.sample_rate == target_rate {
            return self;
        }
        let ratio = f64::from(target_rate) / f64::from(self.sample_rate);
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let out_len = (self.samples.len() as f64 * ratio) as usize;
        let mut out = Vec::with_capacity(out_len);
        #[allow(clippy::cast_precision_loss)]
        let src_len = self.samples.len() as f64;
        for i in 0..out_len {
            #[allow(clippy::cast_precision_loss)]
            let pos = i as f64 / out_len as f64 * src_len;
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(self.samples.len() - 1);
            #[allow(clippy::cast_possible_truncation)]
            let frac = (pos - pos.floor()) as f32;
            out.push(self.samples[lo] * (1.0 - frac) + self.samples[hi] * frac);
        }
        Self {
            samples: out,
            sample_rate: target_rate,
        }
    }

    /// Convert to signed 16-bit little-endian PCM bytes
    ///
    /// Samples are clamped to `[-1, 1]` and scaled by 32767.
    #[must_use]
    pub fn to_pcm16(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for &sample in &self.samples {
            #[allow(clippy::cast_possible_truncation)]
            let v = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Normalize a buffer to the protocol's required rate (mono 16 kHz)
#[must_use]
pub fn preprocess(buffer: AudioBuffer) -> AudioBuffer {
    buffer.resampled(TARGET_SAMPLE_RATE)
}

/// Slice PCM16 bytes into segments of `segment_ms` each
///
/// The final partial segment is emitted, not dropped. Empty input yields
/// zero segments; the caller must treat that as nothing to send.
#[must_use]
pub fn segment_pcm16(pcm: &[u8], sample_rate: u32, segment_ms: u32) -> Vec<Vec<u8>> {
    if pcm.is_empty() {
        return Vec::new();
    }
    let bytes_per_sample = 2usize;
    let samples_per_segment = (sample_rate as usize) * (segment_ms as usize) / 1000;
    let bytes_per_segment = (samples_per_segment * bytes_per_sample).max(bytes_per_sample);
    pcm.chunks(bytes_per_segment).map(<[u8]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_downmix_averages_pairs() {
        let buf =
            AudioBuffer::from_interleaved(vec![0.5, -0.5, 1.0, 0.0], 16000, 2).unwrap();
        assert_eq!(buf.samples(), &[0.0, 0.5]);
    }

    #[test]
    fn preprocess_always_yields_target_rate() {
        for rate in [8000, 16000, 22050, 44100, 48000] {
            let samples = vec![0.1_f32; rate as usize / 10];
            let buf = AudioBuffer::from_interleaved(samples, rate, 1).unwrap();
            let out = preprocess(buf);
            assert_eq!(out.sample_rate(), TARGET_SAMPLE_RATE);
        }
    }

    #[test]
    fn resample_halves_length_for_double_rate() {
        let buf = AudioBuffer::from_interleaved(vec![0.0; 3200], 32000, 1).unwrap();
        let out = buf.resampled(16000);
        assert_eq!(out.samples().len(), 1600);
    }

    #[test]
    fn pcm16_clamps_out_of_range() {
        let buf = AudioBuffer::from_interleaved(vec![2.0, -2.0], 16000, 1).unwrap();
        let pcm = buf.to_pcm16();
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 32767);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), -32767);
    }

    #[test]
    fn segmentation_keeps_final_partial() {
        // 300ms at 16kHz = 4800 samples = 9600 bytes per segment
        let pcm = vec![0u8; 9600 * 2 + 100];
        let segs = segment_pcm16(&pcm, 16000, 300);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].len(), 9600);
        assert_eq!(segs[2].len(), 100);
    }

    #[test]
    fn empty_input_yields_zero_segments() {
        assert!(segment_pcm16(&[], 16000, 300).is_empty());
    }
}
