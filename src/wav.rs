use std::path::{Path, PathBuf};

use crate::audio::SAMPLE_RATE;

fn spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Write an utterance as mono 16-bit PCM at 16 kHz.
pub fn write_clip(path: &Path, samples: &[f32]) -> Result<(), hound::Error> {
    let mut writer = hound::WavWriter::create(path, spec())?;
    for &s in samples {
        writer.write_sample(to_i16(s))?;
    }
    writer.finalize()
}

/// Keeps captured utterances on disk for inspection.
pub struct ClipArchive {
    dir: PathBuf,
    prefix: String,
    next: usize,
}

impl ClipArchive {
    pub fn new(dir: PathBuf, prefix: &str) -> Self {
        Self {
            dir,
            prefix: prefix.to_string(),
            next: 1,
        }
    }

    /// Store the clip as `<prefix>-<n>.wav`. Failures are logged, never fatal.
    pub fn store(&mut self, samples: &[f32]) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "cannot create recordings dir");
            return None;
        }
        let path = self.dir.join(format!("{}-{}.wav", self.prefix, self.next));
        match write_clip(&path, samples) {
            Ok(()) => {
                self.next += 1;
                tracing::debug!(path = %path.display(), "recording saved");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot save recording");
                None
            }
        }
    }
}
