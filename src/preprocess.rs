//! Cleanup applied to an utterance before it reaches Whisper:
//! trim silent edges, peak-normalize, split into overlapping windows.

use crate::audio::SAMPLE_RATE;

/// 10 ms analysis frames.
const FRAME_LEN: usize = SAMPLE_RATE as usize / 100;

/// Peak level after normalization, kept below 1.0 to avoid clipping.
const TARGET_PEAK: f32 = 0.95;

#[derive(Debug, Clone)]
pub struct Preprocessor {
    /// Window length in seconds. Whisper works on at most 30 s.
    pub window_secs: f32,
    pub overlap_secs: f32,
    /// Frames quieter than this (dBFS RMS) count as silence.
    pub silence_db: f32,
    /// Shorter windows are discarded.
    pub min_window_secs: f32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            window_secs: 25.0,
            overlap_secs: 2.0,
            silence_db: -30.0,
            min_window_secs: 1.0,
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

fn secs_to_samples(secs: f32) -> usize {
    (secs * SAMPLE_RATE as f32) as usize
}

impl Preprocessor {
    fn is_voiced(&self, frame: &[f32]) -> bool {
        rms(frame) > 10.0_f32.powf(self.silence_db / 20.0)
    }

    /// Slice between the first and last voiced 10 ms frame.
    pub fn trim<'a>(&self, audio: &'a [f32]) -> &'a [f32] {
        let frames: Vec<&[f32]> = audio.chunks(FRAME_LEN).collect();
        let Some(first) = frames.iter().position(|f| self.is_voiced(f)) else {
            return &[];
        };
        // `first` exists, so `rposition` does too.
        let last = frames.iter().rposition(|f| self.is_voiced(f)).unwrap_or(first);

        let start = first * FRAME_LEN;
        let end = ((last + 1) * FRAME_LEN).min(audio.len());
        &audio[start..end]
    }

    pub fn normalize(&self, audio: &[f32]) -> Vec<f32> {
        let peak = audio.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        if peak < 1e-6 {
            return audio.to_vec();
        }
        let gain = TARGET_PEAK / peak;
        audio.iter().map(|s| s * gain).collect()
    }

    pub fn windows(&self, audio: &[f32]) -> Vec<Vec<f32>> {
        let len = secs_to_samples(self.window_secs);
        let min = secs_to_samples(self.min_window_secs);
        let step = len.saturating_sub(secs_to_samples(self.overlap_secs)).max(1);

        if audio.len() <= len {
            return if audio.len() >= min {
                vec![audio.to_vec()]
            } else {
                Vec::new()
            };
        }

        let mut out = Vec::new();
        let mut pos = 0;
        while pos < audio.len() {
            let window = &audio[pos..(pos + len).min(audio.len())];
            if window.len() >= min {
                out.push(window.to_vec());
            }
            if pos + len >= audio.len() {
                break;
            }
            pos += step;
        }
        out
    }

    /// Full pipeline. An empty result means no speech worth sending.
    pub fn process(&self, audio: &[f32]) -> Vec<Vec<f32>> {
        let voiced = self.trim(audio);
        if voiced.is_empty() {
            return Vec::new();
        }
        self.windows(&self.normalize(voiced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: usize = SAMPLE_RATE as usize;

    #[test]
    fn rms_of_silence_and_constant() {
        assert_eq!(rms(&[0.0; 100]), 0.0);
        assert!((rms(&[1.0; 100]) - 1.0).abs() < 1e-4);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn trims_silent_edges() {
        let pre = Preprocessor::default();
        let mut audio = vec![0.0; 1600];
        audio.extend(vec![0.5; RATE]);
        audio.extend(vec![0.0; 1600]);

        let trimmed = pre.trim(&audio);
        assert_eq!(trimmed.len(), RATE);
        assert!(trimmed.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn all_silence_produces_nothing() {
        let pre = Preprocessor::default();
        assert!(pre.process(&vec![0.0; 3 * RATE]).is_empty());
    }

    #[test]
    fn normalizes_to_target_peak() {
        let pre = Preprocessor::default();
        let out = pre.normalize(&[0.1, -0.2, 0.15]);
        let peak = out.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        assert!((peak - TARGET_PEAK).abs() < 1e-4);
    }

    #[test]
    fn long_audio_is_windowed_with_overlap() {
        let pre = Preprocessor {
            window_secs: 2.0,
            overlap_secs: 0.5,
            min_window_secs: 0.5,
            ..Default::default()
        };
        let windows = pre.windows(&vec![0.5; 5 * RATE]);

        // Starts at 0, 1.5, 3.0 s; the 3.0 s window reaches the end.
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].len(), 2 * RATE);
        assert_eq!(windows[2].len(), 2 * RATE);
    }

    #[test]
    fn short_clip_below_minimum_is_dropped() {
        let pre = Preprocessor::default();
        assert!(pre.windows(&vec![0.5; RATE / 2]).is_empty());
        assert_eq!(pre.windows(&vec![0.5; 2 * RATE]).len(), 1);
    }
}
