/// Labels the classifier may report.
pub const LABELS: &[&str] = &[
    "Angry", "Sad", "Happy", "Surprise", "Fear", "Disgust", "Contempt", "Neutral",
];

pub trait EmotionClassifier: Send {
    fn classify(&mut self, samples: &[f32]) -> Option<String>;
}

/// No emotion model configured.
pub struct NoEmotion;

impl EmotionClassifier for NoEmotion {
    fn classify(&mut self, _samples: &[f32]) -> Option<String> {
        None
    }
}

/// Reports the same label for every utterance.
pub struct FixedEmotion(String);

impl FixedEmotion {
    /// Accepts a known label, case-insensitively.
    pub fn new(label: &str) -> Option<Self> {
        LABELS
            .iter()
            .find(|known| known.eq_ignore_ascii_case(label.trim()))
            .map(|known| Self((*known).to_string()))
    }
}

impl EmotionClassifier for FixedEmotion {
    fn classify(&mut self, _samples: &[f32]) -> Option<String> {
        Some(self.0.clone())
    }
}
