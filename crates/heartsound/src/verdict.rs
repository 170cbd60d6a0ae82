//! Interpretation of the classifier's "probability abnormal" output.

use serde::Serialize;

use crate::constants::CLASSIFICATION_THRESHOLD;
use crate::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HeartSoundClass {
    Normal,
    Abnormal,
}

impl HeartSoundClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Abnormal => "Abnormal",
        }
    }
}

impl std::fmt::Display for HeartSoundClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub class: HeartSoundClass,
    pub abnormal_probability: f32,
}

impl Classification {
    /// `Abnormal` when `probability > threshold`.
    pub fn from_probability(probability: f32, threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(PipelineError::InvalidProbability(probability));
        }
        let class = if probability > threshold {
            HeartSoundClass::Abnormal
        } else {
            HeartSoundClass::Normal
        };
        Ok(Self {
            class,
            abnormal_probability: probability,
        })
    }

    /// [`Self::from_probability`] with the default 0.5 threshold.
    pub fn from_probability_default(probability: f32) -> Result<Self> {
        Self::from_probability(probability, CLASSIFICATION_THRESHOLD)
    }

    /// Probability of the predicted class.
    #[must_use]
    pub fn confidence(&self) -> f32 {
        match self.class {
            HeartSoundClass::Abnormal => self.abnormal_probability,
            HeartSoundClass::Normal => 1.0 - self.abnormal_probability,
        }
    }
}
