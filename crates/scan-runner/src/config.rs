use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_SAFE_ITEMS: [&str; 11] = [
    "👕", "👖", "👗", "👟", "🎩", "💻", "📷", "📚", "🧸", "🥪", "🕶️",
];
pub const DEFAULT_THREAT_ITEMS: [&str; 6] = ["🔫", "🔪", "💣", "🧨", "🩸", "☠️"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("max_safe_items ({requested}) exceeds safe item vocabulary ({available})")]
    SampleExceedsVocabulary { requested: usize, available: usize },
    #[error("min_safe_items ({min}) must be >= 1 and <= max_safe_items ({max})")]
    InvalidSafeRange { min: usize, max: usize },
    #[error("threat item vocabulary is empty")]
    EmptyThreatVocabulary,
    #[error("{name} must be within [0, 1] (found: {value})")]
    ProbabilityOutOfRange { name: &'static str, value: f64 },
    #[error("{0} must be > 0")]
    Zero(&'static str),
    #[error("rounds ({rounds}) x points_per_correct ({points}) overflows the score counter")]
    ScoreOverflow { rounds: u32, points: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyInfo {
    pub title: Option<String>,
    pub researcher: Option<String>,
    pub supervisor: Option<String>,
    pub ethics_reference: Option<String>,
}

/// Parameters of the screening task. Every field has a default, so an empty
/// YAML document yields the standard 10-round task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub rounds: u32,
    pub min_safe_items: usize,
    pub max_safe_items: usize,
    pub threat_probability: f64,
    pub advisor_error_rate: f64,
    pub points_per_correct: u32,
    pub verification_trials: u32,
    pub safe_items: Vec<String>,
    pub threat_items: Vec<String>,
    pub study: StudyInfo,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            rounds: 10,
            min_safe_items: 4,
            max_safe_items: 8,
            threat_probability: 0.40,
            advisor_error_rate: 0.15,
            points_per_correct: 10,
            verification_trials: 10_000,
            safe_items: DEFAULT_SAFE_ITEMS.iter().map(|s| s.to_string()).collect(),
            threat_items: DEFAULT_THREAT_ITEMS.iter().map(|s| s.to_string()).collect(),
            study: StudyInfo::default(),
        }
    }
}

impl TaskConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        // serde_yaml rejects an empty document; treat it as all defaults.
        let cfg: TaskConfig = if raw.trim().is_empty() {
            TaskConfig::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks the invariants trial generation relies on. Sampling never fails
    /// once this has passed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rounds == 0 {
            return Err(ConfigError::Zero("rounds"));
        }
        if self.verification_trials == 0 {
            return Err(ConfigError::Zero("verification_trials"));
        }
        if self.rounds.checked_mul(self.points_per_correct).is_none() {
            return Err(ConfigError::ScoreOverflow {
                rounds: self.rounds,
                points: self.points_per_correct,
            });
        }
        if self.min_safe_items == 0 || self.min_safe_items > self.max_safe_items {
            return Err(ConfigError::InvalidSafeRange {
                min: self.min_safe_items,
                max: self.max_safe_items,
            });
        }
        if self.max_safe_items > self.safe_items.len() {
            return Err(ConfigError::SampleExceedsVocabulary {
                requested: self.max_safe_items,
                available: self.safe_items.len(),
            });
        }
        if self.threat_items.is_empty() {
            return Err(ConfigError::EmptyThreatVocabulary);
        }
        for (name, value) in [
            ("threat_probability", self.threat_probability),
            ("advisor_error_rate", self.advisor_error_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ProbabilityOutOfRange { name, value });
            }
        }
        Ok(())
    }

    pub fn max_score(&self) -> u32 {
        self.rounds.saturating_mul(self.points_per_correct)
    }
}
