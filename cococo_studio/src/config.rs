// Session configuration.
//
// `StudioConfig` gathers every tunable the studio reads: score geometry,
// whether masks follow the legacy baseline rules, generation defaults, the
// RNG seed and where to find the checkpoint. It is loaded from JSON; every
// field has a default, so a config file only needs the fields it changes.

use crate::error::{Result, StudioError};
use cococo_model::{DEFAULT_TEMPERATURE, InfillOptions, MoodConfig, StepVoice};
use cococo_score::{EditorLayout, Key, MaskMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Sad,
}

/// Defaults applied to every generation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f64,
    /// Fixed Gibbs iteration count; unset means one per masked cell.
    pub num_iterations: Option<usize>,
    /// How many alternatives each generation produces.
    pub num_candidates: usize,
    pub nudge_factor: f32,
    pub discourage_notes: bool,
    /// Bias toward major or minor triads of the editor's key.
    pub mood: Option<Mood>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            temperature: DEFAULT_TEMPERATURE,
            num_iterations: None,
            num_candidates: 1,
            nudge_factor: 0.0,
            discourage_notes: false,
            mood: None,
        }
    }
}

impl GenerationConfig {
    /// Inference options for the given cells, with the mood resolved
    /// against `key`.
    pub fn infill_options(&self, cells: Vec<StepVoice>, key: Key) -> InfillOptions {
        InfillOptions {
            temperature: self.temperature,
            num_iterations: self.num_iterations,
            infill_mask: Some(cells),
            discourage_notes: self.discourage_notes,
            nudge_factor: self.nudge_factor,
            mood: self.mood.map(|mood| MoodConfig {
                key,
                happy: mood == Mood::Happy,
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub layout: EditorLayout,
    /// Legacy mask rules: fall back to every silent step when nothing is
    /// masked, and ignore the loop window.
    pub baseline_masks: bool,
    pub generation: GenerationConfig,
    /// Seed for reproducible generation; unset draws from the OS.
    pub seed: Option<u64>,
    pub checkpoint_dir: Option<PathBuf>,
    pub history_limit: usize,
}

impl Default for StudioConfig {
    fn default() -> Self {
        StudioConfig {
            layout: EditorLayout::default(),
            baseline_masks: false,
            generation: GenerationConfig::default(),
            seed: None,
            checkpoint_dir: None,
            history_limit: cococo_score::history::DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl StudioConfig {
    pub fn mask_mode(&self) -> MaskMode {
        if self.baseline_masks {
            MaskMode::Baseline
        } else {
            MaskMode::Standard
        }
    }

    pub fn from_json(json: &str) -> std::result::Result<StudioConfig, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> Result<StudioConfig> {
        let data = std::fs::read_to_string(path).map_err(|source| StudioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        StudioConfig::from_json(&data).map_err(|source| StudioError::Json {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips() {
        let config = StudioConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back = StudioConfig::from_json(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let json = r#"{"seed": 42, "generation": {"mood": "sad", "num_candidates": 3},
                       "layout": {"total_bars": 4}}"#;
        let config = StudioConfig::from_json(json).unwrap();
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.generation.num_candidates, 3);
        assert_eq!(config.generation.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(config.layout.total_steps(), 64);
        assert_eq!(config.layout.min_pitch, 36);
        assert_eq!(config.mask_mode(), MaskMode::Standard);
    }

    #[test]
    fn test_infill_options_resolve_mood() {
        let generation = GenerationConfig {
            mood: Some(Mood::Sad),
            ..GenerationConfig::default()
        };
        let options = generation.infill_options(vec![StepVoice::new(0, 1)], Key::default());
        assert_eq!(options.infill_mask, Some(vec![StepVoice::new(0, 1)]));
        let mood = options.mood.unwrap();
        assert!(!mood.happy);
        assert_eq!(mood.key, Key::default());
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = StudioConfig::load(Path::new("/nonexistent/cococo.json")).unwrap_err();
        assert!(matches!(err, StudioError::Io { .. }));
    }
}
