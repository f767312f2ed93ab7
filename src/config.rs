use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::data::PhenomenonCategory;

/// Engine configuration. Every section falls back to its defaults, so a config file only
/// needs to name the values it overrides.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub thresholds: Thresholds,
    pub phenomena_priority: PhenomenaPriority,
    pub timeline: TimelineConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Aerodrome operating minimums. Each value is the exclusive upper bound of a band: a
/// visibility below `visibility_minimum_m` is level 4, below `visibility_low_m` level 3, and
/// so on.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub visibility_minimum_m: u32,
    pub visibility_low_m: u32,
    pub visibility_reduced_m: u32,
    pub ceiling_minimum_ft: u32,
    pub ceiling_low_ft: u32,
    pub ceiling_reduced_ft: u32,
    /// Sustained wind at which wind becomes level 3. Gusts only change the wording.
    pub wind_severe_kt: u32,
    /// Sustained wind at which wind becomes level 2.
    pub wind_strong_kt: u32,
    /// Sustained wind that counts as level 2, but only when a gust is also reported.
    pub wind_moderate_gusty_kt: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            visibility_minimum_m: 550,
            visibility_low_m: 1500,
            visibility_reduced_m: 5000,
            ceiling_minimum_ft: 200,
            ceiling_low_ft: 500,
            ceiling_reduced_ft: 1000,
            wind_severe_kt: 35,
            wind_strong_kt: 25,
            wind_moderate_gusty_kt: 15,
        }
    }
}

/// Ranking used when a display group lists its phenomena; higher comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PhenomenaPriority {
    pub freezing: u8,
    pub thunderstorm: u8,
    pub snow: u8,
    pub rain: u8,
    pub fog: u8,
    pub mist: u8,
    pub other: u8,
}

impl Default for PhenomenaPriority {
    fn default() -> Self {
        PhenomenaPriority {
            freezing: 10,
            thunderstorm: 9,
            snow: 8,
            rain: 7,
            fog: 6,
            mist: 5,
            other: 1,
        }
    }
}

impl PhenomenaPriority {
    pub fn of(&self, category: PhenomenonCategory) -> u8 {
        match category {
            PhenomenonCategory::Freezing => self.freezing,
            PhenomenonCategory::Thunderstorm => self.thunderstorm,
            PhenomenonCategory::Snow => self.snow,
            PhenomenonCategory::Rain => self.rain,
            PhenomenonCategory::Fog => self.fog,
            PhenomenonCategory::Mist => self.mist,
            PhenomenonCategory::Other => self.other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Number of whole hours resolved ahead of the reference time.
    pub lookahead_hours: u32,
    /// Maximum phenomena listed per display group.
    pub max_phenomena: usize,
    /// Maximum operational impacts listed per display group.
    pub max_impacts: usize,
    /// A group's worst visibility is only displayed at or below this value.
    pub visibility_display_max_m: u32,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        TimelineConfig {
            lookahead_hours: 24,
            max_phenomena: 4,
            max_impacts: 5,
            visibility_display_max_m: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"thresholds": {"visibility_minimum_m": 800}, "timeline": {"lookahead_hours": 12}}"#,
        )
        .unwrap();
        assert_eq!(config.thresholds.visibility_minimum_m, 800);
        assert_eq!(config.thresholds.visibility_low_m, 1500);
        assert_eq!(config.timeline.lookahead_hours, 12);
        assert_eq!(config.timeline.max_phenomena, 4);
        assert_eq!(config.phenomena_priority, PhenomenaPriority::default());
    }

    #[test]
    fn priority_table_orders_categories() {
        let p = PhenomenaPriority::default();
        assert!(p.of(PhenomenonCategory::Freezing) > p.of(PhenomenonCategory::Thunderstorm));
        assert!(p.of(PhenomenonCategory::Thunderstorm) > p.of(PhenomenonCategory::Snow));
        assert!(p.of(PhenomenonCategory::Snow) > p.of(PhenomenonCategory::Rain));
        assert!(p.of(PhenomenonCategory::Rain) > p.of(PhenomenonCategory::Fog));
        assert!(p.of(PhenomenonCategory::Fog) > p.of(PhenomenonCategory::Mist));
        assert!(p.of(PhenomenonCategory::Mist) > p.of(PhenomenonCategory::Other));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/aerorisk.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
