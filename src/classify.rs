//! Severity classification of a single weather snapshot.
//!
//! Each factor (phenomena, visibility, ceiling, wind) is evaluated on its own and yields an
//! optional level with a reason and operational impacts. The worst factor sets the level.
//! The classifier takes no clock input: the same snapshot always yields the same assessment.

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::data::{Intensity, Phenomenon, PhenomenonCategory, WeatherSnapshot};

/// Ordinal severity. 1 is favorable, 4 means operations may be suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RiskLevel {
    Favorable = 1,
    Minor = 2,
    Significant = 3,
    Severe = 4,
}

impl RiskLevel {
    pub fn value(self) -> u8 {
        self as u8
    }

    /// One level worse, saturating at [`RiskLevel::Severe`].
    pub fn escalate(self) -> RiskLevel {
        match self {
            RiskLevel::Favorable => RiskLevel::Minor,
            RiskLevel::Minor => RiskLevel::Significant,
            RiskLevel::Significant | RiskLevel::Severe => RiskLevel::Severe,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            RiskLevel::Favorable => "Favorable conditions",
            RiskLevel::Minor => "Minor disruptions possible",
            RiskLevel::Significant => "Significant disruptions likely",
            RiskLevel::Severe => "Operations may be suspended",
        }
    }
}

impl From<RiskLevel> for u8 {
    fn from(level: RiskLevel) -> u8 {
        level.value()
    }
}

impl TryFrom<u8> for RiskLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RiskLevel::Favorable),
            2 => Ok(RiskLevel::Minor),
            3 => Ok(RiskLevel::Significant),
            4 => Ok(RiskLevel::Severe),
            other => Err(format!("risk level must be 1-4, got {other}")),
        }
    }
}

pub const INSUFFICIENT_DATA_TITLE: &str = "Conditions unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub title: String,
    pub message: String,
    pub impacts: Vec<String>,
    /// Descriptions of the phenomena that contributed to the level.
    pub phenomena: Vec<String>,
    /// Set when the snapshot carried nothing to classify. The level is then 1, but it must
    /// not be presented as favorable weather.
    pub insufficient_data: bool,
}

impl RiskAssessment {
    fn insufficient() -> RiskAssessment {
        RiskAssessment {
            level: RiskLevel::Favorable,
            title: INSUFFICIENT_DATA_TITLE.to_string(),
            message: "Insufficient data to determine conditions".to_string(),
            impacts: Vec::new(),
            phenomena: Vec::new(),
            insufficient_data: true,
        }
    }
}

struct Factor {
    level: RiskLevel,
    reason: String,
    impacts: Vec<String>,
}

pub const DEICING_MANDATORY: &str = "Mandatory de-icing of aircraft before departure";
pub const DEICING_ADVISORY: &str = "De-icing may be required before departure";
pub const GROUND_LEVEL_OBSCURATION: &str = "Zero vertical visibility, operations suspended";

fn below_minimums(snapshot: &WeatherSnapshot, t: &Thresholds) -> bool {
    snapshot.ground_level_obscuration()
        || snapshot
            .visibility_m
            .is_some_and(|v| v < t.visibility_minimum_m)
        || snapshot
            .effective_ceiling_ft()
            .is_some_and(|c| c < t.ceiling_minimum_ft)
}

fn phenomenon_level(p: &Phenomenon, below_minimums: bool) -> Option<RiskLevel> {
    let base = if p.is_freezing() || p.is_thunderstorm() || p.is_hazardous() {
        if below_minimums {
            RiskLevel::Severe
        } else {
            RiskLevel::Significant
        }
    } else {
        match p.category() {
            PhenomenonCategory::Snow
            | PhenomenonCategory::Rain
            | PhenomenonCategory::Fog
            | PhenomenonCategory::Mist => RiskLevel::Minor,
            _ => return None,
        }
    };
    let level = if p.intensity() == Intensity::Heavy {
        base.escalate()
    } else {
        base
    };
    // Weather in the vicinity is not at the aerodrome.
    Some(if p.in_vicinity() {
        level.min(RiskLevel::Minor)
    } else {
        level
    })
}

fn deicing_impact(phenomena: &[&Phenomenon]) -> Option<&'static str> {
    let icing: Vec<&Phenomenon> = phenomena
        .iter()
        .copied()
        .filter(|p| p.requires_deicing())
        .collect();
    if icing.is_empty() {
        return None;
    }
    // Freezing precipitation, or frozen precipitation that isn't light, contaminates the
    // airframe; freezing fog and light snow only may.
    let mandatory = icing.iter().any(|p| {
        if p.is_freezing() {
            p.family() != "FG"
        } else {
            p.intensity() != Intensity::Light
        }
    });
    Some(if mandatory {
        DEICING_MANDATORY
    } else {
        DEICING_ADVISORY
    })
}

fn phenomena_factor(snapshot: &WeatherSnapshot, t: &Thresholds) -> Option<(Factor, Vec<String>)> {
    let below = below_minimums(snapshot, t);
    let contributing: Vec<(&Phenomenon, RiskLevel)> = snapshot
        .phenomena
        .iter()
        .filter_map(|p| phenomenon_level(p, below).map(|level| (p, level)))
        .collect();
    let level = contributing.iter().map(|(_, level)| *level).max()?;
    let phenomena: Vec<&Phenomenon> = contributing.iter().map(|(p, _)| *p).collect();
    let on_site: Vec<&Phenomenon> = phenomena
        .iter()
        .copied()
        .filter(|p| !p.in_vicinity())
        .collect();

    let mut impacts = Vec::new();
    if on_site.iter().any(|p| p.is_freezing()) {
        impacts.push("Freezing conditions, risk of airframe and runway icing".to_string());
    }
    if on_site.iter().any(|p| p.is_thunderstorm()) {
        impacts.push(
            "Thunderstorm activity, ground handling may be suspended and departures delayed"
                .to_string(),
        );
    }
    if on_site.iter().any(|p| p.is_hazardous()) {
        impacts.push("Hazardous weather reported, operations may be restricted".to_string());
    }
    if on_site
        .iter()
        .any(|p| !p.is_freezing() && p.category() == PhenomenonCategory::Snow)
    {
        impacts.push("Snow on runways, expect clearing delays and reduced braking".to_string());
    }
    if let Some(deicing) = deicing_impact(&on_site) {
        impacts.push(deicing.to_string());
    }

    let descriptions: Vec<String> = phenomena.iter().map(|p| p.describe()).collect();
    let factor = Factor {
        level,
        reason: descriptions.join(", "),
        impacts,
    };
    Some((factor, descriptions))
}

fn visibility_factor(snapshot: &WeatherSnapshot, t: &Thresholds) -> Option<Factor> {
    let v = snapshot.visibility_m?;
    let (level, reason, impact) = if v < t.visibility_minimum_m {
        (
            RiskLevel::Severe,
            format!("Visibility {v} m below minimums"),
            "Visibility below landing minimums, arrivals may divert or hold",
        )
    } else if v < t.visibility_low_m {
        (
            RiskLevel::Significant,
            format!("Low visibility {v} m"),
            "Low visibility procedures in force, expect reduced arrival rates",
        )
    } else if v < t.visibility_reduced_m {
        (
            RiskLevel::Minor,
            format!("Reduced visibility {v} m"),
            "Reduced visibility, minor delays possible",
        )
    } else {
        return None;
    };
    Some(Factor {
        level,
        reason,
        impacts: vec![impact.to_string()],
    })
}

fn ceiling_factor(snapshot: &WeatherSnapshot, t: &Thresholds) -> Option<Factor> {
    // Checked before any numeric ceiling so that a zero base can never read as "no ceiling".
    if snapshot.ground_level_obscuration() {
        return Some(Factor {
            level: RiskLevel::Severe,
            reason: "Cloud at ground level".to_string(),
            impacts: vec![GROUND_LEVEL_OBSCURATION.to_string()],
        });
    }
    let c = snapshot.effective_ceiling_ft()?;
    let (level, reason, impact) = if c < t.ceiling_minimum_ft {
        (
            RiskLevel::Severe,
            format!("Ceiling {c} ft below minimums"),
            "Ceiling below approach minimums, arrivals may divert or hold",
        )
    } else if c < t.ceiling_low_ft {
        (
            RiskLevel::Significant,
            format!("Low ceiling {c} ft"),
            "Low ceiling, precision approaches only",
        )
    } else if c < t.ceiling_reduced_ft {
        (
            RiskLevel::Minor,
            format!("Ceiling {c} ft"),
            "Low cloud, expect instrument approaches",
        )
    } else {
        return None;
    };
    Some(Factor {
        level,
        reason,
        impacts: vec![impact.to_string()],
    })
}

fn wind_factor(snapshot: &WeatherSnapshot, t: &Thresholds) -> Option<Factor> {
    let wind = snapshot.wind?;
    let speed = wind.speed_kt;
    if speed >= t.wind_severe_kt {
        let (reason, impact) = match wind.gust_kt {
            Some(g) => (
                format!("Strong wind gusts {g} kt"),
                format!("Wind gusts up to {g} kt, crosswind limits may be exceeded"),
            ),
            None => (
                format!("Strong winds {speed} kt"),
                format!("Sustained wind {speed} kt, crosswind limits may be exceeded"),
            ),
        };
        return Some(Factor {
            level: RiskLevel::Significant,
            reason,
            impacts: vec![impact],
        });
    }
    if speed >= t.wind_strong_kt {
        let impact = match wind.gust_kt {
            Some(g) => format!("Wind gusts up to {g} kt, expect turbulence on approach"),
            None => format!("Sustained wind {speed} kt, expect turbulence on approach"),
        };
        return Some(Factor {
            level: RiskLevel::Minor,
            reason: format!("Strong winds {speed} kt"),
            impacts: vec![impact],
        });
    }
    // Below the strong threshold a gust alone never counts; it only qualifies a moderate wind.
    match wind.gust_kt {
        Some(g) if speed >= t.wind_moderate_gusty_kt => Some(Factor {
            level: RiskLevel::Minor,
            reason: format!("Moderate winds {speed} kt gusting {g} kt"),
            impacts: vec![format!("Wind gusts up to {g} kt, minor crosswind component")],
        }),
        _ => None,
    }
}

/// Classify a snapshot into a [`RiskAssessment`].
///
/// Reasons and impacts are listed in factor order: phenomena, visibility, ceiling, wind.
pub fn classify(snapshot: &WeatherSnapshot, thresholds: &Thresholds) -> RiskAssessment {
    if !snapshot.has_weather() {
        return RiskAssessment::insufficient();
    }

    let (phenomena, contributing) = match phenomena_factor(snapshot, thresholds) {
        Some((factor, descriptions)) => (Some(factor), descriptions),
        None => (None, Vec::new()),
    };
    let factors: Vec<Factor> = [
        phenomena,
        visibility_factor(snapshot, thresholds),
        ceiling_factor(snapshot, thresholds),
        wind_factor(snapshot, thresholds),
    ]
    .into_iter()
    .flatten()
    .filter(|f| f.level >= RiskLevel::Minor)
    .collect();

    let level = factors
        .iter()
        .map(|f| f.level)
        .max()
        .unwrap_or(RiskLevel::Favorable);

    let mut impacts: Vec<String> = Vec::new();
    for impact in factors.iter().flat_map(|f| &f.impacts) {
        if !impacts.contains(impact) {
            impacts.push(impact.clone());
        }
    }

    let message = if factors.is_empty() {
        "No significant weather affecting operations".to_string()
    } else {
        factors
            .iter()
            .map(|f| f.reason.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    };

    RiskAssessment {
        level,
        title: level.title().to_string(),
        message,
        impacts,
        phenomena: contributing,
        insufficient_data: false,
    }
}
