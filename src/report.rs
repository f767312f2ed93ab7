//! Assembly of the two outputs handed to consumers: the current-conditions report and the
//! forecast timeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::classify::{classify, RiskAssessment};
use crate::config::Config;
use crate::data::{ForecastPeriod, WeatherSnapshot};
use crate::error::UpstreamError;
use crate::normalize::{normalize_forecast, normalize_observation, unwrap_envelope};
use crate::resolve::{classify_periods, fill_uncovered, resolve_window, HourWindow, HourlySample};
use crate::timeline::{group, DisplayGroup};

/// Shown instead of a risk when the observation couldn't be assessed.
pub const CONDITIONS_UNAVAILABLE: &str = "Could not determine conditions";

/// Either an assessment or an explicit statement that none could be made.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConditionsState {
    Assessed(RiskAssessment),
    Unavailable { reason: String },
}

impl ConditionsState {
    pub fn assessment(&self) -> Option<&RiskAssessment> {
        match self {
            ConditionsState::Assessed(risk) => Some(risk),
            ConditionsState::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
    pub observed: Option<DateTime<Utc>>,
    pub generated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentReport {
    pub airport: String,
    pub current_risk: ConditionsState,
    pub timestamps: Timestamps,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<WeatherSnapshot>,
}

/// Normalize and classify an observation, bare or inside its provider envelope. A malformed
/// observation yields an explicit unavailable state, never a favorable default.
pub fn current_report(
    airport: &str,
    raw_observation: &Value,
    config: &Config,
    generated: DateTime<Utc>,
) -> CurrentReport {
    let (current_risk, conditions) = match normalize_observation(unwrap_envelope(raw_observation)) {
        Ok(snapshot) => {
            let risk = classify(&snapshot, &config.thresholds);
            (ConditionsState::Assessed(risk), Some(snapshot))
        }
        Err(e) => {
            warn!(airport, error = %e, "observation could not be assessed");
            (ConditionsState::Unavailable { reason: e.to_string() }, None)
        }
    };
    CurrentReport {
        airport: airport.to_string(),
        timestamps: Timestamps {
            observed: conditions.as_ref().and_then(|c| c.time),
            generated,
        },
        current_risk,
        conditions,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineReport {
    pub airport: String,
    pub generated: DateTime<Utc>,
    pub groups: Vec<DisplayGroup>,
    /// Degraded inputs the timeline was built despite.
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub samples: Vec<HourlySample>,
}

/// Inputs for a timeline besides the aerodrome forecast itself.
#[derive(Debug, Clone, Default)]
pub struct TimelineSources {
    /// Hourly periods from the secondary source, used only for hours the forecast leaves
    /// uncovered.
    pub secondary: Vec<ForecastPeriod>,
    /// Non-fatal failures collected while fetching.
    pub upstream_errors: Vec<UpstreamError>,
}

/// Build the display timeline for `window` from a raw aerodrome forecast.
///
/// A forecast that can't be normalized is reported as a warning; the secondary source, if
/// any, still fills the window.
pub fn timeline_report(
    airport: &str,
    raw_forecast: &Value,
    sources: TimelineSources,
    window: HourWindow,
    config: &Config,
    generated: DateTime<Utc>,
) -> TimelineReport {
    let mut warnings: Vec<String> = sources
        .upstream_errors
        .iter()
        .map(ToString::to_string)
        .collect();

    let periods = match normalize_forecast(unwrap_envelope(raw_forecast)) {
        Ok(periods) => periods,
        Err(e) => {
            warn!(airport, error = %e, "forecast could not be normalized");
            warnings.push(format!("Forecast unavailable: {e}"));
            Vec::new()
        }
    };

    let primary = classify_periods(periods, &config.thresholds);
    let mut samples = resolve_window(window, &primary);
    if !sources.secondary.is_empty() {
        let fallback = classify_periods(sources.secondary, &config.thresholds);
        samples = fill_uncovered(samples, window, &fallback);
    }

    let missing = window.hours as usize - samples.len();
    if missing > 0 {
        warnings.push(format!(
            "{missing} of {} hours not covered by any forecast",
            window.hours
        ));
    }

    TimelineReport {
        airport: airport.to_string(),
        generated,
        groups: group(&samples, config),
        warnings,
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RiskLevel;
    use crate::data::{PeriodKind, WeatherSnapshot};
    use crate::resolve::SampleSource;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap() + Duration::hours(hour.into())
    }

    #[test]
    fn current_report_assessed() {
        let raw = json!({
            "icao": "EFHK",
            "observed": "2024-01-15T06:20:00Z",
            "visibility": {"meters": "100"},
            "ceiling": {"feet": 150},
            "conditions": [{"code": "+SHSN"}],
        });
        let report = current_report("EFHK", &raw, &Config::default(), at(7));
        let risk = report.current_risk.assessment().unwrap();
        assert_eq!(risk.level, RiskLevel::Severe);
        assert_eq!(
            report.timestamps.observed,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 6, 20, 0).unwrap())
        );

        let out = serde_json::to_value(&report).unwrap();
        assert_eq!(out["currentRisk"]["state"], "assessed");
        assert_eq!(out["currentRisk"]["level"], 4);
        assert_eq!(out["timestamps"]["generated"], "2024-01-15T07:00:00Z");
    }

    #[test]
    fn current_report_unavailable_is_explicit() {
        let raw = json!({"icao": "EFHK", "temperature": {"celsius": -3}});
        let report = current_report("EFHK", &raw, &Config::default(), at(7));
        assert!(report.current_risk.assessment().is_none());
        assert!(report.conditions.is_none());

        let out = serde_json::to_value(&report).unwrap();
        assert_eq!(out["currentRisk"]["state"], "unavailable");
        assert!(out["currentRisk"]["reason"]
            .as_str()
            .unwrap()
            .contains("malformed report"));
        assert!(out["timestamps"]["observed"].is_null());
    }

    fn taf() -> Value {
        json!({"data": [{
            "icao": "EFHK",
            "forecast": [
                {
                    "timestamp": {"from": "2024-01-15T00:00:00Z", "to": "2024-01-15T06:00:00Z"},
                    "visibility": {"meters": 9999},
                    "clouds": [{"code": "SCT", "base_feet_agl": 3000}],
                },
                {
                    "timestamp": {"from": "2024-01-15T02:00:00Z", "to": "2024-01-15T04:00:00Z"},
                    "change": {"indicator": {"code": "TEMPO"}},
                    "visibility": {"meters": 300},
                    "conditions": [{"code": "FZFG"}],
                },
            ],
        }]})
    }

    #[test]
    fn timeline_from_forecast() {
        let report = timeline_report(
            "EFHK",
            &taf(),
            TimelineSources::default(),
            HourWindow::new(at(0), 6),
            &Config::default(),
            at(0),
        );
        assert!(report.warnings.is_empty());
        assert_eq!(report.samples.len(), 6);
        let levels: Vec<u8> = report.groups.iter().map(|g| g.level.value()).collect();
        assert_eq!(levels, vec![1, 4, 1]);
        assert_eq!(report.groups[1].start, at(2));
        assert_eq!(report.groups[1].end, at(4));
        assert_eq!(report.groups[1].phenomena, vec!["Freezing fog"]);
        assert_eq!(report.groups[1].visibility_m, Some(300));

        let out = serde_json::to_value(&report).unwrap();
        assert!(out.get("samples").is_none());
        assert!(out["groups"][1].get("members").is_none());
        assert_eq!(out["groups"][1]["minLevel"], 4);
    }

    fn secondary_hour(hour: u32) -> ForecastPeriod {
        ForecastPeriod {
            from: at(hour),
            to: at(hour + 1),
            kind: PeriodKind::Base,
            probability: None,
            weather: WeatherSnapshot {
                visibility_m: Some(2000),
                ..Default::default()
            },
        }
    }

    #[test]
    fn secondary_source_fills_tail_and_warnings_are_kept() {
        let sources = TimelineSources {
            secondary: (0..10).map(secondary_hour).collect(),
            upstream_errors: vec![UpstreamError::IncompleteUpstreamData {
                source_name: "metar".to_string(),
                reason: "timeout".to_string(),
            }],
        };
        let report = timeline_report(
            "EFHK",
            &taf(),
            sources,
            HourWindow::new(at(0), 8),
            &Config::default(),
            at(0),
        );
        assert_eq!(report.samples.len(), 8);
        assert_eq!(report.samples[5].source, SampleSource::Primary);
        assert_eq!(report.samples[6].source, SampleSource::Secondary);
        assert!(report.groups.last().unwrap().secondary_source);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("timeout"));
    }

    #[test]
    fn broken_forecast_reported_not_defaulted() {
        let report = timeline_report(
            "EFHK",
            &json!({"data": []}),
            TimelineSources::default(),
            HourWindow::new(at(0), 4),
            &Config::default(),
            at(0),
        );
        assert!(report.groups.is_empty());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].starts_with("Forecast unavailable"));
        assert_eq!(report.warnings[1], "4 of 4 hours not covered by any forecast");
    }
}
