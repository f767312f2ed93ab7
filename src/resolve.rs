//! Selection of the single authoritative forecast period for each hour.
//!
//! Forecast periods are a flat list whose validity windows may overlap: a base period spans
//! the whole forecast while temporary and probability periods nest inside it. For every hour
//! exactly one period is picked, by (a) temporary/probability before base/becoming, (b)
//! higher risk level, (c) declaration order.

use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use tracing::debug;

use crate::classify::{classify, RiskAssessment, RiskLevel};
use crate::config::Thresholds;
use crate::data::{ForecastPeriod, Phenomenon};

/// A forecast period together with its assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedPeriod {
    pub period: ForecastPeriod,
    pub risk: RiskAssessment,
}

/// Classify every period, keeping declaration order.
pub fn classify_periods(
    periods: Vec<ForecastPeriod>,
    thresholds: &Thresholds,
) -> Vec<ClassifiedPeriod> {
    periods
        .into_iter()
        .map(|period| {
            let risk = classify(&period.weather, thresholds);
            ClassifiedPeriod { period, risk }
        })
        .collect()
}

/// Pick the period that governs `hour`, or `None` when no period covers it.
pub fn resolve_hour(hour: DateTime<Utc>, periods: &[ClassifiedPeriod]) -> Option<&ClassifiedPeriod> {
    periods
        .iter()
        .enumerate()
        .filter(|(_, p)| p.period.covers(hour))
        .min_by_key(|(idx, p)| (!p.period.kind.is_specific(), Reverse(p.risk.level), *idx))
        .map(|(_, p)| p)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    /// The aerodrome forecast.
    Primary,
    /// A fallback hourly forecast filling hours the aerodrome forecast doesn't cover.
    Secondary,
}

/// One hour of the timeline and the period that governs it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlySample {
    pub time: DateTime<Utc>,
    pub source: SampleSource,
    pub period: ForecastPeriod,
    pub risk: RiskAssessment,
    pub phenomena: Vec<Phenomenon>,
    pub impacts: Vec<String>,
}

impl HourlySample {
    fn new(time: DateTime<Utc>, source: SampleSource, classified: &ClassifiedPeriod) -> Self {
        let mut phenomena: Vec<Phenomenon> = Vec::new();
        for p in &classified.period.weather.phenomena {
            if !phenomena.contains(p) {
                phenomena.push(p.clone());
            }
        }
        HourlySample {
            time,
            source,
            period: classified.period.clone(),
            risk: classified.risk.clone(),
            phenomena,
            impacts: classified.risk.impacts.clone(),
        }
    }

    pub fn level(&self) -> RiskLevel {
        self.risk.level
    }

    pub fn visibility_m(&self) -> Option<u32> {
        self.period.weather.visibility_m
    }
}

/// A run of consecutive whole hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    pub start: DateTime<Utc>,
    pub hours: u32,
}

impl HourWindow {
    /// Window of `hours` hours starting at the hour containing `start`.
    pub fn new(start: DateTime<Utc>, hours: u32) -> Self {
        let start = start.duration_trunc(Duration::hours(1)).unwrap_or(start);
        HourWindow { start, hours }
    }

    pub fn hours(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..self.hours).map(|h| self.start + Duration::hours(h.into()))
    }
}

/// Resolve every hour of `window` against `periods`. Uncovered hours are left out.
pub fn resolve_window(window: HourWindow, periods: &[ClassifiedPeriod]) -> Vec<HourlySample> {
    window
        .hours()
        .filter_map(|hour| match resolve_hour(hour, periods) {
            Some(p) => Some(HourlySample::new(hour, SampleSource::Primary, p)),
            None => {
                debug!(%hour, "no forecast period covers hour");
                None
            }
        })
        .collect()
}

/// Fill hours of `window` missing from `samples` using `fallback` periods. Hours that are
/// already covered are never replaced. The result is ordered by time.
pub fn fill_uncovered(
    mut samples: Vec<HourlySample>,
    window: HourWindow,
    fallback: &[ClassifiedPeriod],
) -> Vec<HourlySample> {
    let covered: HashSet<DateTime<Utc>> = samples.iter().map(|s| s.time).collect();
    let before = samples.len();
    samples.extend(
        window
            .hours()
            .filter(|hour| !covered.contains(hour))
            .filter_map(|hour| {
                resolve_hour(hour, fallback)
                    .map(|p| HourlySample::new(hour, SampleSource::Secondary, p))
            }),
    );
    debug!(filled = samples.len() - before, "filled uncovered hours");
    samples.sort_by_key(|s| s.time);
    samples
}
