//! Conversion of decoded provider records into [`WeatherSnapshot`] and [`ForecastPeriod`].
//!
//! Two provider dialects are accepted, resolved through the alias tables below rather than
//! by guessing at the shape at runtime. Each table lists the accepted JSON paths in order of
//! preference; the first path whose value is present, non-null and of the expected type
//! wins. A numeric zero is a value like any other.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::data::{
    CloudLayer, Coverage, ForecastPeriod, PeriodKind, Phenomenon, WeatherSnapshot, Wind,
    UNLIMITED_VISIBILITY_M,
};
use crate::error::NormalizeError;

type Aliases = &'static [&'static [&'static str]];

const STATION: Aliases = &[&["icao"], &["station_id"], &["station", "icao"]];
const OBSERVED: Aliases = &[&["observed"], &["observation_time"], &["time"]];
const TEMPERATURE: Aliases = &[&["temperature", "celsius"], &["temperature"]];
const DEWPOINT: Aliases = &[&["dewpoint", "celsius"], &["dewpoint"]];
const PRESSURE: Aliases = &[&["barometer", "hpa"], &["barometer", "mb"], &["pressure"]];
const WIND_DIRECTION: Aliases = &[&["wind", "degrees"], &["wind", "direction"]];
const WIND_SPEED: Aliases = &[&["wind", "speed_kts"], &["wind", "speed"]];
const WIND_GUST: Aliases = &[&["wind", "gust_kts"], &["wind", "gust"]];
const VISIBILITY: Aliases = &[
    &["visibility", "meters_float"],
    &["visibility", "meters"],
    &["visibility"],
];
const CEILING: Aliases = &[&["ceiling", "base_feet_agl"], &["ceiling", "feet"]];
const VERTICAL_VISIBILITY: Aliases = &[
    &["vertical_visibility", "feet"],
    &["vertical_visibility"],
];
const CLOUDS: Aliases = &[&["clouds"]];
const CLOUD_COVERAGE: Aliases = &[&["code"], &["cover"]];
const CLOUD_BASE: Aliases = &[&["base_feet_agl"], &["feet"], &["base"]];
const CONDITIONS: Aliases = &[&["conditions"]];
const PHENOMENA: Aliases = &[&["phenomena"]];
const WEATHER_STRING: Aliases = &[&["weather"], &["wx_string"]];
const RAW_TEXT: Aliases = &[&["raw_text"], &["raw"]];
const PERIOD_FROM: Aliases = &[&["timestamp", "from"], &["from"]];
const PERIOD_TO: Aliases = &[&["timestamp", "to"], &["to"]];
const CHANGE_INDICATOR: Aliases = &[
    &["change", "indicator", "code"],
    &["change", "indicator"],
    &["change"],
];
const PROBABILITY: Aliases = &[&["change", "probability"], &["probability"]];
const FORECAST_PERIODS: Aliases = &[&["forecast"], &["periods"]];

/// First present, non-null value among `aliases` that `convert` accepts.
fn resolve<'a, T>(
    raw: &'a Value,
    aliases: Aliases,
    convert: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    aliases.iter().find_map(|path| {
        let value = path.iter().try_fold(raw, |v, key| v.get(key))?;
        if value.is_null() {
            None
        } else {
            convert(value)
        }
    })
}

/// Accept a JSON number or a numeric string such as `"9,999"` or `"10000+"`.
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s
            .trim()
            .trim_end_matches('+')
            .replace(',', "")
            .parse::<f64>()
            .ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Non-negative quantity rounded to a whole unit.
fn as_count(value: &Value) -> Option<u32> {
    as_number(value)
        .filter(|n| *n >= 0.0)
        .map(|n| n.round().min(u32::MAX as f64) as u32)
}

fn as_text(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse RFC 3339, naive ISO 8601 (taken as UTC) or Unix seconds.
fn as_time(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value.as_i64() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    let s = as_text(value)?;
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Return the single report inside a provider envelope (`{"data": [...]}`) or a bare array.
pub fn unwrap_envelope(raw: &Value) -> &Value {
    let inner = raw.get("data").unwrap_or(raw);
    match inner {
        Value::Array(items) => items.first().unwrap_or(inner),
        other => other,
    }
}

static CLOUD_GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(FEW|SCT|BKN|OVC)(\d{3}|///)").expect("valid cloud group regex")
});

static CLEAR_SKY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(SKC|CLR|NSC|NCD|CAVOK)\b").expect("valid clear sky regex"));

static VERTICAL_VISIBILITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bVV(\d{3})\b").expect("valid vertical visibility regex"));

static METRIC_VISIBILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        (?:KT|MPS)              # end of the wind group
        (?:\s+\d{3}V\d{3})?     # optional variable direction group
        \s+
        (\d{4})                 # prevailing visibility in meters
        (?:NDV)?
        (?:\s|$)
    "#,
    )
    .expect("valid metric visibility regex")
});

static STATUTE_VISIBILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        (?:^|\s)
        (P|M)?                  # more than / less than
        (?:(\d+)\s)?            # whole miles before a fraction
        (\d+)                   # miles, or fraction numerator
        (?:/(\d+))?             # fraction denominator
        SM
        (?:\s|$)
    "#,
    )
    .expect("valid statute visibility regex")
});

const METERS_PER_STATUTE_MILE: f64 = 1609.344;

static TREND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(TEMPO|BECMG|NOSIG|RMK)\b").expect("valid trend regex"));

/// The observed-conditions part of a METAR, without the trend forecast and remarks.
fn observed_part(raw: &str) -> &str {
    TREND_RE.find(raw).map_or(raw, |m| &raw[..m.start()])
}

/// Cloud layers encoded in raw text; `VV` is handled separately as vertical visibility.
fn raw_cloud_layers(raw: &str) -> Vec<CloudLayer> {
    let mut layers: Vec<CloudLayer> = CLOUD_GROUP_RE
        .captures_iter(raw)
        .filter_map(|caps| {
            let coverage = Coverage::from_code(&caps[1])?;
            let base_ft = caps[2].parse::<u32>().ok().map(|h| h * 100);
            Some(CloudLayer { coverage, base_ft })
        })
        .collect();
    if layers.is_empty() {
        if let Some(caps) = CLEAR_SKY_RE.captures(raw) {
            layers.extend(Coverage::from_code(&caps[1]).map(|coverage| CloudLayer {
                coverage,
                base_ft: None,
            }));
        }
    }
    layers
}

fn raw_vertical_visibility(raw: &str) -> Option<u32> {
    let caps = VERTICAL_VISIBILITY_RE.captures(raw)?;
    caps[1].parse::<u32>().ok().map(|h| h * 100)
}

fn raw_visibility(raw: &str) -> Option<u32> {
    if raw.split_whitespace().any(|group| group == "CAVOK") {
        return Some(UNLIMITED_VISIBILITY_M);
    }
    if let Some(caps) = METRIC_VISIBILITY_RE.captures(raw) {
        let meters: u32 = caps[1].parse().ok()?;
        return Some(if meters >= 9999 {
            UNLIMITED_VISIBILITY_M
        } else {
            meters
        });
    }
    let caps = STATUTE_VISIBILITY_RE.captures(raw)?;
    if caps.get(1).map(|m| m.as_str()) == Some("P") {
        return Some(UNLIMITED_VISIBILITY_M);
    }
    let whole: f64 = caps.get(2).map_or(Some(0.0), |m| m.as_str().parse().ok())?;
    let numerator: f64 = caps[3].parse().ok()?;
    let miles = match caps.get(4) {
        Some(den) => {
            let den: f64 = den.as_str().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            whole + numerator / den
        }
        None => numerator,
    };
    let meters = (miles * METERS_PER_STATUTE_MILE).round() as u32;
    Some(meters.min(UNLIMITED_VISIBILITY_M))
}

fn cloud_layers(raw: &Value) -> Option<Vec<CloudLayer>> {
    resolve(raw, CLOUDS, |v| v.as_array()).map(|layers| {
        layers
            .iter()
            .filter_map(|layer| {
                let coverage = resolve(layer, CLOUD_COVERAGE, as_text)
                    .and_then(Coverage::from_code)?;
                let base_ft = resolve(layer, CLOUD_BASE, as_count);
                Some(CloudLayer { coverage, base_ft })
            })
            .collect()
    })
}

fn phenomena(raw: &Value) -> Vec<Phenomenon> {
    let codes: Vec<String> = if let Some(conditions) = resolve(raw, CONDITIONS, |v| v.as_array())
    {
        conditions
            .iter()
            .filter_map(|c| c.get("code").and_then(as_text).map(str::to_string))
            .collect()
    } else if let Some(list) = resolve(raw, PHENOMENA, |v| v.as_array()) {
        list.iter()
            .filter_map(|c| as_text(c).map(str::to_string))
            .collect()
    } else if let Some(s) = resolve(raw, WEATHER_STRING, as_text) {
        s.split_whitespace().map(str::to_string).collect()
    } else {
        Vec::new()
    };
    let mut out: Vec<Phenomenon> = Vec::new();
    for phenomenon in codes.iter().filter_map(|c| Phenomenon::new(c)) {
        if !out.contains(&phenomenon) {
            out.push(phenomenon);
        }
    }
    out
}

fn wind(raw: &Value) -> Option<Wind> {
    let speed_kt = resolve(raw, WIND_SPEED, as_count)?;
    // A textual direction such as "VRB" resolves to no direction.
    let direction_deg = resolve(raw, WIND_DIRECTION, as_count)
        .filter(|d| *d <= 360)
        .map(|d| d as u16);
    let gust_kt = resolve(raw, WIND_GUST, as_count);
    Some(Wind {
        direction_deg,
        speed_kt,
        gust_kt,
    })
}

#[derive(Clone, Copy)]
enum ReportKind {
    Observation,
    ForecastPeriod,
}

/// Build a snapshot from the weather fields of an observation or forecast period. Never
/// fails; callers decide whether the result carries enough data.
fn snapshot(raw: &Value, kind: ReportKind) -> WeatherSnapshot {
    let raw_text = resolve(raw, RAW_TEXT, as_text).map(str::to_string);
    // A forecast period's own text starts with its change group, so only observations are cut.
    let text = match kind {
        ReportKind::Observation => raw_text.as_deref().map(observed_part),
        ReportKind::ForecastPeriod => raw_text.as_deref(),
    };

    let clouds = match cloud_layers(raw) {
        Some(layers) => layers,
        None => text.map(raw_cloud_layers).unwrap_or_default(),
    };

    let vertical_visibility_ft = resolve(raw, VERTICAL_VISIBILITY, as_count)
        .or_else(|| text.and_then(raw_vertical_visibility))
        .or_else(|| {
            clouds
                .iter()
                .find(|l| l.coverage == Coverage::Obscured)
                .and_then(|l| l.base_ft)
        });

    let ceiling_ft = resolve(raw, CEILING, as_count).or_else(|| {
        clouds
            .iter()
            .filter(|l| l.coverage.is_ceiling())
            .filter_map(|l| l.base_ft)
            .min()
    });

    let visibility_m = resolve(raw, VISIBILITY, as_count)
        .or_else(|| text.and_then(raw_visibility))
        .map(|v| if v >= 9999 { UNLIMITED_VISIBILITY_M } else { v });

    WeatherSnapshot {
        station: resolve(raw, STATION, as_text).map(str::to_string),
        time: resolve(raw, OBSERVED, as_time),
        temperature_c: resolve(raw, TEMPERATURE, as_number),
        dewpoint_c: resolve(raw, DEWPOINT, as_number),
        pressure_hpa: resolve(raw, PRESSURE, as_number),
        wind: wind(raw),
        visibility_m,
        ceiling_ft,
        vertical_visibility_ft,
        clouds,
        phenomena: phenomena(raw),
        raw_text,
    }
}

/// Normalize a decoded observation.
///
/// Fails with [`NormalizeError::MalformedReport`] when neither the structured fields nor the
/// raw text yield a visibility, ceiling, vertical visibility, cloud layer or phenomenon.
pub fn normalize_observation(raw: &Value) -> Result<WeatherSnapshot, NormalizeError> {
    let snapshot = snapshot(raw, ReportKind::Observation);
    if !snapshot.has_sky_data() {
        return Err(NormalizeError::MalformedReport(
            "no visibility, ceiling, cloud or weather could be determined".to_string(),
        ));
    }
    debug!(
        station = snapshot.station.as_deref().unwrap_or("?"),
        visibility = ?snapshot.visibility_m,
        ceiling = ?snapshot.ceiling_ft,
        "normalized observation"
    );
    Ok(snapshot)
}

/// Normalize one forecast period.
pub fn normalize_period(raw: &Value) -> Result<ForecastPeriod, NormalizeError> {
    let (Some(from), Some(to)) = (
        resolve(raw, PERIOD_FROM, as_time),
        resolve(raw, PERIOD_TO, as_time),
    ) else {
        return Err(NormalizeError::MalformedReport(
            "forecast period without validity window".to_string(),
        ));
    };
    if from >= to {
        return Err(NormalizeError::MalformedReport(format!(
            "forecast period ends ({to}) before it starts ({from})"
        )));
    }

    let probability = resolve(raw, PROBABILITY, as_count).map(|p| p.min(100) as u8);
    let indicator = resolve(raw, CHANGE_INDICATOR, as_text);
    let kind = PeriodKind::from_indicator(indicator, probability);

    let mut weather = snapshot(raw, ReportKind::ForecastPeriod);
    if !weather.has_weather() {
        return Err(NormalizeError::MalformedReport(format!(
            "{} period {from}..{to} carries no weather",
            kind.label()
        )));
    }
    weather.time.get_or_insert(from);

    Ok(ForecastPeriod {
        from,
        to,
        kind,
        probability,
        weather,
    })
}

/// Normalize a decoded forecast into its periods, in declaration order.
///
/// Individual malformed periods are dropped with a warning; the forecast as a whole is
/// malformed only when no usable period remains.
pub fn normalize_forecast(raw: &Value) -> Result<Vec<ForecastPeriod>, NormalizeError> {
    let items = match raw {
        Value::Array(items) => items.as_slice(),
        _ => resolve(raw, FORECAST_PERIODS, |v| v.as_array())
            .map(Vec::as_slice)
            .ok_or_else(|| {
                NormalizeError::MalformedReport("forecast has no period list".to_string())
            })?,
    };
    let station = resolve(raw, STATION, as_text);

    let mut periods = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match normalize_period(item) {
            Ok(mut period) => {
                if period.weather.station.is_none() {
                    period.weather.station = station.map(str::to_string);
                }
                periods.push(period);
            }
            Err(e) => warn!(period = idx, "dropping forecast period: {e}"),
        }
    }
    if periods.is_empty() {
        return Err(NormalizeError::MalformedReport(
            "forecast contains no usable period".to_string(),
        ));
    }
    Ok(periods)
}
