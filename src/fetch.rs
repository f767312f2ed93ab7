use std::collections::HashMap;

use anyhow::{bail, Context};
use chrono::{Duration, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::data::{
    ForecastPeriod, PeriodKind, WeatherSnapshot, Wind, WmoCode, SECONDARY_FORECAST_DAYS,
    UNLIMITED_VISIBILITY_M,
};
use crate::error::UpstreamError;
use crate::normalize::unwrap_envelope;
use crate::report::TimelineSources;

const CHECKWX_URL: &str = "https://api.checkwx.com";
const OPENMETEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub latitude: f64,
    pub longitude: f64,
}

/// Client for the decoded METAR/TAF provider.
#[derive(Debug, Clone)]
pub struct CheckWx {
    client: reqwest::Client,
    api_key: String,
}

impl CheckWx {
    pub fn new(api_key: impl Into<String>) -> Self {
        CheckWx {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Download the latest decoded observation for `icao`.
    pub async fn download_metar(&self, icao: &str) -> anyhow::Result<Value> {
        self.download_decoded("metar", icao).await
    }

    /// Download the current decoded aerodrome forecast for `icao`.
    pub async fn download_taf(&self, icao: &str) -> anyhow::Result<Value> {
        self.download_decoded("taf", icao).await
    }

    async fn download_decoded(&self, report: &str, icao: &str) -> anyhow::Result<Value> {
        let icao = icao.trim().to_ascii_uppercase();
        let response = self
            .client
            .get(format!("{CHECKWX_URL}/{report}/{icao}/decoded"))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .context("HTTP request failed")?;

        if !response.status().is_success() {
            bail!("API error: {}", response.status());
        }

        let body: Value = response.json().await.context("JSON parsing failed")?;
        // An unknown station comes back as a successful response with an empty list.
        if body.get("results").and_then(Value::as_u64) == Some(0) {
            bail!("no {report} available for {icao}");
        }
        debug!(report, %icao, "downloaded decoded report");
        Ok(body)
    }
}

/// Station position from a decoded observation (`station.geometry.coordinates`, GeoJSON
/// `[longitude, latitude]`).
pub fn station_coord(observation: &Value) -> Option<Coord> {
    let coordinates = unwrap_envelope(observation)
        .pointer("/station/geometry/coordinates")?
        .as_array()?;
    match coordinates.as_slice() {
        [lon, lat, ..] => Some(Coord {
            latitude: lat.as_f64()?,
            longitude: lon.as_f64()?,
        }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct HourlyResponse {
    timezone: chrono_tz::Tz,
    hourly: HourlyData,
}

#[derive(Debug, Deserialize)]
struct HourlyData {
    time: Vec<String>,
    #[serde(flatten)]
    data: HashMap<String, Vec<Value>>,
}

impl HourlyData {
    /// Remove `key` from data and deserialize its JSON array into `Vec<Option<T>>`.
    fn take_field_array<T: DeserializeOwned>(&mut self, key: &str) -> Vec<Option<T>> {
        self.data
            .remove(key)
            .and_then(|v| serde_json::from_value(Value::Array(v)).ok())
            .unwrap_or_default()
    }
}

/// Download the secondary hourly forecast from Open-Meteo as one-hour base periods.
pub async fn download_hourly(
    client: &reqwest::Client,
    coord: Coord,
) -> anyhow::Result<Vec<ForecastPeriod>> {
    #[derive(Serialize)]
    struct Query<'a> {
        latitude: f64,
        longitude: f64,
        hourly: &'a str,
        wind_speed_unit: &'a str,
        forecast_days: u8,
        timezone: &'a str,
    }

    let response = client
        .get(OPENMETEO_URL)
        .query(&Query {
            latitude: coord.latitude,
            longitude: coord.longitude,
            hourly: "temperature_2m,visibility,wind_speed_10m,wind_direction_10m,wind_gusts_10m,weather_code",
            wind_speed_unit: "kn",
            forecast_days: SECONDARY_FORECAST_DAYS,
            timezone: "auto",
        })
        .send()
        .await
        .context("HTTP request failed")?;

    if !response.status().is_success() {
        bail!("API error: {}", response.status());
    }

    let data: HourlyResponse = response.json().await.context("JSON parsing failed")?;
    hourly_periods(data)
}

fn knots(value: f64) -> u32 {
    value.max(0.0).round() as u32
}

fn hourly_periods(mut data: HourlyResponse) -> anyhow::Result<Vec<ForecastPeriod>> {
    let temps = data.hourly.take_field_array::<f64>("temperature_2m");
    let visibilities = data.hourly.take_field_array::<f64>("visibility");
    let speeds = data.hourly.take_field_array::<f64>("wind_speed_10m");
    let directions = data.hourly.take_field_array::<f64>("wind_direction_10m");
    let gusts = data.hourly.take_field_array::<f64>("wind_gusts_10m");
    let codes = data.hourly.take_field_array::<u8>("weather_code");

    let mut periods = Vec::with_capacity(data.hourly.time.len());
    for (i, t) in data.hourly.time.iter().enumerate() {
        let naive = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M")
            .with_context(|| format!("Failed to parse time {t:?}"))?;
        // Hours skipped by a DST transition don't exist locally.
        let Some(local) = data.timezone.from_local_datetime(&naive).earliest() else {
            continue;
        };
        let from = local.with_timezone(&Utc);

        let at = |values: &[Option<f64>]| values.get(i).copied().flatten();
        let wind = at(&speeds).map(|speed| Wind {
            direction_deg: at(&directions).map(|d| d.round() as u16 % 360),
            speed_kt: knots(speed),
            gust_kt: at(&gusts).map(knots).filter(|g| *g > knots(speed)),
        });
        let weather = WeatherSnapshot {
            time: Some(from),
            temperature_c: at(&temps),
            wind,
            visibility_m: at(&visibilities)
                .map(|v| (v.max(0.0).round() as u32).min(UNLIMITED_VISIBILITY_M)),
            phenomena: codes
                .get(i)
                .copied()
                .flatten()
                .and_then(|c| WmoCode(c).phenomenon())
                .into_iter()
                .collect(),
            ..Default::default()
        };
        if !weather.has_weather() {
            continue;
        }
        periods.push(ForecastPeriod {
            from,
            to: from + Duration::hours(1),
            kind: PeriodKind::Base,
            probability: None,
            weather,
        });
    }
    Ok(periods)
}

/// Download everything the timeline needs for `icao`.
///
/// The forecast is required. The observation is only used to locate the station for the
/// secondary source, so its failure, and any failure of the secondary source, is recorded
/// as [`UpstreamError::IncompleteUpstreamData`] and the timeline proceeds without it.
pub async fn fetch_timeline(
    checkwx: &CheckWx,
    icao: &str,
    with_secondary: bool,
) -> anyhow::Result<(Value, TimelineSources)> {
    let secondary = async {
        if !with_secondary {
            return Ok::<_, UpstreamError>(Vec::new());
        }
        let metar = checkwx
            .download_metar(icao)
            .await
            .map_err(|e| incomplete("metar", &e))?;
        let coord = station_coord(&metar).ok_or_else(|| UpstreamError::IncompleteUpstreamData {
            source_name: "metar".to_string(),
            reason: "station has no coordinates".to_string(),
        })?;
        download_hourly(&checkwx.client, coord)
            .await
            .map_err(|e| incomplete("open-meteo", &e))
    };

    let (taf, secondary) = tokio::join!(checkwx.download_taf(icao), secondary);
    let taf = taf.with_context(|| format!("Failed to download forecast for {icao}"))?;

    let mut sources = TimelineSources::default();
    match secondary {
        Ok(periods) => sources.secondary = periods,
        Err(e) => {
            warn!("{e}");
            sources.upstream_errors.push(e);
        }
    }
    Ok((taf, sources))
}

fn incomplete(source_name: &str, error: &anyhow::Error) -> UpstreamError {
    UpstreamError::IncompleteUpstreamData {
        source_name: source_name.to_string(),
        reason: format!("{error:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;

    #[test]
    fn station_coord_from_geojson() {
        let metar = json!({"results": 1, "data": [{
            "icao": "EFHK",
            "station": {"geometry": {"coordinates": [24.963301, 60.317200], "type": "Point"}},
        }]});
        assert_eq!(
            station_coord(&metar),
            Some(Coord {
                latitude: 60.3172,
                longitude: 24.963301,
            })
        );
        assert_eq!(station_coord(&json!({"icao": "EFHK"})), None);
        assert_eq!(
            station_coord(&json!({"station": {"geometry": {"coordinates": [24.9]}}})),
            None
        );
    }

    #[test]
    fn hourly_payload_to_periods() {
        let data: HourlyResponse = serde_json::from_value(json!({
            "latitude": 60.3,
            "longitude": 24.96,
            "timezone": "Europe/Helsinki",
            "hourly": {
                "time": ["2024-01-15T08:00", "2024-01-15T09:00", "2024-01-15T10:00"],
                "temperature_2m": [-4.2, -4.0, null],
                "visibility": [24140.0, 1800.0, null],
                "wind_speed_10m": [12.4, 21.0, null],
                "wind_direction_10m": [270.0, 360.0, null],
                "wind_gusts_10m": [11.0, 33.2, null],
                "weather_code": [3, 86, null],
            },
        }))
        .unwrap();
        let periods = hourly_periods(data).unwrap();
        // The last hour carries nothing and is skipped.
        assert_eq!(periods.len(), 2);

        let first = &periods[0];
        let expected: DateTime<Utc> = "2024-01-15T06:00:00Z".parse().unwrap();
        assert_eq!(first.from, expected);
        assert_eq!(first.to - first.from, Duration::hours(1));
        assert_eq!(first.kind, PeriodKind::Base);
        assert_eq!(first.weather.visibility_m, Some(UNLIMITED_VISIBILITY_M));
        // A "gust" below the mean wind isn't a gust.
        assert_eq!(first.weather.wind.unwrap().gust_kt, None);
        assert!(first.weather.phenomena.is_empty());

        let second = &periods[1].weather;
        assert_eq!(
            second.wind,
            Some(Wind {
                direction_deg: Some(0),
                speed_kt: 21,
                gust_kt: Some(33),
            })
        );
        assert_eq!(second.phenomena[0].code(), "+SHSN");
        assert_eq!(second.visibility_m, Some(1800));
    }

    #[test]
    fn hourly_payload_with_bad_time_fails() {
        let data: HourlyResponse = serde_json::from_value(json!({
            "timezone": "UTC",
            "hourly": {"time": ["yesterday"], "visibility": [1000.0]},
        }))
        .unwrap();
        let err = hourly_periods(data).unwrap_err();
        assert!(err.to_string().contains("Failed to parse time"));
    }

    #[test]
    fn incomplete_keeps_error_chain() {
        let err = anyhow::anyhow!("timed out").context("HTTP request failed");
        let upstream = incomplete("open-meteo", &err);
        assert_eq!(
            upstream.to_string(),
            "incomplete upstream data from open-meteo: HTTP request failed: timed out"
        );
    }
}
