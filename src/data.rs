use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Days of hourly data requested from the secondary forecast source.
pub const SECONDARY_FORECAST_DAYS: u8 = 3;

/// Visibility reported as "10 km or more" is stored as this value.
pub const UNLIMITED_VISIBILITY_M: u32 = 10_000;

/// Coverage of a reported cloud layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coverage {
    /// SKC, CLR, NSC, NCD or CAVOK: an explicit report that no significant cloud is present.
    #[serde(rename = "CLR")]
    Clear,
    #[serde(rename = "FEW")]
    Few,
    #[serde(rename = "SCT")]
    Scattered,
    #[serde(rename = "BKN")]
    Broken,
    #[serde(rename = "OVC")]
    Overcast,
    /// OVX or VV: sky obscured, base is a vertical visibility.
    #[serde(rename = "OVX")]
    Obscured,
}

impl Coverage {
    pub fn from_code(code: &str) -> Option<Coverage> {
        match code.trim().to_ascii_uppercase().as_str() {
            "SKC" | "CLR" | "NSC" | "NCD" | "CAVOK" => Some(Coverage::Clear),
            "FEW" => Some(Coverage::Few),
            "SCT" => Some(Coverage::Scattered),
            "BKN" => Some(Coverage::Broken),
            "OVC" => Some(Coverage::Overcast),
            "OVX" | "VV" => Some(Coverage::Obscured),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Coverage::Clear => "CLR",
            Coverage::Few => "FEW",
            Coverage::Scattered => "SCT",
            Coverage::Broken => "BKN",
            Coverage::Overcast => "OVC",
            Coverage::Obscured => "OVX",
        }
    }

    /// Broken, overcast and obscured layers form a ceiling.
    pub fn is_ceiling(self) -> bool {
        matches!(
            self,
            Coverage::Broken | Coverage::Overcast | Coverage::Obscured
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudLayer {
    pub coverage: Coverage,
    /// Base above ground level in feet. Zero is a valid, ground-level base.
    pub base_ft: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wind {
    /// `None` for variable direction.
    pub direction_deg: Option<u16>,
    pub speed_kt: u32,
    pub gust_kt: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Intensity {
    Light,
    Moderate,
    Heavy,
}

/// Ranking category of a phenomenon. The numeric priority of each category lives in
/// [`crate::config::PhenomenaPriority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhenomenonCategory {
    Freezing,
    Thunderstorm,
    Snow,
    Rain,
    Fog,
    Mist,
    Other,
}

const DESCRIPTORS: [&str; 8] = ["MI", "PR", "BC", "DR", "BL", "SH", "TS", "FZ"];

/// Weather phenomenon code as reported, e.g. `+SHSN`, `FZFG`, `-RA`, `VCTS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Phenomenon(String);

impl TryFrom<String> for Phenomenon {
    type Error = String;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Phenomenon::new(&code).ok_or_else(|| format!("invalid phenomenon code {code:?}"))
    }
}

impl From<Phenomenon> for String {
    fn from(phenomenon: Phenomenon) -> String {
        phenomenon.0
    }
}

impl Phenomenon {
    /// Validate and canonicalize a code. Returns `None` for empty input, for "no significant
    /// weather" (`NSW`) and for anything that isn't a sequence of two-letter groups.
    pub fn new(code: &str) -> Option<Phenomenon> {
        let code = code.trim().to_ascii_uppercase();
        let body = code
            .strip_prefix(|c: char| c == '+' || c == '-')
            .unwrap_or(&code)
            .trim_start_matches("RE");
        let body = body.strip_prefix("VC").unwrap_or(body);
        if body.is_empty()
            || body == "NSW"
            || body.len() % 2 != 0
            || !body.bytes().all(|b| b.is_ascii_uppercase())
        {
            return None;
        }
        Some(Phenomenon(code))
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn intensity(&self) -> Intensity {
        match self.0.as_bytes().first() {
            Some(b'+') => Intensity::Heavy,
            Some(b'-') => Intensity::Light,
            _ => Intensity::Moderate,
        }
    }

    pub fn in_vicinity(&self) -> bool {
        self.without_intensity().starts_with("VC")
    }

    fn without_intensity(&self) -> &str {
        self.0
            .strip_prefix(|c: char| c == '+' || c == '-')
            .unwrap_or(&self.0)
            .trim_start_matches("RE")
    }

    /// Two-letter groups after intensity, recency and vicinity prefixes.
    fn groups(&self) -> impl Iterator<Item = &str> {
        let body = self.without_intensity();
        let body = body.strip_prefix("VC").unwrap_or(body);
        (0..body.len() / 2).map(move |i| &body[i * 2..i * 2 + 2])
    }

    fn descriptor(&self) -> Option<&str> {
        self.groups().next().filter(|g| DESCRIPTORS.contains(g))
    }

    fn weather_groups(&self) -> impl Iterator<Item = &str> {
        self.groups().filter(|g| !DESCRIPTORS.contains(g))
    }

    fn has_group(&self, group: &str) -> bool {
        self.groups().any(|g| g == group)
    }

    pub fn is_freezing(&self) -> bool {
        self.descriptor() == Some("FZ")
    }

    pub fn is_thunderstorm(&self) -> bool {
        self.has_group("TS")
    }

    /// Freezing precipitation/fog or frozen precipitation that contaminates airframes. Weather
    /// in the vicinity never falls on the aerodrome itself.
    pub fn requires_deicing(&self) -> bool {
        !self.in_vicinity()
            && (self.is_freezing()
                || self
                    .weather_groups()
                    .any(|g| matches!(g, "SN" | "SG" | "PL" | "GS")))
    }

    /// Funnel cloud, volcanic ash, squalls, sand- and duststorms.
    pub fn is_hazardous(&self) -> bool {
        self.weather_groups()
            .any(|g| matches!(g, "FC" | "VA" | "SQ" | "SS" | "DS"))
    }

    pub fn category(&self) -> PhenomenonCategory {
        if self.is_freezing() {
            return PhenomenonCategory::Freezing;
        }
        if self.is_thunderstorm() {
            return PhenomenonCategory::Thunderstorm;
        }
        let groups: Vec<&str> = self.weather_groups().collect();
        let any = |codes: &[&str]| groups.iter().any(|g| codes.contains(g));
        if any(&["SN", "SG", "PL", "GS", "GR", "IC"]) {
            PhenomenonCategory::Snow
        } else if any(&["RA", "DZ", "UP"]) {
            PhenomenonCategory::Rain
        } else if any(&["FG"]) {
            PhenomenonCategory::Fog
        } else if any(&["BR"]) {
            PhenomenonCategory::Mist
        } else {
            PhenomenonCategory::Other
        }
    }

    /// Family used for deduplication: the first weather group, ignoring descriptors, so that
    /// `FZFG` and `FG` (or `FZRA`, `-RA` and `+RA`) fall in the same family.
    pub fn family(&self) -> &str {
        self.weather_groups()
            .next()
            .or_else(|| self.groups().next())
            .unwrap_or(self.0.as_str())
    }

    /// Human-readable description, e.g. "Heavy snow showers" for `+SHSN`.
    pub fn describe(&self) -> String {
        let names: Vec<&str> = self.weather_groups().map(weather_name).collect();
        let weather = names.join(" and ");
        let core = match (self.descriptor(), weather.is_empty()) {
            (Some("TS"), true) => "thunderstorm".to_string(),
            (Some("TS"), false) => format!("thunderstorm with {weather}"),
            (Some("SH"), true) => "showers".to_string(),
            (Some("SH"), false) => format!("{weather} showers"),
            (Some(d), _) => format!("{} {weather}", descriptor_name(d))
                .trim_end()
                .to_string(),
            (None, _) => weather,
        };
        let prefix = match self.intensity() {
            Intensity::Light => "light ",
            Intensity::Moderate => "",
            Intensity::Heavy => "heavy ",
        };
        let suffix = if self.in_vicinity() {
            " in the vicinity"
        } else {
            ""
        };
        capitalize(&format!("{prefix}{core}{suffix}"))
    }
}

impl fmt::Display for Phenomenon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn descriptor_name(code: &str) -> &str {
    match code {
        "MI" => "shallow",
        "PR" => "partial",
        "BC" => "patches of",
        "DR" => "drifting",
        "BL" => "blowing",
        "FZ" => "freezing",
        other => other,
    }
}

fn weather_name(code: &str) -> &str {
    match code {
        "DZ" => "drizzle",
        "RA" => "rain",
        "SN" => "snow",
        "SG" => "snow grains",
        "IC" => "ice crystals",
        "PL" => "ice pellets",
        "GR" => "hail",
        "GS" => "small hail",
        "UP" => "unknown precipitation",
        "BR" => "mist",
        "FG" => "fog",
        "FU" => "smoke",
        "VA" => "volcanic ash",
        "DU" => "dust",
        "SA" => "sand",
        "HZ" => "haze",
        "PY" => "spray",
        "PO" => "dust whirls",
        "SQ" => "squalls",
        "FC" => "funnel cloud",
        "SS" => "sandstorm",
        "DS" => "duststorm",
        other => other,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// WMO weather code as reported by the secondary hourly source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WmoCode(pub u8);

impl WmoCode {
    /// Map the WMO code to the equivalent METAR phenomenon, if the code describes one.
    pub fn phenomenon(self) -> Option<Phenomenon> {
        let code = match self.0 {
            45 => "FG",
            48 => "FZFG", // Depositing rime fog
            51 => "-DZ",
            53 => "DZ",
            55 => "+DZ",
            56 => "-FZDZ",
            57 => "FZDZ",
            61 => "-RA",
            63 => "RA",
            65 => "+RA",
            66 => "-FZRA",
            67 => "FZRA",
            71 => "-SN",
            73 => "SN",
            75 => "+SN",
            77 => "SG",
            80 => "-SHRA",
            81 => "SHRA",
            82 => "+SHRA",
            85 => "-SHSN",
            86 => "+SHSN",
            95 => "TSRA",
            96 => "TSGR",
            99 => "+TSGR",
            _ => return None,
        };
        Phenomenon::new(code)
    }
}

/// Canonical weather record for a point in time (an observation) or for a forecast period.
///
/// Every numeric field distinguishes "not reported" (`None`) from a reported zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub station: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub temperature_c: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind: Option<Wind>,
    pub visibility_m: Option<u32>,
    /// Lowest broken/overcast base in feet.
    pub ceiling_ft: Option<u32>,
    pub vertical_visibility_ft: Option<u32>,
    pub clouds: Vec<CloudLayer>,
    pub phenomena: Vec<Phenomenon>,
    pub raw_text: Option<String>,
}

impl WeatherSnapshot {
    /// Whether anything that bears on visibility, ceiling or significant weather is known.
    pub fn has_sky_data(&self) -> bool {
        self.visibility_m.is_some()
            || self.ceiling_ft.is_some()
            || self.vertical_visibility_ft.is_some()
            || !self.clouds.is_empty()
            || !self.phenomena.is_empty()
    }

    /// Whether any classifiable field is known at all.
    pub fn has_weather(&self) -> bool {
        self.has_sky_data() || self.wind.is_some()
    }

    /// A ceiling-forming layer with its base on the ground, or a zero vertical visibility.
    pub fn ground_level_obscuration(&self) -> bool {
        self.vertical_visibility_ft == Some(0)
            || self
                .clouds
                .iter()
                .any(|l| l.coverage.is_ceiling() && l.base_ft == Some(0))
    }

    /// Lowest of the ceiling, the ceiling-forming layers and the vertical visibility.
    pub fn effective_ceiling_ft(&self) -> Option<u32> {
        let layers = self
            .clouds
            .iter()
            .filter(|l| l.coverage.is_ceiling())
            .filter_map(|l| l.base_ft);
        self.ceiling_ft
            .into_iter()
            .chain(self.vertical_visibility_ft)
            .chain(layers)
            .min()
    }
}

/// Change indicator of a forecast period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeriodKind {
    /// Initial conditions or an `FM` group: persistent until the next base period.
    Base,
    #[serde(rename = "BECMG")]
    Becoming,
    #[serde(rename = "TEMPO")]
    Temporary,
    #[serde(rename = "PROB")]
    Probability,
}

impl PeriodKind {
    /// Interpret an upstream change indicator. A probability without `TEMPO` is a plain
    /// probability group; `PROB30 TEMPO` stays temporary.
    pub fn from_indicator(indicator: Option<&str>, probability: Option<u8>) -> PeriodKind {
        let indicator = indicator.map(|s| s.trim().to_ascii_uppercase());
        match indicator.as_deref() {
            Some(s) if s.contains("TEMPO") || s == "INTER" => PeriodKind::Temporary,
            Some("BECMG") => PeriodKind::Becoming,
            Some(s) if s.starts_with("PROB") => PeriodKind::Probability,
            _ if probability.is_some() => PeriodKind::Probability,
            _ => PeriodKind::Base,
        }
    }

    /// Temporary and probability periods describe short-lived exceptions to the trend and
    /// take precedence over it.
    pub fn is_specific(self) -> bool {
        matches!(self, PeriodKind::Temporary | PeriodKind::Probability)
    }

    pub fn label(self) -> &'static str {
        match self {
            PeriodKind::Base => "BASE",
            PeriodKind::Becoming => "BECMG",
            PeriodKind::Temporary => "TEMPO",
            PeriodKind::Probability => "PROB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub kind: PeriodKind,
    pub probability: Option<u8>,
    pub weather: WeatherSnapshot,
}

impl ForecastPeriod {
    /// Whether `time` falls in `[from, to)`.
    pub fn covers(&self, time: DateTime<Utc>) -> bool {
        self.from <= time && time < self.to
    }
}

/// Format an optional visibility value.
pub fn format_visibility(visibility: Option<u32>) -> String {
    match visibility {
        Some(v) if v >= UNLIMITED_VISIBILITY_M => "10km+".to_string(),
        Some(v) if v >= 5000 => format!("{}km", v / 1000),
        Some(v) => format!("{v}m"),
        None => "-".to_string(),
    }
}

/// Format an optional ceiling value.
pub fn format_ceiling(ceiling: Option<u32>) -> String {
    match ceiling {
        Some(c) => format!("{c}ft"),
        None => "-".to_string(),
    }
}

/// Format optional wind as `dddssGggkt`, e.g. `27018G30kt`.
pub fn format_wind(wind: Option<&Wind>) -> String {
    let Some(wind) = wind else {
        return "-".to_string();
    };
    let direction = match wind.direction_deg {
        Some(d) => format!("{d:03}"),
        None => "VRB".to_string(),
    };
    match wind.gust_kt {
        Some(g) => format!("{direction}{:02}G{g:02}kt", wind.speed_kt),
        None => format!("{direction}{:02}kt", wind.speed_kt),
    }
}

/// Format an optional temperature value.
pub fn format_temp(temp: Option<f64>) -> String {
    match temp {
        // as i32 so -0.1 doesn't show up as -0
        Some(t) => format!("{}°", t.round() as i32),
        None => "-".to_string(),
    }
}
