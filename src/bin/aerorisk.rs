use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aerorisk::config::Config;
use aerorisk::data::{format_ceiling, format_temp, format_visibility, format_wind};
use aerorisk::fetch::{fetch_timeline, CheckWx};
use aerorisk::report::{
    current_report, timeline_report, ConditionsState, CurrentReport, TimelineReport,
    TimelineSources, CONDITIONS_UNAVAILABLE,
};
use aerorisk::resolve::{HourWindow, SampleSource};
use aerorisk::table::Table;

#[derive(Parser)]
#[command(name = "aerorisk")]
#[command(about = "Assess aerodrome weather risk from METAR and TAF reports")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// JSON file overriding thresholds, phenomena priorities and timeline parameters
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// CheckWX API key
    #[arg(long, env = "CHECKWX_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assess current conditions at an aerodrome
    Current {
        /// ICAO code of the aerodrome, e.g. EFHK
        icao: String,

        /// Output JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },
    /// Show the forecast risk timeline for an aerodrome
    Timeline {
        /// ICAO code of the aerodrome, e.g. EFHK
        icao: String,

        /// Number of hours to look ahead
        #[arg(long)]
        hours: Option<u32>,

        /// Don't fill hours the TAF leaves uncovered from the hourly model forecast
        #[arg(long)]
        no_secondary: bool,

        /// Output JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },
    /// Assess previously saved decoded METAR (and optionally TAF) JSON files
    Replay {
        /// Decoded METAR JSON file
        metar: PathBuf,

        /// Decoded TAF JSON file
        taf: Option<PathBuf>,

        /// Start of the timeline (RFC 3339); defaults to the observation time
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Number of hours to look ahead
        #[arg(long)]
        hours: Option<u32>,

        /// Output JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "warn,aerorisk=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>, hours: Option<u32>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(hours) = hours {
        if hours == 0 {
            bail!("--hours must be at least 1");
        }
        config.timeline.lookahead_hours = hours;
    }
    Ok(config)
}

fn checkwx(api_key: Option<String>) -> anyhow::Result<CheckWx> {
    match api_key {
        Some(key) if !key.trim().is_empty() => Ok(CheckWx::new(key.trim())),
        _ => bail!("a CheckWX API key is required (--api-key or CHECKWX_API_KEY)"),
    }
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json(output: &impl Serialize) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(output).context("JSON serialization failed")?
    );
    Ok(())
}

/// Dedup consecutive identical values, replacing duplicates with empty strings
/// e.g. `dedup(["foo", "foo", "bar"]) == ["foo", "", "bar"]`.
fn dedup(items: impl IntoIterator<Item = String>) -> Vec<String> {
    items
        .into_iter()
        .chunk_by(|item| item.clone())
        .into_iter()
        .flat_map(|(key, group)| {
            std::iter::once(key).chain(std::iter::repeat_n(String::new(), group.count() - 1))
        })
        .collect()
}

/// Level or level range of a group, e.g. `3` or `2-3`.
fn format_levels(min: u8, max: u8) -> String {
    if min == max {
        max.to_string()
    } else {
        format!("{min}-{max}")
    }
}

fn print_current(report: &CurrentReport, verbose: bool) {
    let risk = match &report.current_risk {
        ConditionsState::Assessed(risk) if !risk.insufficient_data => risk,
        ConditionsState::Assessed(risk) => {
            println!("{CONDITIONS_UNAVAILABLE} at {}: {}", report.airport, risk.message);
            return;
        }
        ConditionsState::Unavailable { reason } => {
            println!("{CONDITIONS_UNAVAILABLE} at {}: {reason}", report.airport);
            return;
        }
    };

    match report.timestamps.observed {
        Some(t) => println!(
            "Current conditions at {} (observed {})",
            report.airport,
            t.format("%Y-%m-%d %H:%MZ")
        ),
        None => println!("Current conditions at {}", report.airport),
    }
    println!("Level {}: {}", risk.level.value(), risk.title);
    println!("{}", risk.message);
    if !risk.phenomena.is_empty() {
        println!("Weather: {}", risk.phenomena.join(", "));
    }
    for impact in &risk.impacts {
        println!("  - {impact}");
    }

    if let Some(conditions) = &report.conditions {
        if verbose {
            if let Some(raw) = &conditions.raw_text {
                println!("{raw}");
            }
        }
        Table::new()
            .column("Wind", vec![format_wind(conditions.wind.as_ref())])
            .column("Vis", vec![format_visibility(conditions.visibility_m)])
            .column("Ceiling", vec![format_ceiling(conditions.effective_ceiling_ft())])
            .column("Temp", vec![format_temp(conditions.temperature_c)])
            .print();
    }
}

fn print_timeline(report: &TimelineReport, verbose: bool) {
    for warning in &report.warnings {
        eprintln!("Warning: {warning}");
    }
    if report.groups.is_empty() {
        println!("{CONDITIONS_UNAVAILABLE} for {}: no forecast", report.airport);
        return;
    }

    println!("Forecast timeline for {}", report.airport);
    let groups = &report.groups;
    Table::new()
        .text(
            "Date",
            dedup(groups.iter().map(|g| g.start.format("%Y-%m-%d").to_string())),
        )
        .text(
            "Time",
            groups
                .iter()
                .map(|g| format!("{}-{}", g.start.format("%H"), g.end.format("%HZ")))
                .collect(),
        )
        .column(
            "Lvl",
            groups
                .iter()
                .map(|g| format_levels(g.min_level.value(), g.level.value()))
                .collect(),
        )
        .text(
            "Conditions",
            groups
                .iter()
                .map(|g| {
                    let marker = if g.secondary_source { "*" } else { "" };
                    format!("{}{marker}", g.title)
                })
                .collect(),
        )
        .column(
            "Vis",
            groups
                .iter()
                .map(|g| g.visibility_m.map(|v| format!("{v}m")).unwrap_or_default())
                .collect(),
        )
        .text(
            "Weather",
            groups.iter().map(|g| g.phenomena.join(", ")).collect(),
        )
        .text(
            "Impacts",
            groups.iter().map(|g| g.impacts.join("; ")).collect(),
        )
        .print();
    if groups.iter().any(|g| g.secondary_source) {
        println!("* includes hours from the model forecast");
    }

    if verbose {
        println!();
        let samples = &report.samples;
        Table::new()
            .text(
                "Hour",
                samples
                    .iter()
                    .map(|s| s.time.format("%d %HZ").to_string())
                    .collect(),
            )
            .text(
                "Src",
                samples
                    .iter()
                    .map(|s| match s.source {
                        SampleSource::Primary => "TAF".to_string(),
                        SampleSource::Secondary => "model".to_string(),
                    })
                    .collect(),
            )
            .text(
                "Period",
                samples.iter().map(|s| s.period.kind.label().to_string()).collect(),
            )
            .column(
                "Lvl",
                samples.iter().map(|s| s.level().value().to_string()).collect(),
            )
            .column(
                "Wind",
                samples
                    .iter()
                    .map(|s| format_wind(s.period.weather.wind.as_ref()))
                    .collect(),
            )
            .column(
                "Vis",
                samples.iter().map(|s| format_visibility(s.visibility_m())).collect(),
            )
            .column(
                "Ceiling",
                samples
                    .iter()
                    .map(|s| format_ceiling(s.period.weather.effective_ceiling_ft()))
                    .collect(),
            )
            .print();
    }
}

/// Handle the `current` subcommand: fetch and assess the latest observation.
async fn do_current(
    checkwx: &CheckWx,
    icao: &str,
    config: &Config,
    json: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let metar = checkwx
        .download_metar(icao)
        .await
        .with_context(|| format!("Failed to download observation for {icao}"))?;
    let report = current_report(&icao.to_ascii_uppercase(), &metar, config, Utc::now());
    if json {
        return print_json(&report);
    }
    print_current(&report, verbose);
    Ok(())
}

/// Handle the `timeline` subcommand: fetch the TAF (and the secondary hourly forecast) and
/// display the grouped timeline starting at the current hour.
async fn do_timeline(
    checkwx: &CheckWx,
    icao: &str,
    config: &Config,
    with_secondary: bool,
    json: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let (taf, sources) = fetch_timeline(checkwx, icao, with_secondary).await?;
    let now = Utc::now();
    let window = HourWindow::new(now, config.timeline.lookahead_hours);
    let report = timeline_report(&icao.to_ascii_uppercase(), &taf, sources, window, config, now);
    if json {
        return print_json(&report);
    }
    print_timeline(&report, verbose);
    Ok(())
}

#[derive(Serialize)]
struct ReplayOutput {
    current: CurrentReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeline: Option<TimelineReport>,
}

/// Handle the `replay` subcommand: assess saved reports without touching the network.
fn do_replay(
    metar: &Path,
    taf: Option<&Path>,
    at: Option<DateTime<Utc>>,
    config: &Config,
    json: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let metar = read_json(metar)?;
    let airport = metar
        .pointer("/data/0/icao")
        .or_else(|| metar.get("icao"))
        .and_then(Value::as_str)
        .unwrap_or("????")
        .to_string();
    let current = current_report(&airport, &metar, config, now);

    let timeline = match taf {
        Some(path) => {
            let taf = read_json(path)?;
            let start = at.or(current.timestamps.observed).unwrap_or(now);
            let window = HourWindow::new(start, config.timeline.lookahead_hours);
            Some(timeline_report(
                &airport,
                &taf,
                TimelineSources::default(),
                window,
                config,
                now,
            ))
        }
        None => None,
    };

    if json {
        return print_json(&ReplayOutput { current, timeline });
    }
    print_current(&current, verbose);
    if let Some(timeline) = &timeline {
        println!();
        print_timeline(timeline, verbose);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Current { icao, json } => {
            let config = load_config(cli.config.as_deref(), None)?;
            do_current(&checkwx(cli.api_key)?, &icao, &config, json, cli.verbose).await
        }
        Command::Timeline {
            icao,
            hours,
            no_secondary,
            json,
        } => {
            let config = load_config(cli.config.as_deref(), hours)?;
            let checkwx = checkwx(cli.api_key)?;
            do_timeline(&checkwx, &icao, &config, !no_secondary, json, cli.verbose).await
        }
        Command::Replay {
            metar,
            taf,
            at,
            hours,
            json,
        } => {
            let config = load_config(cli.config.as_deref(), hours)?;
            do_replay(&metar, taf.as_deref(), at, &config, json, cli.verbose)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_blanks_repeats() {
        let dates = ["2024-01-15", "2024-01-15", "2024-01-16", "2024-01-16"]
            .map(String::from);
        assert_eq!(dedup(dates), vec!["2024-01-15", "", "2024-01-16", ""]);
    }

    #[test]
    fn level_ranges() {
        assert_eq!(format_levels(3, 3), "3");
        assert_eq!(format_levels(2, 3), "2-3");
    }

    #[test]
    fn hours_override_and_validation() {
        assert_eq!(load_config(None, Some(6)).unwrap().timeline.lookahead_hours, 6);
        assert_eq!(load_config(None, None).unwrap().timeline.lookahead_hours, 24);
        assert!(load_config(None, Some(0)).is_err());
    }

    #[test]
    fn api_key_required() {
        assert!(checkwx(None).is_err());
        assert!(checkwx(Some("  ".to_string())).is_err());
        assert!(checkwx(Some("key".to_string())).is_ok());
    }

    #[test]
    fn cli_parses_replay() {
        let cli = Cli::try_parse_from([
            "aerorisk",
            "replay",
            "metar.json",
            "taf.json",
            "--at",
            "2024-01-15T06:00:00Z",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Replay { taf, at, .. } => {
                assert_eq!(taf, Some(PathBuf::from("taf.json")));
                assert_eq!(at, Some("2024-01-15T06:00:00Z".parse().unwrap()));
            }
            _ => panic!("expected replay"),
        }
    }
}
