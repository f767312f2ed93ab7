//! Grouping of hourly samples into display groups.
//!
//! Consecutive hours are merged greedily as long as they are adjacent in time and the
//! group's severity stays within two adjacent levels. A long run of fluctuating hours is
//! thus split rather than collapsed into one misleadingly wide "2 to 4" period.

use std::ops::Range;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use itertools::{Itertools, MinMaxResult};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::classify::RiskLevel;
use crate::config::{Config, PhenomenaPriority};
use crate::data::Phenomenon;
use crate::resolve::{HourlySample, SampleSource};

/// Largest allowed difference between the highest and lowest level inside one group.
pub const MAX_LEVEL_SPAN: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayGroup {
    pub start: DateTime<Utc>,
    /// Exclusive: one hour after the last member sample.
    pub end: DateTime<Utc>,
    /// Highest level among the members.
    pub level: RiskLevel,
    pub min_level: RiskLevel,
    pub title: String,
    pub message: String,
    pub phenomena: Vec<String>,
    pub impacts: Vec<String>,
    /// Worst visibility among the members, when at or below the display threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_m: Option<u32>,
    pub insufficient_data: bool,
    /// Whether any member hour came from the secondary hourly source.
    pub secondary_source: bool,
    /// Indices of the member samples in the grouped slice.
    #[serde(skip)]
    pub members: Range<usize>,
}

/// Group `samples`, which must be ordered by time.
pub fn group(samples: &[HourlySample], config: &Config) -> Vec<DisplayGroup> {
    let mut groups = Vec::new();
    let Some(first) = samples.first() else {
        return groups;
    };

    let mut start = 0;
    let (mut lo, mut hi) = (first.level(), first.level());
    for (i, pair) in samples.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        let adjacent = next.time - prev.time <= Duration::hours(1);
        let same_quality = prev.risk.insufficient_data == next.risk.insufficient_data;
        let (new_lo, new_hi) = (lo.min(next.level()), hi.max(next.level()));
        if adjacent && same_quality && new_hi.value() - new_lo.value() <= MAX_LEVEL_SPAN {
            (lo, hi) = (new_lo, new_hi);
            continue;
        }
        let end = i + 1;
        groups.push(build_group(samples, start..end, config));
        start = end;
        (lo, hi) = (next.level(), next.level());
    }
    groups.push(build_group(samples, start..samples.len(), config));
    debug!(samples = samples.len(), groups = groups.len(), "grouped timeline");
    groups
}

fn build_group(samples: &[HourlySample], members: Range<usize>, config: &Config) -> DisplayGroup {
    let run = &samples[members.clone()];
    let first = &run[0];
    let last = &run[run.len() - 1];

    // The first member at the highest level speaks for the group.
    let mut worst = first;
    for sample in run {
        if sample.level() > worst.level() {
            worst = sample;
        }
    }
    let min_level = run.iter().map(HourlySample::level).min().unwrap_or(worst.level());

    let phenomena = rank_phenomena(
        run.iter().flat_map(|s| &s.phenomena),
        &config.phenomena_priority,
        config.timeline.max_phenomena,
    );
    let mut impacts = merge_impacts(run.iter().flat_map(|s| &s.impacts));
    impacts.truncate(config.timeline.max_impacts);

    let visibility_m = run
        .iter()
        .filter_map(HourlySample::visibility_m)
        .min()
        .filter(|v| *v <= config.timeline.visibility_display_max_m);

    DisplayGroup {
        start: first.time,
        end: last.time + Duration::hours(1),
        level: worst.level(),
        min_level,
        title: worst.risk.title.clone(),
        message: worst.risk.message.clone(),
        phenomena,
        impacts,
        visibility_m,
        insufficient_data: first.risk.insufficient_data,
        secondary_source: run.iter().any(|s| s.source == SampleSource::Secondary),
        members,
    }
}

/// Deduplicate phenomena by family, keeping the most significant member of each family (a
/// freezing variant over its plain counterpart, heavier over lighter), then rank them by
/// `priority` and describe the top `limit`.
pub fn rank_phenomena<'a>(
    phenomena: impl IntoIterator<Item = &'a Phenomenon>,
    priority: &PhenomenaPriority,
    limit: usize,
) -> Vec<String> {
    let significance = |p: &Phenomenon| (priority.of(p.category()), p.intensity());
    let mut best: Vec<&Phenomenon> = Vec::new();
    for p in phenomena {
        match best.iter_mut().find(|b| b.family() == p.family()) {
            Some(b) => {
                if significance(p) > significance(b) {
                    *b = p;
                }
            }
            None => best.push(p),
        }
    }
    best.into_iter()
        .sorted_by_key(|p| std::cmp::Reverse(priority.of(p.category())))
        .take(limit)
        .map(Phenomenon::describe)
        .collect()
}

static GUST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bgust").expect("valid gust regex"));

static KNOTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)(?:\s*[-–]\s*(\d+))?\s*kt\b").expect("valid knots regex")
});

fn knot_values(impact: &str) -> Vec<u32> {
    KNOTS_RE
        .captures_iter(impact)
        .flat_map(|caps| {
            [caps.get(1), caps.get(2)]
                .into_iter()
                .flatten()
                .filter_map(|m| m.as_str().parse().ok())
        })
        .collect()
}

/// Deduplicate impacts verbatim, drop gust warnings that carry no knot value, and merge
/// gust warnings with different values into one "Wind gusts min–max kt" statement placed
/// where the first gust warning was.
pub fn merge_impacts<'a>(impacts: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut gust_knots: Vec<u32> = Vec::new();
    let mut gust_slot = None;

    for impact in impacts.into_iter().unique() {
        if !GUST_RE.is_match(impact) {
            out.push(impact.clone());
            continue;
        }
        let knots = knot_values(impact);
        if knots.is_empty() {
            continue;
        }
        if gust_slot.is_none() {
            gust_slot = Some(out.len());
            out.push(impact.clone());
        }
        gust_knots.extend(knots);
    }

    if let Some(slot) = gust_slot {
        let merged = match gust_knots.iter().minmax() {
            MinMaxResult::MinMax(lo, hi) if lo != hi => Some(format!("Wind gusts {lo}–{hi} kt")),
            _ => None,
        };
        if let Some(merged) = merged {
            out[slot] = merged;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RiskAssessment;
    use crate::data::{ForecastPeriod, PeriodKind, WeatherSnapshot};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap() + Duration::hours(hour.into())
    }

    fn sample(hour: u32, level: RiskLevel) -> HourlySample {
        sample_with(hour, level, None, &[], &[])
    }

    fn sample_with(
        hour: u32,
        level: RiskLevel,
        visibility_m: Option<u32>,
        phenomena: &[&str],
        impacts: &[&str],
    ) -> HourlySample {
        let impacts: Vec<String> = impacts.iter().map(|s| s.to_string()).collect();
        let risk = RiskAssessment {
            level,
            title: level.title().to_string(),
            message: format!("level {}", level.value()),
            impacts: impacts.clone(),
            phenomena: Vec::new(),
            insufficient_data: false,
        };
        HourlySample {
            time: at(hour),
            source: SampleSource::Primary,
            period: ForecastPeriod {
                from: at(hour),
                to: at(hour + 1),
                kind: PeriodKind::Base,
                probability: None,
                weather: WeatherSnapshot {
                    visibility_m,
                    ..Default::default()
                },
            },
            risk,
            phenomena: phenomena.iter().filter_map(|c| Phenomenon::new(c)).collect(),
            impacts,
        }
    }

    fn levels(groups: &[DisplayGroup]) -> Vec<(u8, u8)> {
        groups
            .iter()
            .map(|g| (g.min_level.value(), g.level.value()))
            .collect()
    }

    #[test]
    fn empty_input() {
        assert!(group(&[], &Config::default()).is_empty());
    }

    #[test]
    fn jump_of_two_levels_splits() {
        let samples = vec![
            sample(1, RiskLevel::Minor),
            sample(2, RiskLevel::Minor),
            sample(3, RiskLevel::Minor),
            sample(4, RiskLevel::Severe),
        ];
        let groups = group(&samples, &Config::default());
        assert_eq!(levels(&groups), vec![(2, 2), (4, 4)]);
        assert_eq!(groups[0].start, at(1));
        assert_eq!(groups[0].end, at(4));
        assert_eq!(groups[1].members, 3..4);
    }

    #[test]
    fn adjacent_levels_merge() {
        let samples = vec![
            sample(0, RiskLevel::Minor),
            sample(1, RiskLevel::Significant),
            sample(2, RiskLevel::Minor),
            sample(3, RiskLevel::Significant),
        ];
        let groups = group(&samples, &Config::default());
        assert_eq!(levels(&groups), vec![(2, 3)]);
        assert_eq!(groups[0].title, RiskLevel::Significant.title());
        assert_eq!(groups[0].message, "level 3");
    }

    #[test]
    fn span_is_measured_over_whole_group() {
        // 1 -> 2 is fine, 2 -> 3 is a step of one but the group would then span 1..3.
        let samples = vec![
            sample(0, RiskLevel::Favorable),
            sample(1, RiskLevel::Minor),
            sample(2, RiskLevel::Significant),
        ];
        let groups = group(&samples, &Config::default());
        assert_eq!(levels(&groups), vec![(1, 2), (3, 3)]);
    }

    #[test]
    fn time_gap_splits() {
        let samples = vec![
            sample(0, RiskLevel::Minor),
            sample(1, RiskLevel::Minor),
            sample(3, RiskLevel::Minor),
        ];
        let groups = group(&samples, &Config::default());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].end, at(2));
        assert_eq!(groups[1].start, at(3));
    }

    #[test]
    fn insufficient_data_does_not_merge_with_favorable() {
        let mut unknown = sample(1, RiskLevel::Favorable);
        unknown.risk.insufficient_data = true;
        let samples = vec![sample(0, RiskLevel::Favorable), unknown];
        let groups = group(&samples, &Config::default());
        assert_eq!(groups.len(), 2);
        assert!(!groups[0].insufficient_data);
        assert!(groups[1].insufficient_data);
    }

    #[test]
    fn worst_visibility_shown_below_threshold() {
        let samples = vec![
            sample_with(0, RiskLevel::Minor, Some(3000), &[], &[]),
            sample_with(1, RiskLevel::Minor, Some(1800), &[], &[]),
            sample_with(2, RiskLevel::Minor, None, &[], &[]),
        ];
        let groups = group(&samples, &Config::default());
        assert_eq!(groups[0].visibility_m, Some(1800));

        let clear = vec![sample_with(0, RiskLevel::Favorable, Some(9000), &[], &[])];
        assert_eq!(group(&clear, &Config::default())[0].visibility_m, None);
    }

    #[test]
    fn freezing_variant_supersedes_plain() {
        let p = PhenomenaPriority::default();
        let codes: Vec<Phenomenon> = ["FG", "FZFG", "-RA", "+RA", "FZRA", "BR"]
            .iter()
            .filter_map(|c| Phenomenon::new(c))
            .collect();
        assert_eq!(
            rank_phenomena(&codes, &p, 4),
            vec!["Freezing fog", "Freezing rain", "Mist"]
        );
    }

    #[test]
    fn phenomena_ranked_and_capped() {
        let p = PhenomenaPriority::default();
        let codes: Vec<Phenomenon> = ["BR", "FG", "RA", "SN", "TS", "FZDZ"]
            .iter()
            .filter_map(|c| Phenomenon::new(c))
            .collect();
        assert_eq!(
            rank_phenomena(&codes, &p, 4),
            vec!["Freezing drizzle", "Thunderstorm", "Snow", "Rain"]
        );
    }

    #[test]
    fn heavier_intensity_supersedes_lighter() {
        let p = PhenomenaPriority::default();
        let codes: Vec<Phenomenon> = ["-SN", "+SN", "SN"]
            .iter()
            .filter_map(|c| Phenomenon::new(c))
            .collect();
        assert_eq!(rank_phenomena(&codes, &p, 4), vec!["Heavy snow"]);
    }

    #[test]
    fn priority_table_is_configurable() {
        let p = PhenomenaPriority {
            mist: 20,
            ..PhenomenaPriority::default()
        };
        let codes: Vec<Phenomenon> = ["FZRA", "BR"]
            .iter()
            .filter_map(|c| Phenomenon::new(c))
            .collect();
        assert_eq!(rank_phenomena(&codes, &p, 4), vec!["Mist", "Freezing rain"]);
    }

    #[test]
    fn impacts_deduplicated_verbatim() {
        let impacts: Vec<String> = ["A", "B", "A", "C", "B"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(merge_impacts(&impacts), vec!["A", "B", "C"]);
    }

    #[test]
    fn gust_warnings_merged_into_range() {
        let impacts: Vec<String> = [
            "Low visibility procedures in force, expect reduced arrival rates",
            "Wind gusts up to 27 kt, minor crosswind component",
            "Wind gusts expected",
            "Wind gusts up to 38 kt, crosswind limits may be exceeded",
            "Wind gusts up to 27 kt, minor crosswind component",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            merge_impacts(&impacts),
            vec![
                "Low visibility procedures in force, expect reduced arrival rates",
                "Wind gusts 27–38 kt",
            ]
        );
    }

    #[test]
    fn single_gust_warning_kept_verbatim() {
        let impacts = vec![
            "Wind gusts up to 30 kt, expect turbulence on approach".to_string(),
            "Gusty".to_string(),
        ];
        assert_eq!(
            merge_impacts(&impacts),
            vec!["Wind gusts up to 30 kt, expect turbulence on approach"]
        );
    }

    #[test]
    fn merged_range_can_be_merged_again() {
        let impacts = vec![
            "Wind gusts 27–38 kt".to_string(),
            "Wind gusts up to 45 kt, crosswind limits may be exceeded".to_string(),
        ];
        assert_eq!(merge_impacts(&impacts), vec!["Wind gusts 27–45 kt"]);
    }

    #[test]
    fn group_impacts_capped() {
        let config = Config::default();
        let samples = vec![
            sample_with(0, RiskLevel::Minor, None, &[], &["a", "b", "c"]),
            sample_with(1, RiskLevel::Minor, None, &[], &["d", "e", "f", "a"]),
        ];
        let groups = group(&samples, &config);
        assert_eq!(groups[0].impacts.len(), config.timeline.max_impacts);
        assert_eq!(groups[0].impacts[..3], ["a", "b", "c"]);
    }

    #[test]
    fn group_phenomena_from_all_members() {
        let samples = vec![
            sample_with(0, RiskLevel::Minor, None, &["BR"], &[]),
            sample_with(1, RiskLevel::Significant, None, &["FZFG"], &[]),
            sample_with(2, RiskLevel::Significant, None, &["FG"], &[]),
        ];
        let groups = group(&samples, &Config::default());
        assert_eq!(groups[0].phenomena, vec!["Freezing fog", "Mist"]);
    }

    fn level_strategy() -> impl Strategy<Value = RiskLevel> {
        prop::sample::select(vec![
            RiskLevel::Favorable,
            RiskLevel::Minor,
            RiskLevel::Significant,
            RiskLevel::Severe,
        ])
    }

    proptest! {
        #[test]
        fn groups_bounded_and_lossless(
            hours in prop::collection::vec((level_strategy(), 1u32..3), 0..60)
        ) {
            let mut t = 0;
            let samples: Vec<HourlySample> = hours
                .iter()
                .map(|(level, step)| {
                    t += step;
                    sample(t, *level)
                })
                .collect();
            let groups = group(&samples, &Config::default());

            let mut next = 0;
            for g in &groups {
                prop_assert!(g.level.value() - g.min_level.value() <= MAX_LEVEL_SPAN);
                prop_assert_eq!(g.members.start, next);
                prop_assert!(g.members.end > g.members.start);
                let run = &samples[g.members.clone()];
                let lo = run.iter().map(|s| s.level()).min().unwrap();
                let hi = run.iter().map(|s| s.level()).max().unwrap();
                prop_assert_eq!((lo, hi), (g.min_level, g.level));
                prop_assert_eq!(g.start, run[0].time);
                next = g.members.end;
            }
            prop_assert_eq!(next, samples.len());
        }
    }
}
