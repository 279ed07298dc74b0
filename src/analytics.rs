use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::calendar::{self, calendar_key, Locale};
use crate::models::{
    ApplicationRecord, Bucket, ConversionRates, FunnelStage, PeriodCount, Stage,
    StageConversion, StatusSlice, TimelinePoint,
};

pub const DEFAULT_TIMELINE_MONTHS: u32 = 6;

pub fn status_distribution(records: &[ApplicationRecord]) -> Vec<StatusSlice> {
    let mut counts = [0usize; Stage::ALL.len()];
    let mut unknown = 0usize;

    for record in records {
        match record.stage() {
            Some(stage) => counts[stage as usize] += 1,
            None => unknown += 1,
        }
    }

    if unknown > 0 {
        tracing::debug!(unknown, "records with unknown status left out of distribution");
    }

    Stage::ALL
        .into_iter()
        .map(|stage| StatusSlice {
            label: stage.label().to_string(),
            value: counts[stage as usize],
            color: stage.color().to_string(),
        })
        .collect()
}

/// Weekly and monthly buckets, each sorted most recent first.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBuckets {
    pub weekly: Vec<Bucket>,
    pub monthly: Vec<Bucket>,
}

impl TimeBuckets {
    /// Weekly counts oldest to newest, the order time-series charts expect.
    pub fn weekly_series(&self) -> Vec<PeriodCount> {
        self.weekly.iter().rev().map(period_count).collect()
    }

    /// Monthly counts, most recent first.
    pub fn monthly_series(&self) -> Vec<PeriodCount> {
        self.monthly.iter().map(period_count).collect()
    }
}

fn period_count(bucket: &Bucket) -> PeriodCount {
    PeriodCount {
        period_label: bucket.period_key.clone(),
        count: bucket.count,
    }
}

pub fn time_buckets(records: &[ApplicationRecord]) -> TimeBuckets {
    let mut weekly: BTreeMap<(i32, u32), Bucket> = BTreeMap::new();
    let mut monthly: BTreeMap<(i32, u32), Bucket> = BTreeMap::new();
    let mut undated = 0usize;

    for record in records {
        let Some(date) = calendar::parse_record_date(&record.date) else {
            undated += 1;
            continue;
        };
        let key = calendar_key(date);

        let week = weekly
            .entry((key.iso_week_year, key.iso_week))
            .or_insert_with(|| empty_bucket(key.week_key(), key.iso_week_year, key.iso_week));
        week.count += 1;
        week.members.push(record.clone());

        let month = monthly
            .entry((key.year, key.month))
            .or_insert_with(|| empty_bucket(key.month_key(), key.year, key.month));
        month.count += 1;
        month.members.push(record.clone());
    }

    if undated > 0 {
        tracing::debug!(undated, "records with malformed dates left out of time buckets");
    }

    TimeBuckets {
        weekly: weekly.into_values().rev().collect(),
        monthly: monthly.into_values().rev().collect(),
    }
}

fn empty_bucket(period_key: String, year: i32, period: u32) -> Bucket {
    Bucket {
        period_key,
        year,
        period,
        count: 0,
        members: Vec::new(),
    }
}

/// Counts for the `months` calendar months ending at `now`, oldest first.
///
/// Every month of the window is present, empty ones with a zero count.
pub fn rolling_timeline(
    records: &[ApplicationRecord],
    months: u32,
    now: NaiveDate,
    locale: Locale,
) -> Vec<TimelinePoint> {
    let (now_year, now_month) = (now.year(), now.month0());
    let mut points: Vec<TimelinePoint> = (0..months)
        .rev()
        .map(|back| {
            let (year, month0) = calendar::months_before(now_year, now_month, back);
            TimelinePoint {
                label: locale.short_month(month0).to_string(),
                year,
                period_index: month0,
                count: 0,
            }
        })
        .collect();

    for record in records {
        let Some(date) = calendar::parse_record_date(&record.date) else {
            continue;
        };
        let offset = (now_year - date.year()) * 12 + now_month as i32 - date.month0() as i32;
        if offset < 0 || offset >= months as i32 {
            continue;
        }
        let slot = months as usize - 1 - offset as usize;
        points[slot].count += 1;
    }

    points
}

/// Whether a record has reached `stage` within the ordered `stages`.
///
/// History entries count as visits; otherwise the current stage implies every
/// earlier stage of the list. `Applied` is reached by every record.
fn reached(record: &ApplicationRecord, current: Stage, stage: Stage, stages: &[Stage]) -> bool {
    if stage == Stage::Applied || record.visited_stages().any(|visited| visited == stage) {
        return true;
    }
    let position = |target: Stage| stages.iter().position(|s| *s == target);
    match (position(current), position(stage)) {
        (Some(current_index), Some(stage_index)) => current_index >= stage_index,
        _ => false,
    }
}

pub fn build_funnel(records: &[ApplicationRecord], stages: &[Stage]) -> Vec<FunnelStage> {
    let mut counts = vec![0usize; stages.len()];

    for record in records {
        let Some(current) = record.stage() else {
            continue;
        };
        for (count, stage) in counts.iter_mut().zip(stages) {
            if reached(record, current, *stage, stages) {
                *count += 1;
            }
        }
    }

    stages
        .iter()
        .zip(counts)
        .map(|(stage, value)| FunnelStage {
            name: stage.label().to_string(),
            value,
            display_label: format!("{} {}", value, stage.label()),
        })
        .collect()
}

/// Percentage of `to` over `from` with one decimal, rounded half up.
///
/// Returns `"0"` whenever either side is zero.
pub fn conversion_rate(from: usize, to: usize) -> String {
    if from == 0 || to == 0 {
        return "0".to_string();
    }
    let (from, to) = (from as u128, to as u128);
    let tenths = (to * 2000 + from) / (2 * from);
    format!("{}.{}", tenths / 10, tenths % 10)
}

fn funnel_value(funnel: &[FunnelStage], stage: Stage) -> usize {
    funnel
        .iter()
        .find(|entry| entry.name == stage.label())
        .map(|entry| entry.value)
        .unwrap_or(0)
}

pub fn conversion_rates(funnel: &[FunnelStage]) -> ConversionRates {
    let applied = funnel_value(funnel, Stage::Applied);
    let interview = funnel_value(funnel, Stage::Interview);
    let offer = funnel_value(funnel, Stage::Offer);

    ConversionRates {
        applied_to_interview: conversion_rate(applied, interview),
        interview_to_offer: conversion_rate(interview, offer),
        total_success: conversion_rate(applied, offer),
    }
}

/// Rates between consecutive funnel stages, then from each stage to the last.
pub fn stage_conversions(funnel: &[FunnelStage]) -> Vec<StageConversion> {
    let mut conversions: Vec<StageConversion> = funnel
        .windows(2)
        .map(|pair| StageConversion {
            from: pair[0].name.clone(),
            to: pair[1].name.clone(),
            rate: conversion_rate(pair[0].value, pair[1].value),
        })
        .collect();

    if let Some((last, earlier)) = funnel.split_last() {
        // The stage right before the last is already covered by the pairs.
        let to_final = earlier.len().saturating_sub(1);
        conversions.extend(earlier[..to_final].iter().map(|entry| StageConversion {
            from: entry.name.clone(),
            to: last.name.clone(),
            rate: conversion_rate(entry.value, last.value),
        }));
    }

    conversions
}
