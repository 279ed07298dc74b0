use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::analytics::{self, DEFAULT_TIMELINE_MONTHS};
use crate::calendar::Locale;
use crate::models::{
    ApplicationRecord, Bucket, ConversionRates, FunnelStage, PeriodCount, Stage,
    StageConversion, StatusSlice, TimelinePoint,
};

/// Parameters that change the shape of the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardParams {
    pub months: u32,
    pub locale: Locale,
    pub stages: Vec<Stage>,
}

impl Default for DashboardParams {
    fn default() -> Self {
        Self {
            months: DEFAULT_TIMELINE_MONTHS,
            locale: Locale::default(),
            stages: Stage::DEFAULT_FUNNEL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total_applications: usize,
    pub status_distribution: Vec<StatusSlice>,
    #[serde(skip)]
    pub weekly_buckets: Vec<Bucket>,
    #[serde(skip)]
    pub monthly_buckets: Vec<Bucket>,
    pub weekly_series: Vec<PeriodCount>,
    pub monthly_series: Vec<PeriodCount>,
    pub timeline: Vec<TimelinePoint>,
    pub funnel: Vec<FunnelStage>,
    pub conversion_rates: ConversionRates,
    pub stage_conversions: Vec<StageConversion>,
}

pub fn build_dashboard(
    records: &[ApplicationRecord],
    params: &DashboardParams,
    now: NaiveDate,
) -> Dashboard {
    let buckets = analytics::time_buckets(records);
    let funnel = analytics::build_funnel(records, &params.stages);

    Dashboard {
        total_applications: records.len(),
        status_distribution: analytics::status_distribution(records),
        weekly_series: buckets.weekly_series(),
        monthly_series: buckets.monthly_series(),
        weekly_buckets: buckets.weekly,
        monthly_buckets: buckets.monthly,
        timeline: analytics::rolling_timeline(records, params.months, now, params.locale),
        conversion_rates: analytics::conversion_rates(&funnel),
        stage_conversions: analytics::stage_conversions(&funnel),
        funnel,
    }
}

struct CacheEntry {
    records: Arc<Vec<ApplicationRecord>>,
    params: DashboardParams,
    month: (i32, u32),
    dashboard: Arc<Dashboard>,
}

/// Holds the last dashboard and rebuilds it only when the record collection
/// (by identity) or a shape parameter changes.
///
/// The reference date only matters through its month, so a new day within
/// the same month reuses the cached value.
#[derive(Default)]
pub struct DashboardCache {
    entry: Option<CacheEntry>,
    rebuilds: usize,
}

impl DashboardCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &mut self,
        records: &Arc<Vec<ApplicationRecord>>,
        params: &DashboardParams,
        now: NaiveDate,
    ) -> Arc<Dashboard> {
        let month = (now.year(), now.month0());
        if let Some(entry) = &self.entry {
            if Arc::ptr_eq(&entry.records, records)
                && entry.params == *params
                && entry.month == month
            {
                tracing::debug!("dashboard cache hit");
                return Arc::clone(&entry.dashboard);
            }
        }

        tracing::debug!(records = records.len(), "rebuilding dashboard");
        let dashboard = Arc::new(build_dashboard(records, params, now));
        self.rebuilds += 1;
        self.entry = Some(CacheEntry {
            records: Arc::clone(records),
            params: params.clone(),
            month,
            dashboard: Arc::clone(&dashboard),
        });
        dashboard
    }

    /// Number of times the dashboard has been computed.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }
}
