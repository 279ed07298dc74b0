use std::fmt::Write;

use chrono::NaiveDate;

use crate::calendar;
use crate::dashboard::Dashboard;
use crate::models::ApplicationRecord;

const RECENT_LIMIT: usize = 5;
const WEEKLY_LIMIT: usize = 8;

/// Most recent applications by submission date; undated records are skipped.
pub fn recent_applications(records: &[ApplicationRecord], limit: usize) -> Vec<&ApplicationRecord> {
    let mut dated: Vec<(NaiveDate, &ApplicationRecord)> = records
        .iter()
        .filter_map(|record| calendar::parse_record_date(&record.date).map(|date| (date, record)))
        .collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0));
    dated.into_iter().take(limit).map(|(_, record)| record).collect()
}

pub fn build_report(
    dashboard: &Dashboard,
    records: &[ApplicationRecord],
    as_of: NaiveDate,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Application Tracker Report");
    let _ = writeln!(
        output,
        "Generated on {} across {} applications",
        as_of, dashboard.total_applications
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");
    for slice in &dashboard.status_distribution {
        let _ = writeln!(output, "- {}: {}", slice.label, slice.value);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Pipeline Funnel");
    for stage in &dashboard.funnel {
        let _ = writeln!(output, "- {}", stage.display_label);
    }
    let rates = &dashboard.conversion_rates;
    let _ = writeln!(output);
    let _ = writeln!(output, "- Applied to interview: {}%", rates.applied_to_interview);
    let _ = writeln!(output, "- Interview to offer: {}%", rates.interview_to_offer);
    let _ = writeln!(output, "- Total success: {}%", rates.total_success);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Last {} Months", dashboard.timeline.len());
    for point in &dashboard.timeline {
        let _ = writeln!(output, "- {} {}: {}", point.label, point.year, point.count);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weekly Activity");
    if dashboard.weekly_buckets.is_empty() {
        let _ = writeln!(output, "No dated applications yet.");
    } else {
        for bucket in dashboard.weekly_buckets.iter().take(WEEKLY_LIMIT) {
            let companies: Vec<&str> = bucket
                .members
                .iter()
                .map(|record| record.company.as_str())
                .collect();
            let _ = writeln!(
                output,
                "- {}: {} ({})",
                bucket.period_key,
                bucket.count,
                companies.join(", ")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Monthly Activity");
    if dashboard.monthly_series.is_empty() {
        let _ = writeln!(output, "No dated applications yet.");
    } else {
        for month in &dashboard.monthly_series {
            let _ = writeln!(output, "- {}: {}", month.period_label, month.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Applications");
    let recent = recent_applications(records, RECENT_LIMIT);
    if recent.is_empty() {
        let _ = writeln!(output, "No dated applications yet.");
    } else {
        for record in recent {
            let location = record.location.as_deref().unwrap_or("location n/a");
            let _ = writeln!(
                output,
                "- {} at {} ({}) on {}: {}",
                record.job_title, record.company, location, record.date, record.status
            );
        }
    }

    output
}

/// Compact plain-text view printed by the `summary` and `watch` commands.
pub fn render_summary(dashboard: &Dashboard) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Applications: {}", dashboard.total_applications);
    let statuses: Vec<String> = dashboard
        .status_distribution
        .iter()
        .map(|slice| format!("{} {}", slice.label, slice.value))
        .collect();
    let _ = writeln!(output, "Status: {}", statuses.join(" | "));
    let funnel: Vec<&str> = dashboard
        .funnel
        .iter()
        .map(|stage| stage.display_label.as_str())
        .collect();
    let _ = writeln!(output, "Funnel: {}", funnel.join(" -> "));
    let rates = &dashboard.conversion_rates;
    let _ = writeln!(
        output,
        "Rates: applied->interview {}% | interview->offer {}% | total {}%",
        rates.applied_to_interview, rates.interview_to_offer, rates.total_success
    );
    let timeline: Vec<String> = dashboard
        .timeline
        .iter()
        .map(|point| format!("{} {}", point.label, point.count))
        .collect();
    let _ = writeln!(output, "Timeline: {}", timeline.join(" | "));

    output
}
