use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// A job application as supplied by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub id: String,
    pub job_title: String,
    pub company: String,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub location: Option<String>,
    /// Submission timestamp as text; unparseable values are tolerated.
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(default)]
    pub status_history: Option<Vec<StatusChange>>,
}

impl ApplicationRecord {
    pub fn stage(&self) -> Option<Stage> {
        self.status.parse().ok()
    }

    /// Stages recorded in the history, ignoring unknown entries.
    pub fn visited_stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.status_history
            .iter()
            .flatten()
            .filter_map(|change| change.status.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub timestamp: Option<String>,
}

/// Reads a string field, turning null or any non-string value into `""` so a
/// single bad field never rejects the whole collection.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_optional_string(deserializer)?.unwrap_or_default())
}

fn lenient_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => Ok(Some(value)),
        _ => Ok(None),
    }
}

/// Pipeline stage. Declaration order is the canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Applied,
    Interview,
    Test,
    Offer,
    Rejected,
    Canceled,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Applied,
        Stage::Interview,
        Stage::Test,
        Stage::Offer,
        Stage::Rejected,
        Stage::Canceled,
    ];

    pub const DEFAULT_FUNNEL: [Stage; 4] =
        [Stage::Applied, Stage::Interview, Stage::Test, Stage::Offer];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Applied => "applied",
            Stage::Interview => "interview",
            Stage::Test => "test",
            Stage::Offer => "offer",
            Stage::Rejected => "rejected",
            Stage::Canceled => "canceled",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Applied => "Applied",
            Stage::Interview => "Interview",
            Stage::Test => "Test",
            Stage::Offer => "Offer",
            Stage::Rejected => "Rejected",
            Stage::Canceled => "Canceled",
        }
    }

    /// Chart color slot; fixed per stage.
    pub fn color(self) -> &'static str {
        match self {
            Stage::Applied => "#3b82f6",
            Stage::Interview => "#f59e0b",
            Stage::Test => "#8b5cf6",
            Stage::Offer => "#10b981",
            Stage::Rejected => "#ef4444",
            Stage::Canceled => "#6b7280",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown application status '{0}'")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| UnknownStage(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSlice {
    pub label: String,
    pub value: usize,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub period_key: String,
    pub year: i32,
    /// ISO week number for weekly buckets, zero-based month for monthly ones.
    pub period: u32,
    pub count: usize,
    pub members: Vec<ApplicationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodCount {
    pub period_label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub label: String,
    pub year: i32,
    /// Zero-based month of the slot.
    pub period_index: u32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStage {
    pub name: String,
    pub value: usize,
    pub display_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRates {
    pub applied_to_interview: String,
    pub interview_to_offer: String,
    pub total_success: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageConversion {
    pub from: String,
    pub to: String,
    pub rate: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_parsing_is_case_insensitive() {
        assert_eq!("Offer".parse::<Stage>(), Ok(Stage::Offer));
        assert_eq!(" canceled ".parse::<Stage>(), Ok(Stage::Canceled));
        assert_eq!(
            "ghosted".parse::<Stage>(),
            Err(UnknownStage("ghosted".to_string()))
        );
    }

    #[test]
    fn records_deserialize_from_camel_case_without_optional_fields() {
        let json = r#"{"id":"a1","jobTitle":"Engineer","company":"Acme","status":"test"}"#;
        let record: ApplicationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.job_title, "Engineer");
        assert_eq!(record.date, "");
        assert!(record.location.is_none());
        assert!(record.status_history.is_none());
        assert_eq!(record.stage(), Some(Stage::Test));
    }

    #[test]
    fn null_and_mistyped_fields_fall_back_to_unknown() {
        let json = r#"{"id":"a1","jobTitle":"Engineer","company":"Acme","date":null,"status":7,
            "statusHistory":[{"status":null,"timestamp":12},{"status":"interview"}]}"#;
        let record: ApplicationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.date, "");
        assert_eq!(record.status, "");
        assert_eq!(record.stage(), None);
        let history = record.status_history.as_ref().unwrap();
        assert_eq!(history[0].status, "");
        assert_eq!(history[0].timestamp, None);
        assert_eq!(record.visited_stages().collect::<Vec<_>>(), vec![Stage::Interview]);

        let missing_status: ApplicationRecord =
            serde_json::from_str(r#"{"id":"a2","jobTitle":"Engineer","company":"Acme"}"#).unwrap();
        assert_eq!(missing_status.stage(), None);
    }

    #[test]
    fn visited_stages_skip_unknown_history_entries() {
        let record = ApplicationRecord {
            id: "a1".to_string(),
            job_title: "Engineer".to_string(),
            company: "Acme".to_string(),
            location: None,
            date: "2024-03-04".to_string(),
            status: "offer".to_string(),
            status_history: Some(vec![
                StatusChange {
                    status: "interview".to_string(),
                    timestamp: None,
                },
                StatusChange {
                    status: "screening".to_string(),
                    timestamp: None,
                },
            ]),
        };
        let visited: Vec<Stage> = record.visited_stages().collect();
        assert_eq!(visited, vec![Stage::Interview]);
    }
}
