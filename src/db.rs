use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::calendar;
use crate::models::{ApplicationRecord, Stage, StatusChange};

/// An application as written to the store.
#[derive(Debug, Clone)]
pub struct NewApplication {
    pub source_key: String,
    pub job_title: String,
    pub company: String,
    pub location: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub status: Stage,
    pub history: Vec<(Stage, Option<DateTime<Utc>>)>,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn at_nine(date: NaiveDate) -> anyhow::Result<DateTime<Utc>> {
    Ok(date.and_hms_opt(9, 0, 0).context("invalid time")?.and_utc())
}

fn seed_date(year: i32, month: u32, day: u32) -> anyhow::Result<DateTime<Utc>> {
    at_nine(NaiveDate::from_ymd_opt(year, month, day).context("invalid date")?)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let applications = vec![
        NewApplication {
            source_key: "seed-001".to_string(),
            job_title: "Backend Engineer".to_string(),
            company: "Northwind Traders".to_string(),
            location: Some("Remote".to_string()),
            applied_at: Some(seed_date(2026, 5, 4)?),
            status: Stage::Offer,
            history: vec![
                (Stage::Applied, Some(seed_date(2026, 5, 4)?)),
                (Stage::Interview, Some(seed_date(2026, 5, 18)?)),
                (Stage::Test, Some(seed_date(2026, 5, 25)?)),
                (Stage::Offer, Some(seed_date(2026, 6, 8)?)),
            ],
        },
        NewApplication {
            source_key: "seed-002".to_string(),
            job_title: "Site Reliability Engineer".to_string(),
            company: "Contoso".to_string(),
            location: Some("Berlin".to_string()),
            applied_at: Some(seed_date(2026, 6, 15)?),
            status: Stage::Rejected,
            history: vec![
                (Stage::Applied, Some(seed_date(2026, 6, 15)?)),
                (Stage::Interview, Some(seed_date(2026, 6, 29)?)),
                (Stage::Rejected, Some(seed_date(2026, 7, 6)?)),
            ],
        },
        NewApplication {
            source_key: "seed-003".to_string(),
            job_title: "Data Engineer".to_string(),
            company: "Fabrikam".to_string(),
            location: None,
            applied_at: Some(seed_date(2026, 8, 3)?),
            status: Stage::Test,
            history: Vec::new(),
        },
        NewApplication {
            source_key: "seed-004".to_string(),
            job_title: "Platform Engineer".to_string(),
            company: "Tailspin Toys".to_string(),
            location: Some("Lisbon".to_string()),
            applied_at: Some(seed_date(2026, 9, 14)?),
            status: Stage::Applied,
            history: vec![(Stage::Applied, Some(seed_date(2026, 9, 14)?))],
        },
        NewApplication {
            source_key: "seed-005".to_string(),
            job_title: "Staff Engineer".to_string(),
            company: "Wide World Importers".to_string(),
            location: Some("London".to_string()),
            applied_at: Some(seed_date(2026, 10, 5)?),
            status: Stage::Canceled,
            history: Vec::new(),
        },
    ];

    for application in &applications {
        upsert_application(pool, application).await?;
    }

    tracing::info!(count = applications.len(), "seed applications written");
    Ok(())
}

/// Inserts or updates an application by `source_key` and replaces its history.
///
/// Returns `true` when a new row was inserted.
pub async fn upsert_application(pool: &PgPool, application: &NewApplication) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        INSERT INTO application_tracker.applications
        (id, job_title, company, location, applied_at, status, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO UPDATE
        SET job_title = EXCLUDED.job_title,
            company = EXCLUDED.company,
            location = EXCLUDED.location,
            applied_at = EXCLUDED.applied_at,
            status = EXCLUDED.status,
            updated_at = now()
        RETURNING id, (xmax = 0) AS inserted
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&application.job_title)
    .bind(&application.company)
    .bind(&application.location)
    .bind(application.applied_at)
    .bind(application.status.as_str())
    .bind(&application.source_key)
    .fetch_one(&mut *tx)
    .await
    .with_context(|| format!("failed to upsert application {}", application.source_key))?;

    let id: Uuid = row.get("id");
    let inserted: bool = row.get("inserted");

    sqlx::query("DELETE FROM application_tracker.status_changes WHERE application_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    for (stage, changed_at) in &application.history {
        sqlx::query(
            r#"
            INSERT INTO application_tracker.status_changes
            (id, application_id, status, changed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(stage.as_str())
        .bind(*changed_at)
        .execute(&mut *tx)
        .await?;
    }

    // Dropping the transaction on an early return rolls back the whole upsert.
    tx.commit()
        .await
        .with_context(|| format!("failed to commit application {}", application.source_key))?;
    Ok(inserted)
}

pub async fn fetch_applications(pool: &PgPool) -> anyhow::Result<Vec<ApplicationRecord>> {
    let change_rows = sqlx::query(
        "SELECT application_id, status, changed_at \
         FROM application_tracker.status_changes \
         ORDER BY changed_at NULLS FIRST",
    )
    .fetch_all(pool)
    .await?;

    let mut histories: HashMap<Uuid, Vec<StatusChange>> = HashMap::new();
    for row in change_rows {
        let changed_at: Option<DateTime<Utc>> = row.get("changed_at");
        histories
            .entry(row.get("application_id"))
            .or_default()
            .push(StatusChange {
                status: row.get("status"),
                timestamp: changed_at.map(|at| at.to_rfc3339()),
            });
    }

    let rows = sqlx::query(
        "SELECT id, job_title, company, location, applied_at, status \
         FROM application_tracker.applications \
         ORDER BY applied_at NULLS LAST, created_at",
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let id: Uuid = row.get("id");
        let applied_at: Option<DateTime<Utc>> = row.get("applied_at");
        records.push(ApplicationRecord {
            id: id.to_string(),
            job_title: row.get("job_title"),
            company: row.get("company"),
            location: row.get("location"),
            date: applied_at.map(|at| at.to_rfc3339()).unwrap_or_default(),
            status: row.get("status"),
            status_history: histories.remove(&id),
        });
    }

    Ok(records)
}

/// Row count and latest update time; changes whenever the applications do.
pub async fn store_version(pool: &PgPool) -> anyhow::Result<(i64, Option<DateTime<Utc>>)> {
    let row = sqlx::query(
        "SELECT count(*) AS total, max(updated_at) AS latest \
         FROM application_tracker.applications",
    )
    .fetch_one(pool)
    .await?;

    Ok((row.get("total"), row.get("latest")))
}

/// Parses `stage@date;stage@date` history cells. The date part is optional.
pub fn parse_history(cell: &str) -> anyhow::Result<Vec<(Stage, Option<DateTime<Utc>>)>> {
    let mut history = Vec::new();
    for entry in cell.split(';').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (stage, changed_at) = match entry.split_once('@') {
            Some((stage, date)) => {
                let date = calendar::parse_record_date(date)
                    .with_context(|| format!("invalid history date in '{entry}'"))?;
                (stage, Some(at_nine(date)?))
            }
            None => (entry, None),
        };
        history.push((stage.parse::<Stage>()?, changed_at));
    }
    Ok(history)
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    job_title: String,
    company: String,
    location: Option<String>,
    applied_at: Option<String>,
    status: String,
    history: Option<String>,
    source_key: Option<String>,
}

fn application_from_row(row: CsvRow) -> anyhow::Result<NewApplication> {
    let status = row.status.parse::<Stage>()?;
    let history = match row.history.as_deref() {
        Some(cell) => parse_history(cell)?,
        None => Vec::new(),
    };

    let applied_at = match row.applied_at.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => match calendar::parse_record_date(raw) {
            Some(date) => Some(at_nine(date)?),
            None => {
                tracing::warn!(value = raw, "unparseable applied_at stored as missing");
                None
            }
        },
        _ => None,
    };

    Ok(NewApplication {
        source_key: row
            .source_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4())),
        job_title: row.job_title,
        company: row.company,
        location: row.location.filter(|location| !location.trim().is_empty()),
        applied_at,
        status,
        history,
    })
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let application = match result.map_err(anyhow::Error::from).and_then(application_from_row) {
            Ok(application) => application,
            Err(error) => {
                tracing::warn!(row = line + 1, %error, "skipping csv row");
                continue;
            }
        };

        if upsert_application(pool, &application).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(applied_at: Option<&str>, status: &str, history: Option<&str>) -> CsvRow {
        CsvRow {
            job_title: "QA Engineer".to_string(),
            company: "Litware".to_string(),
            location: Some(" ".to_string()),
            applied_at: applied_at.map(str::to_string),
            status: status.to_string(),
            history: history.map(str::to_string),
            source_key: None,
        }
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a scratch Postgres"]
    async fn failed_history_insert_rolls_back_the_whole_upsert() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        init_db(&pool).await.unwrap();

        let source_key = format!("rollback-{}", Uuid::new_v4());
        let applied_at = Some(seed_date(2024, 3, 4).unwrap());
        let original = NewApplication {
            source_key: source_key.clone(),
            job_title: "QA Engineer".to_string(),
            company: "Litware".to_string(),
            location: None,
            applied_at,
            status: Stage::Applied,
            history: vec![(Stage::Applied, applied_at)],
        };
        assert!(upsert_application(&pool, &original).await.unwrap());

        // Postgres cannot store chrono's minimum timestamp, so the second
        // history row fails after the update and the first insert ran.
        let broken = NewApplication {
            status: Stage::Offer,
            history: vec![
                (Stage::Interview, applied_at),
                (Stage::Test, Some(DateTime::<Utc>::MIN_UTC)),
            ],
            ..original.clone()
        };
        assert!(upsert_application(&pool, &broken).await.is_err());

        let id: Uuid = sqlx::query(
            "SELECT id FROM application_tracker.applications WHERE source_key = $1",
        )
        .bind(&source_key)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("id");
        let records = fetch_applications(&pool).await.unwrap();
        let record = records.iter().find(|r| r.id == id.to_string()).unwrap();
        assert_eq!(record.status, "applied");
        let history: Vec<&str> = record
            .status_history
            .iter()
            .flatten()
            .map(|change| change.status.as_str())
            .collect();
        assert_eq!(history, vec!["applied"]);
    }

    #[test]
    fn history_cells_parse_stage_and_optional_date() {
        let history = parse_history("applied@2024-03-01; interview@2024-03-10T12:00:00Z ;test").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].0, Stage::Applied);
        assert_eq!(
            history[1].1.map(|at| at.date_naive()),
            NaiveDate::from_ymd_opt(2024, 3, 10)
        );
        assert_eq!(history[2], (Stage::Test, None));
        assert!(parse_history("").unwrap().is_empty());
    }

    #[test]
    fn history_cells_reject_unknown_stages_and_dates() {
        assert!(parse_history("phone-screen@2024-03-01").is_err());
        assert!(parse_history("applied@yesterday").is_err());
    }

    #[test]
    fn csv_rows_keep_records_with_bad_dates() {
        let application = application_from_row(row(Some("soon"), "Interview", None)).unwrap();
        assert_eq!(application.status, Stage::Interview);
        assert!(application.applied_at.is_none());
        assert!(application.location.is_none());
        assert!(application.source_key.starts_with("import-"));
    }

    #[test]
    fn csv_rows_with_unknown_status_are_rejected() {
        assert!(application_from_row(row(Some("2024-03-04"), "ghosted", None)).is_err());
    }

    #[test]
    fn csv_rows_map_dates_and_history() {
        let application =
            application_from_row(row(Some("2024-03-04"), "offer", Some("applied@2024-03-04"))).unwrap();
        assert_eq!(
            application.applied_at.map(|at| at.date_naive()),
            NaiveDate::from_ymd_opt(2024, 3, 4)
        );
        assert_eq!(application.history.len(), 1);
    }
}
