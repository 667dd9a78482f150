use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::aggregate::validate_record;
use crate::error::StoreError;
use crate::models::{RawResultRecord, ResultFilter};

/// Read side of the result store. Rows come back in the order they were
/// recorded.
pub trait RecordStore {
    fn fetch_results(
        &self,
        filter: &ResultFilter,
    ) -> impl Future<Output = Result<Vec<RawResultRecord>, StoreError>> + Send;
}

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl RecordStore for PgRecordStore {
    async fn fetch_results(
        &self,
        filter: &ResultFilter,
    ) -> Result<Vec<RawResultRecord>, StoreError> {
        fetch_results(&self.pool, filter).await
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn fetch_results(
    pool: &PgPool,
    filter: &ResultFilter,
) -> Result<Vec<RawResultRecord>, StoreError> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT r.student_id, COALESCE(st.display_name, st.email) AS student_name, \
         r.school_id, r.class_id, r.stream_id, r.kind, r.subject, r.score, r.sitting, \
         r.attendance, r.comment, r.recorded_by, r.created_at \
         FROM school_results.results r \
         LEFT JOIN school_results.students st ON st.id = r.student_id \
         WHERE r.school_id = ",
    );
    query.push_bind(filter.school_id.clone());

    if let Some(class_id) = &filter.class_id {
        query.push(" AND r.class_id = ").push_bind(class_id.clone());
    }
    if let Some(stream_id) = &filter.stream_id {
        query.push(" AND r.stream_id = ").push_bind(stream_id.clone());
    }
    if let Some(student_id) = &filter.student_id {
        query.push(" AND r.student_id = ").push_bind(student_id.clone());
    }
    query.push(" ORDER BY r.created_at, r.seq");

    let rows = query.build().fetch_all(pool).await?;
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        records.push(RawResultRecord {
            student_id: row.try_get("student_id")?,
            student_name: row.try_get("student_name")?,
            school_id: row.try_get("school_id")?,
            class_id: row.try_get("class_id")?,
            stream_id: row.try_get("stream_id")?,
            kind: row.try_get("kind")?,
            subject: row.try_get("subject")?,
            score: row.try_get("score")?,
            sitting: row.try_get("sitting")?,
            attendance: row.try_get("attendance")?,
            comment: row.try_get("comment")?,
            recorded_by: row.try_get("recorded_by")?,
            created_at: row.try_get("created_at")?,
        });
    }

    Ok(records)
}

struct NewResult<'a> {
    source_key: &'a str,
    student_id: &'a str,
    school_id: &'a str,
    class_id: &'a str,
    stream_id: &'a str,
    kind: &'a str,
    subject: Option<&'a str>,
    score: Option<f64>,
    sitting: Option<&'a str>,
    attendance: Option<&'a str>,
    comment: Option<&'a str>,
    recorded_by: Option<&'a str>,
    created_at: DateTime<Utc>,
}

impl NewResult<'static> {
    fn seeded() -> Self {
        Self {
            source_key: "",
            student_id: "",
            school_id: "sch-001",
            class_id: "form-2",
            stream_id: "east",
            kind: "",
            subject: None,
            score: None,
            sitting: None,
            attendance: None,
            comment: None,
            recorded_by: Some("t.kamau"),
            created_at: Utc::now(),
        }
    }
}

async fn upsert_student<'e, E>(
    executor: E,
    id: &str,
    display_name: &str,
    email: &str,
    school_id: &str,
) -> anyhow::Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO school_results.students (id, display_name, email, school_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE
        SET display_name = EXCLUDED.display_name, email = EXCLUDED.email,
            school_id = EXCLUDED.school_id
        "#,
    )
    .bind(id)
    .bind(display_name)
    .bind(email)
    .bind(school_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Returns whether a row was inserted; an existing `source_key` is skipped.
async fn insert_result<'e, E>(executor: E, result: &NewResult<'_>) -> anyhow::Result<bool>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let outcome = sqlx::query(
        r#"
        INSERT INTO school_results.results
        (id, student_id, school_id, class_id, stream_id, kind, subject, score, sitting,
         attendance, comment, recorded_by, created_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(result.student_id)
    .bind(result.school_id)
    .bind(result.class_id)
    .bind(result.stream_id)
    .bind(result.kind)
    .bind(result.subject)
    .bind(result.score)
    .bind(result.sitting)
    .bind(result.attendance)
    .bind(result.comment)
    .bind(result.recorded_by)
    .bind(result.created_at)
    .bind(result.source_key)
    .execute(executor)
    .await?;

    Ok(outcome.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = [
        ("stu-001", "Avery Lee", "avery.lee@example.school"),
        ("stu-002", "Jules Moreno", "jules.moreno@example.school"),
        ("stu-003", "Kiara Patel", "kiara.patel@example.school"),
    ];

    let mut tx = pool.begin().await?;

    for (id, name, email) in students {
        upsert_student(&mut *tx, id, name, email, "sch-001").await?;
    }

    let exam = |source_key, student_id, subject, score, sitting| NewResult {
        source_key,
        student_id,
        kind: "exam",
        subject: Some(subject),
        score: Some(score),
        sitting: Some(sitting),
        ..NewResult::seeded()
    };
    let attendance = |source_key, student_id, status| NewResult {
        source_key,
        student_id,
        kind: "attendance",
        attendance: Some(status),
        ..NewResult::seeded()
    };
    let comment = |source_key, student_id, text| NewResult {
        source_key,
        student_id,
        kind: "comment",
        comment: Some(text),
        ..NewResult::seeded()
    };

    let results = vec![
        exam("seed-001", "stu-001", "Math", 80.0, "opening_term"),
        exam("seed-002", "stu-001", "Math", 90.0, "end_term"),
        exam("seed-003", "stu-001", "English", 74.0, "mid_term"),
        attendance("seed-004", "stu-001", "present"),
        exam("seed-005", "stu-002", "Math", 60.0, "opening_term"),
        exam("seed-006", "stu-002", "Biology", 68.0, "mid_term"),
        attendance("seed-007", "stu-002", "absent"),
        exam("seed-008", "stu-003", "Math", 55.0, "opening_term"),
        exam("seed-009", "stu-003", "Math", 71.0, "mid_term"),
        exam("seed-010", "stu-003", "English", 88.0, "end_term"),
        attendance("seed-011", "stu-003", "present"),
        comment("seed-012", "stu-003", "Strong improvement since opening term"),
    ];

    let base = Utc::now() - Duration::days(30);

    for (offset, mut result) in results.into_iter().enumerate() {
        result.created_at = base + Duration::minutes(offset as i64);
        insert_result(&mut *tx, &result).await?;
    }

    tx.commit().await?;
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    student_id: String,
    student_name: String,
    email: String,
    school_id: String,
    class_id: String,
    stream_id: String,
    kind: String,
    subject: Option<String>,
    score: Option<f64>,
    sitting: Option<String>,
    attendance: Option<String>,
    comment: Option<String>,
    recorded_by: Option<String>,
    created_at: Option<DateTime<Utc>>,
    source_key: Option<String>,
}

impl CsvRow {
    fn to_raw(&self, created_at: DateTime<Utc>) -> RawResultRecord {
        RawResultRecord {
            student_id: self.student_id.clone(),
            student_name: Some(self.student_name.clone()),
            school_id: self.school_id.clone(),
            class_id: self.class_id.clone(),
            stream_id: self.stream_id.clone(),
            kind: self.kind.clone(),
            subject: self.subject.clone(),
            score: self.score,
            sitting: self.sitting.clone(),
            attendance: self.attendance.clone(),
            comment: self.comment.clone(),
            recorded_by: self.recorded_by.clone(),
            created_at,
        }
    }
}

/// Reads and validates every CSV row. Rows without `created_at` are stamped
/// in file order so they keep that order when fetched back.
fn read_import_rows(
    csv_path: &std::path::Path,
    imported_at: DateTime<Utc>,
) -> anyhow::Result<Vec<(CsvRow, DateTime<Utc>)>> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut rows = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let created_at = row
            .created_at
            .unwrap_or_else(|| imported_at + Duration::milliseconds(index as i64));
        validate_record(index, row.to_raw(created_at))?;
        rows.push((row, created_at));
    }

    Ok(rows)
}

/// Imports result rows from CSV in one transaction. Every row is validated
/// before anything is written, so a bad file inserts nothing.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let rows = read_import_rows(csv_path, Utc::now())?;
    tracing::debug!(rows = rows.len(), path = %csv_path.display(), "validated csv import");

    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for (row, created_at) in &rows {
        upsert_student(
            &mut *tx,
            &row.student_id,
            &row.student_name,
            &row.email,
            &row.school_id,
        )
        .await?;

        let source_key = row
            .source_key
            .clone()
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let kind = row.kind.trim().to_lowercase();

        let result = NewResult {
            source_key: &source_key,
            student_id: &row.student_id,
            school_id: &row.school_id,
            class_id: &row.class_id,
            stream_id: &row.stream_id,
            kind: &kind,
            subject: row.subject.as_deref(),
            score: row.score,
            sitting: row.sitting.as_deref(),
            attendance: row.attendance.as_deref(),
            comment: row.comment.as_deref(),
            recorded_by: row.recorded_by.as_deref(),
            created_at: *created_at,
        };

        if insert_result(&mut *tx, &result).await? {
            inserted += 1;
        }
    }

    tx.commit().await?;
    Ok(inserted)
}
