use crate::aggregate::{aggregate, validate_records};
use crate::db::RecordStore;
use crate::error::ReportError;
use crate::models::{ResultFilter, StudentAggregate};
use crate::rank::{rank, RankingPolicy};
use crate::report::{project, ReportView};

/// Fetches, validates, aggregates and ranks one filtered batch.
pub async fn ranked_students<S: RecordStore>(
    store: &S,
    filter: &ResultFilter,
    policy: RankingPolicy,
) -> Result<Vec<StudentAggregate>, ReportError> {
    let raw = store.fetch_results(filter).await?;
    tracing::info!(scope = %filter.label(), records = raw.len(), "fetched result records");

    let records = validate_records(raw).inspect_err(|error| {
        tracing::warn!(%error, "rejecting result batch");
    })?;

    let students = aggregate(&records);
    tracing::debug!(students = students.len(), "aggregated students");

    Ok(rank(students, policy))
}

/// Runs the whole pipeline for one request. Either a full report is
/// produced or the request fails.
pub async fn build_report<S: RecordStore>(
    store: &S,
    filter: &ResultFilter,
    policy: RankingPolicy,
) -> Result<ReportView, ReportError> {
    let ranked = ranked_students(store, filter, policy).await?;
    let view = project(&ranked);

    if view.is_empty() {
        tracing::info!(scope = %filter.label(), "no results for filter");
    } else {
        tracing::info!(
            rows = view.rows.len(),
            subjects = view.subjects.len(),
            "built report view"
        );
    }

    Ok(view)
}
