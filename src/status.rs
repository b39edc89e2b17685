//! Overdue derivation, list filters and the overdue sweep.

use chrono::{Local, NaiveDate};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::models::{Task, TaskStatus};

/// The calendar date deadlines are compared against.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl TaskStatus {
    /// Status a task must be stored with: anything not completed whose
    /// deadline has passed is overdue.
    pub fn settle(self, due_date: Option<NaiveDate>, today: NaiveDate) -> TaskStatus {
        match due_date {
            Some(due) if due < today && self != TaskStatus::Completed => TaskStatus::Overdue,
            _ => self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Ongoing,
    Completed,
    Overdue,
    All,
}

impl StatusFilter {
    /// Missing or unrecognised values fall back to `Ongoing`.
    pub fn from_param(param: Option<&str>) -> Self {
        match param.map(str::trim) {
            Some("completed") => StatusFilter::Completed,
            Some("overdue") => StatusFilter::Overdue,
            Some("all") => StatusFilter::All,
            _ => StatusFilter::Ongoing,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusFilter::Ongoing => "ongoing",
            StatusFilter::Completed => "completed",
            StatusFilter::Overdue => "overdue",
            StatusFilter::All => "all",
        }
    }

    /// Appends the filter as ` AND ...` to a query whose task table is aliased `t`.
    pub fn push_clause(self, qb: &mut QueryBuilder<'_, Sqlite>, today: NaiveDate) {
        match self {
            StatusFilter::Ongoing => {
                qb.push(" AND t.status = 'ongoing' AND (t.due_date IS NULL OR t.due_date >= ")
                    .push_bind(today)
                    .push(")");
            }
            StatusFilter::Completed => {
                qb.push(" AND t.status = 'completed'");
            }
            StatusFilter::Overdue => {
                qb.push(" AND t.due_date < ")
                    .push_bind(today)
                    .push(" AND t.status IN ('ongoing', 'overdue')");
            }
            StatusFilter::All => {}
        }
    }

    /// In-memory twin of `push_clause`.
    pub fn matches(self, task: &Task, today: NaiveDate) -> bool {
        let past_due = task.due_date.is_some_and(|due| due < today);
        match self {
            StatusFilter::Ongoing => task.status == TaskStatus::Ongoing && !past_due,
            StatusFilter::Completed => task.status == TaskStatus::Completed,
            StatusFilter::Overdue => past_due && task.status != TaskStatus::Completed,
            StatusFilter::All => true,
        }
    }
}

/// Ascending due date with undated tasks last, newest first on ties.
pub const LIST_ORDER: &str =
    " ORDER BY t.due_date IS NULL, t.due_date ASC, t.created_at DESC, t.id DESC";

/// Flips every ongoing task whose deadline has passed to overdue.
/// Returns how many rows changed; running it again the same day changes nothing.
pub async fn sweep_overdue(pool: &SqlitePool, today: NaiveDate) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'overdue', updated_at = ?
         WHERE status = 'ongoing' AND due_date IS NOT NULL AND due_date < ?",
    )
    .bind(chrono::Utc::now().naive_utc())
    .bind(today)
    .execute(pool)
    .await?;

    let swept = result.rows_affected();
    if swept > 0 {
        tracing::info!(swept, %today, "marked tasks overdue");
    }
    Ok(swept)
}

/// Runs `sweep_overdue` on a fixed interval for the lifetime of the process.
pub fn spawn_sweeper(pool: SqlitePool, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_overdue(&pool, today()).await {
                tracing::error!("overdue sweep failed: {}", e);
            }
        }
    })
}
