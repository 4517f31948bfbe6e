//! Ingestion job entity for async processing

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Job state machine:
/// queued → running → { succeeded | failed_retryable → queued | failed_terminal }
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => JobState::Running,
            "succeeded" => JobState::Succeeded,
            "failed_retryable" => JobState::FailedRetryable,
            "failed_terminal" => JobState::FailedTerminal,
            _ => JobState::Queued,
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Queued => "queued".to_string(),
            JobState::Running => "running".to_string(),
            JobState::Succeeded => "succeeded".to_string(),
            JobState::FailedRetryable => "failed_retryable".to_string(),
            JobState::FailedTerminal => "failed_terminal".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ingestion_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub item_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub state: String,

    pub attempt_count: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    pub next_retry_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Get the job state as an enum
    pub fn job_state(&self) -> JobState {
        JobState::from(self.state.clone())
    }

    /// Check if the job has settled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.job_state(),
            JobState::Succeeded | JobState::FailedTerminal
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::content_item::Entity",
        from = "Column::ItemId",
        to = "super::content_item::Column::Id"
    )]
    ContentItem,
}

impl Related<super::content_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ContentItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
