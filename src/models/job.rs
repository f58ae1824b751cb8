// Scheduled job view

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub name: String,
    pub cron_expression: String,
    pub last_run: Option<DateTime<Utc>>,
    pub running: bool,
}
