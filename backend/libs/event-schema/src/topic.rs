//! Date-based topic naming
//!
//! Activity topics are partitioned by calendar day (`member-activity-20260808`)
//! so old days age out with broker retention instead of log compaction.
//! Producers resolve the concrete name from the event timestamp; consumers
//! subscribe to the whole family with a regex pattern.

use chrono::{DateTime, Utc};

const DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBasedTopic {
    MemberActivity,
    PostActivity,
}

impl DateBasedTopic {
    pub fn prefix(&self) -> &'static str {
        match self {
            DateBasedTopic::MemberActivity => "member-activity",
            DateBasedTopic::PostActivity => "post-activity",
        }
    }

    /// Concrete topic name for the day the event was produced.
    pub fn topic_name(&self, at: DateTime<Utc>) -> String {
        format!("{}-{}", self.prefix(), at.format(DATE_FORMAT))
    }

    /// librdkafka regex subscription covering every day of this family.
    pub fn subscription_pattern(&self) -> String {
        format!("^{}-[0-9]{{8}}$", self.prefix())
    }
}
