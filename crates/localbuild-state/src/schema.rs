//! Row types for the `builds` and `build_logs` tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serialize chrono DateTime as a SurrealDB datetime
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde::Serialize::serialize(&date.map(SurrealDatetime::from), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Row of the `builds` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub build_id: String,
    pub request_digest: String,
    pub builder: String,
    pub project: String,
    pub repository: String,
    pub branch: String,
    #[serde(default)]
    pub revision: Option<String>,
    pub local_sources: bool,
    /// "running" | "finished" | "abandoned"
    pub status: String,
    #[serde(default)]
    pub result: Option<String>,
    pub total_logs: u64,
    pub duration_ms: u64,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Row of the `build_logs` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub build_id: String,
    pub seq: u64,
    pub record: String,
    #[serde(with = "surreal_datetime")]
    pub timestamp: DateTime<Utc>,
}
