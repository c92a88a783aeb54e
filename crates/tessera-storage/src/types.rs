//! Storage record types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Name of the collection holding person records linked to authenticated users.
pub const PEOPLE_COLLECTION: &str = "people";

/// A person record linked to an authenticated user of an app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRecord {
    /// The record ID.
    pub id: String,
    /// The app (tenant) the record belongs to.
    pub app_id: String,
    /// ID of the authenticated user this person is linked to.
    pub auth_id: String,
    /// Application-defined person fields.
    #[serde(default)]
    pub data: Value,
    /// When the record was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PersonRecord {
    /// Creates a new `PersonRecord` with empty data.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        app_id: impl Into<String>,
        auth_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            app_id: app_id.into(),
            auth_id: auth_id.into(),
            data: Value::Object(Default::default()),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Sets the application-defined fields.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}
