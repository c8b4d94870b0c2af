//! Record shapes stored in the two lobby tables and the filter language used to address them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use utoipa::ToSchema;

/// Table holding one liveness record per connected session.
pub const PRESENCE_TABLE: &str = "online_users";
/// Table holding one record per session that opted into the next round.
pub const READINESS_TABLE: &str = "ready_players";
/// Key column shared by both tables.
pub const KEY_COLUMN: &str = "session_id";
/// Timestamp column of the presence table.
pub const LAST_SEEN_COLUMN: &str = "last_seen_at";

/// The two record kinds the lobby coordinates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// [`PresenceRecord`] rows.
    Presence,
    /// [`ReadinessRecord`] rows.
    Readiness,
}

impl Table {
    /// Name of the table in the remote store.
    pub fn name(self) -> &'static str {
        match self {
            Table::Presence => PRESENCE_TABLE,
            Table::Readiness => READINESS_TABLE,
        }
    }

    /// Resolve a table from its remote name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            PRESENCE_TABLE => Some(Table::Presence),
            READINESS_TABLE => Some(Table::Readiness),
            _ => None,
        }
    }
}

/// Liveness heartbeat of a single session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PresenceRecord {
    /// Username when authenticated, visitor id otherwise.
    pub session_id: String,
    /// Guests are tracked but excluded from the headline count.
    #[serde(default)]
    pub is_guest: bool,
    /// Time of the last heartbeat.
    #[serde(with = "rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub last_seen_at: OffsetDateTime,
}

/// Contribution a ready session makes to the next round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessRole {
    /// Regular player.
    #[default]
    Participant,
    /// Privileged session that commits the round.
    Host,
}

/// Opt-in of an authenticated session into the next round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReadinessRecord {
    /// Username of the ready session.
    pub session_id: String,
    /// Contribution type.
    #[serde(default)]
    pub role: ReadinessRole,
    /// Role-distribution mode recorded with host declarations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_mode: Option<String>,
    /// Time the session declared itself ready.
    #[serde(with = "rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub declared_at: OffsetDateTime,
}

/// Row selector understood by every record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every row of the table.
    All,
    /// Rows whose `column` equals `value`.
    Eq { column: String, value: String },
    /// Rows whose timestamp `column` is strictly after `since`.
    After { column: String, since: OffsetDateTime },
    /// Rows where `column` is set. Used for bulk deletes, which stores refuse without a filter.
    Present { column: String },
}

/// Failure to parse a filter from query parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterParseError {
    /// Operator other than `eq`, `gt` or `not.is.null`.
    #[error("unsupported filter `{column}={expression}`")]
    Unsupported { column: String, expression: String },
    /// The timestamp operand is not RFC 3339.
    #[error("invalid timestamp `{0}`")]
    Timestamp(String),
    /// More than one filter column was supplied.
    #[error("only one filter column is supported")]
    TooMany,
}

/// Query parameters that carry no filtering meaning.
const PASSTHROUGH_PARAMS: [&str; 3] = ["select", "order", "limit"];

impl Filter {
    /// Select the row(s) of a single session.
    pub fn key(session_id: &str) -> Self {
        Filter::Eq {
            column: KEY_COLUMN.into(),
            value: session_id.into(),
        }
    }

    /// Select every keyed row.
    pub fn every_key() -> Self {
        Filter::Present {
            column: KEY_COLUMN.into(),
        }
    }

    /// Encode the filter as PostgREST-style query parameters.
    pub fn to_query(&self) -> Vec<(String, String)> {
        match self {
            Filter::All => Vec::new(),
            Filter::Eq { column, value } => vec![(column.clone(), format!("eq.{value}"))],
            Filter::After { column, since } => {
                let formatted = since
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| since.unix_timestamp().to_string());
                vec![(column.clone(), format!("gt.{formatted}"))]
            }
            Filter::Present { column } => vec![(column.clone(), "not.is.null".into())],
        }
    }

    /// Decode a filter from PostgREST-style query parameters.
    pub fn from_query<'a, I>(params: I) -> Result<Self, FilterParseError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filter = Filter::All;
        for (column, expression) in params {
            if PASSTHROUGH_PARAMS.contains(&column) {
                continue;
            }
            if filter != Filter::All {
                return Err(FilterParseError::TooMany);
            }

            filter = if let Some(value) = expression.strip_prefix("eq.") {
                Filter::Eq {
                    column: column.into(),
                    value: value.into(),
                }
            } else if let Some(raw) = expression.strip_prefix("gt.") {
                let since = OffsetDateTime::parse(raw, &Rfc3339)
                    .map_err(|_| FilterParseError::Timestamp(raw.into()))?;
                Filter::After {
                    column: column.into(),
                    since,
                }
            } else if expression == "not.is.null" {
                Filter::Present {
                    column: column.into(),
                }
            } else {
                return Err(FilterParseError::Unsupported {
                    column: column.into(),
                    expression: expression.into(),
                });
            };
        }
        Ok(filter)
    }

    /// Evaluate the filter against a JSON row.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { column, value } => match row.get(column) {
                Some(Value::String(actual)) => actual == value,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == *value,
            },
            Filter::After { column, since } => row
                .get(column)
                .and_then(Value::as_str)
                .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
                .is_some_and(|stamp| stamp > *since),
            Filter::Present { column } => row.get(column).is_some_and(|value| !value.is_null()),
        }
    }
}

/// Serde adapter storing timestamps as RFC 3339 strings, the format the REST store speaks.
pub mod rfc3339 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _, ser::Error as _};
    use time::{OffsetDateTime, format_description::well_known::Rfc3339};

    /// Serialize a timestamp as an RFC 3339 string.
    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = value.format(&Rfc3339).map_err(S::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    /// Parse an RFC 3339 string into a timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        OffsetDateTime::parse(&raw, &Rfc3339).map_err(D::Error::custom)
    }
}
