//! Opaque identifiers for schema rows and enquiries
//!
//! Every identity is an `i64` row id on the wire and in SQLite, wrapped in a
//! distinct newtype so a stage id can never be passed where a field id is
//! expected.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

define_id!(
    /// Identity of a pipeline definition
    PipelineId
);
define_id!(
    /// Identity of a stage within a pipeline
    StageId
);
define_id!(
    /// Identity of a field within a stage
    FieldId
);
define_id!(
    /// Identity of an externally owned enquiry record
    EnquiryId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_parses_map_keys() {
        // JSON object keys arrive as strings
        assert_eq!("42".parse::<FieldId>().unwrap(), FieldId(42));
        assert!("abc".parse::<FieldId>().is_err());
    }

    #[test]
    fn test_id_serializes_as_number() {
        let json = serde_json::to_string(&StageId(7)).unwrap();
        assert_eq!(json, "7");
    }
}
