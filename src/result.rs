use serde::{Serialize, Serializer};

use crate::{ObjectName, ResultValue};

/// One flattened metric produced by a [`crate::Query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub name: String,
    pub value: ResultValue,
    pub epoch_ms: u128,
    #[serde(serialize_with = "serialize_object_name")]
    pub object_name: ObjectName,
    pub attribute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
}

impl QueryResult {
    #[must_use]
    pub const fn epoch_seconds(&self) -> u128 {
        self.epoch_ms / 1000
    }
}

fn serialize_object_name<S>(name: &ObjectName, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&name.canonical())
}
