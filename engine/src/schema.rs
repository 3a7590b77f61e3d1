//! Row decoding.
//!
//! The platform hands rows over as flat JSON objects (`{"id": ..,
//! "created_at": .., "content": .., ...}`). A [`RowSchema`] says which
//! columns carry identity, creation time and the correlation token; the rest
//! of the row becomes the payload.

use crate::{error::Result, record::Origin, Change, Error, Record, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column mapping from platform rows to records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RowSchema {
    /// Column holding the durable id
    pub id_field: String,
    /// Column holding the creation time
    pub created_at_field: String,
    /// Column echoing the temporary id, if the table has one
    pub client_ref_field: Option<String>,
    /// Columns kept in the payload; all remaining columns when empty
    pub payload_fields: Vec<String>,
}

impl Default for RowSchema {
    fn default() -> Self {
        Self {
            id_field: "id".into(),
            created_at_field: "created_at".into(),
            client_ref_field: None,
            payload_fields: Vec::new(),
        }
    }
}

impl RowSchema {
    /// Create a schema with the default `id` / `created_at` columns.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_ref(mut self, field: impl Into<String>) -> Self {
        self.client_ref_field = Some(field.into());
        self
    }

    pub fn with_payload_fields(mut self, fields: Vec<String>) -> Self {
        self.payload_fields = fields;
        self
    }

    /// Decode a single confirmed row.
    pub fn decode_row(&self, row: &Value) -> Result<Record> {
        let object = row
            .as_object()
            .ok_or_else(|| Error::InvalidRow(format!("expected object, got {}", kind(row))))?;

        let id = decode_id(object, &self.id_field)?;
        let created_at = decode_timestamp(object, &self.created_at_field)?;
        let client_ref = match &self.client_ref_field {
            Some(field) => match object.get(field) {
                None | Some(Value::Null) => None,
                Some(_) => Some(decode_id(object, field)?),
            },
            None => None,
        };

        let payload: Map<String, Value> = if self.payload_fields.is_empty() {
            object
                .iter()
                .filter(|(key, _)| !self.is_mapped(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        } else {
            self.payload_fields
                .iter()
                .filter_map(|key| object.get(key).map(|value| (key.clone(), value.clone())))
                .collect()
        };

        Ok(Record {
            id,
            created_at,
            payload: Value::Object(payload),
            origin: Origin::Confirmed,
            client_ref,
        })
    }

    /// Decode a fetch result.
    pub fn decode_rows(&self, rows: &Value) -> Result<Vec<Record>> {
        rows.as_array()
            .ok_or_else(|| Error::InvalidRow(format!("expected array, got {}", kind(rows))))?
            .iter()
            .map(|row| self.decode_row(row))
            .collect()
    }

    /// Decode a raw notification: `{"event": "insert", "record": {..}}`.
    ///
    /// Deletes may carry either `old_record` (the removed row) or a bare `id`.
    pub fn decode_notification(&self, message: &Value) -> Result<Change> {
        let event = message
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MissingField("event".into()))?;

        match event.to_ascii_lowercase().as_str() {
            "insert" => Ok(Change::Insert {
                record: self.decode_row(field(message, "record")?)?,
            }),
            "update" => Ok(Change::Update {
                record: self.decode_update(field(message, "record")?)?,
            }),
            "delete" => {
                let id = match message.get("old_record") {
                    Some(old) => decode_id(
                        old.as_object()
                            .ok_or_else(|| Error::InvalidRow("old_record is not an object".into()))?,
                        &self.id_field,
                    )?,
                    None => decode_id(
                        message
                            .as_object()
                            .ok_or_else(|| Error::InvalidRow("notification is not an object".into()))?,
                        "id",
                    )?,
                };
                Ok(Change::Delete { id })
            }
            other => Err(Error::UnknownEvent(other.to_string())),
        }
    }

    /// Update rows may omit the creation time; only the mutable fields matter.
    fn decode_update(&self, row: &Value) -> Result<Record> {
        let object = row
            .as_object()
            .ok_or_else(|| Error::InvalidRow(format!("expected object, got {}", kind(row))))?;
        if object.contains_key(&self.created_at_field) {
            return self.decode_row(row);
        }

        let mut patched = object.clone();
        patched.insert(self.created_at_field.clone(), Value::from(0u64));
        self.decode_row(&Value::Object(patched))
    }

    fn is_mapped(&self, key: &str) -> bool {
        key == self.id_field
            || key == self.created_at_field
            || self.client_ref_field.as_deref() == Some(key)
    }
}

fn field<'a>(message: &'a Value, name: &str) -> Result<&'a Value> {
    message
        .get(name)
        .ok_or_else(|| Error::MissingField(name.to_string()))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_id(object: &Map<String, Value>, name: &str) -> Result<RecordId> {
    match object.get(name) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) if id.is_u64() || id.is_i64() => Ok(id.to_string()),
        Some(_) => Err(Error::InvalidId {
            field: name.to_string(),
        }),
        None => Err(Error::MissingField(name.to_string())),
    }
}

fn decode_timestamp(object: &Map<String, Value>, name: &str) -> Result<Timestamp> {
    let invalid = |value: &Value| Error::InvalidTimestamp {
        field: name.to_string(),
        value: value.to_string(),
    };

    let value = object
        .get(name)
        .ok_or_else(|| Error::MissingField(name.to_string()))?;

    match value {
        Value::Number(n) => n.as_u64().ok_or_else(|| invalid(value)),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .and_then(|dt| u64::try_from(dt.timestamp_millis()).ok())
            .ok_or_else(|| invalid(value)),
        _ => Err(invalid(value)),
    }
}
