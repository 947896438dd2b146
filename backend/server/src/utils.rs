use rusqlite::{Row, types::ValueRef};
use serde_json::{Map, Number, Value};

use crate::database::{Record, Setting};

pub const ID_COLUMN: &str = "id";

pub fn row_to_record(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<Record> {
    let mut record = Map::with_capacity(columns.len());

    for (index, column) in columns.iter().enumerate() {
        record.insert(column.clone(), to_json(row.get_ref(index)?));
    }

    Ok(record)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// Record id as a map key. Integer ids are stringified, anything else is unusable.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(ID_COLUMN)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Keys records by id, later duplicates win.
pub fn to_record_map(records: Vec<Record>) -> Map<String, Value> {
    let mut map = Map::with_capacity(records.len());

    for record in records {
        if let Some(id) = record_id(&record) {
            map.insert(id, Value::Object(record));
        }
    }

    map
}

pub struct SettingsView {
    pub announcement: Value,
    pub maintenance: bool,
}

impl Default for SettingsView {
    fn default() -> Self {
        Self {
            announcement: Value::Null,
            maintenance: false,
        }
    }
}

pub fn distribute_settings(settings: &[Setting]) -> SettingsView {
    let mut view = SettingsView::default();

    for setting in settings {
        let Some(raw) = setting.value.as_deref() else {
            continue;
        };

        match setting.key.as_str() {
            "announcement" => {
                view.announcement = serde_json::from_str(raw)
                    .unwrap_or_else(|_| Value::String(raw.to_string()));
            }
            "maintenance" => {
                view.maintenance = raw == "true"
                    || matches!(serde_json::from_str(raw), Ok(Value::Bool(true)));
            }
            _ => {}
        }
    }

    view
}
