use std::fs;
use std::path::PathBuf;

use log::{info, warn};
use serde_json::{json, Map, Value};

use crate::error::DataQuestionError;
use crate::schema;

pub const KEY_DATABASE_LIST: &str = "databaseList";
pub const KEY_DATABASE_SCHEMAS: &str = "databaseSchemas";
pub const KEY_OPENAI_KEY: &str = "openAIKey";
pub const KEY_GPT_VERSION: &str = "gptVersion";
pub const KEY_LICENSE_KEY: &str = "licenseKey";
pub const KEY_LICENSE_VALID: &str = "isLicenseKeyValid";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub db_type: String,
}

fn defaults() -> Map<String, Value> {
    let record = json!({
        KEY_DATABASE_LIST: [],
        KEY_DATABASE_SCHEMAS: {},
        KEY_OPENAI_KEY: "",
        KEY_GPT_VERSION: "GPT-3.5",
        KEY_LICENSE_KEY: "",
        KEY_LICENSE_VALID: false,
    });
    match record {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// File-backed settings record with a fixed key set. Constructed once at startup
/// and handed around explicitly; every mutation validates against the key's
/// schema and persists synchronously. Last-writer-wins on concurrent writes is
/// an accepted limitation.
pub struct SettingsStore {
    path: PathBuf,
    record: Map<String, Value>,
}

impl SettingsStore {
    /// Load the record from disk, falling back to defaults on first run or on a
    /// corrupt file (the next write repairs it).
    pub fn load(path: PathBuf) -> SettingsStore {
        let record = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(mut map) => {
                    // Missing keys pick up their defaults; stale extras are dropped.
                    let mut merged = defaults();
                    for (key, value) in merged.iter_mut() {
                        if let Some(stored) = map.remove(key) {
                            if validate(key, None, &stored).is_ok() {
                                *value = stored;
                            } else {
                                warn!("settings key '{}' failed validation on load, using default", key);
                            }
                        }
                    }
                    merged
                }
                Err(err) => {
                    warn!("settings file at {:?} is corrupt ({}), starting from defaults", path, err);
                    defaults()
                }
            },
            Err(_) => {
                info!("no settings file at {:?}, starting from defaults", path);
                defaults()
            }
        };
        SettingsStore { path, record }
    }

    fn persist(&self) -> Result<(), DataQuestionError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&Value::Object(self.record.clone()))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Value, DataQuestionError> {
        let (top, sub) = split_key(key)?;
        match sub {
            None => Ok(self.record.get(top).cloned().unwrap_or_else(|| {
                defaults().remove(top).unwrap_or(Value::Null)
            })),
            Some(name) => Ok(self
                .record
                .get(top)
                .and_then(|schemas| schemas.get(name))
                .cloned()
                .unwrap_or(Value::Null)),
        }
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<(), DataQuestionError> {
        let (top, sub) = split_key(key)?;
        validate(top, sub, &value)?;
        match sub {
            None => {
                self.record.insert(top.to_string(), value);
            }
            Some(name) => {
                let schemas = self
                    .record
                    .entry(top.to_string())
                    .or_insert_with(|| json!({}));
                if let Value::Object(map) = schemas {
                    map.insert(name.to_string(), value);
                }
            }
        }
        self.persist()
    }

    pub fn has(&self, key: &str) -> bool {
        match split_key(key) {
            Ok((top, None)) => self.record.contains_key(top),
            Ok((top, Some(name))) => self
                .record
                .get(top)
                .map_or(false, |schemas| schemas.get(name).is_some()),
            Err(_) => false,
        }
    }

    pub fn delete(&mut self, key: &str) -> Result<(), DataQuestionError> {
        let (top, sub) = split_key(key)?;
        match sub {
            // The key really goes away: has() reports false until the next
            // write, while get() falls back to the default.
            None => {
                self.record.remove(top);
            }
            Some(name) => {
                if let Some(Value::Object(map)) = self.record.get_mut(top) {
                    map.remove(name);
                }
            }
        }
        self.persist()
    }

    pub fn reset(&mut self, key: &str) -> Result<(), DataQuestionError> {
        let (top, _) = split_key(key)?;
        if let Some(default) = defaults().remove(top) {
            self.record.insert(top.to_string(), default);
        }
        self.persist()
    }

    // Typed accessors for the orchestrator side.

    pub fn database_list(&self) -> Vec<DatabaseEntry> {
        self.record
            .get(KEY_DATABASE_LIST)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn schema_rows(&self, database: &str) -> Option<Vec<schema::SchemaRow>> {
        self.record
            .get(KEY_DATABASE_SCHEMAS)?
            .get(database)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn api_key(&self) -> String {
        self.record
            .get(KEY_OPENAI_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Resolve the stored UI-facing version label to an API model id.
    pub fn model(&self) -> String {
        let version = self
            .record
            .get(KEY_GPT_VERSION)
            .and_then(|v| v.as_str())
            .unwrap_or("GPT-3.5");
        match version {
            "GPT-4" => "gpt-4-0613".to_string(),
            _ => "gpt-3.5-turbo".to_string(),
        }
    }
}

fn split_key(key: &str) -> Result<(&str, Option<&str>), DataQuestionError> {
    let (top, sub) = match key.split_once('.') {
        Some((top, sub)) => (top, Some(sub)),
        None => (key, None),
    };
    let known = matches!(
        top,
        KEY_DATABASE_LIST
            | KEY_DATABASE_SCHEMAS
            | KEY_OPENAI_KEY
            | KEY_GPT_VERSION
            | KEY_LICENSE_KEY
            | KEY_LICENSE_VALID
    );
    if !known {
        return Err(DataQuestionError::Validation(format!(
            "unknown settings key: {}",
            top
        )));
    }
    if sub.is_some() && top != KEY_DATABASE_SCHEMAS {
        return Err(DataQuestionError::Validation(format!(
            "key {} does not take a sub-key",
            top
        )));
    }
    Ok((top, sub))
}

fn validate(top: &str, sub: Option<&str>, value: &Value) -> Result<(), DataQuestionError> {
    match (top, sub) {
        (KEY_DATABASE_LIST, None) => {
            let arr = value.as_array().ok_or_else(|| {
                DataQuestionError::Validation("databaseList must be an array".into())
            })?;
            for entry in arr {
                let ok = entry.get("name").map_or(false, |v| v.is_string())
                    && entry.get("type").map_or(false, |v| v.is_string());
                if !ok {
                    return Err(DataQuestionError::Validation(
                        "databaseList entries must have string name and type".into(),
                    ));
                }
            }
            Ok(())
        }
        (KEY_DATABASE_SCHEMAS, None) => {
            let map = value.as_object().ok_or_else(|| {
                DataQuestionError::Validation("databaseSchemas must be an object".into())
            })?;
            for (name, rows) in map {
                schema::rows_from_value(rows).map_err(|err| {
                    DataQuestionError::Validation(format!("schema for '{}': {}", name, err))
                })?;
            }
            Ok(())
        }
        (KEY_DATABASE_SCHEMAS, Some(name)) => schema::rows_from_value(value)
            .map(|_| ())
            .map_err(|err| {
                DataQuestionError::Validation(format!("schema for '{}': {}", name, err))
            }),
        (KEY_OPENAI_KEY, None) | (KEY_LICENSE_KEY, None) => {
            if value.is_string() {
                Ok(())
            } else {
                Err(DataQuestionError::Validation(format!(
                    "{} must be a string",
                    top
                )))
            }
        }
        (KEY_GPT_VERSION, None) => match value.as_str() {
            Some("GPT-3.5") | Some("GPT-4") => Ok(()),
            _ => Err(DataQuestionError::Validation(
                "gptVersion must be GPT-3.5 or GPT-4".into(),
            )),
        },
        (KEY_LICENSE_VALID, None) => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(DataQuestionError::Validation(
                    "isLicenseKeyValid must be a boolean".into(),
                ))
            }
        }
        _ => Err(DataQuestionError::Validation(format!(
            "unknown settings key: {}",
            top
        ))),
    }
}
