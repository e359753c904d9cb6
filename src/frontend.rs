use log::info;
use serde_json::Value;
use tauri::ClipboardManager;
use tokio::sync::mpsc;

use crate::emitter;
use crate::generator;
use crate::relay::ChatRequest;
use crate::schema;
use crate::state::GlobalState;
use crate::store::{DatabaseEntry, KEY_DATABASE_LIST};

#[derive(serde::Serialize)]
pub struct CommandResponse<T> {
    data: T,
}

fn settings_guard<'a>(
    state: &'a tauri::State<'_, GlobalState>,
) -> std::sync::MutexGuard<'a, crate::store::SettingsStore> {
    state
        .settings
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Settings surface. The UI never touches the file directly.

#[tauri::command]
pub fn get_setting(
    key: String,
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<Value>, String> {
    let value = settings_guard(&state).get(&key).map_err(|e| e.to_string())?;
    Ok(CommandResponse { data: value })
}

#[tauri::command]
pub fn set_setting(
    key: String,
    value: Value,
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<()>, String> {
    settings_guard(&state)
        .set(&key, value)
        .map_err(|e| e.to_string())?;
    Ok(CommandResponse { data: () })
}

#[tauri::command]
pub fn has_setting(
    key: String,
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<bool>, String> {
    Ok(CommandResponse {
        data: settings_guard(&state).has(&key),
    })
}

#[tauri::command]
pub fn delete_setting(
    key: String,
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<()>, String> {
    settings_guard(&state)
        .delete(&key)
        .map_err(|e| e.to_string())?;
    Ok(CommandResponse { data: () })
}

#[tauri::command]
pub fn reset_setting(
    key: String,
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<()>, String> {
    settings_guard(&state)
        .reset(&key)
        .map_err(|e| e.to_string())?;
    Ok(CommandResponse { data: () })
}

// Database management.

#[tauri::command]
pub fn list_databases(
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<Vec<DatabaseEntry>>, String> {
    Ok(CommandResponse {
        data: settings_guard(&state).database_list(),
    })
}

#[tauri::command]
pub fn schema_extraction_query() -> CommandResponse<String> {
    CommandResponse {
        data: schema::SCHEMA_EXTRACTION_QUERY.to_string(),
    }
}

/// Validate and store a pasted schema export, then register the database in
/// the list. Rejects empty and duplicate names before touching the store.
#[tauri::command]
pub fn add_database_schema(
    name: String,
    schema_json: String,
    db_type: String,
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<()>, String> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err("Database name cannot be empty".into());
    }

    let mut settings = settings_guard(&state);
    let mut list = settings.database_list();
    if list.iter().any(|entry| entry.name == name) {
        return Err("Database name already exists".into());
    }

    let rows = schema::parse_schema_rows(&schema_json).map_err(|e| e.to_string())?;
    let rows_value = serde_json::to_value(&rows).map_err(|e| e.to_string())?;
    settings
        .set(&format!("databaseSchemas.{}", name), rows_value)
        .map_err(|e| e.to_string())?;

    list.push(DatabaseEntry {
        name: name.clone(),
        db_type,
    });
    let list_value = serde_json::to_value(&list).map_err(|e| e.to_string())?;
    settings
        .set(KEY_DATABASE_LIST, list_value)
        .map_err(|e| e.to_string())?;

    info!("stored schema for database '{}'", name);
    Ok(CommandResponse { data: () })
}

#[tauri::command]
pub fn remove_database(
    name: String,
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<()>, String> {
    let mut settings = settings_guard(&state);
    settings
        .delete(&format!("databaseSchemas.{}", name))
        .map_err(|e| e.to_string())?;
    let list: Vec<DatabaseEntry> = settings
        .database_list()
        .into_iter()
        .filter(|entry| entry.name != name)
        .collect();
    let list_value = serde_json::to_value(&list).map_err(|e| e.to_string())?;
    settings
        .set(KEY_DATABASE_LIST, list_value)
        .map_err(|e| e.to_string())?;
    Ok(CommandResponse { data: () })
}

// Completion surface.

#[tauri::command]
pub async fn complete_once(
    prompt: String,
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<String>, String> {
    let (api_key, model) = {
        let settings = settings_guard(&state);
        (settings.api_key(), settings.model())
    };
    let response = state
        .relay
        .complete_once(&api_key, &ChatRequest { prompt, model })
        .await
        .map_err(|e| e.to_string())?;
    Ok(CommandResponse { data: response })
}

/// Start a two-phase generation for one database. Returns the stream id whose
/// events arrive on the shared generation channel. A second request for a
/// database with a generation already in flight is rejected.
#[tauri::command]
pub async fn generate_query(
    database: String,
    question: String,
    app: tauri::AppHandle,
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<String>, String> {
    let (stream_id, cancel) = state
        .try_begin_generation(&database)
        .ok_or_else(|| String::from("A query generation is already running for this database"))?;

    let (tx, rx) = mpsc::channel::<generator::GenerationEvent>(64);
    tokio::spawn(emitter::send_events(
        emitter::GENERATION_CHANNEL,
        stream_id.to_string(),
        rx,
        app,
    ));

    let global = state.inner().clone();
    tokio::spawn(async move {
        generator::run_generation(
            global.settings.clone(),
            global.relay.as_ref(),
            &database,
            &question,
            tx,
            cancel,
        )
        .await;
        global.finish_generation(&database);
    });

    Ok(CommandResponse {
        data: stream_id.to_string(),
    })
}

#[tauri::command]
pub fn cancel_generation(
    stream_id: String,
    state: tauri::State<'_, GlobalState>,
) -> Result<CommandResponse<bool>, String> {
    for entry in state.active_generations.iter() {
        if entry.stream_id.to_string() == stream_id {
            entry.cancel.cancel();
            info!("cancelled generation stream {}", stream_id);
            return Ok(CommandResponse { data: true });
        }
    }
    Ok(CommandResponse { data: false })
}

#[tauri::command]
pub fn copy_to_clipboard(text: String, app: tauri::AppHandle) -> Result<CommandResponse<()>, String> {
    app.clipboard_manager()
        .write_text(text)
        .map_err(|e| e.to_string())?;
    Ok(CommandResponse { data: () })
}
