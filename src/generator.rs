use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::DataQuestionError;
use crate::prompt;
use crate::relay::{ChatRequest, CompletionRelay};
use crate::schema::{parse_table_list, SchemaText};
use crate::store::SettingsStore;

// The one user-visible failure message, regardless of what actually broke.
pub const GENERATION_FAILED_MESSAGE: &str =
    "Something went wrong when calling OpenAI. Try again later or check your API key.";

/// Seam over the completion relay so the workflow is testable with a scripted
/// backend.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete_once(
        &self,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<String, DataQuestionError>;

    async fn complete_streaming(
        &self,
        api_key: &str,
        request: &ChatRequest,
        sink: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), DataQuestionError>;
}

#[async_trait]
impl CompletionBackend for CompletionRelay {
    async fn complete_once(
        &self,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<String, DataQuestionError> {
        CompletionRelay::complete_once(self, api_key, request).await
    }

    async fn complete_streaming(
        &self,
        api_key: &str,
        request: &ChatRequest,
        sink: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), DataQuestionError> {
        CompletionRelay::complete_streaming(self, api_key, request, sink, cancel).await
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "type")]
pub enum GenerationEvent {
    Progress { percent: u8 },
    TablesSelected { tables: Vec<String> },
    Fragment { content: String },
    Error { message: String },
}

/// Two-phase workflow: pick relevant tables with one blocking completion, then
/// stream the SQL for the filtered schema. Any failure aborts the rest and
/// emits exactly one generic error event; partial progress is discarded.
pub async fn run_generation<B: CompletionBackend>(
    settings: Arc<Mutex<SettingsStore>>,
    backend: &B,
    database: &str,
    question: &str,
    events: mpsc::Sender<GenerationEvent>,
    cancel: CancellationToken,
) {
    match generate(settings, backend, database, question, &events, cancel).await {
        Ok(()) => info!("query generation for '{}' complete", database),
        Err(err) => {
            error!("query generation for '{}' failed: {}", database, err);
            let _ = events
                .send(GenerationEvent::Error {
                    message: GENERATION_FAILED_MESSAGE.into(),
                })
                .await;
        }
    }
}

async fn generate<B: CompletionBackend>(
    settings: Arc<Mutex<SettingsStore>>,
    backend: &B,
    database: &str,
    question: &str,
    events: &mpsc::Sender<GenerationEvent>,
    cancel: CancellationToken,
) -> Result<(), DataQuestionError> {
    progress(events, 5).await;

    let (api_key, model, dialect, rows) = {
        let guard = settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let rows = guard.schema_rows(database).ok_or_else(|| {
            DataQuestionError::Validation(format!("no schema stored for database '{}'", database))
        })?;
        let dialect = guard
            .database_list()
            .into_iter()
            .find(|entry| entry.name == database)
            .map(|entry| dialect_for(&entry.db_type))
            .unwrap_or_else(|| "PostgreSQL".to_string());
        (guard.api_key(), guard.model(), dialect, rows)
    };

    let schema = SchemaText::from_rows(&rows);
    if schema.is_empty() {
        return Err(DataQuestionError::Validation(format!(
            "schema for database '{}' has no tables",
            database
        )));
    }
    progress(events, 10).await;

    // Phase one: table selection.
    let selection_prompt = prompt::build_table_selection_prompt(&schema.table_names(), question);
    let selection_output = backend
        .complete_once(
            &api_key,
            &ChatRequest {
                prompt: selection_prompt,
                model: model.clone(),
            },
        )
        .await?;
    progress(events, 30).await;

    let selected = parse_table_list(&selection_output);
    let _ = events
        .send(GenerationEvent::TablesSelected {
            tables: selected.clone(),
        })
        .await;
    let filtered = schema.filter(&selected);
    progress(events, 50).await;

    // Phase two: stream the SQL for the filtered schema.
    let query_prompt = prompt::build_query_prompt(&filtered.statements(), question, &dialect);
    progress(events, 100).await;

    let (fragment_tx, mut fragment_rx) = mpsc::channel::<String>(64);
    let query_request = ChatRequest {
        prompt: query_prompt,
        model,
    };
    let stream = backend.complete_streaming(&api_key, &query_request, fragment_tx, cancel);
    let forward = async {
        while let Some(content) = fragment_rx.recv().await {
            if events
                .send(GenerationEvent::Fragment { content })
                .await
                .is_err()
            {
                // UI listener is gone; dropping the receiver stops the relay.
                break;
            }
        }
    };
    let (stream_result, _) = tokio::join!(stream, forward);
    stream_result
}

async fn progress(events: &mpsc::Sender<GenerationEvent>, percent: u8) {
    let _ = events.send(GenerationEvent::Progress { percent }).await;
}

fn dialect_for(db_type: &str) -> String {
    match db_type.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => "PostgreSQL".to_string(),
        "mysql" => "MySQL".to_string(),
        "mssql" => "MSSQL".to_string(),
        _ => db_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    use crate::store::{KEY_DATABASE_LIST, KEY_OPENAI_KEY};

    struct FakeBackend {
        once_responses: Mutex<VecDeque<Result<String, DataQuestionError>>>,
        fragments: Vec<String>,
        prompts: Mutex<Vec<String>>,
        stream_calls: Mutex<u32>,
    }

    impl FakeBackend {
        fn new(once: Result<String, DataQuestionError>, fragments: Vec<&str>) -> FakeBackend {
            FakeBackend {
                once_responses: Mutex::new(VecDeque::from([once])),
                fragments: fragments.into_iter().map(String::from).collect(),
                prompts: Mutex::new(Vec::new()),
                stream_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for FakeBackend {
        async fn complete_once(
            &self,
            _api_key: &str,
            request: &ChatRequest,
        ) -> Result<String, DataQuestionError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.once_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DataQuestionError::Upstream("unscripted call".into())))
        }

        async fn complete_streaming(
            &self,
            _api_key: &str,
            request: &ChatRequest,
            sink: mpsc::Sender<String>,
            _cancel: CancellationToken,
        ) -> Result<(), DataQuestionError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            *self.stream_calls.lock().unwrap() += 1;
            for fragment in &self.fragments {
                if sink.send(fragment.clone()).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    fn seeded_settings(dir: &TempDir) -> Arc<Mutex<SettingsStore>> {
        let mut store = SettingsStore::load(dir.path().join("settings.json"));
        store.set(KEY_OPENAI_KEY, json!("sk-test")).unwrap();
        store
            .set(
                KEY_DATABASE_LIST,
                json!([{"name": "shop", "type": "postgres"}]),
            )
            .unwrap();
        store
            .set(
                "databaseSchemas.shop",
                json!([
                    {"table_name": "users", "column_name": "id", "data_type": "int", "is_nullable": "NO"},
                    {"table_name": "orders", "column_name": "id", "data_type": "int", "is_nullable": "NO"}
                ]),
            )
            .unwrap();
        Arc::new(Mutex::new(store))
    }

    async fn collect(
        settings: Arc<Mutex<SettingsStore>>,
        backend: &FakeBackend,
    ) -> Vec<GenerationEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        run_generation(
            settings,
            backend,
            "shop",
            "who ordered last week?",
            tx,
            CancellationToken::new(),
        )
        .await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn happy_path_emits_milestones_tables_and_fragments() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(
            Ok("users, orders, ghost_table".into()),
            vec!["SELECT ", "* FROM ", "\"users\";"],
        );
        let events = collect(seeded_settings(&dir), &backend).await;

        let milestones: Vec<u8> = events
            .iter()
            .filter_map(|event| match event {
                GenerationEvent::Progress { percent } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(milestones, vec![5, 10, 30, 50, 100]);

        assert!(events.contains(&GenerationEvent::TablesSelected {
            tables: vec!["users".into(), "orders".into(), "ghost_table".into()],
        }));

        let accumulated: String = events
            .iter()
            .filter_map(|event| match event {
                GenerationEvent::Fragment { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(accumulated, "SELECT * FROM \"users\";");

        assert!(!events
            .iter()
            .any(|event| matches!(event, GenerationEvent::Error { .. })));
    }

    #[tokio::test]
    async fn unknown_tables_are_dropped_from_the_query_prompt() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(Ok("users, orders, ghost_table".into()), vec!["ok"]);
        collect(seeded_settings(&dir), &backend).await;

        let prompts = backend.prompts.lock().unwrap();
        // prompts[1] is the phase-two query prompt
        assert!(prompts[1].contains("CREATE TABLE users"));
        assert!(prompts[1].contains("CREATE TABLE orders"));
        assert!(!prompts[1].contains("ghost_table"));
    }

    #[tokio::test]
    async fn single_selected_table_filters_to_exactly_that_table() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(Ok("users".into()), vec!["ok"]);
        collect(seeded_settings(&dir), &backend).await;

        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[1].contains("CREATE TABLE users"));
        assert!(!prompts[1].contains("CREATE TABLE orders"));
    }

    #[tokio::test]
    async fn phase_one_failure_prevents_phase_two_and_yields_one_error() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(
            Err(DataQuestionError::Upstream("connection refused".into())),
            vec!["never"],
        );
        let events = collect(seeded_settings(&dir), &backend).await;

        let errors: Vec<&GenerationEvent> = events
            .iter()
            .filter(|event| matches!(event, GenerationEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            &GenerationEvent::Error {
                message: GENERATION_FAILED_MESSAGE.into()
            }
        );
        assert!(!events
            .iter()
            .any(|event| matches!(event, GenerationEvent::Fragment { .. })));
        assert_eq!(*backend.stream_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_database_yields_one_error() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new(Ok("users".into()), vec!["never"]);
        let settings = Arc::new(Mutex::new(SettingsStore::load(
            dir.path().join("settings.json"),
        )));
        let (tx, mut rx) = mpsc::channel(64);
        run_generation(
            settings,
            &backend,
            "missing",
            "anything",
            tx,
            CancellationToken::new(),
        )
        .await;
        let mut errors = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, GenerationEvent::Error { .. }) {
                errors += 1;
            }
        }
        assert_eq!(errors, 1);
    }
}
