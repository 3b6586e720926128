use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tables_load::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
use tables_load::config::LoadOptions;
use tables_load::execution::{
    Backpressure, LoadContext, LoadEvent, LoadObserver, LoadPhase, LoadPipeline, LoadSeverity,
};
use tables_load::ingestion::FormatOptions;
use tables_load::storage::{DatabaseUri, SqliteStorage, StorageAdapter, UpsertOptions};
use tables_load::types::{Field, FieldType, Model, Record, Value};
use tables_load::{LoadError, LoadResult};

/// Storage that keeps every flush in memory and checks the gates are closed while writing.
#[derive(Default)]
struct RecordingStorage {
    backpressure: Backpressure,
    synced: Vec<String>,
    flushes: Vec<(String, Vec<Record>)>,
    paused_during_every_flush: bool,
    optimized: usize,
    closed: usize,
    executed: Vec<String>,
    fail_upserts: bool,
}

impl RecordingStorage {
    fn new(backpressure: Backpressure) -> Self {
        Self {
            backpressure,
            paused_during_every_flush: true,
            ..Self::default()
        }
    }

    fn flush_sizes(&self) -> Vec<usize> {
        self.flushes.iter().map(|(_, rows)| rows.len()).collect()
    }

    fn all_rows(&self) -> impl Iterator<Item = &Record> {
        self.flushes.iter().flat_map(|(_, rows)| rows.iter())
    }
}

impl StorageAdapter for RecordingStorage {
    fn connect(&mut self) -> LoadResult<()> {
        Ok(())
    }

    fn sync_schema(&mut self, models: &[Model], _overwrite: bool) -> LoadResult<()> {
        self.synced.extend(models.iter().map(|m| m.table_name.clone()));
        Ok(())
    }

    fn bulk_upsert(
        &mut self,
        rows: &[Record],
        model: &Model,
        _options: &UpsertOptions,
    ) -> LoadResult<()> {
        self.paused_during_every_flush &= self.backpressure.is_paused();
        if self.fail_upserts {
            return Err(LoadError::Io(io::Error::other("disk full")));
        }
        self.flushes.push((model.table_name.clone(), rows.to_vec()));
        Ok(())
    }

    fn optimize(&mut self, _model: &Model) -> LoadResult<()> {
        self.optimized += 1;
        Ok(())
    }

    fn execute_batch(&mut self, sql: &str) -> LoadResult<()> {
        self.executed.push(sql.to_string());
        Ok(())
    }

    fn close(&mut self) -> LoadResult<()> {
        self.closed += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<LoadEvent>>,
    failures: Mutex<Vec<(LoadSeverity, String)>>,
    alerts: Mutex<Vec<(LoadSeverity, String)>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<LoadEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl LoadObserver for RecordingObserver {
    fn on_event(&self, _ctx: &LoadContext, event: &LoadEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_failure(&self, _ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        self.failures.lock().unwrap().push((severity, error.to_string()));
    }

    fn on_alert(&self, _ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        self.alerts.lock().unwrap().push((severity, error.to_string()));
    }
}

fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("tables_load_{name}_{}_{nanos}", std::process::id()))
}

fn numbered_csv(rows: usize) -> String {
    let mut csv = String::from("n,label\n");
    for i in 1..=rows {
        csv.push_str(&format!("{i},row {i}\n"));
    }
    csv
}

fn base_options(table: &str) -> LoadOptions {
    LoadOptions {
        db: Some("sqlite://:memory:".to_string()),
        table_name: Some(table.to_string()),
        ..LoadOptions::default()
    }
}

#[test]
fn flushes_at_the_batch_threshold_with_both_stages_paused() {
    let bp = Backpressure::new();
    let storage = RecordingStorage::new(bp.clone());
    let mut pipeline =
        LoadPipeline::new(base_options("numbers"), storage).with_backpressure(bp.clone());

    let summary = pipeline.run_reader(numbered_csv(1200).into_bytes().as_slice()).unwrap();

    let storage = pipeline.into_storage();
    assert_eq!(storage.flush_sizes(), vec![500, 500, 200]);
    assert!(storage.paused_during_every_flush);
    assert!(!bp.is_paused() && !bp.input.is_paused() && !bp.extractor.is_paused());

    assert_eq!(summary.metrics.rows_read, 1200);
    assert_eq!(summary.metrics.rows_loaded, 1200);
    assert_eq!(summary.metrics.flushes, 3);
    assert_eq!(storage.synced, vec!["numbers".to_string()]);
    assert_eq!(storage.optimized, 1);
    assert_eq!(storage.closed, 1);

    // Every row arrives once, in input order, with the inferred types.
    let ns: Vec<i64> = storage
        .all_rows()
        .map(|r| match r.get("n") {
            Some(Value::Int64(n)) => *n,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(ns, (1..=1200).collect::<Vec<_>>());
}

#[test]
fn rejected_rows_are_counted_and_never_written() {
    let storage = RecordingStorage::new(Backpressure::new());
    let mut pipeline = LoadPipeline::new(base_options("filtered"), storage).with_transformer(|row| {
        if row.get("label").and_then(|v| v.as_str()) == Some("row 2") {
            None
        } else {
            Some(row)
        }
    });
    let observer = Arc::new(RecordingObserver::default());
    pipeline = pipeline.with_observer(observer.clone());

    let summary = pipeline.run_reader(numbered_csv(3).as_bytes()).unwrap();
    assert_eq!(summary.metrics.rows_read, 3);
    assert_eq!(summary.metrics.rows_skipped, 1);
    assert_eq!(summary.metrics.rows_loaded, 2);

    let storage = pipeline.into_storage();
    let labels: Vec<&Value> = storage.all_rows().filter_map(|r| r.get("label")).collect();
    assert_eq!(labels, vec![&Value::Utf8("row 1".into()), &Value::Utf8("row 3".into())]);
    assert!(observer.events().contains(&LoadEvent::RowSkipped { row: 2 }));
}

#[test]
fn lifecycle_events_are_emitted_in_order() {
    let observer = Arc::new(RecordingObserver::default());
    let storage = RecordingStorage::new(Backpressure::new());
    let mut pipeline =
        LoadPipeline::new(base_options("events"), storage).with_observer(observer.clone());
    pipeline.run_reader("a\n1\n".as_bytes()).unwrap();
    assert_eq!(pipeline.phase(), LoadPhase::Closed);

    let entered: Vec<LoadPhase> = observer
        .events()
        .iter()
        .filter_map(|e| match e {
            LoadEvent::PhaseEntered { phase } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        entered,
        vec![
            LoadPhase::Connecting,
            LoadPhase::StreamOpen,
            LoadPhase::Inferring,
            LoadPhase::SyncingSchema,
            LoadPhase::Loading,
            LoadPhase::Finishing,
        ]
    );
    let events = observer.events();
    assert!(events.iter().any(|e| matches!(
        e,
        LoadEvent::ModelInferred { table, fields: 2, sample_rows: 1 } if table == "events"
    )));
    assert!(matches!(events.last(), Some(LoadEvent::Finished { .. })));
}

#[test]
fn input_larger_than_the_sample_is_loaded_in_full() {
    let options = LoadOptions {
        guess_limit: 5,
        batch_threshold: 7,
        ..base_options("big")
    };
    let mut pipeline = LoadPipeline::new(options, RecordingStorage::new(Backpressure::new()));
    let summary = pipeline.run_reader(numbered_csv(40).as_bytes()).unwrap();

    assert_eq!(summary.metrics.rows_loaded, 40);
    assert_eq!(pipeline.into_storage().flush_sizes(), vec![7, 7, 7, 7, 7, 5]);
}

#[test]
fn empty_input_creates_the_table_and_loads_nothing() {
    let storage = RecordingStorage::new(Backpressure::new());
    let mut pipeline = LoadPipeline::new(base_options("empty"), storage);
    let summary = pipeline.run_reader("".as_bytes()).unwrap();

    assert_eq!(summary.metrics.rows_loaded, 0);
    assert_eq!(summary.metrics.flushes, 0);
    assert_eq!(summary.models[0].fields.len(), 1);
    assert_eq!(pipeline.into_storage().synced, vec!["empty".to_string()]);
}

#[test]
fn declared_models_skip_inference_and_fan_out() {
    let people = Model::new(
        "people",
        "people",
        vec![
            Field::new("id", "id", FieldType::Integer).into_key(),
            Field::new("name", "name", FieldType::String { width: Some(40) }),
        ],
    );
    let visits = Model::new(
        "visits",
        "visits",
        vec![
            Field::synthetic_key(),
            Field::new("id", "person_id", FieldType::Integer),
            Field::new("visited", "visited", FieldType::Date),
        ],
    );
    let observer = Arc::new(RecordingObserver::default());
    let storage = RecordingStorage::new(Backpressure::new());
    let mut pipeline = LoadPipeline::new(base_options("ignored"), storage)
        .with_models(vec![people, visits])
        .with_observer(observer.clone());

    let summary = pipeline
        .run_reader("id,name,visited\n1,Ann,1/2/2020\n2,Bo,2020-03-04\n".as_bytes())
        .unwrap();
    assert_eq!(summary.models.len(), 2);
    assert!(!observer.events().iter().any(|e| matches!(e, LoadEvent::ModelInferred { .. })));

    let storage = pipeline.into_storage();
    assert_eq!(storage.synced, vec!["people".to_string(), "visits".to_string()]);
    let tables: Vec<&str> = storage.flushes.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(tables, vec!["people", "visits"]);

    let visits = &storage.flushes[1].1;
    assert_eq!(visits[0].get("person_id"), Some(&Value::Int64(1)));
    assert_eq!(
        visits[1].get("visited"),
        Some(&Value::Date(chrono::NaiveDate::from_ymd_opt(2020, 3, 4).unwrap()))
    );
}

#[test]
fn finish_hook_runs_before_optimize_and_close() {
    let options = LoadOptions {
        optimize_after_load: false,
        ..base_options("hooked")
    };
    let mut pipeline = LoadPipeline::new(options, RecordingStorage::new(Backpressure::new()))
        .with_finish_hook(|storage, models| {
            storage.execute_batch(&format!("UPDATE {} SET a = a", models[0].table_name))
        });
    pipeline.run_reader("a\n1\n".as_bytes()).unwrap();

    let storage = pipeline.into_storage();
    assert_eq!(storage.executed, vec!["UPDATE hooked SET a = a".to_string()]);
    assert_eq!(storage.optimized, 0);
    assert_eq!(storage.closed, 1);
}

#[test]
fn loads_a_csv_file_into_sqlite_and_upserts_idempotently() {
    let db = temp_path("people.sqlite");
    let options = LoadOptions {
        input: Some(PathBuf::from("tests/fixtures/people.csv")),
        db: Some(format!("sqlite://{}", db.display())),
        key: vec!["Person ID".to_string()],
        ..LoadOptions::default()
    };

    for _ in 0..2 {
        let storage = SqliteStorage::new(options.effective_db_uri().unwrap());
        let mut pipeline = LoadPipeline::new(options.clone(), storage);
        let summary = pipeline.run().unwrap();
        assert_eq!(summary.metrics.rows_loaded, 4);
        assert_eq!(summary.models[0].table_name, "people");
    }

    let mut storage = SqliteStorage::new(DatabaseUri::sqlite_file(&db));
    storage.connect().unwrap();
    assert_eq!(storage.count_rows("people").unwrap(), 4);

    let conn = storage.connection().unwrap();
    let zip: String = conn
        .query_row("SELECT zip_code FROM people WHERE person_id = 2", [], |r| r.get(0))
        .unwrap();
    assert_eq!(zip, "00501");
    let missing: Option<String> = conn
        .query_row("SELECT zip_code FROM people WHERE person_id = 4", [], |r| r.get(0))
        .unwrap();
    assert_eq!(missing, None);

    storage.close().unwrap();
    let _ = fs::remove_file(&db);
}

#[test]
fn loads_ndjson_and_json_fixtures() {
    let cases = [
        ("tests/fixtures/events.ndjson", "events", 3),
        ("tests/fixtures/contracts.json", "contracts", 3),
    ];
    for (input, table, rows) in cases {
        let options = LoadOptions {
            input: Some(PathBuf::from(input)),
            db: Some("sqlite://:memory:".to_string()),
            optimize_after_load: false,
            ..LoadOptions::default()
        };
        let mut pipeline = LoadPipeline::new(options, RecordingStorage::new(Backpressure::new()));
        let summary = pipeline.run().unwrap();
        assert_eq!(summary.models[0].table_name, table);
        assert_eq!(summary.metrics.rows_loaded, rows, "{input}");
    }
}

#[test]
fn resumes_from_a_saved_checkpoint() {
    let input = temp_path("resume.csv");
    fs::write(&input, "a,b\n1,x\n2,y\n3,z\n").unwrap();
    let total = fs::metadata(&input).unwrap().len();

    let mut store = MemoryCheckpointStore::new();
    let id = input.display().to_string();
    // Consumed through the first data row ("a,b\n1,x\n").
    store
        .save(
            &id,
            &Checkpoint {
                bytes_consumed: 8,
                total_bytes: Some(total),
                format_options: FormatOptions {
                    has_headers: false,
                    headers: Some(vec!["a".to_string(), "b".to_string()]),
                    ..FormatOptions::default()
                },
            },
        )
        .unwrap();

    let options = LoadOptions {
        input: Some(input.clone()),
        ..base_options("resumed")
    };
    let observer = Arc::new(RecordingObserver::default());
    let mut pipeline = LoadPipeline::new(options, RecordingStorage::new(Backpressure::new()))
        .with_checkpoints(Box::new(store.clone()))
        .with_observer(observer.clone());
    let summary = pipeline.run().unwrap();

    assert_eq!(summary.resumed_from, Some(8));
    assert_eq!(summary.metrics.rows_loaded, 2);
    assert!(observer.events().contains(&LoadEvent::Resumed { offset: 8 }));
    let storage = pipeline.into_storage();
    let a: Vec<&Value> = storage.all_rows().filter_map(|r| r.get("a")).collect();
    assert_eq!(a, vec![&Value::Int64(2), &Value::Int64(3)]);

    let saved = store.entries().remove(&id).unwrap();
    assert_eq!(saved.bytes_consumed, total);
    assert!(!saved.is_resumable());

    let _ = fs::remove_file(&input);
}

#[test]
fn checkpoint_is_ignored_when_resume_is_off_or_the_file_changed() {
    let input = temp_path("changed.csv");
    fs::write(&input, "a\n1\n2\n").unwrap();
    let id = input.display().to_string();

    for (resume, total) in [(false, fs::metadata(&input).unwrap().len()), (true, 999)] {
        let mut store = MemoryCheckpointStore::new();
        store
            .save(
                &id,
                &Checkpoint {
                    bytes_consumed: 4,
                    total_bytes: Some(total),
                    format_options: FormatOptions::default(),
                },
            )
            .unwrap();
        let options = LoadOptions {
            input: Some(input.clone()),
            resume,
            ..base_options("fresh")
        };
        let mut pipeline = LoadPipeline::new(options, RecordingStorage::new(Backpressure::new()))
            .with_checkpoints(Box::new(store));
        let summary = pipeline.run().unwrap();
        assert_eq!(summary.resumed_from, None);
        assert_eq!(summary.metrics.rows_loaded, 2);
    }

    let _ = fs::remove_file(&input);
}

#[test]
fn unreachable_database_fails_critical_and_alerts() {
    let options = LoadOptions {
        db: Some("sqlite:///definitely/not/a/dir/out.sqlite".to_string()),
        table_name: Some("t".to_string()),
        ..LoadOptions::default()
    };
    let storage = SqliteStorage::new(options.effective_db_uri().unwrap());
    let observer = Arc::new(RecordingObserver::default());
    let mut pipeline = LoadPipeline::new(options, storage).with_observer(observer.clone());

    let err = pipeline.run_reader("a\n1\n".as_bytes()).unwrap_err();
    assert!(matches!(err, LoadError::Connection { .. }));
    assert_eq!(pipeline.phase(), LoadPhase::Failed);
    assert_eq!(observer.failures.lock().unwrap()[0].0, LoadSeverity::Critical);
    assert_eq!(observer.alerts.lock().unwrap().len(), 1);
}

#[test]
fn configuration_errors_fail_without_alerting() {
    let options = LoadOptions {
        key: vec!["nope".to_string()],
        ..base_options("t")
    };
    let observer = Arc::new(RecordingObserver::default());
    let mut pipeline = LoadPipeline::new(options, RecordingStorage::new(Backpressure::new()))
        .with_observer(observer.clone());

    let err = pipeline.run_reader("a\n1\n".as_bytes()).unwrap_err();
    assert!(matches!(err, LoadError::Config { .. }));
    assert_eq!(observer.failures.lock().unwrap()[0].0, LoadSeverity::Error);
    assert!(observer.alerts.lock().unwrap().is_empty());
    assert_eq!(pipeline.into_storage().closed, 1);
}

#[test]
fn sampling_stops_after_guess_limit_rows_even_when_most_are_rejected() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let options = LoadOptions {
        guess_limit: 5,
        ..base_options("sparse")
    };
    let observer = Arc::new(RecordingObserver::default());
    let mut pipeline = LoadPipeline::new(options, RecordingStorage::new(Backpressure::new()))
        .with_observer(observer.clone())
        .with_transformer(move |row| {
            seen.fetch_add(1, Ordering::SeqCst);
            (row.get("label").and_then(|v| v.as_str()) == Some("row 1")).then_some(row)
        });

    let summary = pipeline.run_reader(numbered_csv(1000).as_bytes()).unwrap();

    // Five rows while sampling, then every row once while loading.
    assert_eq!(calls.load(Ordering::SeqCst), 5 + 1000);
    assert_eq!(summary.metrics.rows_loaded, 1);
    assert_eq!(summary.metrics.rows_skipped, 999);
    assert!(observer.events().iter().any(|e| matches!(
        e,
        LoadEvent::ModelInferred { sample_rows: 1, .. }
    )));
}

#[test]
fn finish_hook_errors_surface_as_hook_failures() {
    let observer = Arc::new(RecordingObserver::default());
    let storage = RecordingStorage::new(Backpressure::new());
    let mut pipeline = LoadPipeline::new(base_options("hooked"), storage)
        .with_observer(observer.clone())
        .with_finish_hook(|_, _| Err(LoadError::Io(io::Error::other("report upload failed"))));

    let err = pipeline.run_reader("a\n1\n".as_bytes()).unwrap_err();
    match &err {
        LoadError::Hook { message } => {
            assert!(message.contains("report upload failed"), "{message}")
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(pipeline.phase(), LoadPhase::Failed);
    assert_eq!(observer.failures.lock().unwrap()[0].0, LoadSeverity::Error);

    let storage = pipeline.into_storage();
    assert_eq!(storage.flush_sizes(), vec![1]);
    assert_eq!(storage.optimized, 0);
    assert_eq!(storage.closed, 1);
}

#[test]
fn progress_is_reported_while_extracting_a_file() {
    let input = temp_path("progress.csv");
    fs::write(&input, numbered_csv(300)).unwrap();
    let total = fs::metadata(&input).unwrap().len();

    let options = LoadOptions {
        input: Some(input.clone()),
        batch_threshold: 1000,
        ..base_options("progress")
    };
    let observer = Arc::new(RecordingObserver::default());
    let mut pipeline = LoadPipeline::new(options, RecordingStorage::new(Backpressure::new()))
        .with_observer(observer.clone());
    pipeline.run().unwrap();

    let events = observer.events();
    let first_progress = events
        .iter()
        .position(|e| matches!(e, LoadEvent::Progress { .. }))
        .unwrap();
    let first_flush = events
        .iter()
        .position(|e| matches!(e, LoadEvent::BatchFlushed { .. }))
        .unwrap();
    assert!(first_progress < first_flush);

    let fractions: Vec<f64> = events.iter().filter_map(LoadEvent::fraction).collect();
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]), "{fractions:?}");
    assert_eq!(fractions.last().copied(), Some(1.0));
    assert!(events.iter().all(|e| match e {
        LoadEvent::Progress { total_bytes, .. } => *total_bytes == total,
        _ => true,
    }));

    let _ = fs::remove_file(&input);
}

#[test]
fn failed_write_saves_no_checkpoint() {
    let input = temp_path("failing.csv");
    fs::write(&input, numbered_csv(10)).unwrap();

    let store = MemoryCheckpointStore::new();
    let storage = RecordingStorage {
        fail_upserts: true,
        ..RecordingStorage::new(Backpressure::new())
    };
    let options = LoadOptions {
        input: Some(input.clone()),
        batch_threshold: 4,
        ..base_options("failing")
    };
    let mut pipeline =
        LoadPipeline::new(options, storage).with_checkpoints(Box::new(store.clone()));

    let err = pipeline.run().unwrap_err();
    assert!(matches!(err, LoadError::Io(_)));
    assert!(store.entries().is_empty());
    assert_eq!(pipeline.metrics().snapshot().rows_loaded, 0);
    assert_eq!(pipeline.metrics().snapshot().flushes, 0);
    assert_eq!(pipeline.into_storage().closed, 1);

    let _ = fs::remove_file(&input);
}
