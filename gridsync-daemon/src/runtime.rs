use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use gridsync_core::{Header, MemoryGrid, MemoryRelational, Record, RecordId};
use gridsync_sync::{JobState, QueueName, SheetTrigger, SyncEngine};

use crate::config::{DaemonConfig, LogFormat, LoggingConfig};
use crate::error::{io_err, DaemonError};
use crate::paths::{gridsync_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// The engine plus the stores it runs against.
pub struct Daemon {
    engine: SyncEngine,
    grid: MemoryGrid,
    db: MemoryRelational,
    config: DaemonConfig,
    socket: PathBuf,
    started_at_unix: u64,
}

impl Daemon {
    pub fn new(home: &Path, config: DaemonConfig) -> Self {
        let grid = MemoryGrid::with_header(&Header(config.grid.header.clone()))
            .with_sheet(&config.grid.sheet);
        let db = MemoryRelational::with_options(&config.relational.channel, config.relational.pool_size);
        let engine = SyncEngine::with_memory_broker(
            Arc::new(grid.clone()),
            Arc::new(db.clone()),
            config.engine_options(),
        );
        Self {
            engine,
            grid,
            db,
            config,
            socket: socket_path(home),
            started_at_unix: unix_seconds_now(),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn grid(&self) -> &MemoryGrid {
        &self.grid
    }

    pub fn db(&self) -> &MemoryRelational {
        &self.db
    }
}

/// Load config, start logging and block the current thread on the daemon.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let config = DaemonConfig::load(home)?;
    init_tracing(&config.logging);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the engine and the socket server until `stop` or ctrl-c.
pub async fn run(home: PathBuf, config: DaemonConfig) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let daemon = Arc::new(Daemon::new(&home, config));
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    // A failed notification subscription is fatal.
    let engine_handles = daemon.engine.start(&shutdown_tx).await?;

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let daemon = daemon.clone();
        tokio::spawn(async move {
            let result = socket_server_task(daemon, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    let _ = shutdown_tx.send(());
    for handle in engine_handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "engine task join failure");
        }
    }
    daemon.engine.broker().close().await;

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

async fn socket_server_task(
    daemon: Arc<Daemon>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = daemon.socket.clone();
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let daemon = daemon.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, daemon, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    daemon: Arc<Daemon>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stopping = request.cmd == "stop";
        let response = if stopping {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        } else {
            match dispatch(&daemon, &request).await {
                Ok(data) => DaemonResponse::ok(data),
                Err(err) => {
                    tracing::warn!(cmd = %request.cmd, error = %err, "request failed");
                    DaemonResponse::error(err.to_string())
                }
            }
        };

        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: RecordId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JobsArgs {
    queue: Option<QueueName>,
    state: Option<JobState>,
}

fn parse_args<T: DeserializeOwned>(request: &DaemonRequest) -> Result<T, DaemonError> {
    serde_json::from_value(request.args.clone())
        .map_err(|err| DaemonError::Protocol(format!("invalid arguments for '{}': {err}", request.cmd)))
}

/// Execute one socket command against the running engine.
pub async fn dispatch(daemon: &Daemon, request: &DaemonRequest) -> Result<Value, DaemonError> {
    let engine = &daemon.engine;
    let direct = engine.direct();

    let data = match request.cmd.as_str() {
        "status" => json!({
            "running": true,
            "started_at_unix": daemon.started_at_unix,
            "socket": daemon.socket.display().to_string(),
            "sheet": daemon.grid.sheet(),
            "channel": daemon.config.relational.channel,
            "engine": engine.status().await?,
        }),
        "sheet-trigger" => {
            let trigger: SheetTrigger = parse_args(request)?;
            json!(engine.producer().produce_grid_to_relational(trigger).await?)
        }
        "rows" => json!(direct.read_rows().await?),
        "row-append" => {
            let record: Record = parse_args(request)?;
            let row = direct.append_row(&record).await?;
            json!({ "message": "Row added successfully", "row": row })
        }
        "row-update" => {
            let record: Record = parse_args(request)?;
            let row = direct.update_row(&record).await?;
            json!({ "message": "Row updated successfully", "row": row })
        }
        "row-clear" => {
            let IdArgs { id } = parse_args(request)?;
            let row = direct.clear_row(id).await?;
            json!({ "message": "Row deleted successfully", "row": row })
        }
        "records" => match request.args.get("id") {
            Some(_) => {
                let IdArgs { id } = parse_args(request)?;
                json!(direct.get_record(id).await?)
            }
            None => json!(direct.list_records().await?),
        },
        "record-create" => {
            let record: Record = parse_args(request)?;
            json!(direct.create_record(&record).await?)
        }
        "record-update" => {
            let record: Record = parse_args(request)?;
            json!(direct.update_record(&record).await?)
        }
        "record-delete" => {
            let IdArgs { id } = parse_args(request)?;
            direct.delete_record(id).await?;
            json!({ "message": "Data deleted successfully" })
        }
        "jobs" => {
            let args: JobsArgs = if request.args.is_null() {
                JobsArgs::default()
            } else {
                parse_args(request)?
            };
            let queues = match args.queue {
                Some(queue) => vec![queue],
                None => QueueName::ALL.to_vec(),
            };
            let mut jobs = Vec::new();
            for queue in queues {
                jobs.extend(
                    engine
                        .broker()
                        .jobs(queue, args.state)
                        .await
                        .map_err(gridsync_sync::SyncError::from)?,
                );
            }
            json!(jobs)
        }
        other => return Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    };
    Ok(data)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = gridsync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing(logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.filter.as_deref().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tempfile::TempDir;

    fn daemon(home: &TempDir) -> Daemon {
        Daemon::new(home.path(), DaemonConfig::default())
    }

    fn req(cmd: &str, args: Value) -> DaemonRequest {
        DaemonRequest::new(cmd, args)
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn sheet_trigger_is_reconciled_into_records() {
        let home = TempDir::new().expect("home");
        let daemon = daemon(&home);
        let (shutdown, _) = broadcast::channel(1);
        let handles = daemon.engine().start(&shutdown).await.expect("start");

        let ack = dispatch(
            &daemon,
            &req(
                "sheet-trigger",
                json!({
                    "range": {"startRow": 2, "endRow": 2},
                    "sheetData": [["id", "name", "age", "city"], ["3", "Ann", "30", "NYC"]]
                }),
            ),
        )
        .await
        .expect("trigger");
        assert_eq!(ack["message"], "Sheet sync job added to queue");

        let db = daemon.db().clone();
        wait_for("record 3", || !db.snapshot().is_empty()).await;
        assert_eq!(db.snapshot(), vec![Record::new(3, "Ann", Some(30), "NYC")]);

        let mut state = Value::Null;
        for _ in 0..200 {
            let jobs = dispatch(&daemon, &req("jobs", json!({"queue": "grid-sync"})))
                .await
                .expect("jobs");
            state = jobs[0]["state"].clone();
            if state == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, "completed");

        let _ = shutdown.send(());
        for handle in handles {
            handle.await.expect("join");
        }
    }

    #[tokio::test]
    async fn row_commands_mirror_into_records() {
        let home = TempDir::new().expect("home");
        let daemon = daemon(&home);
        let record = json!({"id": 1, "name": "Ann", "age": 30, "city": "NYC"});

        let appended = dispatch(&daemon, &req("row-append", record)).await.expect("append");
        assert_eq!(appended["row"], 2);
        let rows = dispatch(&daemon, &req("rows", Value::Null)).await.expect("rows");
        assert_eq!(rows[0]["name"], "Ann");
        let fetched = dispatch(&daemon, &req("records", json!({"id": 1}))).await.expect("get");
        assert_eq!(fetched["city"], "NYC");

        let cleared = dispatch(&daemon, &req("row-clear", json!({"id": 1}))).await.expect("clear");
        assert_eq!(cleared["message"], "Row deleted successfully");
        assert!(daemon.db().snapshot().is_empty());
    }

    #[tokio::test]
    async fn configured_sheet_names_grid_ranges() {
        let home = TempDir::new().expect("home");
        let mut config = DaemonConfig::default();
        config.grid.sheet = "Users".to_string();
        let daemon = Daemon::new(home.path(), config);
        assert_eq!(daemon.grid().sheet(), "Users");

        let status = dispatch(&daemon, &req("status", Value::Null)).await.expect("status");
        assert_eq!(status["sheet"], "Users");
    }

    #[tokio::test]
    async fn bad_requests_are_reported() {
        let home = TempDir::new().expect("home");
        let daemon = daemon(&home);

        let err = dispatch(&daemon, &req("sync", Value::Null)).await.unwrap_err();
        assert_eq!(err.to_string(), "daemon protocol error: unknown command 'sync'");

        let err = dispatch(&daemon, &req("record-delete", json!({"name": "x"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid arguments for 'record-delete'"), "{err}");

        let err = dispatch(&daemon, &req("records", json!({"id": 9}))).await.unwrap_err();
        assert!(err.to_string().contains("9"), "{err}");
    }

    #[tokio::test]
    async fn status_reports_both_queues() {
        let home = TempDir::new().expect("home");
        let status = dispatch(&daemon(&home), &req("status", Value::Null))
            .await
            .expect("status");
        assert_eq!(status["running"], true);
        assert_eq!(status["channel"], "user_change");
        let queues = status["engine"]["queues"].as_array().expect("queues");
        assert_eq!(queues.len(), 2);
        assert_eq!(queues[0]["queue"], "grid-sync");
        assert_eq!(queues[1]["waiting"], 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn socket_serves_requests_until_stopped() {
        let home = TempDir::new().expect("home");
        let server = tokio::spawn(run(home.path().to_path_buf(), DaemonConfig::default()));

        let socket = socket_path(home.path());
        wait_for("socket", || socket.exists()).await;

        let home_path = home.path().to_path_buf();
        let (created, stopped) = tokio::task::spawn_blocking(move || {
            let created = crate::protocol::request(
                &home_path,
                "record-create",
                json!({"id": 4, "name": "Bo", "city": "LA"}),
            );
            let stopped = crate::protocol::request_stop(&home_path);
            (created, stopped)
        })
        .await
        .expect("client");

        assert_eq!(created.expect("create")["name"], "Bo");
        stopped.expect("stop");
        server.await.expect("join").expect("daemon result");
        assert!(!socket.exists(), "socket removed on shutdown");
    }
}
