//! Integration tests for user management against a running server.
//!
//! The router and the admin channel share one redb store, the way
//! `widgets server` wires them; `cmd_user` runs as the CLI would.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::{HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use widgets::admin;
use widgets::api::{API_KEY_HEADER, AppState, create_router};
use widgets::cli::{UserCommand, cmd_user};
use widgets::config::ServerConfig;
use widgets_core::{RedbStore, SharedStore, User, WidgetStore, WidgetsError};

struct LiveServer {
    _dir: tempfile::TempDir,
    config: ServerConfig,
    server: TestServer,
    store: SharedStore,
    stop: watch::Sender<bool>,
    admin_task: JoinHandle<()>,
}

fn start(users: &[&User]) -> LiveServer {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = ServerConfig {
        database_path: dir.path().join("widgets.redb"),
        ..ServerConfig::default()
    };

    let store: SharedStore = Arc::new(RedbStore::open(&config.database_path).unwrap());
    for user in users {
        store.insert_user(user).unwrap();
    }

    let socket = config.admin_socket_path();
    let listener = admin::bind(&socket).unwrap();
    let (stop, stop_rx) = watch::channel(false);
    let admin_task = tokio::spawn(admin::serve(
        listener,
        socket,
        Arc::clone(&store),
        stop_rx,
    ));

    LiveServer {
        server: TestServer::new(create_router(AppState::new(Arc::clone(&store)))).unwrap(),
        _dir: dir,
        config,
        store,
        stop,
        admin_task,
    }
}

/// Run a user command the way the CLI does, off the runtime.
async fn run_cli(config: &ServerConfig, command: UserCommand) -> Result<String, WidgetsError> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        cmd_user(&config, &command, &mut out).map(|()| String::from_utf8(out).unwrap())
    })
    .await
    .unwrap()
}

fn with_key(request: TestRequest, key: &str) -> TestRequest {
    request.add_header(API_KEY_HEADER, key.parse::<HeaderValue>().unwrap())
}

fn name(name: &str) -> String {
    name.to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_revoked_key_stops_working_while_serving() {
    let alice = User::new("alice").unwrap();
    let live = start(&[&alice]);

    with_key(live.server.get("/widget"), &alice.api_key)
        .await
        .assert_status_ok();

    let out = run_cli(&live.config, UserCommand::Delete { name: name("alice") })
        .await
        .unwrap();
    assert_eq!(out.trim(), "User deleted!");

    with_key(live.server.get("/widget"), &alice.api_key)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    assert!(live.store.get_user("alice").unwrap().is_none());

    live.stop.send(true).unwrap();
    live.admin_task.await.unwrap();
    assert!(!live.config.admin_socket_path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_created_and_rotated_keys_work_at_once() {
    let live = start(&[]);

    let out = run_cli(&live.config, UserCommand::Create { name: name("bob") })
        .await
        .unwrap();
    let key = out.trim().rsplit(' ').next().unwrap().to_string();
    with_key(live.server.get("/widget"), &key)
        .await
        .assert_status_ok();

    let out = run_cli(&live.config, UserCommand::Rotate { name: name("bob") })
        .await
        .unwrap();
    let rotated = out.trim().rsplit(' ').next().unwrap().to_string();
    assert_ne!(key, rotated);
    with_key(live.server.get("/widget"), &key)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    with_key(live.server.get("/widget"), &rotated)
        .await
        .assert_status_ok();

    let listed = run_cli(&live.config, UserCommand::List).await.unwrap();
    assert_eq!(listed, "bob\n");

    live.stop.send(true).unwrap();
    live.admin_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_errors_come_back_from_the_server() {
    let alice = User::new("alice").unwrap();
    let live = start(&[&alice]);

    let duplicate = run_cli(&live.config, UserCommand::Create { name: name("alice") }).await;
    assert!(matches!(duplicate, Err(WidgetsError::UserExists(n)) if n == "alice"));

    let missing = run_cli(&live.config, UserCommand::Regen { name: name("nobody") }).await;
    assert!(matches!(missing, Err(WidgetsError::UserNotFound(n)) if n == "nobody"));

    let bad = run_cli(&live.config, UserCommand::Create { name: name("") }).await;
    assert!(matches!(bad, Err(WidgetsError::InvalidUserName(_))));

    live.stop.send(true).unwrap();
    live.admin_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stopped_server_falls_back_to_the_file() {
    let alice = User::new("alice").unwrap();
    let live = start(&[&alice]);
    let LiveServer {
        _dir: dir,
        config,
        server,
        store,
        stop,
        admin_task,
    } = live;

    stop.send(true).unwrap();
    admin_task.await.unwrap();
    drop(server);
    drop(store);

    let listed = run_cli(&config, UserCommand::List).await.unwrap();
    assert_eq!(listed, "alice\n");
    drop(dir);
}
