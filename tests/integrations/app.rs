//! Startup and shutdown of the whole relay.

use async_trait::async_trait;
use dingrelay::app::App;
use dingrelay::config::Target;
use dingrelay::coordinator::ConfigSource;
use dingrelay::models::{DingTalkNotification, RobotResponse};
use dingrelay::notifier::{Dispatch, DispatchError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{app::TestAppBuilder, sample_payload, write_file};

const VALID: &str = "targets:\n  ops:\n    url: http://robot.local/send?access_token=abc\n";

#[tokio::test]
async fn test_app_starts_and_shuts_down_cleanly() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "config.yml", VALID);

    let app = TestAppBuilder::from_file(&path).watching().build().await.unwrap();
    assert_eq!(app.coordinator.current().unwrap().generation, 1);
    assert_eq!(app.get("/-/ready").await.status(), reqwest::StatusCode::OK);

    let result = app.shutdown(Duration::from_secs(5)).await;
    assert!(result.is_ok(), "App should shut down cleanly: {result:?}");
}

#[tokio::test]
async fn test_startup_fails_with_invalid_config() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "config.yml", "targets:\n  9ops:\n    url: http://robot.local/send\n");

    let err = TestAppBuilder::from_file(&path).build().await.err().unwrap();
    let message = format!("{err:#}");
    assert!(message.contains("failed to load initial configuration"), "{message}");
    assert!(message.contains("9ops"), "{message}");
}

#[tokio::test]
async fn test_startup_fails_with_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let result = TestAppBuilder::from_file(dir.path().join("absent.yml")).build().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_startup_fails_when_address_in_use() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "config.yml", VALID);
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = App::builder(ConfigSource::File(path))
        .listen_address(taken.local_addr().unwrap())
        .build(shutdown_rx)
        .await;

    let err = result.err().unwrap();
    assert!(format!("{err:#}").contains("failed to bind"), "{err:#}");
}

#[tokio::test]
async fn test_dropped_shutdown_sender_stops_the_app() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "config.yml", VALID);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(ConfigSource::File(path))
        .listener(listener)
        .build(shutdown_rx)
        .await
        .unwrap();
    drop(shutdown_tx);

    tokio::time::timeout(Duration::from_secs(5), app.run())
        .await
        .expect("app should stop once the shutdown sender is gone")
        .unwrap();
}

/// Records what would have been sent instead of talking to a robot.
#[derive(Default)]
struct RecordingDispatcher {
    sent: Mutex<Vec<(String, Duration, DingTalkNotification)>>,
}

#[async_trait]
impl Dispatch for RecordingDispatcher {
    async fn dispatch(
        &self,
        target: &Target,
        notification: &DingTalkNotification,
        timeout: Duration,
    ) -> Result<RobotResponse, DispatchError> {
        self.sent
            .lock()
            .unwrap()
            .push((target.url.redacted(), timeout, notification.clone()));
        Ok(RobotResponse::default())
    }
}

#[tokio::test]
async fn test_dispatcher_override_receives_notifications() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "config.yml", &format!("timeout: 7s\n{VALID}"));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dispatcher = Arc::new(RecordingDispatcher::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(ConfigSource::File(path))
        .listener(listener)
        .dispatcher_override(dispatcher.clone())
        .build(shutdown_rx)
        .await
        .unwrap();
    let url = format!("http://{}/dingtalk/ops/send", app.local_addr());
    let handle = tokio::spawn(app.run());

    let response = reqwest::Client::new()
        .post(&url)
        .json(&sample_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    {
        let sent = dispatcher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (target_url, timeout, notification) = &sent[0];
        assert_eq!(target_url, "http://robot.local/send?access_token=<secret>");
        assert_eq!(*timeout, Duration::from_secs(7));
        assert!(notification.markdown.is_some());
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
