//! End-to-end tests of the HTTP surface against a fake robot endpoint.

use dingrelay::config::{Config, Secret, SecretUrl, Target, TargetMention};
use dingrelay::models::MessageType;
use dingrelay::notifier::sign;
use dingrelay::web::UNKNOWN_TARGET;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{app::TestAppBuilder, mock_robot::MockRobot, sample_payload};

fn config_for(robot: &MockRobot, secret: Option<&str>, mention: Option<TargetMention>) -> Config {
    let mut target = Target::new(SecretUrl::parse(&robot.url("abc")).unwrap());
    target.secret = secret.map(Secret::new);
    target.mention = mention;

    let mut config = Config::default();
    config.timeout = Duration::from_secs(2);
    config.targets.insert("ops".to_string(), target);
    config
}

#[tokio::test]
async fn test_signed_notification_is_delivered() {
    let robot = MockRobot::accepting().await;
    let app = TestAppBuilder::from_config(config_for(&robot, Some("s3cr3t"), None))
        .build()
        .await
        .unwrap();

    let response = app.send("ops", &sample_payload()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");

    let received = robot.received().await;
    assert_eq!(received.len(), 1);
    let request = &received[0];
    assert_eq!(request.query["access_token"], "abc");
    let timestamp = &request.query["timestamp"];
    assert_eq!(request.query["sign"], sign("s3cr3t", timestamp).unwrap());

    let body = &request.body;
    assert_eq!(body.message_type, MessageType::Markdown);
    let markdown = body.markdown.as_ref().unwrap();
    assert!(markdown.title.starts_with("[FIRING:1] HighLatency"), "{}", markdown.title);
    assert!(markdown.text.contains("instance: api-1"), "{}", markdown.text);
    assert!(body.at.is_none());

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_unsigned_target_sends_plain_url() {
    let robot = MockRobot::accepting().await;
    let app = TestAppBuilder::from_config(config_for(&robot, None, None))
        .build()
        .await
        .unwrap();

    assert_eq!(app.send("ops", &sample_payload()).await.status(), StatusCode::OK);
    let received = robot.received().await;
    assert_eq!(received.len(), 1);
    assert!(!received[0].query.contains_key("sign"));
    assert!(!received[0].query.contains_key("timestamp"));

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_robot_rejection_is_a_bad_request() {
    let robot = MockRobot::start().await;
    robot.respond_with(130101, "send too fast").await;
    let app = TestAppBuilder::from_config(config_for(&robot, Some("s3cr3t"), None))
        .build()
        .await
        .unwrap();

    let response = app.send("ops", &sample_payload()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "Unable to talk to DingTalk");

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_robot_is_a_bad_request() {
    let robot = MockRobot::accepting().await;
    let config = config_for(&robot, None, None);
    // Nothing listens once the mock server is gone.
    drop(robot);

    let app = TestAppBuilder::from_config(config).build().await.unwrap();
    let response = app.send("ops", &sample_payload()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "Unable to talk to DingTalk");

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_unknown_target_and_bad_payload() {
    let robot = MockRobot::accepting().await;
    let app = TestAppBuilder::from_config(config_for(&robot, None, None))
        .build()
        .await
        .unwrap();

    let response = app.send("nobody", &sample_payload()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "404 page not found");

    let response = app
        .client
        .post(app.url("/dingtalk/ops/send"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "Bad Request");

    assert!(robot.received().await.is_empty());
    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_mentions_merge_payload_and_target() {
    let robot = MockRobot::accepting().await;
    let mention = TargetMention {
        all: false,
        mobiles: vec!["100".to_string()],
    };
    let app = TestAppBuilder::from_config(config_for(&robot, None, Some(mention)))
        .build()
        .await
        .unwrap();

    let mut payload = sample_payload();
    payload["atMobiles"] = json!(["200"]);
    assert_eq!(app.send("ops", &payload).await.status(), StatusCode::OK);

    let received = robot.received().await;
    let at = received[0].body.at.as_ref().unwrap();
    assert_eq!(at.at_mobiles, vec!["200", "100"]);
    assert!(!at.is_at_all);

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_alerts_over_the_limit_are_dropped() {
    let robot = MockRobot::accepting().await;
    let app = TestAppBuilder::from_config(config_for(&robot, None, None))
        .with_max_alert_count(1)
        .build()
        .await
        .unwrap();

    let mut payload = sample_payload();
    let template = payload["alerts"][0].clone();
    let alerts: Vec<Value> = ["api-1", "api-2", "api-3"]
        .iter()
        .map(|instance| {
            let mut alert = template.clone();
            alert["labels"]["instance"] = json!(instance);
            alert
        })
        .collect();
    payload["alerts"] = json!(alerts);

    assert_eq!(app.send("ops", &payload).await.status(), StatusCode::OK);
    let received = robot.received().await;
    let markdown = received[0].body.markdown.as_ref().unwrap();
    assert!(markdown.title.starts_with("[FIRING:1]"), "{}", markdown.title);
    assert!(markdown.text.contains("api-1"));
    assert!(!markdown.text.contains("api-2"));

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_health_and_readiness() {
    let robot = MockRobot::accepting().await;
    let app = TestAppBuilder::from_config(config_for(&robot, None, None))
        .build()
        .await
        .unwrap();

    for path in ["/-/healthy", "/-/ready"] {
        let response = app.get(path).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "OK.\n");
    }

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_reload_requires_opt_in() {
    let robot = MockRobot::accepting().await;

    let app = TestAppBuilder::from_config(config_for(&robot, None, None))
        .build()
        .await
        .unwrap();
    let response = app.client.post(app.url("/-/reload")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.text().await.unwrap(), "Lifecycle API is not enabled.");
    assert_eq!(app.coordinator.current().unwrap().generation, 1);
    app.shutdown(Duration::from_secs(5)).await.unwrap();

    let app = TestAppBuilder::from_config(config_for(&robot, None, None))
        .with_lifecycle()
        .build()
        .await
        .unwrap();
    let response = app.client.put(app.url("/-/reload")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.coordinator.current().unwrap().generation, 2);
    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_status_api() {
    let robot = MockRobot::accepting().await;
    let app = TestAppBuilder::from_config(config_for(&robot, Some("s3cr3t"), None))
        .with_flag("web.enable-lifecycle", "false")
        .build()
        .await
        .unwrap();

    let config: Value = app.get("/api/v1/status/config").await.json().await.unwrap();
    assert_eq!(config["status"], "success");
    let yaml = config["data"]["yaml"].as_str().unwrap();
    assert!(!yaml.contains("s3cr3t"), "{yaml}");
    assert!(!yaml.contains("access_token=abc"), "{yaml}");

    let templates: Value = app.get("/api/v1/status/templates").await.json().await.unwrap();
    let names: Vec<&str> = templates["data"]["templates"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["<default>", "ops"]);

    let flags: Value = app.get("/api/v1/status/flags").await.json().await.unwrap();
    assert_eq!(flags["data"]["web.enable-lifecycle"], "false");

    let runtime: Value = app.get("/api/v1/status/runtimeinfo").await.json().await.unwrap();
    assert_eq!(runtime["data"]["configGeneration"], 1);

    let build: Value = app.get("/api/v1/status/buildinfo").await.json().await.unwrap();
    assert_eq!(build["data"]["name"], "dingrelay");

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_template_preview() {
    let robot = MockRobot::accepting().await;
    let app = TestAppBuilder::from_config(config_for(&robot, None, None))
        .build()
        .await
        .unwrap();
    let render_url = app.url("/api/v1/status/templates/render");

    let request = json!({
        "title": "{{ receiver }}",
        "text": "{{ status }}: {{ join \", \" groupLabelValues }}",
        "demoAlertJSON": sample_payload().to_string(),
    });
    let response = app.client.post(&render_url).json(&request).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["markdown"], "firing: HighLatency");

    let request = json!({"title": "", "text": "{{#if}}", "demoAlertJSON": "{}"});
    let response = app.client.post(&render_url).json(&request).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["errorType"], "bad_data");

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_unknown_target_names_do_not_become_metric_labels() {
    let robot = MockRobot::accepting().await;
    let app = TestAppBuilder::from_config(config_for(&robot, None, None))
        .with_metrics()
        .build()
        .await
        .unwrap();

    for name in ["stranger-7f3a", "stranger-91c2"] {
        assert_eq!(app.send(name, &sample_payload()).await.status(), StatusCode::NOT_FOUND);
    }
    assert_eq!(app.send("ops", &sample_payload()).await.status(), StatusCode::OK);

    let exposition = app.get("/metrics").await.text().await.unwrap();
    assert!(!exposition.contains("stranger-"), "{exposition}");
    assert!(exposition.contains(&format!("target=\"{UNKNOWN_TARGET}\"")), "{exposition}");
    assert!(exposition.contains("target=\"ops\""), "{exposition}");

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}
