//! A fake DingTalk robot endpoint backed by `wiremock`.

use dingrelay::models::DingTalkNotification;
use serde_json::json;
use std::collections::BTreeMap;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ROBOT_PATH: &str = "/robot/send";

/// One request the robot received.
#[derive(Debug, Clone)]
pub struct ReceivedNotification {
    pub query: BTreeMap<String, String>,
    pub body: DingTalkNotification,
}

pub struct MockRobot {
    pub server: MockServer,
}

impl MockRobot {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// A robot that acknowledges every notification.
    pub async fn accepting() -> Self {
        let robot = Self::start().await;
        robot.respond_with(0, "ok").await;
        robot
    }

    /// Answers every request with the given `errcode`/`errmsg` envelope.
    pub async fn respond_with(&self, errcode: i64, errmsg: &str) {
        self.server.reset().await;
        Mock::given(method("POST"))
            .and(path(ROBOT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errcode": errcode,
                "errmsg": errmsg,
            })))
            .mount(&self.server)
            .await;
    }

    /// The webhook URL for a robot identified by `token`.
    pub fn url(&self, token: &str) -> String {
        format!("{}{}?access_token={}", self.server.uri(), ROBOT_PATH, token)
    }

    pub async fn received(&self) -> Vec<ReceivedNotification> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| ReceivedNotification {
                query: request
                    .url
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect(),
                body: serde_json::from_slice(&request.body).unwrap(),
            })
            .collect()
    }
}
