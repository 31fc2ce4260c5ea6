//! Wire and payload types for the relay.
//!
//! This module defines the inbound alert-group webhook payload, the view of
//! it that templates render against, and the outbound robot notification
//! envelope together with the robot's acknowledgment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A label or annotation set. Ordered so that templates always see the
/// pairs sorted by name.
pub type KV = BTreeMap<String, String>;

// =============================================================================
// Inbound webhook payload
// =============================================================================

/// The state of an alert group or of a single alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
        }
    }
}

/// A single alert inside a webhook message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Alert {
    pub status: AlertStatus,
    pub labels: KV,
    pub annotations: KV,
    pub starts_at: String,
    pub ends_at: String,
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
    pub fingerprint: String,
}

/// The alert-group webhook body posted by the monitoring system.
///
/// Every field is optional on the wire; absent fields decode to their zero
/// value so that permissive senders are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookMessage {
    pub version: String,
    pub group_key: String,
    pub truncated_alerts: u64,
    pub receiver: String,
    pub status: AlertStatus,
    pub alerts: Vec<Alert>,
    pub group_labels: KV,
    pub common_labels: KV,
    pub common_annotations: KV,
    #[serde(rename = "externalURL")]
    pub external_url: String,
    /// Recipients the sender asks to mention, merged with the target's own.
    pub at_mobiles: Vec<String>,
    /// Sender-level request to mention everyone.
    pub is_at_all: bool,
}

// =============================================================================
// Template view
// =============================================================================

/// A name/value pair, used to expose label sets as sorted lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pair<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

fn sorted_pairs(kv: &KV) -> Vec<Pair<'_>> {
    kv.iter()
        .map(|(name, value)| Pair { name, value })
        .collect()
}

/// One alert as seen by templates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertView<'a> {
    pub status: AlertStatus,
    pub labels: &'a KV,
    pub annotations: &'a KV,
    pub starts_at: &'a str,
    pub ends_at: &'a str,
    #[serde(rename = "generatorURL")]
    pub generator_url: &'a str,
    pub fingerprint: &'a str,
    pub sorted_labels: Vec<Pair<'a>>,
    pub sorted_annotations: Vec<Pair<'a>>,
}

impl<'a> From<&'a Alert> for AlertView<'a> {
    fn from(alert: &'a Alert) -> Self {
        Self {
            status: alert.status,
            labels: &alert.labels,
            annotations: &alert.annotations,
            starts_at: &alert.starts_at,
            ends_at: &alert.ends_at,
            generator_url: &alert.generator_url,
            fingerprint: &alert.fingerprint,
            sorted_labels: sorted_pairs(&alert.labels),
            sorted_annotations: sorted_pairs(&alert.annotations),
        }
    }
}

/// The data context every title and text template is rendered against.
///
/// Besides the raw payload fields it carries values that templates cannot
/// easily compute themselves: firing/resolved partitions and their counts,
/// sorted label pairs, and the common labels that are not group labels.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateData<'a> {
    pub receiver: &'a str,
    pub status: AlertStatus,
    pub group_key: &'a str,
    pub alerts: Vec<AlertView<'a>>,
    pub firing_alerts: Vec<AlertView<'a>>,
    pub resolved_alerts: Vec<AlertView<'a>>,
    pub firing_count: usize,
    pub resolved_count: usize,
    pub group_labels: &'a KV,
    pub common_labels: &'a KV,
    pub common_annotations: &'a KV,
    pub sorted_group_labels: Vec<Pair<'a>>,
    pub group_label_values: Vec<&'a str>,
    pub extra_common_label_values: Vec<&'a str>,
    #[serde(rename = "externalURL")]
    pub external_url: &'a str,
    pub at_mobiles: &'a [String],
    pub is_at_all: bool,
}

impl<'a> TemplateData<'a> {
    /// Builds the view of `message`, exposing `at_mobiles` as the effective
    /// recipient list (payload recipients plus the target's own).
    pub fn new(message: &'a WebhookMessage, at_mobiles: &'a [String], is_at_all: bool) -> Self {
        let alerts: Vec<AlertView<'a>> = message.alerts.iter().map(AlertView::from).collect();
        let (firing_alerts, resolved_alerts): (Vec<_>, Vec<_>) = alerts
            .iter()
            .cloned()
            .partition(|alert| alert.status == AlertStatus::Firing);

        let extra_common_label_values = message
            .common_labels
            .iter()
            .filter(|(name, _)| !message.group_labels.contains_key(*name))
            .map(|(_, value)| value.as_str())
            .collect();

        Self {
            receiver: &message.receiver,
            status: message.status,
            group_key: &message.group_key,
            firing_count: firing_alerts.len(),
            resolved_count: resolved_alerts.len(),
            alerts,
            firing_alerts,
            resolved_alerts,
            group_labels: &message.group_labels,
            common_labels: &message.common_labels,
            common_annotations: &message.common_annotations,
            sorted_group_labels: sorted_pairs(&message.group_labels),
            group_label_values: message.group_labels.values().map(String::as_str).collect(),
            extra_common_label_values,
            external_url: &message.external_url,
            at_mobiles,
            is_at_all,
        }
    }
}

// =============================================================================
// Outbound robot notification
// =============================================================================

/// The `msgtype` of an outbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Markdown,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMarkdown {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationText {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAt {
    #[serde(rename = "atMobiles")]
    pub at_mobiles: Vec<String>,
    #[serde(rename = "isAtAll")]
    pub is_at_all: bool,
}

/// The JSON body posted to the robot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DingTalkNotification {
    #[serde(rename = "msgtype")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<NotificationMarkdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<NotificationText>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<NotificationAt>,
}

/// The acknowledgment envelope returned by the robot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RobotResponse {
    pub errcode: i64,
    pub errmsg: String,
}
