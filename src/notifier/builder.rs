//! Renders the notification for one (target, payload) pair.

use crate::config::{Config, ResolvedMessage, Target};
use crate::models::{
    DingTalkNotification, MessageType, NotificationAt, NotificationMarkdown, NotificationText,
    TemplateData, WebhookMessage,
};
use crate::template::{TemplateEngine, TemplateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to render title: {0}")]
    Title(#[source] TemplateError),

    #[error("failed to render text: {0}")]
    Text(#[source] TemplateError),
}

/// Who the outbound message mentions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mention {
    pub all: bool,
    pub recipients: Vec<String>,
}

/// A fully rendered notification, produced fresh for every request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedNotification {
    pub message_type: MessageType,
    pub title: String,
    pub text: String,
    /// `None` when neither the target nor the payload asks for mentions.
    pub mention: Option<Mention>,
}

impl RenderedNotification {
    /// The JSON envelope posted to the robot endpoint.
    pub fn to_wire(&self) -> DingTalkNotification {
        let (markdown, text) = match self.message_type {
            MessageType::Markdown => (
                Some(NotificationMarkdown {
                    title: self.title.clone(),
                    text: self.text.clone(),
                }),
                None,
            ),
            MessageType::Text => (
                None,
                Some(NotificationText {
                    title: self.title.clone(),
                    content: self.text.clone(),
                }),
            ),
        };
        DingTalkNotification {
            message_type: self.message_type,
            markdown,
            text,
            at: self.mention.as_ref().map(|m| NotificationAt {
                at_mobiles: m.recipients.clone(),
                is_at_all: m.all,
            }),
        }
    }
}

/// Renders notifications for one target against a compiled template set.
///
/// Templates are chosen once, at construction: the target's own message,
/// then the configuration default, then the built-in default, for the title
/// and the text independently.
pub struct NotificationBuilder<'a> {
    templates: &'a TemplateEngine,
    target: &'a Target,
    message: ResolvedMessage,
}

impl<'a> NotificationBuilder<'a> {
    pub fn new(templates: &'a TemplateEngine, config: &Config, target: &'a Target) -> Self {
        Self {
            templates,
            target,
            message: config.message_for(target),
        }
    }

    pub fn build(&self, payload: &WebhookMessage) -> Result<RenderedNotification, BuildError> {
        let mention = self.mention_for(payload);
        let (recipients, all) = match &mention {
            Some(m) => (m.recipients.as_slice(), m.all),
            None => (payload.at_mobiles.as_slice(), payload.is_at_all),
        };

        let data = TemplateData::new(payload, recipients, all);
        let title = self
            .templates
            .render(&self.message.title, &data)
            .map_err(BuildError::Title)?;
        let text = self
            .templates
            .render(&self.message.text, &data)
            .map_err(BuildError::Text)?;

        Ok(RenderedNotification {
            message_type: self.message.message_type,
            title,
            text,
            mention,
        })
    }

    /// Payload recipients followed by the target's; "mention all" if either
    /// side asks for it.
    fn mention_for(&self, payload: &WebhookMessage) -> Option<Mention> {
        let policy = self.target.mention.as_ref();
        if policy.is_none() && payload.at_mobiles.is_empty() && !payload.is_at_all {
            return None;
        }

        let mut recipients = payload.at_mobiles.clone();
        let mut all = payload.is_at_all;
        if let Some(policy) = policy {
            recipients.extend(policy.mobiles.iter().cloned());
            all |= policy.all;
        }
        Some(Mention { all, recipients })
    }
}
