use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use hopper_core::error::{HopperError, Result};
use hopper_core::tool::{
    string_arg, ArgType, Tool, ToolArguments, ToolContext, ToolParam, ToolSchema,
};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").unwrap()
});

pub fn is_valid_email(address: &str) -> bool {
    EMAIL_RE.is_match(address)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub id: Uuid,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub queued_at: DateTime<Utc>,
}

/// Messages accepted for delivery. Transport picks them up from here.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: RwLock<Vec<OutgoingMessage>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, message: OutgoingMessage) {
        self.messages.write().await.push(message);
    }

    pub async fn messages(&self) -> Vec<OutgoingMessage> {
        self.messages.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }
}

pub struct SendMessageTool {
    outbox: std::sync::Arc<Outbox>,
    schema: ToolSchema,
}

impl SendMessageTool {
    pub const NAME: &'static str = "send_message";

    pub fn new(outbox: std::sync::Arc<Outbox>) -> Self {
        Self {
            outbox,
            schema: ToolSchema::new(
                Self::NAME,
                "Send an email; look the address up first if you only know a name",
                vec![
                    ToolParam::required("recipient", ArgType::String, "email address"),
                    ToolParam::required("body", ArgType::String, "message text"),
                    ToolParam::optional("subject", ArgType::String, "subject line"),
                ],
            ),
        }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArguments, _ctx: &ToolContext) -> Result<String> {
        let recipient = string_arg(Self::NAME, args, "recipient")?.trim();
        let body = string_arg(Self::NAME, args, "body")?;

        if !is_valid_email(recipient) {
            return Err(HopperError::tool(
                Self::NAME,
                format!("'{recipient}' is not an email address; use lookup_contact first"),
            ));
        }
        if body.trim().is_empty() {
            return Err(HopperError::tool(Self::NAME, "message body is empty"));
        }

        let message = OutgoingMessage {
            id: Uuid::new_v4(),
            recipient: recipient.to_string(),
            subject: args.get("subject").and_then(|v| v.as_str()).map(String::from),
            body: body.to_string(),
            queued_at: Utc::now(),
        };
        let id = message.id;
        self.outbox.push(message).await;
        info!(%id, recipient, "Message queued");

        Ok(format!("Message {id} queued for {recipient}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext::for_user("alice")
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("paul.martin@example.com"));
        assert!(is_valid_email("a+tag@sub.example.fr"));
        assert!(!is_valid_email("Paul"));
        assert!(!is_valid_email("paul@localhost"));
        assert!(!is_valid_email("paul @example.com"));
    }

    #[tokio::test]
    async fn valid_message_lands_in_outbox() {
        let outbox = Arc::new(Outbox::new());
        let tool = SendMessageTool::new(outbox.clone());
        let args = json!({"recipient": "paul@example.com", "body": "Salut", "subject": "Demain"});
        let out = tool.invoke(args.as_object().unwrap(), &ctx()).await.unwrap();

        assert!(out.contains("paul@example.com"));
        let messages = outbox.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject.as_deref(), Some("Demain"));
    }

    #[tokio::test]
    async fn name_instead_of_address_is_rejected() {
        let outbox = Arc::new(Outbox::new());
        let tool = SendMessageTool::new(outbox.clone());
        let args = json!({"recipient": "Paul", "body": "Salut"});
        assert!(tool.invoke(args.as_object().unwrap(), &ctx()).await.is_err());
        assert_eq!(outbox.len().await, 0);
    }
}
