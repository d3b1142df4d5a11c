use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hopper_core::error::{HopperError, Result};
use hopper_core::tool::{
    string_arg, ArgType, Tool, ToolArguments, ToolContext, ToolParam, ToolSchema,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contact {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Contact {
    pub fn new(name: &str, email: Option<&str>, phone: Option<&str>) -> Self {
        Self {
            name: name.into(),
            email: email.map(String::from),
            phone: phone.map(String::from),
        }
    }
}

/// Read-only contacts directory.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    contacts: Vec<Contact>,
}

impl ContactBook {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self { contacts }
    }

    /// Loads a JSON array of contacts.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HopperError::Config(format!("cannot read contacts file {}: {e}", path.display())))?;
        let contacts: Vec<Contact> = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), contacts = contacts.len(), "Loaded contacts");
        Ok(Self { contacts })
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Exact full-name matches when there are any, otherwise every contact
    /// one of whose name words equals the query.
    pub fn find(&self, query: &str) -> Vec<&Contact> {
        let wanted = fold(query);
        if wanted.is_empty() {
            return Vec::new();
        }
        let exact: Vec<&Contact> = self
            .contacts
            .iter()
            .filter(|c| fold(&c.name) == wanted)
            .collect();
        if !exact.is_empty() {
            return exact;
        }
        self.contacts
            .iter()
            .filter(|c| fold(&c.name).split_whitespace().any(|w| w == wanted))
            .collect()
    }
}

fn fold(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct LookupContactTool {
    book: ContactBook,
    schema: ToolSchema,
}

impl LookupContactTool {
    pub const NAME: &'static str = "lookup_contact";

    pub fn new(book: ContactBook) -> Self {
        Self {
            book,
            schema: ToolSchema::new(
                Self::NAME,
                "Find a contact's email address and phone number by name",
                vec![ToolParam::required("name", ArgType::String, "full or first name")],
            ),
        }
    }
}

#[async_trait]
impl Tool for LookupContactTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArguments, _ctx: &ToolContext) -> Result<String> {
        let name = string_arg(Self::NAME, args, "name")?;
        match self.book.find(name).as_slice() {
            [] => Err(HopperError::tool(Self::NAME, format!("no contact named '{name}'"))),
            [one] => Ok(serde_json::to_string(one)?),
            many => Ok(format!(
                "{} contacts match '{name}': {}",
                many.len(),
                serde_json::to_string(many)?
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ToolContext {
        ToolContext::for_user("alice")
    }

    fn book() -> ContactBook {
        ContactBook::new(vec![
            Contact::new("Paul Martin", Some("paul.martin@example.com"), Some("+33 6 00 00 00 01")),
            Contact::new("Paul Dupont", Some("paul.dupont@example.com"), None),
            Contact::new("Hélène Roux", Some("helene@example.com"), None),
        ])
    }

    fn args(name: &str) -> ToolArguments {
        json!({ "name": name }).as_object().cloned().unwrap()
    }

    #[test]
    fn exact_name_beats_first_name() {
        let book = book();
        assert_eq!(book.find("paul martin").len(), 1);
        assert_eq!(book.find("Paul").len(), 2);
        assert_eq!(book.find("helene")[0].name, "Hélène Roux");
        assert!(book.find("  ").is_empty());
    }

    #[tokio::test]
    async fn lookup_returns_contact_json() {
        let tool = LookupContactTool::new(book());
        let out = tool.invoke(&args("Paul Martin"), &ctx()).await.unwrap();
        let contact: Contact = serde_json::from_str(&out).unwrap();
        assert_eq!(contact.email.as_deref(), Some("paul.martin@example.com"));
    }

    #[tokio::test]
    async fn unknown_contact_is_a_tool_error() {
        let tool = LookupContactTool::new(book());
        let err = tool.invoke(&args("Zoé"), &ctx()).await.unwrap_err();
        assert!(matches!(err, HopperError::Tool { .. }));
    }

    #[tokio::test]
    async fn loads_contacts_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.json");
        std::fs::write(&path, r#"[{"name": "Paul", "email": "paul@example.com"}]"#).unwrap();
        let book = ContactBook::load(&path).await.unwrap();
        assert_eq!(book.len(), 1);
        assert!(book.find("paul")[0].phone.is_none());
    }
}
