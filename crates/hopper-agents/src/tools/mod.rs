mod command;
mod contacts;
mod files;
mod messaging;
mod notes;

pub use command::RunCommandTool;
pub use contacts::{Contact, ContactBook, LookupContactTool};
pub use files::{ListFilesTool, ReadFileTool, Sandbox, WriteFileTool};
pub use messaging::{is_valid_email, Outbox, OutgoingMessage, SendMessageTool};
pub use notes::{ConnectEntitiesTool, CreateNoteTool, Knowledge, SearchNotesTool};
