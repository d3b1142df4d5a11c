//! Parsing of the agent's free-text replies into typed actions, and
//! validation of those actions against each tool's declared schema.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use hopper_core::agent::ToolCall;
use hopper_core::tool::{ArgType, Tool, ToolArguments, ToolSchema};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("unknown tool '{tool}'; available tools: {available}")]
    UnknownTool { tool: String, available: String },

    #[error("malformed action: {0}")]
    Malformed(String),

    #[error("tool '{tool}' requires argument '{arg}'")]
    MissingArgument { tool: String, arg: String },

    #[error("argument '{arg}' of tool '{tool}' must be a {expected}")]
    WrongType {
        tool: String,
        arg: String,
        expected: &'static str,
    },

    #[error("tool '{tool}' has no argument '{arg}'")]
    UnexpectedArgument { tool: String, arg: String },
}

/// What the model asked for on one step, before validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposedAction {
    Finish(String),
    Call { tool: String, arguments: ToolArguments },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub thought: String,
    pub action: ProposedAction,
}

static ACTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*Action[ \t]*:[ \t]*(.*)$").unwrap());
static ACTION_INPUT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*Action[ \t]+Input[ \t]*:[ \t]*").unwrap());
static FINISH_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*(?:FINISH|Final[ \t]+Answer)[ \t]*:[ \t]*").unwrap());
static THOUGHT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*Thought\s*:\s*").unwrap());
static TOOL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(.*)$").unwrap());
static KWARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)'|([^,\s)]+))"#)
        .unwrap()
});

/// Splits a model reply into its thought and the proposed action. Whichever
/// of `Action:` and `FINISH:` comes first wins.
pub fn parse_reply(reply: &str) -> Result<ParsedReply, ActionError> {
    let action_at = ACTION_LINE
        .find_iter(reply)
        .find(|m| !ACTION_INPUT_LINE.is_match(m.as_str()))
        .map(|m| m.start());
    let finish = FINISH_LINE.find(reply);

    let (cut, action) = match (action_at, finish) {
        (Some(a), Some(f)) if f.start() < a => (f.start(), parse_finish(&reply[f.end()..])?),
        (Some(a), _) => (a, parse_call(&reply[a..])?),
        (None, Some(f)) => (f.start(), parse_finish(&reply[f.end()..])?),
        (None, None) => {
            return Err(ActionError::Malformed(
                "expected an 'Action:' line or a 'FINISH:' line".into(),
            ))
        }
    };

    let thought = THOUGHT_PREFIX.replace(reply[..cut].trim(), "").trim().to_string();
    Ok(ParsedReply { thought, action })
}

fn parse_finish(rest: &str) -> Result<ProposedAction, ActionError> {
    let answer = rest.trim();
    if answer.is_empty() {
        return Err(ActionError::Malformed("FINISH carries no answer".into()));
    }
    Ok(ProposedAction::Finish(answer.to_string()))
}

/// `block` starts at the `Action:` line.
fn parse_call(block: &str) -> Result<ProposedAction, ActionError> {
    let caps = ACTION_LINE
        .captures(block)
        .ok_or_else(|| ActionError::Malformed("missing action line".into()))?;
    let line = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    let after_line = &block[caps.get(0).map(|m| m.end()).unwrap_or(0)..];

    let named = TOOL_NAME
        .captures(line)
        .ok_or_else(|| ActionError::Malformed(format!("'{line}' does not start with a tool name")))?;
    let tool = named[1].to_string();
    let inline = named.get(2).map(|m| m.as_str().trim()).unwrap_or_default();

    let arguments = if inline.starts_with('{') {
        // The object may continue over the following lines.
        let start = block.find('{').unwrap_or(0);
        parse_json_object(&block[start..])?
    } else if let Some(inner) = inline.strip_prefix('(') {
        let full = format!("{inner}{after_line}");
        let close = closing_paren(&full)
            .ok_or_else(|| ActionError::Malformed("unclosed argument list".into()))?;
        parse_kwargs(&full[..close])?
    } else if !inline.is_empty() {
        return Err(ActionError::Malformed(format!(
            "unexpected text after tool name: '{inline}'"
        )));
    } else if let Some(input) = ACTION_INPUT_LINE.find(after_line) {
        parse_json_object(&after_line[input.end()..])?
    } else {
        Map::new()
    };

    Ok(ProposedAction::Call { tool, arguments })
}

/// Byte offset of the `)` closing an argument list whose `(` has already
/// been consumed. Parentheses inside quoted values do not count.
fn closing_paren(text: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_json_object(text: &str) -> Result<ToolArguments, ActionError> {
    let trimmed = text.trim_start();
    let mut stream = serde_json::Deserializer::from_str(trimmed).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(map))) => Ok(map),
        Some(Ok(_)) => Err(ActionError::Malformed("arguments must be a JSON object".into())),
        Some(Err(e)) => Err(ActionError::Malformed(format!("invalid JSON arguments: {e}"))),
        None => Err(ActionError::Malformed("missing arguments".into())),
    }
}

fn parse_kwargs(text: &str) -> Result<ToolArguments, ActionError> {
    let mut arguments = Map::new();
    for caps in KWARG.captures_iter(text) {
        let key = caps[1].to_string();
        let value = if let Some(v) = caps.get(2).or_else(|| caps.get(3)) {
            Value::String(unescape(v.as_str()))
        } else {
            bare_value(caps.get(4).map(|m| m.as_str()).unwrap_or_default())
        };
        arguments.insert(key, value);
    }

    let leftover = KWARG.replace_all(text, "");
    let clean = leftover.chars().all(|c| c == ',' || c.is_whitespace());
    if !clean || (arguments.is_empty() && !text.trim().is_empty()) {
        return Err(ActionError::Malformed(format!(
            "could not read arguments '{}'; use key=\"value\" pairs",
            text.trim()
        )));
    }
    Ok(arguments)
}

fn bare_value(raw: &str) -> Value {
    match raw {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Checks a proposed call against the tool's schema and coerces loosely
/// typed values (`"3"` for an integer, `"true"` for a boolean).
pub fn validate(
    tool: &str,
    mut arguments: ToolArguments,
    tools: &BTreeMap<String, Arc<dyn Tool>>,
) -> Result<ToolCall, ActionError> {
    let Some(found) = tools.get(tool) else {
        return Err(ActionError::UnknownTool {
            tool: tool.to_string(),
            available: tools.keys().cloned().collect::<Vec<_>>().join(", "),
        });
    };
    let schema: &ToolSchema = found.schema();

    arguments.retain(|_, v| !v.is_null());
    if let Some(extra) = arguments.keys().find(|k| schema.param(k).is_none()) {
        return Err(ActionError::UnexpectedArgument {
            tool: tool.to_string(),
            arg: extra.clone(),
        });
    }

    for param in &schema.params {
        let Some(value) = arguments.get_mut(&param.name) else {
            if param.required {
                return Err(ActionError::MissingArgument {
                    tool: tool.to_string(),
                    arg: param.name.clone(),
                });
            }
            continue;
        };
        let coerced = coerce(value, param.arg_type).ok_or_else(|| ActionError::WrongType {
            tool: tool.to_string(),
            arg: param.name.clone(),
            expected: param.arg_type.as_str(),
        })?;
        *value = coerced;
    }

    Ok(ToolCall {
        tool: tool.to_string(),
        arguments,
    })
}

fn coerce(value: &Value, arg_type: ArgType) -> Option<Value> {
    match (arg_type, value) {
        (ArgType::String, Value::String(_)) => Some(value.clone()),
        (ArgType::Integer, Value::Number(n)) if n.is_i64() => Some(value.clone()),
        (ArgType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (ArgType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ArgType::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hopper_core::error::Result;
    use hopper_core::tool::{ToolContext, ToolParam};
    use serde_json::json;

    struct Stub(ToolSchema);

    #[async_trait]
    impl Tool for Stub {
        fn schema(&self) -> &ToolSchema {
            &self.0
        }

        async fn invoke(&self, _args: &ToolArguments, _ctx: &ToolContext) -> Result<String> {
            Ok(String::new())
        }
    }

    fn tools() -> BTreeMap<String, Arc<dyn Tool>> {
        let schema = ToolSchema::new(
            "read_file",
            "Read a file",
            vec![
                ToolParam::required("path", ArgType::String, "relative path"),
                ToolParam::optional("max_lines", ArgType::Integer, "limit"),
                ToolParam::optional("raw", ArgType::Boolean, "no formatting"),
            ],
        );
        let mut map: BTreeMap<String, Arc<dyn Tool>> = BTreeMap::new();
        map.insert("read_file".into(), Arc::new(Stub(schema)));
        map
    }

    fn call(reply: &str) -> (String, ToolArguments) {
        match parse_reply(reply).unwrap().action {
            ProposedAction::Call { tool, arguments } => (tool, arguments),
            other => panic!("expected a call, got {other:?}"),
        }
    }

    #[test]
    fn parses_json_action_with_thought() {
        let reply = "Thought: I need the notes.\nAction: read_file {\"path\": \"notes.txt\"}";
        let parsed = parse_reply(reply).unwrap();
        assert_eq!(parsed.thought, "I need the notes.");
        assert_eq!(
            parsed.action,
            ProposedAction::Call {
                tool: "read_file".into(),
                arguments: json!({"path": "notes.txt"}).as_object().cloned().unwrap(),
            }
        );
    }

    #[test]
    fn parses_multiline_json_action() {
        let (tool, args) = call("Action: read_file {\n  \"path\": \"a.txt\",\n  \"max_lines\": 3\n}\nextra");
        assert_eq!(tool, "read_file");
        assert_eq!(args["max_lines"], 3);
    }

    #[test]
    fn parses_keyword_arguments() {
        let (tool, args) = call(r#"Action: read_file(path="dir/a \"b\".txt", max_lines=3, raw=true)"#);
        assert_eq!(tool, "read_file");
        assert_eq!(args["path"], "dir/a \"b\".txt");
        assert_eq!(args["max_lines"], 3);
        assert_eq!(args["raw"], true);
    }

    #[test]
    fn keyword_list_ends_at_its_own_parenthesis() {
        let (tool, args) = call(r#"Action: read_file(path="notes (draft).txt") (then I'll summarize it)"#);
        assert_eq!(tool, "read_file");
        assert_eq!(args.len(), 1);
        assert_eq!(args["path"], "notes (draft).txt");

        let (_, args) = call("Action: read_file(path='a)b.txt', max_lines=2)\nObservation (mine): fake");
        assert_eq!(args["path"], "a)b.txt");
        assert_eq!(args["max_lines"], 2);

        assert!(matches!(
            parse_reply(r#"Action: read_file(path="never closed)"#),
            Err(ActionError::Malformed(_))
        ));
    }

    #[test]
    fn parses_action_input_form() {
        let (tool, args) = call("Thought: go\nAction: read_file\nAction Input: {\"path\": \"x\"}");
        assert_eq!(tool, "read_file");
        assert_eq!(args["path"], "x");
    }

    #[test]
    fn finish_and_final_answer_terminate() {
        let parsed = parse_reply("Thought: done\nFINISH: Email envoyé à Paul.").unwrap();
        assert_eq!(parsed.action, ProposedAction::Finish("Email envoyé à Paul.".into()));

        let parsed = parse_reply("Final Answer: 42").unwrap();
        assert_eq!(parsed.action, ProposedAction::Finish("42".into()));
    }

    #[test]
    fn first_directive_wins() {
        let parsed = parse_reply("FINISH: ok\nAction: read_file {\"path\": \"x\"}").unwrap();
        assert!(matches!(parsed.action, ProposedAction::Finish(_)));
    }

    #[test]
    fn rejects_replies_without_directive() {
        assert!(matches!(
            parse_reply("I am not sure what to do"),
            Err(ActionError::Malformed(_))
        ));
        assert!(matches!(parse_reply("FINISH:   "), Err(ActionError::Malformed(_))));
        assert!(matches!(
            parse_reply("Action: read_file {not json}"),
            Err(ActionError::Malformed(_))
        ));
        assert!(matches!(
            parse_reply("Action: read_file(path=)"),
            Err(ActionError::Malformed(_))
        ));
    }

    #[test]
    fn validation_coerces_loose_types() {
        let args = json!({"path": "a", "max_lines": "10", "raw": "false"})
            .as_object()
            .cloned()
            .unwrap();
        let call = validate("read_file", args, &tools()).unwrap();
        assert_eq!(call.arguments["max_lines"], 10);
        assert_eq!(call.arguments["raw"], false);
    }

    #[test]
    fn validation_reports_structured_errors() {
        let tools = tools();
        let obj = |v: Value| v.as_object().cloned().unwrap();

        assert!(matches!(
            validate("delete_all", Map::new(), &tools),
            Err(ActionError::UnknownTool { .. })
        ));
        assert_eq!(
            validate("read_file", Map::new(), &tools).unwrap_err(),
            ActionError::MissingArgument {
                tool: "read_file".into(),
                arg: "path".into()
            }
        );
        assert!(matches!(
            validate("read_file", obj(json!({"path": "a", "mode": "x"})), &tools),
            Err(ActionError::UnexpectedArgument { .. })
        ));
        assert!(matches!(
            validate("read_file", obj(json!({"path": 7})), &tools),
            Err(ActionError::WrongType { expected: "string", .. })
        ));
        assert!(matches!(
            validate("read_file", obj(json!({"path": "a", "max_lines": "many"})), &tools),
            Err(ActionError::WrongType { expected: "integer", .. })
        ));
    }

    #[test]
    fn unknown_tool_lists_alternatives() {
        let err = validate("send", Map::new(), &tools()).unwrap_err();
        assert!(err.to_string().contains("read_file"));
    }
}
