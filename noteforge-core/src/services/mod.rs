//! Note/ask/agent-task services (C9–C11): the three things a dispatched
//! [`crate::types::MessageGroup`] can turn into, selected by the user's
//! [`crate::types::BotMode`].

pub mod agent_task;
pub mod ask;
pub mod note;

use serde_json::Value;

/// Pull a user-facing answer out of an agent's raw reply text, per the
/// resolution in SPEC_FULL.md §9: prefer a parsed `answer` field, then a
/// stripped `agent-result`/`metadata` block, then the full text.
pub fn extract_answer(raw_text: &str) -> String {
    if let Some(answer) = extract_json_field(raw_text, "answer") {
        return answer;
    }
    let stripped = strip_result_blocks(raw_text);
    if !stripped.trim().is_empty() {
        return stripped.trim().to_string();
    }
    raw_text.trim().to_string()
}

/// Looks for a fenced ```agent-result``` or ```metadata``` JSON block
/// containing `field`, returning its string value if present.
pub(crate) fn extract_json_field(raw_text: &str, field: &str) -> Option<String> {
    for block in fenced_blocks(raw_text, "agent-result").chain(fenced_blocks(raw_text, "metadata")) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&block) {
            if let Some(Value::String(s)) = map.get(field) {
                return Some(s.clone());
            }
        }
    }
    None
}

/// Remove any fenced `agent-result`/`metadata` blocks, returning what's
/// left (the service's own narrative text around the structured block).
fn strip_result_blocks(raw_text: &str) -> String {
    let mut result = raw_text.to_string();
    for tag in ["agent-result", "metadata"] {
        let fence_start = format!("```{tag}");
        while let Some(start) = result.find(&fence_start) {
            if let Some(end_rel) = result[start + fence_start.len()..].find("```") {
                let end = start + fence_start.len() + end_rel + 3;
                result.replace_range(start..end, "");
            } else {
                break;
            }
        }
    }
    result
}

pub(crate) fn fenced_blocks<'a>(raw_text: &'a str, tag: &'a str) -> impl Iterator<Item = String> + 'a {
    let fence_start = format!("```{tag}");
    let mut blocks = Vec::new();
    let mut rest = raw_text;
    while let Some(start) = rest.find(&fence_start) {
        let after = &rest[start + fence_start.len()..];
        if let Some(end_rel) = after.find("```") {
            blocks.push(after[..end_rel].trim().to_string());
            rest = &after[end_rel + 3..];
        } else {
            break;
        }
    }
    blocks.into_iter()
}
