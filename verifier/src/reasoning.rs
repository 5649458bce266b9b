//! Detection of responses that reasoned but produced nothing usable.

use crate::record::ResponsePayload;

/// True when the first choice carries reasoning text but neither content
/// nor tool calls.
pub fn is_reasoning_only(response: &ResponsePayload) -> bool {
    let Some(choice) = response.completion().and_then(|r| r.first_choice()) else {
        return false;
    };
    let message = &choice.message;
    let has_content = message.text().is_some_and(|text| !text.is_empty());

    message.reasoning_text().is_some() && !has_content && !message.has_tool_calls()
}
