//! Rendering of bridge messages into scripts evaluated inside the webview.

use crate::models::BridgeMessage;
use crate::{Error, Result};

/// Serializes `message` as a JSON literal that is safe to embed in a script.
///
/// serde_json already escapes quotes, backslashes and control characters.
/// On top of that `<`, `>` and `&` are escaped so the text can never close a
/// `<script>` element or open an HTML comment, and U+2028/U+2029 are escaped
/// because older engines treat them as line terminators inside strings.
/// None of these characters can appear in JSON outside a string, so the
/// rewrite never changes the structure of the document.
pub fn message_literal(message: &BridgeMessage) -> Result<String> {
    let json = serde_json::to_string(message)?;
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '&' => escaped.push_str("\\u0026"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            c => escaped.push(c),
        }
    }
    Ok(escaped)
}

/// Builds the script that hands `message` to `receiver.receive(...)`.
///
/// `receiver` must be a dotted identifier path such as
/// `window.__IAP_BRIDGE__`. The script is a no-op when the receiver is not
/// installed yet.
pub fn dispatch_script(receiver: &str, message: &BridgeMessage) -> Result<String> {
    validate_receiver(receiver)?;
    let literal = message_literal(message)?;
    Ok(format!(
        "(function(){{var r={receiver};if(r&&typeof r.receive==='function'){{r.receive({literal});}}}})();"
    ))
}

fn validate_receiver(receiver: &str) -> Result<()> {
    let valid = !receiver.is_empty()
        && receiver.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        });
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!("invalid script receiver: {receiver}")))
    }
}
