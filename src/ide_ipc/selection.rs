//! Payloads describing text the user selected in the editor.

use serde_json::{json, Map, Value};

use super::protocol::{Position, Range};

/// A selection made in an editor buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSelection {
    pub text: String,
    pub filepath: String,
    pub range: Range,
}

impl TextSelection {
    pub fn new(
        text: impl Into<String>,
        filepath: impl Into<String>,
        start: Position,
        end: Position,
    ) -> Self {
        Self {
            text: text.into(),
            filepath: filepath.into(),
            range: Range::new(start, end),
        }
    }
}

/// Turns a selection into the payload pushed to the agent and the UI.
pub trait SelectionFormatter: Send + Sync {
    fn format(&self, selection: &TextSelection) -> Map<String, Value>;
}

/// `{"highlightedCode": [{"filepath", "contents", "range"}]}`
#[derive(Debug, Default, Clone, Copy)]
pub struct HighlightedCodeFormatter;

impl SelectionFormatter for HighlightedCodeFormatter {
    fn format(&self, selection: &TextSelection) -> Map<String, Value> {
        into_map(json!({
            "highlightedCode": [{
                "filepath": selection.filepath,
                "contents": selection.text,
                "range": range_value(&selection.range),
            }]
        }))
    }
}

/// `{"type": "highlightedCode", "rangeInFile": {...}, "filesystem": {path: text}}`
///
/// Used by agents that resolve the selection against their own view of the
/// file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeInFileFormatter;

impl SelectionFormatter for RangeInFileFormatter {
    fn format(&self, selection: &TextSelection) -> Map<String, Value> {
        let mut filesystem = Map::new();
        filesystem.insert(
            selection.filepath.clone(),
            Value::String(selection.text.clone()),
        );
        into_map(json!({
            "type": "highlightedCode",
            "rangeInFile": {
                "filepath": selection.filepath,
                "range": range_value(&selection.range),
            },
            "filesystem": filesystem,
        }))
    }
}

fn range_value(range: &Range) -> Value {
    json!({
        "start": {"line": range.start.line, "character": range.start.character},
        "end": {"line": range.end.line, "character": range.end.character},
    })
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection() -> TextSelection {
        TextSelection::new("x", "/f.ts", Position::new(0, 0), Position::new(0, 1))
    }

    #[test]
    fn test_highlighted_code_format() {
        let payload = Value::Object(HighlightedCodeFormatter.format(&selection()));
        assert_eq!(
            payload,
            json!({
                "highlightedCode": [{
                    "filepath": "/f.ts",
                    "contents": "x",
                    "range": {
                        "start": {"line": 0, "character": 0},
                        "end": {"line": 0, "character": 1}
                    }
                }]
            })
        );
    }

    #[test]
    fn test_range_in_file_format() {
        let payload = Value::Object(RangeInFileFormatter.format(&selection()));
        assert_eq!(payload["type"], "highlightedCode");
        assert_eq!(payload["rangeInFile"]["filepath"], "/f.ts");
        assert_eq!(payload["rangeInFile"]["range"]["end"]["character"], 1);
        assert_eq!(payload["filesystem"]["/f.ts"], "x");
    }
}
