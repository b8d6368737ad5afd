//! 模型输出的 JSON 解析与修复
//!
//! 模型在 token 上限处经常截断在结构中间；解析分层进行：
//! 直接解析 -> 括号配平修复 -> 仅去除尾逗号 -> MalformedResponse。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::core::AnalysisError;

static TRAILING_COMMA_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 将原始回复解析为 JSON 文档，必要时修复截断与尾逗号
pub fn repair_parse(raw: &str) -> Result<Value, AnalysisError> {
    let text = extract_json_text(raw);

    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Ok(v);
    }

    let balanced = balance_brackets(text);
    match serde_json::from_str::<Value>(&balanced) {
        Ok(v) => {
            tracing::debug!(
                "Repaired truncated JSON ({} -> {} bytes)",
                text.len(),
                balanced.len()
            );
            return Ok(v);
        }
        Err(e) => tracing::debug!("Bracket repair failed: {}", e),
    }

    let stripped = strip_trailing_commas(text);
    if let Ok(v) = serde_json::from_str::<Value>(&stripped) {
        tracing::debug!("Repaired JSON by stripping trailing commas");
        return Ok(v);
    }

    tracing::warn!("All JSON repair attempts failed ({} bytes)", raw.len());
    Err(AnalysisError::malformed(raw))
}

/// 提取 JSON 正文：优先 ```json 代码块，其次第一个 ``` 代码块；再跳过首个 `{` 之前的说明文字
pub fn extract_json_text(raw: &str) -> &str {
    let trimmed = raw.trim();

    let fenced = if let Some(start) = trimmed.find("```json") {
        Some(fence_body(&trimmed[start + "```json".len()..]))
    } else {
        trimmed
            .find("```")
            .map(|start| fence_body(&trimmed[start + 3..]))
    };
    let text = fenced.unwrap_or(trimmed);

    if text.starts_with('{') && text.ends_with('}') {
        return text;
    }
    match text.find('{') {
        Some(idx) => text[idx..].trim_end(),
        None => text,
    }
}

/// 代码块正文：跳过语言标签所在行，截至下一个 ```（截断时取到末尾）
fn fence_body(after_fence: &str) -> &str {
    let body = match after_fence.find('\n') {
        Some(nl) if !after_fence[..nl].contains('{') => &after_fence[nl + 1..],
        _ => after_fence,
    };
    body.find("```")
        .map(|end| &body[..end])
        .unwrap_or(body)
        .trim()
}

/// 括号配平：跟踪字符串与转义，遇到不匹配的闭合符时截断；补全未闭合字符串与所有未闭合结构
pub fn balance_brackets(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut cut = text.len();

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                } else {
                    cut = i;
                    break;
                }
            }
            _ => {}
        }
    }

    let mut out = text[..cut].to_string();
    if in_string {
        // 悬空的反斜杠会把补上的引号转义掉
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
    }

    out.extend(stack.iter().rev());
    out
}

/// 仅去除 `}` / `]` 前的尾逗号
pub fn strip_trailing_commas(text: &str) -> String {
    let re = TRAILING_COMMA_RE.get_or_init(|| Regex::new(r",\s*([}\]])").ok());
    match re {
        Some(re) => re.replace_all(text, "$1").into_owned(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_well_formed_passthrough() {
        let docs = [
            r#"{"participants": [{"participantId": "p1", "gloss": "Naomi"}], "relations": []}"#,
            r#"{"a": "brace } inside string", "b": [1, 2, {"c": null}]}"#,
            r#"{"escaped": "quote \" and backslash \\"}"#,
        ];
        for doc in docs {
            let expected: Value = serde_json::from_str(doc).unwrap();
            assert_eq!(repair_parse(doc).unwrap(), expected);
        }
    }

    #[test]
    fn test_fenced_block_preferred() {
        let raw = "Here is the analysis:\n```json\n{\"events\": [1, 2]}\n```\nDone.";
        assert_eq!(repair_parse(raw).unwrap(), json!({"events": [1, 2]}));

        let raw = "```\n{\"x\": 1}\n```";
        assert_eq!(repair_parse(raw).unwrap(), json!({"x": 1}));
    }

    #[test]
    fn test_leading_commentary_skipped() {
        let raw = "Sure! The result follows. {\"x\": true}";
        assert_eq!(repair_parse(raw).unwrap(), json!({"x": true}));
    }

    #[test]
    fn test_truncated_mid_array() {
        let raw = r#"{"participants": [{"participantId": "p1"}, {"participantId": "p2"},"#;
        let v = repair_parse(raw).unwrap();
        assert_eq!(v["participants"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_truncated_mid_string() {
        let raw = r#"{"participants": [{"participantId": "p1", "gloss": "Elimel"#;
        let v = repair_parse(raw).unwrap();
        assert_eq!(v["participants"][0]["gloss"], "Elimel");
    }

    #[test]
    fn test_truncated_in_fence_without_closing() {
        let raw = "```json\n{\"events\": [{\"eventId\": \"e1\"}, {\"eventId\": \"e2\"";
        let v = repair_parse(raw).unwrap();
        assert_eq!(v["events"][1]["eventId"], "e2");
    }

    #[test]
    fn test_dangling_escape_in_string() {
        let raw = "{\"text\": \"abc\\";
        let v = repair_parse(raw).unwrap();
        assert_eq!(v["text"], "abc");
    }

    #[test]
    fn test_mismatched_closer_truncates_tail() {
        let balanced = balance_brackets(r#"{"a": [1, 2}, "junk": 3}"#);
        assert_eq!(balanced, r#"{"a": [1, 2]}"#);
    }

    #[test]
    fn test_trailing_commas_stripped() {
        let raw = r#"{"a": [1, 2, ], "b": {"c": 1, }, }"#;
        assert_eq!(repair_parse(raw).unwrap(), json!({"a": [1, 2], "b": {"c": 1}}));
    }

    #[test]
    fn test_unrecoverable_is_malformed() {
        let err = repair_parse("no json here at all").unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedResponse { .. }));

        let err = repair_parse(r#"{"a": 1, "b":"#).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedResponse { .. }));
    }

    #[test]
    fn test_every_truncation_is_value_or_malformed() {
        let doc = r#"{"participants": [{"participantId": "p1", "gloss": "Naomi", "properties": [{"dimension": "age", "value": "old"}]}, {"participantId": "p2", "gloss": "Ruth"}], "relations": [{"sourceId": "p2", "targetId": "p1", "type": "daughter-in-law"}]}"#;
        let first_key_end = doc.find(':').unwrap();
        for (cut, _) in doc.char_indices().filter(|(i, _)| *i > first_key_end) {
            match repair_parse(&doc[..cut]) {
                Ok(v) => assert!(v.is_object(), "cut {cut} produced non-object {v}"),
                Err(AnalysisError::MalformedResponse { .. }) => {}
                Err(other) => panic!("cut {cut} produced unexpected error {other:?}"),
            }
        }
    }
}
