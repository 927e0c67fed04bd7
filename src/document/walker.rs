use serde::Serialize;
use serde_json::Value;

use super::policy::KeyPolicy;

/// A translatable leaf string addressed by its path from the document root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextUnit {
    pub index: usize,
    pub path: Vec<String>,
    pub original: String,
}

/// Collects every translatable string in `document`, depth first, in
/// document order. Indices are assigned globally starting at zero.
pub fn collect(document: &Value, policy: &KeyPolicy) -> Vec<TextUnit> {
    let mut units = Vec::new();
    let mut path = Vec::new();
    walk(document, &mut path, policy, &mut units);
    units
}

fn walk(node: &Value, path: &mut Vec<String>, policy: &KeyPolicy, units: &mut Vec<TextUnit>) {
    match node {
        Value::Object(map) => {
            for (key, value) in map {
                if policy.is_protected(key) {
                    continue;
                }
                path.push(key.clone());
                match value {
                    Value::String(text)
                        if policy.is_translatable(key) && !text.trim().is_empty() =>
                    {
                        units.push(TextUnit {
                            index: units.len(),
                            path: path.clone(),
                            original: text.clone(),
                        });
                    }
                    _ => walk(value, path, policy, units),
                }
                path.pop();
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                path.push(idx.to_string());
                walk(item, path, policy, units);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Looks up the value at `path`, using the same segment rules as the patcher.
pub fn resolve<'a>(document: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(document, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn protected_identifier_is_skipped() {
        let doc = json!({"title": "Hi", "id": "abc-123"});
        let units = collect(&doc, &KeyPolicy::default());
        assert_eq!(
            units,
            vec![TextUnit {
                index: 0,
                path: vec!["title".to_string()],
                original: "Hi".to_string(),
            }]
        );
    }

    #[test]
    fn walks_nested_editor_document_in_order() {
        let doc = json!({
            "type": "doc",
            "content": [
                {
                    "type": "heading",
                    "attrs": {"level": 1},
                    "content": [{"type": "text", "text": "Dubai Marina"}]
                },
                {
                    "type": "paragraph",
                    "content": [
                        {"type": "text", "text": "Walk along "},
                        {"type": "text", "marks": [{"type": "link", "attrs": {"href": "https://x.test", "title": "ignored"}}], "text": "the promenade"}
                    ]
                },
                {
                    "type": "image",
                    "attrs": {"src": "https://cdn.test/a.png", "alt": "Skyline at dusk", "caption": "  "}
                }
            ]
        });
        let units = collect(&doc, &KeyPolicy::default());
        let paths = units
            .iter()
            .map(|unit| unit.path.join("."))
            .collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                "content.0.content.0.text",
                "content.1.content.0.text",
                "content.1.content.1.text",
                "content.2.attrs.alt",
            ]
        );
        assert_eq!(
            units.iter().map(|unit| unit.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        // whitespace is kept verbatim so the path resolves to the same string
        assert_eq!(units[1].original, "Walk along ");
    }

    #[test]
    fn every_path_resolves_to_its_original() {
        let doc = json!({
            "title": "Guide",
            "sections": [
                {"label": "One", "items": [{"text": "a"}, {"text": "b", "url": "/b"}]},
                {"description": "Two", "meta": {"caption": "c"}}
            ]
        });
        let units = collect(&doc, &KeyPolicy::default());
        assert_eq!(units.len(), 6);
        for unit in &units {
            let value = resolve(&doc, &unit.path).and_then(Value::as_str);
            assert_eq!(value, Some(unit.original.as_str()));
        }
    }

    #[test]
    fn protected_keys_never_end_a_path() {
        let doc = json!({
            "text": "keep",
            "href": "https://example.com",
            "nested": {"status": "draft", "language": "en", "label": "Visible"}
        });
        let policy = KeyPolicy::default();
        let units = collect(&doc, &policy);
        assert!(units.iter().all(|unit| {
            let last = unit.path.last().map(String::as_str).unwrap_or_default();
            !policy.is_protected(last)
        }));
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn non_string_translatable_values_are_descended() {
        let doc = json!({"title": {"text": "inner"}, "label": 3});
        let units = collect(&doc, &KeyPolicy::default());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].path, vec!["title", "text"]);
    }
}
