use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("empty path")]
    EmptyPath,
    #[error("key not found at {path}")]
    MissingKey { path: String },
    #[error("invalid array index at {path}")]
    InvalidIndex { path: String },
    #[error("unexpected value type at {path}")]
    NotContainer { path: String },
}

/// Writes every `(path, text)` pair into `document`.
///
/// The pairs are applied to a working copy that replaces `document` only when
/// all of them succeed, so a bad path leaves the caller's tree untouched.
pub fn patch<'a, I>(document: &mut Value, translations: I) -> Result<(), PatchError>
where
    I: IntoIterator<Item = (&'a [String], &'a str)>,
{
    let mut working = document.clone();
    for (path, text) in translations {
        set_text(&mut working, path, text)?;
    }
    *document = working;
    Ok(())
}

fn set_text(root: &mut Value, path: &[String], text: &str) -> Result<(), PatchError> {
    let Some((last, parents)) = path.split_last() else {
        return Err(PatchError::EmptyPath);
    };

    let mut current = root;
    for (depth, segment) in parents.iter().enumerate() {
        let here = || display_path(&path[..=depth]);
        current = match current {
            Value::Object(map) => map
                .get_mut(segment)
                .ok_or_else(|| PatchError::MissingKey { path: here() })?,
            Value::Array(items) => {
                let idx = parse_index(segment, items.len())
                    .ok_or_else(|| PatchError::InvalidIndex { path: here() })?;
                &mut items[idx]
            }
            _ => return Err(PatchError::NotContainer { path: here() }),
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.clone(), Value::String(text.to_string()));
        }
        Value::Array(items) => {
            let idx = parse_index(last, items.len()).ok_or_else(|| PatchError::InvalidIndex {
                path: display_path(path),
            })?;
            items[idx] = Value::String(text.to_string());
        }
        _ => {
            return Err(PatchError::NotContainer {
                path: display_path(path),
            });
        }
    }
    Ok(())
}

fn parse_index(segment: &str, len: usize) -> Option<usize> {
    segment.parse::<usize>().ok().filter(|idx| *idx < len)
}

fn display_path(path: &[String]) -> String {
    format!("[{}]", path.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{KeyPolicy, collect};
    use serde_json::json;

    fn owned(path: &[&str]) -> Vec<String> {
        path.iter().map(|segment| segment.to_string()).collect()
    }

    #[test]
    fn identity_patch_is_a_no_op() {
        let doc = json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [{"type": "text", "text": " Hello "}]},
                {"type": "image", "attrs": {"alt": "Desert", "src": "/d.png"}}
            ],
            "title": "Post"
        });
        let units = collect(&doc, &KeyPolicy::default());
        let mut copy = doc.clone();
        patch(
            &mut copy,
            units
                .iter()
                .map(|unit| (unit.path.as_slice(), unit.original.as_str())),
        )
        .unwrap();
        assert_eq!(copy, doc);
    }

    #[test]
    fn replaces_values_through_arrays_and_maps() {
        let mut doc = json!({"content": [{"text": "a"}, {"attrs": {"alt": "b"}}]});
        let first = owned(&["content", "0", "text"]);
        let second = owned(&["content", "1", "attrs", "alt"]);
        patch(
            &mut doc,
            [(first.as_slice(), "A"), (second.as_slice(), "B")],
        )
        .unwrap();
        assert_eq!(doc, json!({"content": [{"text": "A"}, {"attrs": {"alt": "B"}}]}));
    }

    #[test]
    fn bad_path_aborts_without_partial_apply() {
        let original = json!({"content": [{"text": "a"}]});
        let mut doc = original.clone();
        let good = owned(&["content", "0", "text"]);
        let bad = owned(&["content", "7", "text"]);
        let err = patch(&mut doc, [(good.as_slice(), "A"), (bad.as_slice(), "B")]).unwrap_err();
        assert_eq!(
            err,
            PatchError::InvalidIndex {
                path: "[content, 7]".to_string()
            }
        );
        assert_eq!(doc, original);
    }

    #[test]
    fn reports_missing_keys_and_type_mismatches() {
        let mut doc = json!({"title": "x", "list": ["a"]});
        let missing = owned(&["body", "text"]);
        let scalar = owned(&["title", "text"]);
        let non_numeric = owned(&["list", "first"]);
        assert!(matches!(
            patch(&mut doc, [(missing.as_slice(), "y")]),
            Err(PatchError::MissingKey { .. })
        ));
        assert!(matches!(
            patch(&mut doc, [(scalar.as_slice(), "y")]),
            Err(PatchError::NotContainer { .. })
        ));
        assert!(matches!(
            patch(&mut doc, [(non_numeric.as_slice(), "y")]),
            Err(PatchError::InvalidIndex { .. })
        ));
        assert_eq!(patch(&mut doc, [(&[][..], "y")]), Err(PatchError::EmptyPath));
    }
}
