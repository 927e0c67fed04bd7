//! Extraction of translatable strings from rich-text JSON documents and
//! patching translated strings back into them.

mod patcher;
mod policy;
mod walker;

pub use patcher::{PatchError, patch};
pub use policy::{DEFAULT_PROTECTED_KEYS, DEFAULT_TRANSLATABLE_KEYS, KeyPolicy};
pub use walker::{TextUnit, collect, resolve};

/// Groups units into consecutive batches of at most `batch_size` units.
pub fn batches(units: &[TextUnit], batch_size: usize) -> Vec<Vec<TextUnit>> {
    units
        .chunks(batch_size.max(1))
        .map(<[TextUnit]>::to_vec)
        .collect()
}

/// Splits `text` into leading whitespace, core and trailing whitespace.
/// Returns `None` for blank input.
pub(crate) fn split_text_bounds(text: &str) -> Option<(&str, &str, &str)> {
    let start = text.find(|ch: char| !ch.is_whitespace())?;
    let end = text
        .char_indices()
        .rev()
        .find(|(_, ch)| !ch.is_whitespace())
        .map(|(idx, ch)| idx + ch.len_utf8())?;
    Some((&text[..start], &text[start..end], &text[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(index: usize) -> TextUnit {
        TextUnit {
            index,
            path: vec![index.to_string()],
            original: format!("text {}", index),
        }
    }

    #[test]
    fn batches_keep_order_and_size() {
        let units = (0..23).map(unit).collect::<Vec<_>>();
        let grouped = batches(&units, 10);
        assert_eq!(
            grouped.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![10, 10, 3]
        );
        assert_eq!(grouped[2][0].index, 20);
    }

    #[test]
    fn splits_surrounding_whitespace() {
        assert_eq!(
            split_text_bounds("  Hello world \n"),
            Some(("  ", "Hello world", " \n"))
        );
        assert_eq!(split_text_bounds("x"), Some(("", "x", "")));
        assert_eq!(split_text_bounds(" \t "), None);
    }
}
