/// Split markers in preference order. Block containers come first, then inline
/// tags, then any tag close, then sentence punctuation.
const SAFE_BOUNDARY_MARKERS: &[&str] = &[
    "</div>", "</p>", "</h1>", "</h2>", "</h3>", "</h4>", "</h5>", "</h6>", "</span>", "</a>",
    "</li>", "</ul>", "</ol>", ">", ";", ".",
];

/// How far back from the limit to look for a space when no marker matches.
const WHITESPACE_LOOKBACK: usize = 50;

/// Splits `markup` into consecutive chunks of at most `max_chunk_size` bytes,
/// cutting after structural markers where possible.
///
/// The chunks always concatenate back to `markup`. Lengths are measured in
/// bytes; a hard cut is pulled back to the previous UTF-8 boundary so that
/// every chunk stays a valid `&str`.
pub fn segment(markup: &str, max_chunk_size: usize) -> Vec<&str> {
    let max_chunk_size = max_chunk_size.max(1);
    if markup.len() <= max_chunk_size {
        return vec![markup];
    }

    let mut chunks = Vec::new();
    let mut remaining = markup;
    while !remaining.is_empty() {
        if remaining.len() <= max_chunk_size {
            chunks.push(remaining);
            break;
        }
        let split = find_split_point(remaining, max_chunk_size)
            .unwrap_or_else(|| hard_cut(remaining, max_chunk_size));
        let (chunk, rest) = remaining.split_at(split);
        chunks.push(chunk);
        remaining = rest;
    }
    chunks
}

/// Owned variant of [`segment`] for callers that move chunks into tasks.
pub fn segment_owned(markup: &str, max_chunk_size: usize) -> Vec<String> {
    segment(markup, max_chunk_size)
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn find_split_point(text: &str, max_pos: usize) -> Option<usize> {
    if max_pos >= text.len() {
        return Some(text.len());
    }

    // Every marker is ASCII, so an occurrence ending at or before `max_pos`
    // lies entirely inside the floor-aligned window.
    let window = &text[..floor_char_boundary(text, max_pos)];
    for marker in SAFE_BOUNDARY_MARKERS {
        if let Some(start) = window.rfind(marker) {
            let end = start + marker.len();
            if end > 0 {
                return Some(end);
            }
        }
    }

    let bytes = text.as_bytes();
    let lower = max_pos.saturating_sub(WHITESPACE_LOOKBACK);
    (lower + 1..=max_pos)
        .rev()
        .find(|&idx| bytes[idx] == b' ')
}

fn hard_cut(text: &str, max_pos: usize) -> usize {
    let cut = floor_char_boundary(text, max_pos);
    if cut > 0 {
        return cut;
    }
    // The first character alone is wider than the limit.
    text.chars().next().map(char::len_utf8).unwrap_or(text.len())
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut idx = index;
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
