use crate::codec::PlaceholderPattern;
use crate::model::{ChangeLine, FillEntry};

/// Splits every entry into per-line review rows.
///
/// Each row gets the slice of its entry's `context_keys` that belongs to the
/// placeholders on that line, found by counting pattern matches line by line
/// and consuming keys in order. Without a pattern the slices are empty.
pub fn derive_change_lines(
    entries: &[FillEntry],
    pattern: Option<&PlaceholderPattern>,
) -> Vec<ChangeLine> {
    let mut rows = Vec::new();
    for (entry_index, entry) in entries.iter().enumerate() {
        let filled: Vec<&str> = entry.filled_lines.split('\n').collect();
        let mut key_cursor = 0;
        for (line_index, template_line) in entry.template_lines.split('\n').enumerate() {
            let keys = match pattern {
                Some(pattern) => {
                    let wanted = pattern.count_matches(template_line);
                    aligned_keys(&entry.context_keys, key_cursor, wanted)
                }
                None => Vec::new(),
            };
            key_cursor += keys.len();
            rows.push(ChangeLine {
                id: rows.len(),
                entry_index,
                line_index,
                template_line: template_line.to_string(),
                filled_line: filled
                    .get(line_index)
                    .copied()
                    .unwrap_or(template_line)
                    .to_string(),
                placeholder_context_keys: keys,
            });
        }
    }
    rows
}

/// Keys for the placeholders of one line, padded with `None` when the entry
/// carries fewer keys than placeholders.
pub(crate) fn aligned_keys(keys: &[Option<String>], start: usize, count: usize) -> Vec<Option<String>> {
    (start..start + count)
        .map(|i| keys.get(i).cloned().flatten())
        .collect()
}
