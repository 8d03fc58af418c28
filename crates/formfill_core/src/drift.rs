//! Drift detection between filled entries and the current knowledge store.

use std::collections::BTreeMap;

use crate::change_lines::aligned_keys;
use crate::codec::{extract_fills, inject_fills, PlaceholderPattern};
use crate::model::FillEntry;

/// Key/value view of the knowledge store at one point in time.
pub type KnowledgeSnapshot = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenLine {
    pub entry_index: usize,
    pub line_index: usize,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub entries: Vec<FillEntry>,
    pub rewritten: Vec<RewrittenLine>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.rewritten.is_empty()
    }
}

/// Rewrites every filled value whose context key now holds a different value
/// in `snapshot`.
///
/// Lines that no longer line up with their template are left alone, as are
/// placeholders that were never filled. Stored values that are empty or that
/// look like a placeholder are not injected, since the rewritten line could
/// not be read back.
pub fn reconcile(
    entries: &[FillEntry],
    pattern: &PlaceholderPattern,
    snapshot: &KnowledgeSnapshot,
) -> DriftReport {
    let mut rewritten = Vec::new();
    let entries = entries
        .iter()
        .enumerate()
        .map(|(entry_index, entry)| {
            let filled: Vec<&str> = entry.filled_lines.split('\n').collect();
            let mut key_cursor = 0;
            let mut lines = Vec::with_capacity(filled.len());
            for (line_index, template_line) in entry.template_lines.split('\n').enumerate() {
                let spots = pattern.count_matches(template_line);
                let keys = aligned_keys(&entry.context_keys, key_cursor, spots);
                key_cursor += spots;

                let before = filled.get(line_index).copied().unwrap_or(template_line);
                match reconcile_line(template_line, before, &keys, pattern, snapshot) {
                    Some(after) => {
                        rewritten.push(RewrittenLine {
                            entry_index,
                            line_index,
                            before: before.to_string(),
                            after: after.clone(),
                        });
                        lines.push(after);
                    }
                    None => lines.push(before.to_string()),
                }
            }
            // Filled text may carry more lines than the template; keep them.
            let template_count = lines.len();
            lines.extend(filled.iter().skip(template_count).map(|l| l.to_string()));
            FillEntry {
                filled_lines: lines.join("\n"),
                ..entry.clone()
            }
        })
        .collect();

    DriftReport { entries, rewritten }
}

fn reconcile_line(
    template_line: &str,
    filled_line: &str,
    keys: &[Option<String>],
    pattern: &PlaceholderPattern,
    snapshot: &KnowledgeSnapshot,
) -> Option<String> {
    let mut fills = extract_fills(template_line, filled_line, pattern).ok()?;
    let mut dirty = false;
    for (fill, key) in fills.iter_mut().zip(keys) {
        let (Some(current), Some(key)) = (fill.as_ref(), key) else {
            continue;
        };
        let Some(stored) = snapshot.get(key) else {
            continue;
        };
        if stored != current && !stored.is_empty() && !pattern.is_match(stored) {
            *fill = Some(stored.clone());
            dirty = true;
        }
    }
    dirty.then(|| inject_fills(template_line, &fills, pattern))
}
