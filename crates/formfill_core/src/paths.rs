use std::path::{Path, PathBuf};

const FILLED_SUFFIX: &str = "_filled";

/// Output location for a filled document: `<stem>_filled<extension>` beside
/// the original.
pub fn filled_output_path(doc_path: &Path) -> PathBuf {
    let stem = doc_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match doc_path.extension() {
        Some(ext) => format!("{stem}{FILLED_SUFFIX}.{}", ext.to_string_lossy()),
        None => format!("{stem}{FILLED_SUFFIX}"),
    };
    doc_path.with_file_name(file_name)
}
