use std::path::{Path, PathBuf};
use std::time::Duration;

use formfill_core::{
    CheckboxEntry, FillEntry, JobTicket, KnowledgeSnapshot, PlaceholderPattern,
};
use formfill_logging::{formfill_debug, formfill_warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resolver::{CallContext, FieldResolver, FormText, ProcessedFills};
use crate::{FailureKind, ResolverError};

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub base_url: String,
    /// Model provider forwarded to the endpoints that run one.
    pub provider: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            provider: "openai".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// [`FieldResolver`] backed by the form-filling HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpResolver {
    settings: ResolverSettings,
    client: reqwest::Client,
}

impl HttpResolver {
    pub fn new(settings: ResolverSettings) -> Result<Self, ResolverError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ResolverError::new(FailureKind::Transport, err.to_string()))?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), endpoint)
    }

    async fn post<B, R>(&self, cx: &CallContext, endpoint: &str, body: &B) -> Result<R, ResolverError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        cx.checkpoint()?;
        let payload = serde_json::to_vec(body)
            .map_err(|err| ResolverError::new(FailureKind::Io, err.to_string()))?;
        formfill_debug!("Resolver: POST {} for {:?}", endpoint, cx.doc_id);

        let response = self
            .client
            .post(self.url(endpoint))
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(ResolverError::cancelled());
        }
        if !status.is_success() {
            return Err(ResolverError::new(
                FailureKind::HttpStatus(status.as_u16()),
                format!("{endpoint}: {status}"),
            ));
        }

        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        decode_body(endpoint, &bytes)
    }
}

fn decode_body<R: DeserializeOwned>(endpoint: &str, bytes: &[u8]) -> Result<R, ResolverError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|err| {
        ResolverError::new(FailureKind::MalformedResponse, format!("{endpoint}: {err}"))
    })?;
    if value.get("cancelled").and_then(Value::as_bool) == Some(true) {
        return Err(ResolverError::cancelled());
    }
    serde_json::from_value(value).map_err(|err| {
        ResolverError::new(FailureKind::MalformedResponse, format!("{endpoint}: {err}"))
    })
}

fn map_reqwest_error(err: reqwest::Error) -> ResolverError {
    if err.is_timeout() {
        return ResolverError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return ResolverError::new(FailureKind::MalformedResponse, err.to_string());
    }
    ResolverError::new(FailureKind::Transport, err.to_string())
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Keeps the string values of a context map; bookkeeping entries such as the
/// list of files already read are not knowledge.
fn string_values(context: serde_json::Map<String, Value>) -> KnowledgeSnapshot {
    context
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key, text)),
            _ => None,
        })
        .collect()
}

#[derive(Serialize)]
struct FormPathBody<'a> {
    form_path: &'a str,
}

#[derive(Deserialize)]
struct ExtractTextResponse {
    text: String,
    #[serde(default)]
    is_interactive: bool,
}

#[derive(Serialize)]
struct DetectPatternBody<'a> {
    text: &'a str,
    is_interactive: bool,
}

#[derive(Deserialize)]
struct DetectPatternResponse {
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Serialize)]
struct ContextDirBody<'a> {
    context_dir: &'a str,
}

#[derive(Serialize)]
struct AddContextBody<'a> {
    context_dir: &'a str,
    key: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct ContextResponse {
    #[serde(default)]
    context: serde_json::Map<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct WireFillEntry {
    lines: String,
    number_of_fill_spots: usize,
    context_keys: Vec<Option<String>>,
    #[serde(default)]
    filled_lines: String,
}

impl From<&FillEntry> for WireFillEntry {
    fn from(entry: &FillEntry) -> Self {
        Self {
            lines: entry.template_lines.clone(),
            number_of_fill_spots: entry.fill_spot_count,
            context_keys: entry.context_keys.clone(),
            filled_lines: entry.filled_lines.clone(),
        }
    }
}

impl From<WireFillEntry> for FillEntry {
    fn from(wire: WireFillEntry) -> Self {
        // An entry that was never filled comes back with empty filled text.
        let filled_lines = if wire.filled_lines.is_empty() {
            wire.lines.clone()
        } else {
            wire.filled_lines
        };
        FillEntry {
            template_lines: wire.lines,
            filled_lines,
            context_keys: wire.context_keys,
            fill_spot_count: wire.number_of_fill_spots,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireCheckboxEntry {
    lines: String,
    checkbox_positions: Vec<(usize, usize)>,
    checkbox_values: Vec<String>,
    #[serde(default)]
    context_key: Option<String>,
    #[serde(default)]
    checked_indices: Vec<usize>,
}

impl From<&CheckboxEntry> for WireCheckboxEntry {
    fn from(entry: &CheckboxEntry) -> Self {
        Self {
            lines: entry.lines.clone(),
            checkbox_positions: entry.positions.clone(),
            checkbox_values: entry.labels.clone(),
            context_key: entry.context_key.clone(),
            checked_indices: entry.checked_indices.clone(),
        }
    }
}

impl From<WireCheckboxEntry> for CheckboxEntry {
    fn from(wire: WireCheckboxEntry) -> Self {
        CheckboxEntry {
            lines: wire.lines,
            positions: wire.checkbox_positions,
            labels: wire.checkbox_values,
            context_key: wire.context_key,
            checked_indices: wire.checked_indices,
        }
    }
}

#[derive(Serialize)]
struct DetectFillEntriesBody<'a> {
    lines: &'a [String],
    pattern: &'a str,
}

#[derive(Serialize)]
struct ProcessFillEntriesBody<'a> {
    entries: Vec<WireFillEntry>,
    context_dir: &'a str,
    form_path: &'a str,
    pattern: &'a str,
    provider: &'a str,
}

#[derive(Deserialize)]
struct FillEntriesResponse {
    entries: Vec<WireFillEntry>,
    #[serde(default)]
    missing_keys: Vec<String>,
}

#[derive(Serialize)]
struct DetectCheckboxEntriesBody<'a> {
    lines: &'a [String],
}

#[derive(Serialize)]
struct ProcessCheckboxEntriesBody<'a> {
    entries: Vec<WireCheckboxEntry>,
    context_dir: &'a str,
    provider: &'a str,
}

#[derive(Deserialize)]
struct CheckboxEntriesResponse {
    entries: Vec<WireCheckboxEntry>,
}

#[derive(Serialize)]
struct FillOutputBody<'a> {
    fill_entries: Vec<WireFillEntry>,
    checkbox_entries: Vec<WireCheckboxEntry>,
    form_path: &'a str,
    output_path: &'a str,
}

#[derive(Deserialize)]
struct FillOutputResponse {
    output_path: String,
}

#[derive(Deserialize)]
struct CancelResponse {
    #[serde(default)]
    success: bool,
}

fn fill_endpoint(doc: &Path) -> &'static str {
    let is_docx = doc
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("docx"));
    if is_docx {
        "/docx/fill"
    } else {
        "/pdf/fill"
    }
}

fn pattern_str(pattern: Option<&PlaceholderPattern>) -> &str {
    pattern.map(PlaceholderPattern::as_str).unwrap_or_default()
}

#[async_trait::async_trait]
impl FieldResolver for HttpResolver {
    async fn extract_text(&self, cx: &CallContext, doc: &Path) -> Result<FormText, ResolverError> {
        let form_path = path_str(doc);
        let response: ExtractTextResponse = self
            .post(cx, "/form/text", &FormPathBody { form_path: &form_path })
            .await?;
        Ok(FormText {
            text: response.text,
            has_interactive_fields: response.is_interactive,
        })
    }

    async fn detect_pattern(
        &self,
        cx: &CallContext,
        text: &str,
        has_interactive_fields: bool,
    ) -> Result<Option<String>, ResolverError> {
        let response: DetectPatternResponse = self
            .post(
                cx,
                "/pattern/detect",
                &DetectPatternBody {
                    text,
                    is_interactive: has_interactive_fields,
                },
            )
            .await?;
        Ok(response.pattern.filter(|pattern| !pattern.is_empty()))
    }

    async fn resolve_context(
        &self,
        cx: &CallContext,
        store_root: &Path,
    ) -> Result<KnowledgeSnapshot, ResolverError> {
        let context_dir = path_str(store_root);
        let response: ContextResponse = self
            .post(cx, "/context/read", &ContextDirBody { context_dir: &context_dir })
            .await?;
        Ok(string_values(response.context))
    }

    async fn add_context(
        &self,
        cx: &CallContext,
        store_root: &Path,
        key: &str,
        value: &str,
    ) -> Result<KnowledgeSnapshot, ResolverError> {
        let context_dir = path_str(store_root);
        let response: ContextResponse = self
            .post(
                cx,
                "/context/add",
                &AddContextBody {
                    context_dir: &context_dir,
                    key,
                    value,
                },
            )
            .await?;
        Ok(string_values(response.context))
    }

    async fn detect_fill_entries(
        &self,
        cx: &CallContext,
        lines: &[String],
        pattern: Option<&PlaceholderPattern>,
    ) -> Result<Vec<FillEntry>, ResolverError> {
        let response: FillEntriesResponse = self
            .post(
                cx,
                "/fill-entries/detect",
                &DetectFillEntriesBody {
                    lines,
                    pattern: pattern_str(pattern),
                },
            )
            .await?;
        Ok(response.entries.into_iter().map(FillEntry::from).collect())
    }

    async fn process_fill_entries(
        &self,
        cx: &CallContext,
        entries: &[FillEntry],
        store_root: &Path,
        pattern: Option<&PlaceholderPattern>,
    ) -> Result<ProcessedFills, ResolverError> {
        let context_dir = path_str(store_root);
        let form_path = path_str(&cx.doc_id);
        let response: FillEntriesResponse = self
            .post(
                cx,
                "/fill-entries/process",
                &ProcessFillEntriesBody {
                    entries: entries.iter().map(WireFillEntry::from).collect(),
                    context_dir: &context_dir,
                    form_path: &form_path,
                    pattern: pattern_str(pattern),
                    provider: &self.settings.provider,
                },
            )
            .await?;
        Ok(ProcessedFills {
            entries: response.entries.into_iter().map(FillEntry::from).collect(),
            missing_keys: response.missing_keys,
        })
    }

    async fn detect_checkbox_entries(
        &self,
        cx: &CallContext,
        lines: &[String],
    ) -> Result<Vec<CheckboxEntry>, ResolverError> {
        let response: CheckboxEntriesResponse = self
            .post(
                cx,
                "/checkbox-entries/detect",
                &DetectCheckboxEntriesBody { lines },
            )
            .await?;
        Ok(response.entries.into_iter().map(CheckboxEntry::from).collect())
    }

    async fn process_checkbox_entries(
        &self,
        cx: &CallContext,
        entries: &[CheckboxEntry],
        store_root: &Path,
    ) -> Result<Vec<CheckboxEntry>, ResolverError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let context_dir = path_str(store_root);
        let response: CheckboxEntriesResponse = self
            .post(
                cx,
                "/checkbox-entries/process",
                &ProcessCheckboxEntriesBody {
                    entries: entries.iter().map(WireCheckboxEntry::from).collect(),
                    context_dir: &context_dir,
                    provider: &self.settings.provider,
                },
            )
            .await?;
        Ok(response.entries.into_iter().map(CheckboxEntry::from).collect())
    }

    async fn fill_output(
        &self,
        cx: &CallContext,
        doc: &Path,
        entries: &[FillEntry],
        checkboxes: &[CheckboxEntry],
        output_path: &Path,
    ) -> Result<PathBuf, ResolverError> {
        let form_path = path_str(doc);
        let output = path_str(output_path);
        let response: FillOutputResponse = self
            .post(
                cx,
                fill_endpoint(doc),
                &FillOutputBody {
                    fill_entries: entries.iter().map(WireFillEntry::from).collect(),
                    checkbox_entries: checkboxes.iter().map(WireCheckboxEntry::from).collect(),
                    form_path: &form_path,
                    output_path: &output,
                },
            )
            .await?;
        Ok(PathBuf::from(response.output_path))
    }

    async fn cancel_document(&self, ticket: &JobTicket) {
        let doc = ticket.doc_id.as_path();
        let form_path = path_str(doc);
        let cx = CallContext::for_run(ticket, crate::Priority::Urgent);
        let result: Result<CancelResponse, ResolverError> = self
            .post(&cx, "/form/cancel", &FormPathBody { form_path: &form_path })
            .await;
        match result {
            Ok(ack) if ack.success => formfill_debug!("Resolver: cancel acknowledged for {:?}", doc),
            Ok(_) => formfill_warn!("Resolver: cancel not acknowledged for {:?}", doc),
            Err(err) => formfill_warn!("Resolver: cancel for {:?} failed: {}", doc, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_string_context_values_are_dropped() {
        let context = serde_json::json!({
            "name": "Ada",
            "read_files": ["cv.pdf"],
            "age": 36,
        });
        let Value::Object(map) = context else {
            panic!("object expected");
        };
        let snapshot = string_values(map);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("name").map(String::as_str), Some("Ada"));
    }

    #[test]
    fn docx_documents_use_the_docx_filler() {
        assert_eq!(fill_endpoint(Path::new("/f/form.DOCX")), "/docx/fill");
        assert_eq!(fill_endpoint(Path::new("/f/form.pdf")), "/pdf/fill");
        assert_eq!(fill_endpoint(Path::new("/f/form")), "/pdf/fill");
    }

    #[test]
    fn cancelled_body_maps_to_cancelled() {
        let err = decode_body::<FillOutputResponse>("/pdf/fill", br#"{"cancelled": true}"#)
            .err()
            .map(|err| err.kind);
        assert_eq!(err, Some(FailureKind::Cancelled));
    }
}
