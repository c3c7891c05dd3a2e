//! Upload intake: role validation and materialization of the two uploads.
//!
//! Parts are identified by their multipart field name (`pdf`, `csv`) and
//! written to fixed, role-derived file names inside the session, so the
//! worker never sees client-supplied names.

use std::fmt;
use std::path::{Path, PathBuf};

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::error::{PipelineError, ValidationError, WorkspaceError};
use crate::session::Session;

/// Stored name of the primary document inside a session.
pub const DOCUMENT_FILE_NAME: &str = "plano_maestro.pdf";

/// Stored name of the mapping table inside a session.
pub const TABLE_FILE_NAME: &str = "asignaciones.csv";

/// Default document ceiling (50 MiB).
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;

/// Default table ceiling (5 MiB).
pub const DEFAULT_MAX_TABLE_BYTES: u64 = 5 * 1024 * 1024;

const DOCUMENT_CONTENT_TYPES: &[&str] = &["application/pdf", "application/x-pdf"];

// Windows browsers report `.csv` files as `application/vnd.ms-excel`.
const TABLE_CONTENT_TYPES: &[&str] = &[
    "text/csv",
    "application/csv",
    "text/x-csv",
    "application/vnd.ms-excel",
];

/// Logical role of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadRole {
    PrimaryDocument,
    MappingTable,
}

impl UploadRole {
    pub const ALL: [UploadRole; 2] = [UploadRole::PrimaryDocument, UploadRole::MappingTable];

    /// Resolve a multipart field name to a role.
    pub fn from_field_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.field_name() == name)
    }

    /// Multipart field name carrying this role.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::PrimaryDocument => "pdf",
            Self::MappingTable => "csv",
        }
    }

    /// Fixed file name the upload is stored under.
    pub fn stored_file_name(self) -> &'static str {
        match self {
            Self::PrimaryDocument => DOCUMENT_FILE_NAME,
            Self::MappingTable => TABLE_FILE_NAME,
        }
    }

    /// Required extension, without the dot.
    pub fn expected_extension(self) -> &'static str {
        match self {
            Self::PrimaryDocument => "pdf",
            Self::MappingTable => "csv",
        }
    }

    fn accepted_content_types(self) -> &'static [&'static str] {
        match self {
            Self::PrimaryDocument => DOCUMENT_CONTENT_TYPES,
            Self::MappingTable => TABLE_CONTENT_TYPES,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryDocument => "primary-document",
            Self::MappingTable => "mapping-table",
        }
    }
}

impl fmt::Display for UploadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-role size ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_document_bytes: u64,
    pub max_table_bytes: u64,
}

impl UploadLimits {
    pub fn for_role(&self, role: UploadRole) -> u64 {
        match role {
            UploadRole::PrimaryDocument => self.max_document_bytes,
            UploadRole::MappingTable => self.max_table_bytes,
        }
    }

    /// Combined ceiling of both uploads.
    pub fn total_bytes(&self) -> u64 {
        self.max_document_bytes + self.max_table_bytes
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            max_table_bytes: DEFAULT_MAX_TABLE_BYTES,
        }
    }
}

/// Transport-level description of one multipart part.
#[derive(Debug, Clone, Default)]
pub struct PartHeader {
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

/// An upload validated and written into the session.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub role: UploadRole,
    pub original_name: String,
    pub size_bytes: u64,
    pub path: PathBuf,
    pub content_type: Option<String>,
}

/// Check name, extension and declared content type of a part.
///
/// Returns the client-supplied file name on success. A part without a
/// declared content type is judged by its extension alone.
pub fn validate_header(role: UploadRole, header: &PartHeader) -> Result<String, ValidationError> {
    let file_name = header
        .file_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or(ValidationError::MissingFileName { role })?;

    let extension_ok = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(role.expected_extension()));
    if !extension_ok {
        return Err(ValidationError::Extension {
            role,
            expected: role.expected_extension(),
            file_name: file_name.to_string(),
        });
    }

    if let Some(content_type) = header.content_type.as_deref() {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !role.accepted_content_types().contains(&essence.as_str()) {
            return Err(ValidationError::ContentType {
                role,
                content_type: content_type.to_string(),
            });
        }
    }

    Ok(file_name.to_string())
}

/// Validate one part and stream its body to the role's fixed path.
///
/// The size ceiling is enforced while streaming; a rejected or failed part
/// leaves no file behind.
pub async fn receive_part<S, B, E>(
    session: &Session,
    role: UploadRole,
    header: &PartHeader,
    body: S,
    limits: &UploadLimits,
) -> Result<UploadedFile, PipelineError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let original_name = validate_header(role, header)?;
    let path = session.file_path(role.stored_file_name());

    let size_bytes = match write_limited(&path, role, limits.for_role(role), body).await {
        Ok(0) => {
            remove_partial(&path).await;
            return Err(ValidationError::Empty { role }.into());
        }
        Ok(size) => size,
        Err(e) => {
            remove_partial(&path).await;
            return Err(e);
        }
    };

    tracing::info!(
        session_id = %session.id(),
        role = %role,
        original_name = %original_name,
        size_bytes,
        "Upload received",
    );

    Ok(UploadedFile {
        role,
        original_name,
        size_bytes,
        path,
        content_type: header.content_type.clone(),
    })
}

async fn write_limited<S, B, E>(
    path: &Path,
    role: UploadRole,
    limit_bytes: u64,
    body: S,
) -> Result<u64, PipelineError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let write_error = |source| WorkspaceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(path).await.map_err(write_error)?;
    let mut written: u64 = 0;

    futures::pin_mut!(body);
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| ValidationError::Malformed(e.to_string()))?;
        let bytes = chunk.as_ref();
        written += bytes.len() as u64;
        if written > limit_bytes {
            return Err(ValidationError::TooLarge { role, limit_bytes }.into());
        }
        file.write_all(bytes).await.map_err(write_error)?;
    }

    file.flush().await.map_err(write_error)?;
    Ok(written)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
        }
    }
}

/// Both uploads of a request, ready for the worker.
#[derive(Debug, Clone)]
pub struct ReceivedUploads {
    pub document: UploadedFile,
    pub table: UploadedFile,
}

/// Collects the parts of one request.
#[derive(Debug)]
pub struct Intake {
    limits: UploadLimits,
    document: Option<UploadedFile>,
    table: Option<UploadedFile>,
}

impl Intake {
    pub fn new(limits: UploadLimits) -> Self {
        Self {
            limits,
            document: None,
            table: None,
        }
    }

    fn slot(&mut self, role: UploadRole) -> &mut Option<UploadedFile> {
        match role {
            UploadRole::PrimaryDocument => &mut self.document,
            UploadRole::MappingTable => &mut self.table,
        }
    }

    /// Accept one multipart part.
    ///
    /// Returns the role the part was stored under, or `None` for fields that
    /// carry no upload role (those are skipped without being read).
    pub async fn receive<S, B, E>(
        &mut self,
        session: &Session,
        header: &PartHeader,
        body: S,
    ) -> Result<Option<UploadRole>, PipelineError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: fmt::Display,
    {
        let Some(role) = UploadRole::from_field_name(&header.field_name) else {
            tracing::debug!(field = %header.field_name, "Skipping unrelated multipart field");
            return Ok(None);
        };

        if self.slot(role).is_some() {
            return Err(ValidationError::Duplicate { role }.into());
        }

        let limits = self.limits;
        let file = receive_part(session, role, header, body, &limits).await?;
        *self.slot(role) = Some(file);
        Ok(Some(role))
    }

    /// Require exactly one file of each role.
    pub fn finish(self) -> Result<ReceivedUploads, ValidationError> {
        let document = self.document.ok_or(ValidationError::Missing {
            role: UploadRole::PrimaryDocument,
        })?;
        let table = self.table.ok_or(ValidationError::Missing {
            role: UploadRole::MappingTable,
        })?;
        Ok(ReceivedUploads { document, table })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
