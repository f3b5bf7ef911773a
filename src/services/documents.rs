//! Document and version lifecycle: uploads, restores, review status, signed
//! URLs, tags, annotations and deletion.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::notifications::{self, KIND_DOCUMENT_UPLOADED, KIND_DOCUMENT_VERSION};
use crate::auth::Session;
use crate::domain::{DealRole, DocumentStatus};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::models::{
    Document, DocumentVersion, NewDocument, NewDocumentVersion, NewVersionAnnotation,
    NewVersionTag, VersionAnnotation, VersionTag,
};
use crate::permissions::{ensure, require_participant, resolve_capabilities};
use crate::realtime::{ChangeEvent, ChangeKind, ChangeTable};
use crate::state::AppState;
use crate::storage::inline_content_disposition;
use crate::store::{DocumentStore, MilestoneStore};

const DEFAULT_EXTENSION: &str = "bin";
const DEFAULT_CATEGORY: &str = "general";
const MAX_TAG_NAME_LEN: usize = 100;

pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

pub struct UploadTarget {
    pub deal_id: Uuid,
    pub category: String,
    /// Present when uploading a new version of an existing document.
    pub document_id: Option<Uuid>,
    pub milestone_id: Option<Uuid>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub document: Document,
    pub version: DocumentVersion,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct VersionDetail {
    pub version: DocumentVersion,
    pub tags: Vec<VersionTag>,
    pub annotations: Vec<VersionAnnotation>,
}

#[derive(Debug, Clone)]
pub struct DocumentDetail {
    pub document: Document,
    pub versions: Vec<VersionDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_in: u64,
}

/// Lower-cased extension of the file name, `bin` when there is none.
pub fn file_extension(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

pub fn new_document_path(deal_id: Uuid, user_id: Uuid, timestamp_millis: i64, ext: &str) -> String {
    format!("{deal_id}/{user_id}-{timestamp_millis}.{ext}")
}

pub fn version_path(
    deal_id: Uuid,
    document_id: Uuid,
    version_number: i32,
    user_id: Uuid,
    timestamp_millis: i64,
    ext: &str,
) -> String {
    format!("{deal_id}/{document_id}/v{version_number}-{user_id}-{timestamp_millis}.{ext}")
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn resolve_mime(file_name: &str, declared: Option<&str>) -> String {
    declared
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "application/octet-stream")
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Uploads a new document or a new version of an existing one.
///
/// Permission is checked before any storage call. The blob is written first;
/// if the record write then fails the blob is deleted again and the record
/// error is returned. Two concurrent uploads to the same document can pick the
/// same version number; the loser fails with `ConflictWindow`.
pub async fn upload(
    state: &AppState,
    session: &Session,
    file: UploadFile,
    target: UploadTarget,
) -> AppResult<UploadOutcome> {
    let file_name = file.file_name.trim().to_string();
    if file_name.is_empty() {
        return Err(AppError::bad_request("file name is required"));
    }
    if file.bytes.is_empty() {
        return Err(AppError::bad_request("file is empty"));
    }

    let role = require_participant(state.store(), target.deal_id, session).await?;
    let capabilities = resolve_capabilities(role);
    ensure(
        capabilities.can_upload,
        format!("the {role} role cannot upload documents"),
    )?;

    let mime_type = resolve_mime(&file_name, file.content_type.as_deref());
    let description = blank_to_none(target.description);

    let outcome = match target.document_id {
        None => {
            if let Some(milestone_id) = target.milestone_id {
                let milestone = state.store().find_milestone(milestone_id).await?;
                if milestone.deal_id != target.deal_id {
                    return Err(AppError::bad_request(
                        "milestone does not belong to this deal",
                    ));
                }
            }
            let category = blank_to_none(Some(target.category))
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
            create_document(
                state,
                session,
                NewUpload {
                    deal_id: target.deal_id,
                    file_name,
                    mime_type,
                    bytes: file.bytes,
                    category,
                    milestone_id: target.milestone_id,
                    description,
                },
            )
            .await?
        }
        Some(document_id) => {
            let document = state.store().find_document(document_id).await?;
            if document.deal_id != target.deal_id {
                return Err(AppError::not_found());
            }
            ensure(
                document.uploaded_by == session.user_id || capabilities.can_modify_documents,
                "only the uploader or a document manager can add versions",
            )?;
            let ext = file_extension(&file_name);
            let (document, version) = append_version(
                state,
                session,
                &document,
                VersionUpload {
                    file_name: &file_name,
                    ext: &ext,
                    mime_type,
                    bytes: file.bytes,
                    description,
                },
            )
            .await?;
            UploadOutcome {
                document,
                version,
                created: false,
            }
        }
    };

    let (kind, message) = if outcome.created {
        (
            KIND_DOCUMENT_UPLOADED,
            format!("{} uploaded {}", session.label(), outcome.document.name),
        )
    } else {
        (
            KIND_DOCUMENT_VERSION,
            format!(
                "{} uploaded version {} of {}",
                session.label(),
                outcome.version.version_number,
                outcome.document.name
            ),
        )
    };
    notifications::notify_participants(state, target.deal_id, session, kind, message).await;

    Ok(outcome)
}

struct NewUpload {
    deal_id: Uuid,
    file_name: String,
    mime_type: String,
    bytes: Vec<u8>,
    category: String,
    milestone_id: Option<Uuid>,
    description: Option<String>,
}

async fn create_document(
    state: &AppState,
    session: &Session,
    upload: NewUpload,
) -> AppResult<UploadOutcome> {
    let now = Utc::now();
    let ext = file_extension(&upload.file_name);
    let storage_path = new_document_path(
        upload.deal_id,
        session.user_id,
        now.timestamp_millis(),
        &ext,
    );
    let size_bytes = upload.bytes.len() as i64;
    let checksum = checksum(&upload.bytes);

    store_blob(
        state,
        &storage_path,
        upload.bytes,
        &upload.mime_type,
        &upload.file_name,
    )
    .await?;

    let document_id = Uuid::new_v4();
    let version_id = Uuid::new_v4();
    let new_document = NewDocument {
        id: document_id,
        deal_id: upload.deal_id,
        name: upload.file_name,
        storage_path: storage_path.clone(),
        uploaded_by: session.user_id,
        size_bytes,
        mime_type: upload.mime_type.clone(),
        status: DocumentStatus::Draft.as_str().to_string(),
        version: 1,
        latest_version_id: version_id,
        category: upload.category,
        milestone_id: upload.milestone_id,
    };
    let new_version = NewDocumentVersion {
        id: version_id,
        document_id,
        version_number: 1,
        storage_path: storage_path.clone(),
        size_bytes,
        mime_type: upload.mime_type,
        checksum,
        uploaded_by: session.user_id,
        description: upload.description,
    };

    let (document, version) = match state
        .store()
        .create_document(new_document, new_version)
        .await
    {
        Ok(records) => records,
        Err(err) => {
            error!(
                deal_id = %upload.deal_id,
                %document_id,
                error = %err,
                "failed to record uploaded document"
            );
            discard_blob(state, &storage_path).await;
            return Err(err);
        }
    };

    info!(
        deal_id = %document.deal_id,
        document_id = %document.id,
        user_id = %session.user_id,
        size_bytes,
        "document uploaded"
    );
    state.changes.publish(
        ChangeEvent::new(
            ChangeTable::Documents,
            ChangeKind::Insert,
            document.deal_id,
            document.id,
        )
        .with_milestone(document.milestone_id),
    );

    Ok(UploadOutcome {
        document,
        version,
        created: true,
    })
}

struct VersionUpload<'a> {
    file_name: &'a str,
    ext: &'a str,
    mime_type: String,
    bytes: Vec<u8>,
    description: Option<String>,
}

/// Stores the blob under the next version path and appends the version row.
async fn append_version(
    state: &AppState,
    session: &Session,
    document: &Document,
    upload: VersionUpload<'_>,
) -> AppResult<(Document, DocumentVersion)> {
    let next = state.store().latest_version_number(document.id).await? + 1;
    let now = Utc::now();
    let storage_path = version_path(
        document.deal_id,
        document.id,
        next,
        session.user_id,
        now.timestamp_millis(),
        upload.ext,
    );
    let size_bytes = upload.bytes.len() as i64;
    let checksum = checksum(&upload.bytes);

    store_blob(
        state,
        &storage_path,
        upload.bytes,
        &upload.mime_type,
        upload.file_name,
    )
    .await?;

    let new_version = NewDocumentVersion {
        id: Uuid::new_v4(),
        document_id: document.id,
        version_number: next,
        storage_path: storage_path.clone(),
        size_bytes,
        mime_type: upload.mime_type,
        checksum,
        uploaded_by: session.user_id,
        description: upload.description,
    };

    let (document, version) = match state
        .store()
        .append_version(new_version, now.naive_utc())
        .await
    {
        Ok(records) => records,
        Err(err) => {
            if err.kind() == ErrorKind::ConflictWindow {
                warn!(
                    document_id = %document.id,
                    version_number = next,
                    "concurrent upload claimed the same version number"
                );
            } else {
                error!(
                    document_id = %document.id,
                    version_number = next,
                    error = %err,
                    "failed to record document version"
                );
            }
            discard_blob(state, &storage_path).await;
            return Err(err);
        }
    };

    info!(
        document_id = %document.id,
        version_number = version.version_number,
        user_id = %session.user_id,
        "document version added"
    );
    state.changes.publish(
        ChangeEvent::new(
            ChangeTable::DocumentVersions,
            ChangeKind::Insert,
            document.deal_id,
            version.id,
        )
        .with_milestone(document.milestone_id),
    );
    state.changes.publish(
        ChangeEvent::new(
            ChangeTable::Documents,
            ChangeKind::Update,
            document.deal_id,
            document.id,
        )
        .with_milestone(document.milestone_id),
    );

    Ok((document, version))
}

async fn store_blob(
    state: &AppState,
    key: &str,
    bytes: Vec<u8>,
    mime_type: &str,
    file_name: &str,
) -> AppResult<()> {
    state
        .storage
        .put_object(
            key,
            bytes,
            Some(mime_type.to_string()),
            inline_content_disposition(file_name),
        )
        .await
        .map_err(|err| {
            error!(key, error = %err, "storage upload failed");
            AppError::upstream(format!("storage upload failed: {err}"))
        })
}

/// Compensating delete for a blob whose record write failed.
async fn discard_blob(state: &AppState, key: &str) {
    match state.storage.delete_object(key).await {
        Ok(()) => warn!(key, "removed stored blob after failed record write"),
        Err(err) => warn!(key, error = %err, "could not remove orphaned blob"),
    }
}

/// Creates a new version whose content is copied from an older one.
pub async fn restore_version(
    state: &AppState,
    session: &Session,
    document_id: Uuid,
    version_id: Uuid,
) -> AppResult<UploadOutcome> {
    let document = state.store().find_document(document_id).await?;
    let role = require_participant(state.store(), document.deal_id, session).await?;
    let capabilities = resolve_capabilities(role);
    ensure(
        document.uploaded_by == session.user_id || capabilities.can_modify_documents,
        "only the uploader or a document manager can restore versions",
    )?;

    let source = state.store().find_version(version_id).await?;
    if source.document_id != document.id {
        return Err(AppError::not_found());
    }

    let bytes = state
        .storage
        .get_object(&source.storage_path)
        .await
        .map_err(|err| {
            error!(version_id = %source.id, error = %err, "failed to read version for restore");
            AppError::upstream(format!("storage read failed: {err}"))
        })?;

    let ext = file_extension(&source.storage_path);
    let (document, version) = append_version(
        state,
        session,
        &document,
        VersionUpload {
            file_name: &document.name,
            ext: &ext,
            mime_type: source.mime_type.clone(),
            bytes,
            description: Some(format!("Restored from version {}", source.version_number)),
        },
    )
    .await?;

    Ok(UploadOutcome {
        document,
        version,
        created: false,
    })
}

pub async fn list_documents(
    state: &AppState,
    session: &Session,
    deal_id: Uuid,
) -> AppResult<Vec<Document>> {
    require_participant(state.store(), deal_id, session).await?;
    state.store().list_documents(deal_id).await
}

async fn load_document(
    state: &AppState,
    session: &Session,
    document_id: Uuid,
) -> AppResult<(Document, DealRole)> {
    let document = state.store().find_document(document_id).await?;
    let role = require_participant(state.store(), document.deal_id, session).await?;
    Ok((document, role))
}

async fn version_details(
    state: &AppState,
    versions: Vec<DocumentVersion>,
) -> AppResult<Vec<VersionDetail>> {
    let ids: Vec<Uuid> = versions.iter().map(|version| version.id).collect();
    let tags = state.store().list_version_tags(&ids).await?;
    let annotations = state.store().list_version_annotations(&ids).await?;

    Ok(versions
        .into_iter()
        .map(|version| VersionDetail {
            tags: tags
                .iter()
                .filter(|tag| tag.version_id == version.id)
                .cloned()
                .collect(),
            annotations: annotations
                .iter()
                .filter(|annotation| annotation.version_id == version.id)
                .cloned()
                .collect(),
            version,
        })
        .collect())
}

pub async fn document_detail(
    state: &AppState,
    session: &Session,
    document_id: Uuid,
) -> AppResult<DocumentDetail> {
    let (document, _) = load_document(state, session, document_id).await?;
    let versions = state.store().list_versions(document.id).await?;
    let versions = version_details(state, versions).await?;
    Ok(DocumentDetail { document, versions })
}

/// Version history, newest first.
pub async fn list_versions(
    state: &AppState,
    session: &Session,
    document_id: Uuid,
) -> AppResult<Vec<VersionDetail>> {
    let (document, _) = load_document(state, session, document_id).await?;
    let versions = state.store().list_versions(document.id).await?;
    version_details(state, versions).await
}

pub async fn signed_url(
    state: &AppState,
    session: &Session,
    version_id: Uuid,
) -> AppResult<SignedUrl> {
    let version = state.store().find_version(version_id).await?;
    load_document(state, session, version.document_id).await?;

    let ttl = state.config.signed_url_ttl();
    let url = state
        .storage
        .presign_get_object(&version.storage_path, ttl)
        .await
        .map_err(|err| {
            error!(%version_id, error = %err, "failed to sign version URL");
            AppError::upstream(format!("could not create signed URL: {err}"))
        })?;

    Ok(SignedUrl {
        url,
        expires_in: ttl.as_secs(),
    })
}

/// Review transition. `signed` is terminal for everyone but deal admins.
pub async fn update_status(
    state: &AppState,
    session: &Session,
    document_id: Uuid,
    status: DocumentStatus,
) -> AppResult<Document> {
    let (document, role) = load_document(state, session, document_id).await?;
    ensure(
        resolve_capabilities(role).can_review_documents,
        format!("the {role} role cannot review documents"),
    )?;

    let current: DocumentStatus = document.status.parse()?;
    if current == DocumentStatus::Signed && status != current && role != DealRole::Admin {
        return Err(AppError::forbidden(
            "signed documents can only be reopened by a deal admin",
        ));
    }

    let updated = state
        .store()
        .update_document_status(document.id, status.as_str(), Utc::now().naive_utc())
        .await?;
    info!(document_id = %updated.id, from = %current, to = %status, "document status changed");
    state.changes.publish(
        ChangeEvent::new(
            ChangeTable::Documents,
            ChangeKind::Update,
            updated.deal_id,
            updated.id,
        )
        .with_milestone(updated.milestone_id),
    );
    Ok(updated)
}

/// Moves the document to another milestone of its deal (`None` unlinks it).
/// The change event carries the new milestone only; streams watching the old
/// one pick it up through their deal-wide documents subscription.
pub async fn link_milestone(
    state: &AppState,
    session: &Session,
    document_id: Uuid,
    milestone_id: Option<Uuid>,
) -> AppResult<Document> {
    let (document, role) = load_document(state, session, document_id).await?;
    ensure(
        document.uploaded_by == session.user_id || resolve_capabilities(role).can_modify_documents,
        format!("the {role} role cannot modify this document"),
    )?;

    if let Some(milestone_id) = milestone_id {
        let milestone = state.store().find_milestone(milestone_id).await?;
        if milestone.deal_id != document.deal_id {
            return Err(AppError::bad_request(
                "milestone does not belong to this deal",
            ));
        }
    }
    if document.milestone_id == milestone_id {
        return Ok(document);
    }

    let updated = state
        .store()
        .update_document_milestone(document.id, milestone_id, Utc::now().naive_utc())
        .await?;
    info!(
        document_id = %updated.id,
        from = ?document.milestone_id,
        to = ?updated.milestone_id,
        "document milestone changed"
    );
    state.changes.publish(
        ChangeEvent::new(
            ChangeTable::Documents,
            ChangeKind::Update,
            updated.deal_id,
            updated.id,
        )
        .with_milestone(updated.milestone_id),
    );
    Ok(updated)
}

/// Deletes the document, its history and its stored blobs. Blob removal
/// failures are logged and do not fail the request.
pub async fn delete_document(
    state: &AppState,
    session: &Session,
    document_id: Uuid,
    confirmed: bool,
) -> AppResult<()> {
    if !confirmed {
        return Err(AppError::bad_request(
            "deleting a document requires confirmation",
        ));
    }

    let (document, role) = load_document(state, session, document_id).await?;
    ensure(
        resolve_capabilities(role).can_delete_documents,
        format!("the {role} role cannot delete documents"),
    )?;

    let keys = state.store().delete_document(document.id).await?;
    let failed = state.storage.delete_objects(&keys).await;
    if !failed.is_empty() {
        warn!(
            document_id = %document.id,
            failed = failed.len(),
            "some stored blobs could not be removed"
        );
    }

    info!(document_id = %document.id, user_id = %session.user_id, "document deleted");
    state.changes.publish(
        ChangeEvent::new(
            ChangeTable::Documents,
            ChangeKind::Delete,
            document.deal_id,
            document.id,
        )
        .with_milestone(document.milestone_id),
    );
    Ok(())
}

async fn load_version(
    state: &AppState,
    session: &Session,
    version_id: Uuid,
) -> AppResult<(DocumentVersion, Document, DealRole)> {
    let version = state.store().find_version(version_id).await?;
    let (document, role) = load_document(state, session, version.document_id).await?;
    Ok((version, document, role))
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

pub async fn add_tag(
    state: &AppState,
    session: &Session,
    version_id: Uuid,
    name: &str,
    color: &str,
) -> AppResult<VersionTag> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_TAG_NAME_LEN {
        return Err(AppError::bad_request(format!(
            "tag name must be between 1 and {MAX_TAG_NAME_LEN} characters"
        )));
    }
    let color = color.trim();
    if !is_hex_color(color) {
        return Err(AppError::bad_request("tag color must look like #RRGGBB"));
    }

    let (version, document, role) = load_version(state, session, version_id).await?;
    ensure(
        document.uploaded_by == session.user_id || resolve_capabilities(role).can_modify_documents,
        format!("the {role} role cannot tag versions"),
    )?;

    state
        .store()
        .insert_version_tag(NewVersionTag {
            id: Uuid::new_v4(),
            version_id: version.id,
            name: name.to_string(),
            color: color.to_ascii_lowercase(),
        })
        .await
}

pub async fn remove_tag(
    state: &AppState,
    session: &Session,
    version_id: Uuid,
    tag_id: Uuid,
) -> AppResult<()> {
    let (version, document, role) = load_version(state, session, version_id).await?;
    ensure(
        document.uploaded_by == session.user_id || resolve_capabilities(role).can_modify_documents,
        format!("the {role} role cannot tag versions"),
    )?;

    if state.store().delete_version_tag(version.id, tag_id).await? == 0 {
        return Err(AppError::not_found());
    }
    Ok(())
}

pub async fn list_annotations(
    state: &AppState,
    session: &Session,
    version_id: Uuid,
) -> AppResult<Vec<VersionAnnotation>> {
    let (version, _, _) = load_version(state, session, version_id).await?;
    state.store().list_version_annotations(&[version.id]).await
}

/// Annotations are append-only.
pub async fn add_annotation(
    state: &AppState,
    session: &Session,
    version_id: Uuid,
    content: &str,
) -> AppResult<VersionAnnotation> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::bad_request("annotation must not be empty"));
    }

    let (version, _, role) = load_version(state, session, version_id).await?;
    ensure(
        resolve_capabilities(role).can_comment,
        format!("the {role} role cannot annotate versions"),
    )?;

    state
        .store()
        .insert_version_annotation(NewVersionAnnotation {
            id: Uuid::new_v4(),
            version_id: version.id,
            user_id: session.user_id,
            content: content.to_string(),
        })
        .await
}
