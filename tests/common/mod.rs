#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{NaiveDateTime, Utc};
use dealroom::ai::{AnalysisClient, AnalysisError, AnalysisInput};
use dealroom::auth::jwt::JwtService;
use dealroom::auth::{password, Session};
use dealroom::config::AppConfig;
use dealroom::domain::{AnalysisType, DealRole, DealStatus};
use dealroom::error::{AppError, AppResult, ErrorKind};
use dealroom::models::*;
use dealroom::routes;
use dealroom::state::AppState;
use dealroom::storage::ObjectStorage;
use dealroom::store::{
    AnalysisStore, CommentStore, DealStore, DocumentStore, MilestoneStore, NotificationStore,
    SignatureStore, UserStore,
};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Barrier, Mutex};
use tower::util::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "closing-day-2025";
pub const WEBHOOK_SECRET: &str = "esign-test-secret";

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    puts: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    fail_puts: Mutex<bool>,
    put_barrier: Mutex<Option<Arc<Barrier>>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        self.puts.lock().await.push(key.to_string());
        if *self.fail_puts.lock().await {
            return Err(anyhow!("storage unavailable"));
        }

        let barrier = self.put_barrier.lock().await.clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        self.objects.lock().await.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.deletes.lock().await.push(key.to_string());
        self.objects.lock().await.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn put_count(&self) -> usize {
        self.puts.lock().await.len()
    }

    pub async fn deleted_keys(&self) -> Vec<String> {
        self.deletes.lock().await.clone()
    }

    pub async fn set_failing(&self, failing: bool) {
        *self.fail_puts.lock().await = failing;
    }

    /// Holds every upload until `parties` uploads are in flight.
    pub async fn hold_puts_until(&self, parties: usize) {
        *self.put_barrier.lock().await = Some(Arc::new(Barrier::new(parties)));
    }
}

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    refresh_tokens: Vec<RefreshToken>,
    deals: Vec<Deal>,
    participants: Vec<DealParticipant>,
    documents: Vec<Document>,
    versions: Vec<DocumentVersion>,
    tags: Vec<VersionTag>,
    annotations: Vec<VersionAnnotation>,
    milestones: Vec<Milestone>,
    assignments: Vec<MilestoneAssignment>,
    signatures: Vec<DocumentSignature>,
    comments: Vec<Comment>,
    notifications: Vec<Notification>,
    analyses: Vec<DocumentAnalysis>,
}

/// In-memory record store with the same uniqueness rules and atomicity as the
/// Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_document_writes: Mutex<bool>,
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn conflict() -> AppError {
    AppError::conflict("record already exists")
}

impl MemoryStore {
    pub async fn set_failing_document_writes(&self, failing: bool) {
        *self.fail_document_writes.lock().await = failing;
    }

    async fn check_document_writes(&self) -> AppResult<()> {
        if *self.fail_document_writes.lock().await {
            return Err(AppError::internal("database unavailable"));
        }
        Ok(())
    }

    pub async fn document_count(&self) -> usize {
        self.tables.lock().await.documents.len()
    }

    pub async fn version_count(&self, document_id: Uuid) -> usize {
        self.tables
            .lock()
            .await
            .versions
            .iter()
            .filter(|v| v.document_id == document_id)
            .count()
    }

    pub async fn insert_signature_row(&self, signature: DocumentSignature) {
        self.tables.lock().await.signatures.push(signature);
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, user_id: Uuid) -> AppResult<User> {
        let tables = self.tables.lock().await;
        tables
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(AppError::not_found)
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert_user(&self, user: NewUser) -> AppResult<User> {
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|u| u.email == user.email) {
            return Err(conflict());
        }
        let at = now();
        let user = User {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            password_hash: user.password_hash,
            role: user.role,
            created_at: at,
            updated_at: at,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        let at = now();
        tables.refresh_tokens.push(RefreshToken {
            id: token.id,
            user_id: token.user_id,
            token_hash: token.token_hash,
            issued_at: token.issued_at,
            expires_at: token.expires_at,
            revoked_at: None,
            created_at: at,
            updated_at: at,
        });
        Ok(())
    }

    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: NaiveDateTime,
    ) -> AppResult<Option<RefreshToken>> {
        let mut tables = self.tables.lock().await;
        let token = tables.refresh_tokens.iter_mut().find(|t| {
            t.token_hash == token_hash && t.revoked_at.is_none() && t.expires_at > now
        });
        Ok(token.map(|token| {
            let found = token.clone();
            token.revoked_at = Some(now);
            token.updated_at = now;
            found
        }))
    }

    async fn revoke_refresh_tokens(
        &self,
        user_id: Uuid,
        token_hash: Option<&str>,
        now: NaiveDateTime,
    ) -> AppResult<usize> {
        let mut tables = self.tables.lock().await;
        let mut revoked = 0;
        for token in tables.refresh_tokens.iter_mut().filter(|t| {
            t.user_id == user_id
                && t.revoked_at.is_none()
                && token_hash.map_or(true, |hash| t.token_hash == hash)
        }) {
            token.revoked_at = Some(now);
            token.updated_at = now;
            revoked += 1;
        }
        Ok(revoked)
    }
}

#[async_trait]
impl DealStore for MemoryStore {
    async fn insert_deal(
        &self,
        deal: NewDeal,
        participants: Vec<NewDealParticipant>,
    ) -> AppResult<Deal> {
        let mut tables = self.tables.lock().await;
        let at = now();
        let deal = Deal {
            id: deal.id,
            title: deal.title,
            description: deal.description,
            status: deal.status,
            health_score: 0,
            seller_id: deal.seller_id,
            buyer_id: deal.buyer_id,
            created_at: at,
            updated_at: at,
        };
        tables.deals.push(deal.clone());
        for participant in participants {
            tables.participants.push(DealParticipant {
                deal_id: participant.deal_id,
                user_id: participant.user_id,
                role: participant.role,
                joined_at: at,
            });
        }
        Ok(deal)
    }

    async fn find_deal(&self, deal_id: Uuid) -> AppResult<Deal> {
        let tables = self.tables.lock().await;
        tables
            .deals
            .iter()
            .find(|d| d.id == deal_id)
            .cloned()
            .ok_or_else(AppError::not_found)
    }

    async fn list_deals_for_user(&self, user_id: Uuid) -> AppResult<Vec<(Deal, String)>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .deals
            .iter()
            .rev()
            .filter_map(|deal| {
                tables
                    .participants
                    .iter()
                    .find(|p| p.deal_id == deal.id && p.user_id == user_id)
                    .map(|p| (deal.clone(), p.role.clone()))
            })
            .collect())
    }

    async fn participant_role(&self, deal_id: Uuid, user_id: Uuid) -> AppResult<Option<String>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .participants
            .iter()
            .find(|p| p.deal_id == deal_id && p.user_id == user_id)
            .map(|p| p.role.clone()))
    }

    async fn list_participants(&self, deal_id: Uuid) -> AppResult<Vec<(DealParticipant, User)>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .participants
            .iter()
            .filter(|p| p.deal_id == deal_id)
            .filter_map(|p| {
                tables
                    .users
                    .iter()
                    .find(|u| u.id == p.user_id)
                    .map(|u| (p.clone(), u.clone()))
            })
            .collect())
    }

    async fn insert_participant(
        &self,
        participant: NewDealParticipant,
        at: NaiveDateTime,
    ) -> AppResult<DealParticipant> {
        let mut tables = self.tables.lock().await;
        if tables
            .participants
            .iter()
            .any(|p| p.deal_id == participant.deal_id && p.user_id == participant.user_id)
        {
            return Err(conflict());
        }
        let participant = DealParticipant {
            deal_id: participant.deal_id,
            user_id: participant.user_id,
            role: participant.role,
            joined_at: now(),
        };
        if participant.role == DealRole::Buyer.as_str() {
            if let Some(deal) = tables
                .deals
                .iter_mut()
                .find(|d| d.id == participant.deal_id && d.buyer_id.is_none())
            {
                deal.buyer_id = Some(participant.user_id);
                deal.updated_at = at;
            }
        }
        tables.participants.push(participant.clone());
        Ok(participant)
    }

    async fn update_deal_status(
        &self,
        deal_id: Uuid,
        status: &str,
        now: NaiveDateTime,
    ) -> AppResult<Deal> {
        let mut tables = self.tables.lock().await;
        let deal = tables
            .deals
            .iter_mut()
            .find(|d| d.id == deal_id)
            .ok_or_else(AppError::not_found)?;
        deal.status = status.to_string();
        deal.updated_at = now;
        Ok(deal.clone())
    }
}

fn version_row(version: NewDocumentVersion, uploaded_at: NaiveDateTime) -> DocumentVersion {
    DocumentVersion {
        id: version.id,
        document_id: version.document_id,
        version_number: version.version_number,
        storage_path: version.storage_path,
        size_bytes: version.size_bytes,
        mime_type: version.mime_type,
        checksum: version.checksum,
        uploaded_by: version.uploaded_by,
        uploaded_at,
        description: version.description,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_documents(&self, deal_id: Uuid) -> AppResult<Vec<Document>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .documents
            .iter()
            .rev()
            .filter(|d| d.deal_id == deal_id)
            .cloned()
            .collect())
    }

    async fn find_document(&self, document_id: Uuid) -> AppResult<Document> {
        let tables = self.tables.lock().await;
        tables
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .cloned()
            .ok_or_else(AppError::not_found)
    }

    async fn create_document(
        &self,
        document: NewDocument,
        version: NewDocumentVersion,
    ) -> AppResult<(Document, DocumentVersion)> {
        self.check_document_writes().await?;
        let mut tables = self.tables.lock().await;
        let at = now();
        let document = Document {
            id: document.id,
            deal_id: document.deal_id,
            name: document.name,
            storage_path: document.storage_path,
            uploaded_by: document.uploaded_by,
            size_bytes: document.size_bytes,
            mime_type: document.mime_type,
            status: document.status,
            version: document.version,
            latest_version_id: document.latest_version_id,
            category: document.category,
            milestone_id: document.milestone_id,
            created_at: at,
            updated_at: at,
        };
        let version = version_row(version, at);
        tables.documents.push(document.clone());
        tables.versions.push(version.clone());
        Ok((document, version))
    }

    async fn latest_version_number(&self, document_id: Uuid) -> AppResult<i32> {
        let tables = self.tables.lock().await;
        Ok(tables
            .versions
            .iter()
            .filter(|v| v.document_id == document_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0))
    }

    async fn append_version(
        &self,
        version: NewDocumentVersion,
        now: NaiveDateTime,
    ) -> AppResult<(Document, DocumentVersion)> {
        self.check_document_writes().await?;
        let mut tables = self.tables.lock().await;
        if tables.versions.iter().any(|v| {
            v.document_id == version.document_id && v.version_number == version.version_number
        }) {
            return Err(AppError::new(
                ErrorKind::ConflictWindow,
                "another version was uploaded concurrently; retry the upload",
            ));
        }
        let version = version_row(version, now);
        let document = tables
            .documents
            .iter_mut()
            .find(|d| d.id == version.document_id)
            .ok_or_else(AppError::not_found)?;
        if document.version < version.version_number {
            document.version = version.version_number;
            document.latest_version_id = version.id;
            document.storage_path = version.storage_path.clone();
            document.size_bytes = version.size_bytes;
            document.mime_type = version.mime_type.clone();
            document.updated_at = now;
        }
        let document = document.clone();
        tables.versions.push(version.clone());
        Ok((document, version))
    }

    async fn list_versions(&self, document_id: Uuid) -> AppResult<Vec<DocumentVersion>> {
        let tables = self.tables.lock().await;
        let mut versions: Vec<DocumentVersion> = tables
            .versions
            .iter()
            .filter(|v| v.document_id == document_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(versions)
    }

    async fn find_version(&self, version_id: Uuid) -> AppResult<DocumentVersion> {
        let tables = self.tables.lock().await;
        tables
            .versions
            .iter()
            .find(|v| v.id == version_id)
            .cloned()
            .ok_or_else(AppError::not_found)
    }

    async fn update_document_status(
        &self,
        document_id: Uuid,
        status: &str,
        now: NaiveDateTime,
    ) -> AppResult<Document> {
        let mut tables = self.tables.lock().await;
        let document = tables
            .documents
            .iter_mut()
            .find(|d| d.id == document_id)
            .ok_or_else(AppError::not_found)?;
        document.status = status.to_string();
        document.updated_at = now;
        Ok(document.clone())
    }

    async fn delete_document(&self, document_id: Uuid) -> AppResult<Vec<String>> {
        let mut tables = self.tables.lock().await;
        let document = tables
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .cloned()
            .ok_or_else(AppError::not_found)?;

        let version_ids: Vec<Uuid> = tables
            .versions
            .iter()
            .filter(|v| v.document_id == document_id)
            .map(|v| v.id)
            .collect();
        let mut keys: Vec<String> = tables
            .versions
            .iter()
            .filter(|v| v.document_id == document_id)
            .map(|v| v.storage_path.clone())
            .collect();
        if !keys.contains(&document.storage_path) {
            keys.push(document.storage_path.clone());
        }

        tables.documents.retain(|d| d.id != document_id);
        tables.versions.retain(|v| v.document_id != document_id);
        tables.tags.retain(|t| !version_ids.contains(&t.version_id));
        tables
            .annotations
            .retain(|a| !version_ids.contains(&a.version_id));
        tables.signatures.retain(|s| s.document_id != document_id);
        tables
            .comments
            .retain(|c| c.document_id != Some(document_id));
        tables.analyses.retain(|a| a.document_id != document_id);
        Ok(keys)
    }

    async fn update_document_milestone(
        &self,
        document_id: Uuid,
        milestone_id: Option<Uuid>,
        at: NaiveDateTime,
    ) -> AppResult<Document> {
        let mut tables = self.tables.lock().await;
        let document = tables
            .documents
            .iter_mut()
            .find(|d| d.id == document_id)
            .ok_or_else(AppError::not_found)?;
        document.milestone_id = milestone_id;
        document.updated_at = at;
        Ok(document.clone())
    }

    async fn documents_for_milestone(&self, milestone_id: Uuid) -> AppResult<Vec<Document>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .documents
            .iter()
            .filter(|d| d.milestone_id == Some(milestone_id))
            .cloned()
            .collect())
    }

    async fn list_version_tags(&self, version_ids: &[Uuid]) -> AppResult<Vec<VersionTag>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tags
            .iter()
            .filter(|t| version_ids.contains(&t.version_id))
            .cloned()
            .collect())
    }

    async fn insert_version_tag(&self, tag: NewVersionTag) -> AppResult<VersionTag> {
        let mut tables = self.tables.lock().await;
        if tables
            .tags
            .iter()
            .any(|t| t.version_id == tag.version_id && t.name == tag.name)
        {
            return Err(conflict());
        }
        let tag = VersionTag {
            id: tag.id,
            version_id: tag.version_id,
            name: tag.name,
            color: tag.color,
            created_at: now(),
        };
        tables.tags.push(tag.clone());
        Ok(tag)
    }

    async fn delete_version_tag(&self, version_id: Uuid, tag_id: Uuid) -> AppResult<usize> {
        let mut tables = self.tables.lock().await;
        let before = tables.tags.len();
        tables
            .tags
            .retain(|t| !(t.id == tag_id && t.version_id == version_id));
        Ok(before - tables.tags.len())
    }

    async fn list_version_annotations(
        &self,
        version_ids: &[Uuid],
    ) -> AppResult<Vec<VersionAnnotation>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .annotations
            .iter()
            .filter(|a| version_ids.contains(&a.version_id))
            .cloned()
            .collect())
    }

    async fn insert_version_annotation(
        &self,
        annotation: NewVersionAnnotation,
    ) -> AppResult<VersionAnnotation> {
        let mut tables = self.tables.lock().await;
        let annotation = VersionAnnotation {
            id: annotation.id,
            version_id: annotation.version_id,
            user_id: annotation.user_id,
            content: annotation.content,
            created_at: now(),
        };
        tables.annotations.push(annotation.clone());
        Ok(annotation)
    }
}

#[async_trait]
impl MilestoneStore for MemoryStore {
    async fn list_milestones(&self, deal_id: Uuid) -> AppResult<Vec<Milestone>> {
        let tables = self.tables.lock().await;
        let mut milestones: Vec<Milestone> = tables
            .milestones
            .iter()
            .filter(|m| m.deal_id == deal_id)
            .cloned()
            .collect();
        milestones.sort_by_key(|m| m.order_index);
        Ok(milestones)
    }

    async fn find_milestone(&self, milestone_id: Uuid) -> AppResult<Milestone> {
        let tables = self.tables.lock().await;
        tables
            .milestones
            .iter()
            .find(|m| m.id == milestone_id)
            .cloned()
            .ok_or_else(AppError::not_found)
    }

    async fn next_milestone_index(&self, deal_id: Uuid) -> AppResult<i32> {
        let tables = self.tables.lock().await;
        Ok(tables
            .milestones
            .iter()
            .filter(|m| m.deal_id == deal_id)
            .map(|m| m.order_index + 1)
            .max()
            .unwrap_or(0))
    }

    async fn insert_milestone(&self, milestone: NewMilestone) -> AppResult<Milestone> {
        let mut tables = self.tables.lock().await;
        let at = now();
        let milestone = Milestone {
            id: milestone.id,
            deal_id: milestone.deal_id,
            title: milestone.title,
            description: milestone.description,
            status: milestone.status,
            due_date: milestone.due_date,
            completed_at: None,
            order_index: milestone.order_index,
            created_at: at,
            updated_at: at,
        };
        tables.milestones.push(milestone.clone());
        Ok(milestone)
    }

    async fn update_milestone(
        &self,
        milestone_id: Uuid,
        changes: MilestoneChanges,
    ) -> AppResult<Milestone> {
        let mut tables = self.tables.lock().await;
        let milestone = tables
            .milestones
            .iter_mut()
            .find(|m| m.id == milestone_id)
            .ok_or_else(AppError::not_found)?;
        if let Some(title) = changes.title {
            milestone.title = title;
        }
        if let Some(description) = changes.description {
            milestone.description = description;
        }
        if let Some(status) = changes.status {
            milestone.status = status;
        }
        if let Some(due_date) = changes.due_date {
            milestone.due_date = due_date;
        }
        if let Some(completed_at) = changes.completed_at {
            milestone.completed_at = completed_at;
        }
        if let Some(updated_at) = changes.updated_at {
            milestone.updated_at = updated_at;
        }
        Ok(milestone.clone())
    }

    async fn assigned_users(&self, milestone_id: Uuid) -> AppResult<Vec<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .assignments
            .iter()
            .filter(|a| a.milestone_id == milestone_id)
            .filter_map(|a| tables.users.iter().find(|u| u.id == a.user_id).cloned())
            .collect())
    }

    async fn assign_user(&self, assignment: NewMilestoneAssignment) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables
            .assignments
            .iter()
            .any(|a| a.milestone_id == assignment.milestone_id && a.user_id == assignment.user_id)
        {
            tables.assignments.push(MilestoneAssignment {
                milestone_id: assignment.milestone_id,
                user_id: assignment.user_id,
                assigned_at: now(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SignatureStore for MemoryStore {
    async fn signatures_for_documents(
        &self,
        deal_id: Uuid,
        document_ids: &[Uuid],
    ) -> AppResult<Vec<DocumentSignature>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .signatures
            .iter()
            .filter(|s| s.deal_id == deal_id && document_ids.contains(&s.document_id))
            .cloned()
            .collect())
    }

    async fn upsert_signature(
        &self,
        signature: NewDocumentSignature,
        now: NaiveDateTime,
    ) -> AppResult<DocumentSignature> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.signatures.iter_mut().find(|s| {
            s.envelope_id == signature.envelope_id && s.signer_email == signature.signer_email
        }) {
            existing.status = signature.status;
            existing.signer_role = signature.signer_role;
            existing.completed_at = signature.completed_at;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let row = DocumentSignature {
            id: signature.id,
            deal_id: signature.deal_id,
            document_id: signature.document_id,
            envelope_id: signature.envelope_id,
            signer_email: signature.signer_email,
            signer_role: signature.signer_role,
            status: signature.status,
            sent_at: signature.sent_at,
            completed_at: signature.completed_at,
            created_at: now,
            updated_at: now,
        };
        tables.signatures.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl CommentStore for MemoryStore {
    async fn list_comments(
        &self,
        deal_id: Uuid,
        document_id: Option<Uuid>,
    ) -> AppResult<Vec<Comment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .comments
            .iter()
            .filter(|c| c.deal_id == deal_id)
            .filter(|c| document_id.map_or(true, |id| c.document_id == Some(id)))
            .cloned()
            .collect())
    }

    async fn find_comment(&self, comment_id: Uuid) -> AppResult<Comment> {
        let tables = self.tables.lock().await;
        tables
            .comments
            .iter()
            .find(|c| c.id == comment_id)
            .cloned()
            .ok_or_else(AppError::not_found)
    }

    async fn insert_comment(&self, comment: NewComment) -> AppResult<Comment> {
        let mut tables = self.tables.lock().await;
        let comment = Comment {
            id: comment.id,
            deal_id: comment.deal_id,
            document_id: comment.document_id,
            user_id: comment.user_id,
            content: comment.content,
            created_at: now(),
        };
        tables.comments.push(comment.clone());
        Ok(comment)
    }

    async fn delete_comment(&self, comment_id: Uuid) -> AppResult<usize> {
        let mut tables = self.tables.lock().await;
        let before = tables.comments.len();
        tables.comments.retain(|c| c.id != comment_id);
        Ok(before - tables.comments.len())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notifications(&self, notifications: Vec<NewNotification>) -> AppResult<usize> {
        let mut tables = self.tables.lock().await;
        let count = notifications.len();
        let at = now();
        for notification in notifications {
            tables.notifications.push(Notification {
                id: notification.id,
                user_id: notification.user_id,
                deal_id: notification.deal_id,
                kind: notification.kind,
                message: notification.message,
                read_at: None,
                created_at: at,
            });
        }
        Ok(count)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> AppResult<Vec<Notification>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id && (!unread_only || n.read_at.is_none()))
            .take(100)
            .cloned()
            .collect())
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        now: NaiveDateTime,
    ) -> AppResult<usize> {
        let mut tables = self.tables.lock().await;
        let mut updated = 0;
        for notification in tables.notifications.iter_mut().filter(|n| {
            n.id == notification_id && n.user_id == user_id && n.read_at.is_none()
        }) {
            notification.read_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn list_analyses(&self, document_id: Uuid) -> AppResult<Vec<DocumentAnalysis>> {
        let tables = self.tables.lock().await;
        let mut analyses: Vec<DocumentAnalysis> = tables
            .analyses
            .iter()
            .filter(|a| a.document_id == document_id)
            .cloned()
            .collect();
        analyses.sort_by(|a, b| a.analysis_type.cmp(&b.analysis_type));
        Ok(analyses)
    }

    async fn save_analysis(
        &self,
        analysis: NewDocumentAnalysis,
        now: NaiveDateTime,
    ) -> AppResult<DocumentAnalysis> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.analyses.iter_mut().find(|a| {
            a.document_id == analysis.document_id && a.analysis_type == analysis.analysis_type
        }) {
            existing.status = analysis.status;
            existing.result = analysis.result;
            existing.error = analysis.error;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let row = DocumentAnalysis {
            id: analysis.id,
            document_id: analysis.document_id,
            analysis_type: analysis.analysis_type,
            status: analysis.status,
            result: analysis.result,
            error: analysis.error,
            created_at: now,
            updated_at: now,
        };
        tables.analyses.push(row.clone());
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// AI client
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeAnalysisClient {
    calls: Mutex<Vec<(AnalysisType, Option<String>)>>,
    failing: Mutex<bool>,
}

impl FakeAnalysisClient {
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }

    /// Analysis types requested so far, with the text the model was shown.
    pub async fn calls(&self) -> Vec<(AnalysisType, Option<String>)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl AnalysisClient for FakeAnalysisClient {
    async fn analyze(
        &self,
        analysis_type: AnalysisType,
        input: &AnalysisInput,
    ) -> Result<Value, AnalysisError> {
        self.calls
            .lock()
            .await
            .push((analysis_type, input.text.clone()));
        if *self.failing.lock().await {
            return Err(AnalysisError::Status {
                status: 503,
                body: "model overloaded".to_string(),
            });
        }
        Ok(json!({
            "analysis_type": analysis_type.as_str(),
            "document": input.document_name,
            "summary": "Standard terms; no unusual clauses.",
        }))
    }
}

// ---------------------------------------------------------------------------
// Application harness
// ---------------------------------------------------------------------------

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://localhost/dealroom_test".to_string(),
        database_max_pool_size: 2,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        refresh_token_expiry_days: 30,
        refresh_cookie_secure: false,
        refresh_cookie_domain: None,
        cors_allowed_origin: None,
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        s3_bucket: "test-bucket".to_string(),
        signed_url_ttl_seconds: 600,
        realtime_debounce_ms: 20,
        ai_api_url: None,
        ai_api_key: None,
        ai_model: "test-model".to_string(),
        esign_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<FakeStorage>,
    pub ai: Arc<FakeAnalysisClient>,
    router: Router,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| {
            anyhow!(
                "failed to decode body ({err}): {}",
                String::from_utf8_lossy(&self.body)
            )
        })
    }

    pub fn error_kind(&self) -> Option<String> {
        self.json::<Value>()
            .ok()
            .and_then(|v| v.get("kind").and_then(Value::as_str).map(str::to_string))
    }
}

/// One part of a multipart upload body.
pub enum Part<'a> {
    File {
        name: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
    Text(&'a str, String),
}

impl TestApp {
    pub fn new() -> Self {
        let config = test_config();
        let store = Arc::new(MemoryStore::default());
        let storage = Arc::new(FakeStorage::default());
        let ai = Arc::new(FakeAnalysisClient::default());
        let jwt = JwtService::from_config(&config).expect("jwt service");
        let state = AppState::new(store.clone(), storage.clone(), config, jwt, ai.clone());
        let router = routes::create_router(state.clone());
        Self {
            state,
            store,
            storage,
            ai,
            router,
        }
    }

    pub async fn create_user(&self, email: &str, display_name: &str) -> User {
        self.store
            .insert_user(NewUser {
                id: Uuid::new_v4(),
                email: email.to_string(),
                display_name: Some(display_name.to_string()),
                password_hash: password::hash_password(PASSWORD).expect("hash password"),
                role: "user".to_string(),
            })
            .await
            .expect("insert user")
    }

    pub fn session(&self, user: &User) -> Session {
        Session {
            user_id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role.clone(),
        }
    }

    pub fn token(&self, user: &User) -> String {
        self.state.jwt.generate_token(user).expect("token")
    }

    /// Creates a deal in `status` with the given participants.
    pub async fn create_deal(&self, status: DealStatus, members: &[(&User, DealRole)]) -> Deal {
        let deal_id = Uuid::new_v4();
        let seller = members
            .iter()
            .find(|(_, role)| *role == DealRole::Seller)
            .or_else(|| members.first())
            .map(|(user, _)| user.id)
            .expect("at least one member");
        self.store
            .insert_deal(
                NewDeal {
                    id: deal_id,
                    title: "Acquisition of Northwind Ltd".to_string(),
                    description: None,
                    status: status.as_str().to_string(),
                    seller_id: seller,
                    buyer_id: None,
                },
                members
                    .iter()
                    .map(|(user, role)| NewDealParticipant {
                        deal_id,
                        user_id: user.id,
                        role: role.as_str().to_string(),
                    })
                    .collect(),
            )
            .await
            .expect("insert deal")
    }

    pub async fn create_milestone(&self, deal_id: Uuid, title: &str) -> Milestone {
        let order_index = self
            .store
            .next_milestone_index(deal_id)
            .await
            .expect("next index");
        self.store
            .insert_milestone(NewMilestone {
                id: Uuid::new_v4(),
                deal_id,
                title: title.to_string(),
                description: None,
                status: "not_started".to_string(),
                due_date: None,
                order_index,
            })
            .await
            .expect("insert milestone")
    }

    pub async fn send(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|err| anyhow!("router error: {err}"))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = body_to_vec(response.into_body()).await?;
        Ok(TestResponse {
            status,
            headers,
            body,
        })
    }

    /// Sends a request and hands back the response with its body unread, for
    /// endpoints that stream.
    pub async fn open(&self, path: &str, token: &str) -> Result<axum::response::Response> {
        let request = Self::builder(Method::GET, path, Some(token)).body(Body::empty())?;
        self.router
            .clone()
            .oneshot(request)
            .await
            .map_err(|err| anyhow!("router error: {err}"))
    }

    /// Posts an e-signature provider callback with the given shared secret.
    pub async fn esign_webhook(&self, payload: &Value, secret: Option<&str>) -> Result<TestResponse> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/esign")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header("x-esign-secret", secret);
        }
        let request = builder.body(Body::from(serde_json::to_vec(payload)?))?;
        self.send(request).await
    }

    fn builder(method: Method, path: &str, token: Option<&str>) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(path);
        match token {
            Some(token) => builder.header("authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<TestResponse> {
        let request = Self::builder(Method::GET, path, token).body(Body::empty())?;
        self.send(request).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<TestResponse> {
        let request = Self::builder(Method::DELETE, path, token).body(Body::empty())?;
        self.send(request).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<TestResponse> {
        self.json_request(Method::POST, path, payload, token).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<TestResponse> {
        self.json_request(Method::PATCH, path, payload, token).await
    }

    async fn json_request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<TestResponse> {
        let body = serde_json::to_vec(payload)?;
        let request = Self::builder(method, path, token)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        self.send(request).await
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        parts: &[Part<'_>],
        token: &str,
    ) -> Result<TestResponse> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        for part in parts {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            match part {
                Part::File {
                    name,
                    content_type,
                    data,
                } => {
                    body.extend(
                        format!(
                            "Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                    body.extend(*data);
                }
                Part::Text(name, value) => {
                    body.extend(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend(value.as_bytes());
                }
            }
            body.extend(b"\r\n");
        }
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Self::builder(Method::POST, path, Some(token))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))?;
        self.send(request).await
    }

    /// Uploads `data` as `name` to the deal, optionally as a new version of
    /// `document_id`.
    pub async fn upload(
        &self,
        deal_id: Uuid,
        name: &str,
        data: &[u8],
        document_id: Option<Uuid>,
        milestone_id: Option<Uuid>,
        token: &str,
    ) -> Result<TestResponse> {
        let mut parts = vec![
            Part::File {
                name,
                content_type: "text/plain",
                data,
            },
            Part::Text("category", "general".to_string()),
        ];
        if let Some(document_id) = document_id {
            parts.push(Part::Text("document_id", document_id.to_string()));
        }
        if let Some(milestone_id) = milestone_id {
            parts.push(Part::Text("milestone_id", milestone_id.to_string()));
        }
        self.post_multipart(&format!("/api/deals/{deal_id}/documents"), &parts, token)
            .await
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}
