//! Record store boundary. Every persistent read and write the services perform
//! goes through these traits; `postgres::PgStore` is the production
//! implementation.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    Comment, Deal, DealParticipant, Document, DocumentAnalysis, DocumentSignature,
    DocumentVersion, Milestone, MilestoneChanges, NewComment, NewDeal, NewDealParticipant,
    NewDocument, NewDocumentAnalysis, NewDocumentSignature, NewDocumentVersion,
    NewMilestone, NewMilestoneAssignment, NewNotification, NewRefreshToken, NewUser,
    NewVersionAnnotation, NewVersionTag, Notification, RefreshToken, User, VersionAnnotation,
    VersionTag,
};

pub mod postgres;

pub use postgres::PgStore;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> AppResult<User>;

    /// Emails are stored lower-cased; callers pass the normalized form.
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;

    async fn insert_user(&self, user: NewUser) -> AppResult<User>;

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> AppResult<()>;

    /// Revokes the active, unexpired token with this hash and returns it.
    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: NaiveDateTime,
    ) -> AppResult<Option<RefreshToken>>;

    /// Revokes one token of the user (when a hash is given) or all of them.
    async fn revoke_refresh_tokens(
        &self,
        user_id: Uuid,
        token_hash: Option<&str>,
        now: NaiveDateTime,
    ) -> AppResult<usize>;
}

#[async_trait]
pub trait DealStore: Send + Sync {
    /// Inserts the deal and its initial participants in one transaction.
    async fn insert_deal(
        &self,
        deal: NewDeal,
        participants: Vec<NewDealParticipant>,
    ) -> AppResult<Deal>;

    async fn find_deal(&self, deal_id: Uuid) -> AppResult<Deal>;

    /// Deals the user participates in, paired with the user's deal role.
    async fn list_deals_for_user(&self, user_id: Uuid) -> AppResult<Vec<(Deal, String)>>;

    async fn participant_role(&self, deal_id: Uuid, user_id: Uuid) -> AppResult<Option<String>>;

    async fn list_participants(&self, deal_id: Uuid) -> AppResult<Vec<(DealParticipant, User)>>;

    /// Adds a participant. A buyer joining a deal that has none recorded also
    /// becomes the deal's `buyer_id`, in the same transaction.
    async fn insert_participant(
        &self,
        participant: NewDealParticipant,
        now: NaiveDateTime,
    ) -> AppResult<DealParticipant>;

    /// The `update_deal_status` procedure: a single status write.
    async fn update_deal_status(
        &self,
        deal_id: Uuid,
        status: &str,
        now: NaiveDateTime,
    ) -> AppResult<Deal>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_documents(&self, deal_id: Uuid) -> AppResult<Vec<Document>>;

    async fn find_document(&self, document_id: Uuid) -> AppResult<Document>;

    /// Inserts a document together with its first version atomically.
    async fn create_document(
        &self,
        document: NewDocument,
        version: NewDocumentVersion,
    ) -> AppResult<(Document, DocumentVersion)>;

    /// Highest version number recorded for the document, `0` when none exist.
    async fn latest_version_number(&self, document_id: Uuid) -> AppResult<i32>;

    /// Inserts the version and moves the document's version pointer in one
    /// transaction. A duplicate version number fails with `ConflictWindow`.
    async fn append_version(
        &self,
        version: NewDocumentVersion,
        now: NaiveDateTime,
    ) -> AppResult<(Document, DocumentVersion)>;

    /// Versions ordered newest first.
    async fn list_versions(&self, document_id: Uuid) -> AppResult<Vec<DocumentVersion>>;

    async fn find_version(&self, version_id: Uuid) -> AppResult<DocumentVersion>;

    async fn update_document_status(
        &self,
        document_id: Uuid,
        status: &str,
        now: NaiveDateTime,
    ) -> AppResult<Document>;

    /// Links the document to a milestone of its deal, or unlinks it with `None`.
    async fn update_document_milestone(
        &self,
        document_id: Uuid,
        milestone_id: Option<Uuid>,
        now: NaiveDateTime,
    ) -> AppResult<Document>;

    /// Deletes the document and everything hanging off it, returning the
    /// storage keys that belonged to it.
    async fn delete_document(&self, document_id: Uuid) -> AppResult<Vec<String>>;

    async fn documents_for_milestone(&self, milestone_id: Uuid) -> AppResult<Vec<Document>>;

    async fn list_version_tags(&self, version_ids: &[Uuid]) -> AppResult<Vec<VersionTag>>;

    async fn insert_version_tag(&self, tag: NewVersionTag) -> AppResult<VersionTag>;

    async fn delete_version_tag(&self, version_id: Uuid, tag_id: Uuid) -> AppResult<usize>;

    async fn list_version_annotations(
        &self,
        version_ids: &[Uuid],
    ) -> AppResult<Vec<VersionAnnotation>>;

    async fn insert_version_annotation(
        &self,
        annotation: NewVersionAnnotation,
    ) -> AppResult<VersionAnnotation>;
}

#[async_trait]
pub trait MilestoneStore: Send + Sync {
    async fn list_milestones(&self, deal_id: Uuid) -> AppResult<Vec<Milestone>>;

    async fn find_milestone(&self, milestone_id: Uuid) -> AppResult<Milestone>;

    async fn next_milestone_index(&self, deal_id: Uuid) -> AppResult<i32>;

    async fn insert_milestone(&self, milestone: NewMilestone) -> AppResult<Milestone>;

    async fn update_milestone(
        &self,
        milestone_id: Uuid,
        changes: MilestoneChanges,
    ) -> AppResult<Milestone>;

    async fn assigned_users(&self, milestone_id: Uuid) -> AppResult<Vec<User>>;

    /// Idempotent: assigning an already assigned user is a no-op.
    async fn assign_user(&self, assignment: NewMilestoneAssignment) -> AppResult<()>;
}

#[async_trait]
pub trait SignatureStore: Send + Sync {
    async fn signatures_for_documents(
        &self,
        deal_id: Uuid,
        document_ids: &[Uuid],
    ) -> AppResult<Vec<DocumentSignature>>;

    /// Inserts or updates the record keyed by envelope and signer email.
    async fn upsert_signature(
        &self,
        signature: NewDocumentSignature,
        now: NaiveDateTime,
    ) -> AppResult<DocumentSignature>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn list_comments(
        &self,
        deal_id: Uuid,
        document_id: Option<Uuid>,
    ) -> AppResult<Vec<Comment>>;

    async fn find_comment(&self, comment_id: Uuid) -> AppResult<Comment>;

    async fn insert_comment(&self, comment: NewComment) -> AppResult<Comment>;

    async fn delete_comment(&self, comment_id: Uuid) -> AppResult<usize>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notifications(&self, notifications: Vec<NewNotification>) -> AppResult<usize>;

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> AppResult<Vec<Notification>>;

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        now: NaiveDateTime,
    ) -> AppResult<usize>;
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn list_analyses(&self, document_id: Uuid) -> AppResult<Vec<DocumentAnalysis>>;

    /// Replaces the cached entry for the document and analysis type.
    async fn save_analysis(
        &self,
        analysis: NewDocumentAnalysis,
        now: NaiveDateTime,
    ) -> AppResult<DocumentAnalysis>;
}

/// Everything the application needs from persistence.
pub trait RecordStore:
    UserStore
    + DealStore
    + DocumentStore
    + MilestoneStore
    + SignatureStore
    + CommentStore
    + NotificationStore
    + AnalysisStore
    + 'static
{
}

impl<T> RecordStore for T where
    T: UserStore
        + DealStore
        + DocumentStore
        + MilestoneStore
        + SignatureStore
        + CommentStore
        + NotificationStore
        + AnalysisStore
        + 'static
{
}
