use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    /// Name shown to other participants, falling back to the email address.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = deals)]
pub struct Deal {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub health_score: i32,
    pub seller_id: Uuid,
    pub buyer_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = deals)]
pub struct NewDeal {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub seller_id: Uuid,
    pub buyer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = deal_participants)]
#[diesel(belongs_to(Deal))]
#[diesel(belongs_to(User))]
#[diesel(primary_key(deal_id, user_id))]
pub struct DealParticipant {
    pub deal_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = deal_participants)]
pub struct NewDealParticipant {
    pub deal_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(Deal))]
pub struct Document {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub name: String,
    pub storage_path: String,
    pub uploaded_by: Uuid,
    pub size_bytes: i64,
    pub mime_type: String,
    pub status: String,
    pub version: i32,
    pub latest_version_id: Uuid,
    pub category: String,
    pub milestone_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub name: String,
    pub storage_path: String,
    pub uploaded_by: Uuid,
    pub size_bytes: i64,
    pub mime_type: String,
    pub status: String,
    pub version: i32,
    pub latest_version_id: Uuid,
    pub category: String,
    pub milestone_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_versions)]
#[diesel(belongs_to(Document))]
pub struct DocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub checksum: String,
    pub uploaded_by: Uuid,
    pub uploaded_at: NaiveDateTime,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = document_versions)]
pub struct NewDocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub checksum: String,
    pub uploaded_by: Uuid,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = version_tags)]
#[diesel(belongs_to(DocumentVersion, foreign_key = version_id))]
pub struct VersionTag {
    pub id: Uuid,
    pub version_id: Uuid,
    pub name: String,
    pub color: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = version_tags)]
pub struct NewVersionTag {
    pub id: Uuid,
    pub version_id: Uuid,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = version_annotations)]
#[diesel(belongs_to(DocumentVersion, foreign_key = version_id))]
pub struct VersionAnnotation {
    pub id: Uuid,
    pub version_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = version_annotations)]
pub struct NewVersionAnnotation {
    pub id: Uuid,
    pub version_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = milestones)]
#[diesel(belongs_to(Deal))]
pub struct Milestone {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub due_date: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub order_index: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = milestones)]
pub struct NewMilestone {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub due_date: Option<NaiveDateTime>,
    pub order_index: i32,
}

/// Column changes for a milestone update. `None` leaves the column untouched;
/// the nested options allow nullable columns to be cleared.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = milestones)]
pub struct MilestoneChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub due_date: Option<Option<NaiveDateTime>>,
    pub completed_at: Option<Option<NaiveDateTime>>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = milestone_assignments)]
#[diesel(belongs_to(Milestone))]
#[diesel(belongs_to(User))]
#[diesel(primary_key(milestone_id, user_id))]
pub struct MilestoneAssignment {
    pub milestone_id: Uuid,
    pub user_id: Uuid,
    pub assigned_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = milestone_assignments)]
pub struct NewMilestoneAssignment {
    pub milestone_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_signatures)]
#[diesel(belongs_to(Document))]
pub struct DocumentSignature {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub document_id: Uuid,
    pub envelope_id: String,
    pub signer_email: String,
    pub signer_role: String,
    pub status: String,
    pub sent_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = document_signatures)]
pub struct NewDocumentSignature {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub document_id: Uuid,
    pub envelope_id: String,
    pub signer_email: String,
    pub signer_role: String,
    pub status: String,
    pub sent_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = comments)]
#[diesel(belongs_to(Deal))]
pub struct Comment {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub document_id: Option<Uuid>,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub document_id: Option<Uuid>,
    pub user_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = notifications)]
#[diesel(belongs_to(User))]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub deal_id: Option<Uuid>,
    pub kind: String,
    pub message: String,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub deal_id: Option<Uuid>,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_analyses)]
#[diesel(belongs_to(Document))]
pub struct DocumentAnalysis {
    pub id: Uuid,
    pub document_id: Uuid,
    pub analysis_type: String,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = document_analyses)]
pub struct NewDocumentAnalysis {
    pub id: Uuid,
    pub document_id: Uuid,
    pub analysis_type: String,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}
