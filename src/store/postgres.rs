use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use super::{
    AnalysisStore, CommentStore, DealStore, DocumentStore, MilestoneStore, NotificationStore,
    SignatureStore, UserStore,
};
use crate::db::PgPool;
use crate::domain::DealRole;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::models::{
    Comment, Deal, DealParticipant, Document, DocumentAnalysis, DocumentSignature,
    DocumentVersion, Milestone, MilestoneChanges, NewComment, NewDeal, NewDealParticipant,
    NewDocument, NewDocumentAnalysis, NewDocumentSignature, NewDocumentVersion, NewMilestone,
    NewMilestoneAssignment, NewNotification, NewRefreshToken, NewUser, NewVersionAnnotation,
    NewVersionTag, Notification, RefreshToken, User, VersionAnnotation, VersionTag,
};
use crate::schema::{
    comments, deal_participants, deals, document_analyses, document_signatures,
    document_versions, documents, milestone_assignments, milestones, notifications,
    refresh_tokens, users, version_annotations, version_tags,
};

const NOTIFICATION_PAGE_SIZE: i64 = 100;

/// Postgres-backed record store. Diesel is synchronous, so every call checks a
/// connection out of the pool on the blocking thread pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn with_conn<F, T>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| AppError::internal(format!("database pool error: {err}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| AppError::internal(format!("database task failed: {err}")))?
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user(&self, user_id: Uuid) -> AppResult<User> {
        self.with_conn(move |conn| Ok(users::table.find(user_id).first(conn)?))
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            Ok(users::table
                .filter(users::email.eq(&email))
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn insert_user(&self, user: NewUser) -> AppResult<User> {
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(users::table)
                .values(&user)
                .get_result(conn)?)
        })
        .await
    }

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> AppResult<()> {
        self.with_conn(move |conn| {
            diesel::insert_into(refresh_tokens::table)
                .values(&token)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: NaiveDateTime,
    ) -> AppResult<Option<RefreshToken>> {
        let token_hash = token_hash.to_string();
        self.with_conn(move |conn| {
            conn.transaction::<Option<RefreshToken>, AppError, _>(|conn| {
                let token: Option<RefreshToken> = refresh_tokens::table
                    .filter(refresh_tokens::token_hash.eq(&token_hash))
                    .filter(refresh_tokens::revoked_at.is_null())
                    .filter(refresh_tokens::expires_at.gt(now))
                    .for_update()
                    .first(conn)
                    .optional()?;

                let Some(token) = token else {
                    return Ok(None);
                };

                diesel::update(refresh_tokens::table.find(token.id))
                    .set((
                        refresh_tokens::revoked_at.eq(Some(now)),
                        refresh_tokens::updated_at.eq(now),
                    ))
                    .execute(conn)?;

                Ok(Some(token))
            })
        })
        .await
    }

    async fn revoke_refresh_tokens(
        &self,
        user_id: Uuid,
        token_hash: Option<&str>,
        now: NaiveDateTime,
    ) -> AppResult<usize> {
        let token_hash = token_hash.map(str::to_string);
        self.with_conn(move |conn| {
            let changes = (
                refresh_tokens::revoked_at.eq(Some(now)),
                refresh_tokens::updated_at.eq(now),
            );
            let active = refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user_id))
                .filter(refresh_tokens::revoked_at.is_null());

            let revoked = match token_hash {
                Some(hash) => diesel::update(active.filter(refresh_tokens::token_hash.eq(hash)))
                    .set(changes)
                    .execute(conn)?,
                None => diesel::update(active).set(changes).execute(conn)?,
            };
            Ok(revoked)
        })
        .await
    }
}

#[async_trait]
impl DealStore for PgStore {
    async fn insert_deal(
        &self,
        deal: NewDeal,
        participants: Vec<NewDealParticipant>,
    ) -> AppResult<Deal> {
        self.with_conn(move |conn| {
            conn.transaction::<Deal, AppError, _>(|conn| {
                let deal: Deal = diesel::insert_into(deals::table)
                    .values(&deal)
                    .get_result(conn)?;
                diesel::insert_into(deal_participants::table)
                    .values(&participants)
                    .execute(conn)?;
                Ok(deal)
            })
        })
        .await
    }

    async fn find_deal(&self, deal_id: Uuid) -> AppResult<Deal> {
        self.with_conn(move |conn| Ok(deals::table.find(deal_id).first(conn)?))
            .await
    }

    async fn list_deals_for_user(&self, user_id: Uuid) -> AppResult<Vec<(Deal, String)>> {
        self.with_conn(move |conn| {
            Ok(deals::table
                .inner_join(deal_participants::table)
                .filter(deal_participants::user_id.eq(user_id))
                .order(deals::created_at.desc())
                .select((deals::all_columns, deal_participants::role))
                .load(conn)?)
        })
        .await
    }

    async fn participant_role(&self, deal_id: Uuid, user_id: Uuid) -> AppResult<Option<String>> {
        self.with_conn(move |conn| {
            Ok(deal_participants::table
                .filter(deal_participants::deal_id.eq(deal_id))
                .filter(deal_participants::user_id.eq(user_id))
                .select(deal_participants::role)
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn list_participants(&self, deal_id: Uuid) -> AppResult<Vec<(DealParticipant, User)>> {
        self.with_conn(move |conn| {
            Ok(deal_participants::table
                .inner_join(users::table)
                .filter(deal_participants::deal_id.eq(deal_id))
                .order(deal_participants::joined_at.asc())
                .select((deal_participants::all_columns, users::all_columns))
                .load(conn)?)
        })
        .await
    }

    async fn insert_participant(
        &self,
        participant: NewDealParticipant,
        now: NaiveDateTime,
    ) -> AppResult<DealParticipant> {
        self.with_conn(move |conn| {
            conn.transaction::<DealParticipant, AppError, _>(|conn| {
                let inserted: DealParticipant = diesel::insert_into(deal_participants::table)
                    .values(&participant)
                    .get_result(conn)?;
                if inserted.role == DealRole::Buyer.as_str() {
                    diesel::update(
                        deals::table
                            .find(inserted.deal_id)
                            .filter(deals::buyer_id.is_null()),
                    )
                    .set((
                        deals::buyer_id.eq(Some(inserted.user_id)),
                        deals::updated_at.eq(now),
                    ))
                    .execute(conn)?;
                }
                Ok(inserted)
            })
        })
        .await
    }

    async fn update_deal_status(
        &self,
        deal_id: Uuid,
        status: &str,
        now: NaiveDateTime,
    ) -> AppResult<Deal> {
        let status = status.to_string();
        self.with_conn(move |conn| {
            Ok(diesel::update(deals::table.find(deal_id))
                .set((deals::status.eq(&status), deals::updated_at.eq(now)))
                .get_result(conn)?)
        })
        .await
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn list_documents(&self, deal_id: Uuid) -> AppResult<Vec<Document>> {
        self.with_conn(move |conn| {
            Ok(documents::table
                .filter(documents::deal_id.eq(deal_id))
                .order(documents::created_at.desc())
                .load(conn)?)
        })
        .await
    }

    async fn find_document(&self, document_id: Uuid) -> AppResult<Document> {
        self.with_conn(move |conn| Ok(documents::table.find(document_id).first(conn)?))
            .await
    }

    async fn create_document(
        &self,
        document: NewDocument,
        version: NewDocumentVersion,
    ) -> AppResult<(Document, DocumentVersion)> {
        self.with_conn(move |conn| {
            conn.transaction::<(Document, DocumentVersion), AppError, _>(|conn| {
                let document: Document = diesel::insert_into(documents::table)
                    .values(&document)
                    .get_result(conn)?;
                let version: DocumentVersion = diesel::insert_into(document_versions::table)
                    .values(&version)
                    .get_result(conn)?;
                Ok((document, version))
            })
        })
        .await
    }

    async fn latest_version_number(&self, document_id: Uuid) -> AppResult<i32> {
        self.with_conn(move |conn| {
            let latest: Option<i32> = document_versions::table
                .filter(document_versions::document_id.eq(document_id))
                .select(max(document_versions::version_number))
                .first(conn)?;
            Ok(latest.unwrap_or(0))
        })
        .await
    }

    async fn append_version(
        &self,
        version: NewDocumentVersion,
        now: NaiveDateTime,
    ) -> AppResult<(Document, DocumentVersion)> {
        self.with_conn(move |conn| {
            conn.transaction::<(Document, DocumentVersion), AppError, _>(|conn| {
                let version: DocumentVersion = diesel::insert_into(document_versions::table)
                    .values(&version)
                    .get_result(conn)
                    .map_err(version_conflict)?;

                // Only move the pointer forward; a slower writer must not
                // regress it.
                diesel::update(
                    documents::table
                        .find(version.document_id)
                        .filter(documents::version.lt(version.version_number)),
                )
                .set((
                    documents::version.eq(version.version_number),
                    documents::latest_version_id.eq(version.id),
                    documents::storage_path.eq(&version.storage_path),
                    documents::size_bytes.eq(version.size_bytes),
                    documents::mime_type.eq(&version.mime_type),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?;

                let document: Document = documents::table.find(version.document_id).first(conn)?;
                Ok((document, version))
            })
        })
        .await
    }

    async fn list_versions(&self, document_id: Uuid) -> AppResult<Vec<DocumentVersion>> {
        self.with_conn(move |conn| {
            Ok(document_versions::table
                .filter(document_versions::document_id.eq(document_id))
                .order(document_versions::version_number.desc())
                .load(conn)?)
        })
        .await
    }

    async fn find_version(&self, version_id: Uuid) -> AppResult<DocumentVersion> {
        self.with_conn(move |conn| Ok(document_versions::table.find(version_id).first(conn)?))
            .await
    }

    async fn update_document_status(
        &self,
        document_id: Uuid,
        status: &str,
        now: NaiveDateTime,
    ) -> AppResult<Document> {
        let status = status.to_string();
        self.with_conn(move |conn| {
            Ok(diesel::update(documents::table.find(document_id))
                .set((documents::status.eq(&status), documents::updated_at.eq(now)))
                .get_result(conn)?)
        })
        .await
    }

    async fn update_document_milestone(
        &self,
        document_id: Uuid,
        milestone_id: Option<Uuid>,
        now: NaiveDateTime,
    ) -> AppResult<Document> {
        self.with_conn(move |conn| {
            Ok(diesel::update(documents::table.find(document_id))
                .set((
                    documents::milestone_id.eq(milestone_id),
                    documents::updated_at.eq(now),
                ))
                .get_result(conn)?)
        })
        .await
    }

    async fn delete_document(&self, document_id: Uuid) -> AppResult<Vec<String>> {
        self.with_conn(move |conn| {
            conn.transaction::<Vec<String>, AppError, _>(|conn| {
                let document: Document = documents::table.find(document_id).first(conn)?;
                let mut keys: Vec<String> = document_versions::table
                    .filter(document_versions::document_id.eq(document_id))
                    .select(document_versions::storage_path)
                    .load(conn)?;
                if !keys.contains(&document.storage_path) {
                    keys.push(document.storage_path);
                }

                // Versions, tags, annotations, signatures, comments and
                // analyses cascade from the document row.
                diesel::delete(documents::table.find(document_id)).execute(conn)?;
                Ok(keys)
            })
        })
        .await
    }

    async fn documents_for_milestone(&self, milestone_id: Uuid) -> AppResult<Vec<Document>> {
        self.with_conn(move |conn| {
            Ok(documents::table
                .filter(documents::milestone_id.eq(Some(milestone_id)))
                .order(documents::created_at.asc())
                .load(conn)?)
        })
        .await
    }

    async fn list_version_tags(&self, version_ids: &[Uuid]) -> AppResult<Vec<VersionTag>> {
        let version_ids = version_ids.to_vec();
        self.with_conn(move |conn| {
            Ok(version_tags::table
                .filter(version_tags::version_id.eq_any(version_ids))
                .order(version_tags::created_at.asc())
                .load(conn)?)
        })
        .await
    }

    async fn insert_version_tag(&self, tag: NewVersionTag) -> AppResult<VersionTag> {
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(version_tags::table)
                .values(&tag)
                .get_result(conn)?)
        })
        .await
    }

    async fn delete_version_tag(&self, version_id: Uuid, tag_id: Uuid) -> AppResult<usize> {
        self.with_conn(move |conn| {
            Ok(diesel::delete(
                version_tags::table
                    .filter(version_tags::id.eq(tag_id))
                    .filter(version_tags::version_id.eq(version_id)),
            )
            .execute(conn)?)
        })
        .await
    }

    async fn list_version_annotations(
        &self,
        version_ids: &[Uuid],
    ) -> AppResult<Vec<VersionAnnotation>> {
        let version_ids = version_ids.to_vec();
        self.with_conn(move |conn| {
            Ok(version_annotations::table
                .filter(version_annotations::version_id.eq_any(version_ids))
                .order(version_annotations::created_at.asc())
                .load(conn)?)
        })
        .await
    }

    async fn insert_version_annotation(
        &self,
        annotation: NewVersionAnnotation,
    ) -> AppResult<VersionAnnotation> {
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(version_annotations::table)
                .values(&annotation)
                .get_result(conn)?)
        })
        .await
    }
}

#[async_trait]
impl MilestoneStore for PgStore {
    async fn list_milestones(&self, deal_id: Uuid) -> AppResult<Vec<Milestone>> {
        self.with_conn(move |conn| {
            Ok(milestones::table
                .filter(milestones::deal_id.eq(deal_id))
                .order((milestones::order_index.asc(), milestones::created_at.asc()))
                .load(conn)?)
        })
        .await
    }

    async fn find_milestone(&self, milestone_id: Uuid) -> AppResult<Milestone> {
        self.with_conn(move |conn| Ok(milestones::table.find(milestone_id).first(conn)?))
            .await
    }

    async fn next_milestone_index(&self, deal_id: Uuid) -> AppResult<i32> {
        self.with_conn(move |conn| {
            let highest: Option<i32> = milestones::table
                .filter(milestones::deal_id.eq(deal_id))
                .select(max(milestones::order_index))
                .first(conn)?;
            Ok(highest.map(|index| index + 1).unwrap_or(0))
        })
        .await
    }

    async fn insert_milestone(&self, milestone: NewMilestone) -> AppResult<Milestone> {
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(milestones::table)
                .values(&milestone)
                .get_result(conn)?)
        })
        .await
    }

    async fn update_milestone(
        &self,
        milestone_id: Uuid,
        changes: MilestoneChanges,
    ) -> AppResult<Milestone> {
        self.with_conn(move |conn| {
            Ok(diesel::update(milestones::table.find(milestone_id))
                .set(&changes)
                .get_result(conn)?)
        })
        .await
    }

    async fn assigned_users(&self, milestone_id: Uuid) -> AppResult<Vec<User>> {
        self.with_conn(move |conn| {
            Ok(milestone_assignments::table
                .inner_join(users::table)
                .filter(milestone_assignments::milestone_id.eq(milestone_id))
                .order(milestone_assignments::assigned_at.asc())
                .select(users::all_columns)
                .load(conn)?)
        })
        .await
    }

    async fn assign_user(&self, assignment: NewMilestoneAssignment) -> AppResult<()> {
        self.with_conn(move |conn| {
            diesel::insert_into(milestone_assignments::table)
                .values(&assignment)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl SignatureStore for PgStore {
    async fn signatures_for_documents(
        &self,
        deal_id: Uuid,
        document_ids: &[Uuid],
    ) -> AppResult<Vec<DocumentSignature>> {
        let document_ids = document_ids.to_vec();
        self.with_conn(move |conn| {
            Ok(document_signatures::table
                .filter(document_signatures::deal_id.eq(deal_id))
                .filter(document_signatures::document_id.eq_any(document_ids))
                .order(document_signatures::created_at.asc())
                .load(conn)?)
        })
        .await
    }

    async fn upsert_signature(
        &self,
        signature: NewDocumentSignature,
        now: NaiveDateTime,
    ) -> AppResult<DocumentSignature> {
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(document_signatures::table)
                .values(&signature)
                .on_conflict((
                    document_signatures::envelope_id,
                    document_signatures::signer_email,
                ))
                .do_update()
                .set((
                    document_signatures::status.eq(&signature.status),
                    document_signatures::signer_role.eq(&signature.signer_role),
                    document_signatures::completed_at.eq(signature.completed_at),
                    document_signatures::updated_at.eq(now),
                ))
                .get_result(conn)?)
        })
        .await
    }
}

#[async_trait]
impl CommentStore for PgStore {
    async fn list_comments(
        &self,
        deal_id: Uuid,
        document_id: Option<Uuid>,
    ) -> AppResult<Vec<Comment>> {
        self.with_conn(move |conn| {
            let mut query = comments::table
                .filter(comments::deal_id.eq(deal_id))
                .order(comments::created_at.asc())
                .into_boxed();
            if let Some(document_id) = document_id {
                query = query.filter(comments::document_id.eq(Some(document_id)));
            }
            Ok(query.load(conn)?)
        })
        .await
    }

    async fn find_comment(&self, comment_id: Uuid) -> AppResult<Comment> {
        self.with_conn(move |conn| Ok(comments::table.find(comment_id).first(conn)?))
            .await
    }

    async fn insert_comment(&self, comment: NewComment) -> AppResult<Comment> {
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(comments::table)
                .values(&comment)
                .get_result(conn)?)
        })
        .await
    }

    async fn delete_comment(&self, comment_id: Uuid) -> AppResult<usize> {
        self.with_conn(move |conn| {
            Ok(diesel::delete(comments::table.find(comment_id)).execute(conn)?)
        })
        .await
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert_notifications(&self, notifications: Vec<NewNotification>) -> AppResult<usize> {
        if notifications.is_empty() {
            return Ok(0);
        }
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(notifications::table)
                .values(&notifications)
                .execute(conn)?)
        })
        .await
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> AppResult<Vec<Notification>> {
        self.with_conn(move |conn| {
            let mut query = notifications::table
                .filter(notifications::user_id.eq(user_id))
                .into_boxed();
            if unread_only {
                query = query.filter(notifications::read_at.is_null());
            }
            Ok(query
                .order(notifications::created_at.desc())
                .limit(NOTIFICATION_PAGE_SIZE)
                .load(conn)?)
        })
        .await
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        now: NaiveDateTime,
    ) -> AppResult<usize> {
        self.with_conn(move |conn| {
            Ok(diesel::update(
                notifications::table
                    .filter(notifications::id.eq(notification_id))
                    .filter(notifications::user_id.eq(user_id))
                    .filter(notifications::read_at.is_null()),
            )
            .set(notifications::read_at.eq(Some(now)))
            .execute(conn)?)
        })
        .await
    }
}

#[async_trait]
impl AnalysisStore for PgStore {
    async fn list_analyses(&self, document_id: Uuid) -> AppResult<Vec<DocumentAnalysis>> {
        self.with_conn(move |conn| {
            Ok(document_analyses::table
                .filter(document_analyses::document_id.eq(document_id))
                .order(document_analyses::analysis_type.asc())
                .load(conn)?)
        })
        .await
    }

    async fn save_analysis(
        &self,
        analysis: NewDocumentAnalysis,
        now: NaiveDateTime,
    ) -> AppResult<DocumentAnalysis> {
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(document_analyses::table)
                .values(&analysis)
                .on_conflict((
                    document_analyses::document_id,
                    document_analyses::analysis_type,
                ))
                .do_update()
                .set((
                    document_analyses::status.eq(&analysis.status),
                    document_analyses::result.eq(&analysis.result),
                    document_analyses::error.eq(&analysis.error),
                    document_analyses::updated_at.eq(now),
                ))
                .get_result(conn)?)
        })
        .await
    }
}

/// A duplicate `(document_id, version_number)` means another upload claimed the
/// number between read and insert.
fn version_conflict(err: diesel::result::Error) -> AppError {
    match err {
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ) => AppError::new(
            ErrorKind::ConflictWindow,
            "another version was uploaded concurrently; retry the upload",
        ),
        other => AppError::from(other),
    }
}
