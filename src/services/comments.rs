use tracing::info;
use uuid::Uuid;

use super::notifications::{self, KIND_COMMENT};
use crate::auth::Session;
use crate::error::{AppError, AppResult};
use crate::models::{Comment, NewComment};
use crate::permissions::{can_delete_comment, ensure, require_participant, resolve_capabilities};
use crate::realtime::{ChangeEvent, ChangeKind, ChangeTable};
use crate::state::AppState;
use crate::store::{CommentStore, DocumentStore};

const MAX_COMMENT_LEN: usize = 10_000;

pub async fn list(
    state: &AppState,
    session: &Session,
    deal_id: Uuid,
    document_id: Option<Uuid>,
) -> AppResult<Vec<Comment>> {
    require_participant(state.store(), deal_id, session).await?;
    state.store().list_comments(deal_id, document_id).await
}

pub async fn create(
    state: &AppState,
    session: &Session,
    deal_id: Uuid,
    document_id: Option<Uuid>,
    content: &str,
) -> AppResult<Comment> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::bad_request("comment must not be empty"));
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::bad_request(format!(
            "comment must be at most {MAX_COMMENT_LEN} characters"
        )));
    }

    let role = require_participant(state.store(), deal_id, session).await?;
    ensure(
        resolve_capabilities(role).can_comment,
        format!("the {role} role cannot comment"),
    )?;

    if let Some(document_id) = document_id {
        let document = state.store().find_document(document_id).await?;
        if document.deal_id != deal_id {
            return Err(AppError::bad_request("document does not belong to this deal"));
        }
    }

    let comment = state
        .store()
        .insert_comment(NewComment {
            id: Uuid::new_v4(),
            deal_id,
            document_id,
            user_id: session.user_id,
            content: content.to_string(),
        })
        .await?;

    state.changes.publish(ChangeEvent::new(
        ChangeTable::Comments,
        ChangeKind::Insert,
        deal_id,
        comment.id,
    ));
    notifications::notify_participants(
        state,
        deal_id,
        session,
        KIND_COMMENT,
        format!("{} commented on the deal", session.label()),
    )
    .await;

    Ok(comment)
}

/// Hard delete by the author or a deal admin or lawyer, after explicit
/// confirmation.
pub async fn delete(
    state: &AppState,
    session: &Session,
    comment_id: Uuid,
    confirmed: bool,
) -> AppResult<()> {
    if !confirmed {
        return Err(AppError::bad_request(
            "deleting a comment requires confirmation",
        ));
    }

    let comment = state.store().find_comment(comment_id).await?;
    let role = require_participant(state.store(), comment.deal_id, session).await?;
    ensure(
        can_delete_comment(&comment, session.user_id, role),
        "only the author, a deal admin or a lawyer can delete this comment",
    )?;

    state.store().delete_comment(comment.id).await?;
    info!(comment_id = %comment.id, user_id = %session.user_id, "comment deleted");
    state.changes.publish(ChangeEvent::new(
        ChangeTable::Comments,
        ChangeKind::Delete,
        comment.deal_id,
        comment.id,
    ));
    Ok(())
}
