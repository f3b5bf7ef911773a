mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{Part, TestApp};
use dealroom::domain::{DealRole, DealStatus};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    document: DocumentInfo,
    version: VersionInfo,
    created: bool,
}

#[derive(Debug, Deserialize)]
struct DocumentInfo {
    id: Uuid,
    name: String,
    storage_path: String,
    size_bytes: i64,
    mime_type: String,
    status: String,
    version: i32,
    latest_version_id: Uuid,
    category: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct VersionInfo {
    id: Uuid,
    document_id: Uuid,
    version_number: i32,
    storage_path: String,
    size_bytes: i64,
    checksum: String,
    uploaded_by: Uuid,
    uploaded_at: String,
    description: Option<String>,
}

#[tokio::test]
async fn new_document_then_new_version_keeps_history() -> Result<()> {
    let app = TestApp::new();
    let seller = app.create_user("seller@example.com", "Sam Seller").await;
    let deal = app
        .create_deal(DealStatus::Active, &[(&seller, DealRole::Seller)])
        .await;
    let token = app.token(&seller);

    let first = app
        .upload(deal.id, "file.txt", b"0123456789", None, None, &token)
        .await?;
    assert_eq!(first.status, StatusCode::CREATED);
    let first: UploadResponse = first.json()?;
    assert!(first.created);
    assert_eq!(first.document.name, "file.txt");
    assert_eq!(first.document.version, 1);
    assert_eq!(first.document.size_bytes, 10);
    assert_eq!(first.document.category, "general");
    assert_eq!(first.document.status, "draft");
    assert_eq!(first.document.mime_type, "text/plain");
    assert_eq!(first.version.version_number, 1);
    assert_eq!(first.document.latest_version_id, first.version.id);
    assert!(first
        .document
        .storage_path
        .starts_with(&format!("{}/{}-", deal.id, seller.id)));
    assert!(first.document.storage_path.ends_with(".txt"));

    let second = app
        .upload(
            deal.id,
            "file-revised.txt",
            b"0123456789abcdef",
            Some(first.document.id),
            None,
            &token,
        )
        .await?;
    assert_eq!(second.status, StatusCode::OK);
    let second: UploadResponse = second.json()?;
    assert!(!second.created);
    assert_eq!(second.document.id, first.document.id);
    assert_eq!(second.document.version, 2);
    assert_eq!(second.version.version_number, 2);
    assert_ne!(second.document.latest_version_id, first.version.id);
    assert_eq!(second.document.latest_version_id, second.version.id);
    assert_eq!(second.document.size_bytes, 16);
    assert!(second.version.storage_path.starts_with(&format!(
        "{}/{}/v2-{}-",
        deal.id, first.document.id, seller.id
    )));

    let versions = app
        .get(
            &format!("/api/documents/{}/versions", first.document.id),
            Some(&token),
        )
        .await?;
    assert_eq!(versions.status, StatusCode::OK);
    let versions: Vec<VersionInfo> = versions.json()?;
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].version_number, 2);
    assert_eq!(versions[1], first.version);

    assert!(app.storage.get(&first.version.storage_path).await.is_some());
    assert!(app.storage.get(&second.version.storage_path).await.is_some());
    Ok(())
}

#[tokio::test]
async fn sequential_versions_are_strictly_increasing() -> Result<()> {
    let app = TestApp::new();
    let seller = app.create_user("seller@example.com", "Sam Seller").await;
    let deal = app
        .create_deal(DealStatus::Active, &[(&seller, DealRole::Seller)])
        .await;
    let token = app.token(&seller);

    let created: UploadResponse = app
        .upload(deal.id, "spa.txt", b"draft one", None, None, &token)
        .await?
        .json()?;
    let mut numbers = vec![created.version.version_number];
    for body in [&b"draft two"[..], &b"draft three"[..]] {
        let response: UploadResponse = app
            .upload(deal.id, "spa.txt", body, Some(created.document.id), None, &token)
            .await?
            .json()?;
        assert_eq!(response.document.latest_version_id, response.version.id);
        numbers.push(response.version.version_number);
    }
    assert_eq!(numbers, vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn buyer_upload_is_rejected_before_storage() -> Result<()> {
    let app = TestApp::new();
    let seller = app.create_user("seller@example.com", "Sam Seller").await;
    let buyer = app.create_user("buyer@example.com", "Bea Buyer").await;
    let deal = app
        .create_deal(
            DealStatus::Active,
            &[(&seller, DealRole::Seller), (&buyer, DealRole::Buyer)],
        )
        .await;

    let response = app
        .upload(deal.id, "offer.txt", b"0123456789", None, None, &app.token(&buyer))
        .await?;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.error_kind().as_deref(), Some("permission_denied"));
    let body: serde_json::Value = response.json()?;
    assert!(body["error"]
        .as_str()
        .unwrap_or_default()
        .starts_with("Access Restricted"));

    assert_eq!(app.storage.put_count().await, 0);
    assert_eq!(app.store.document_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn outsiders_cannot_upload() -> Result<()> {
    let app = TestApp::new();
    let seller = app.create_user("seller@example.com", "Sam Seller").await;
    let outsider = app.create_user("outsider@example.com", "Otto").await;
    let deal = app
        .create_deal(DealStatus::Active, &[(&seller, DealRole::Seller)])
        .await;

    let response = app
        .upload(deal.id, "x.txt", b"data", None, None, &app.token(&outsider))
        .await?;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(app.storage.put_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn storage_failure_creates_no_records() -> Result<()> {
    let app = TestApp::new();
    let seller = app.create_user("seller@example.com", "Sam Seller").await;
    let deal = app
        .create_deal(DealStatus::Active, &[(&seller, DealRole::Seller)])
        .await;
    app.storage.set_failing(true).await;

    let response = app
        .upload(deal.id, "file.txt", b"0123456789", None, None, &app.token(&seller))
        .await?;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.error_kind().as_deref(), Some("upstream"));
    assert_eq!(app.store.document_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn failed_record_write_removes_the_stored_blob() -> Result<()> {
    let app = TestApp::new();
    let seller = app.create_user("seller@example.com", "Sam Seller").await;
    let deal = app
        .create_deal(DealStatus::Active, &[(&seller, DealRole::Seller)])
        .await;
    app.store.set_failing_document_writes(true).await;

    let response = app
        .upload(deal.id, "file.txt", b"0123456789", None, None, &app.token(&seller))
        .await?;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.storage.put_count().await, 1);
    assert_eq!(app.storage.deleted_keys().await.len(), 1);
    assert_eq!(app.storage.object_count().await, 0);
    assert_eq!(app.store.document_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn upload_requires_a_file_part() -> Result<()> {
    let app = TestApp::new();
    let seller = app.create_user("seller@example.com", "Sam Seller").await;
    let deal = app
        .create_deal(DealStatus::Active, &[(&seller, DealRole::Seller)])
        .await;

    let response = app
        .post_multipart(
            &format!("/api/deals/{}/documents", deal.id),
            &[Part::Text("category", "legal".to_string())],
            &app.token(&seller),
        )
        .await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_kind().as_deref(), Some("validation"));
    Ok(())
}

#[tokio::test]
async fn milestone_must_belong_to_the_deal() -> Result<()> {
    let app = TestApp::new();
    let seller = app.create_user("seller@example.com", "Sam Seller").await;
    let deal = app
        .create_deal(DealStatus::Active, &[(&seller, DealRole::Seller)])
        .await;
    let other = app
        .create_deal(DealStatus::Active, &[(&seller, DealRole::Seller)])
        .await;
    let foreign_milestone = app.create_milestone(other.id, "Signing").await;

    let response = app
        .upload(
            deal.id,
            "file.txt",
            b"0123456789",
            None,
            Some(foreign_milestone.id),
            &app.token(&seller),
        )
        .await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.storage.put_count().await, 0);
    Ok(())
}

/// Two version uploads that interleave between reading the latest version
/// number and writing the version row both pick the same number. The record
/// store's uniqueness rule lets exactly one of them win; the other is told to
/// retry and its blob is removed. This pins down the race rather than claiming
/// either upload order is the correct one.
#[tokio::test]
async fn concurrent_version_uploads_collide_on_the_version_number() -> Result<()> {
    let app = TestApp::new();
    let seller = app.create_user("seller@example.com", "Sam Seller").await;
    let lawyer = app.create_user("lawyer@example.com", "Lee Lawyer").await;
    let deal = app
        .create_deal(
            DealStatus::Active,
            &[(&seller, DealRole::Seller), (&lawyer, DealRole::Lawyer)],
        )
        .await;
    let seller_token = app.token(&seller);
    let lawyer_token = app.token(&lawyer);

    let created: UploadResponse = app
        .upload(deal.id, "spa.txt", b"original", None, None, &seller_token)
        .await?
        .json()?;
    let document_id = created.document.id;

    app.storage.hold_puts_until(2).await;
    let (left, right) = tokio::join!(
        app.upload(
            deal.id,
            "spa.txt",
            b"seller edit",
            Some(document_id),
            None,
            &seller_token
        ),
        app.upload(
            deal.id,
            "spa.txt",
            b"lawyer edit",
            Some(document_id),
            None,
            &lawyer_token
        ),
    );
    let (left, right) = (left?, right?);

    let mut statuses = vec![left.status, right.status];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let (winner, loser) = if left.status == StatusCode::OK {
        (left, right)
    } else {
        (right, left)
    };
    assert_eq!(loser.error_kind().as_deref(), Some("conflict_window"));
    let winner: UploadResponse = winner.json()?;
    assert_eq!(winner.version.version_number, 2);
    assert_eq!(winner.document.latest_version_id, winner.version.id);

    assert_eq!(app.store.version_count(document_id).await, 2);
    let removed = app.storage.deleted_keys().await;
    assert_eq!(removed.len(), 1);
    assert_ne!(removed[0], winner.version.storage_path);
    assert!(removed[0].contains(&format!("{document_id}/v2-")));
    assert_eq!(app.storage.object_count().await, 2);
    Ok(())
}
