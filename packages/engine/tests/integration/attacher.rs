use common::storage::StorageName;
use common::{DerivativeSelection, DirectiveValue, Directives, JobOperation};

use engine::{Disposal, DerivativeRun, EngineError, JobReport, NewFile, PromotionOutcome};
use uuid::Uuid;

use crate::harness::TestEngine;

/// Stored asset with its default derivatives, everything run inline.
async fn promoted(app: &TestEngine, data: &[u8]) -> engine::entity::asset::Model {
    let directives = Directives::new()
        .with("promote", DirectiveValue::Inline)
        .unwrap()
        .with("create_derivatives", DirectiveValue::Inline)
        .unwrap();
    let attachment = app
        .engine
        .attacher()
        .attach(NewFile::new("notes.txt", data), &directives)
        .await
        .unwrap();
    match attachment.promotion {
        PromotionOutcome::Stored(asset) => asset,
        other => panic!("expected stored, got {other:?}"),
    }
}

#[tokio::test]
async fn attach_records_file_metadata() {
    let app = TestEngine::spawn().await;
    let asset = app.attach_pending("Report.PDF", b"%PDF-1.7").await;

    assert_eq!(asset.filename, "Report.PDF");
    assert_eq!(asset.content_type.as_deref(), Some("application/pdf"));
    assert_eq!(asset.size, 8);
    assert_eq!(asset.storage, StorageName::Cache.as_str());
    assert!(asset.location.starts_with(&asset.id.to_string()));
    assert!(asset.location.ends_with(".pdf"));
    assert!(!asset.stored);
    assert_eq!(app.cache_blobs().len(), 1);
}

#[tokio::test]
async fn replace_with_inline_delete_clears_old_files() {
    let app = TestEngine::spawn().await;
    let asset = promoted(&app, b"first draft").await;
    assert_eq!(app.derivatives(asset.id).await.len(), 1);
    assert_eq!(app.store_blobs().len(), 2);

    let directives = Directives::new()
        .with("delete", DirectiveValue::Inline)
        .unwrap()
        .with("promote", false)
        .unwrap();
    let replaced = app
        .engine
        .attacher()
        .replace(asset.id, NewFile::new("notes.txt", "second draft"), &directives)
        .await
        .unwrap();

    assert_eq!(replaced.asset.id, asset.id);
    assert!(!replaced.asset.stored);
    assert_ne!(replaced.asset.fingerprint, asset.fingerprint);
    assert!(matches!(replaced.promotion, PromotionOutcome::Pending));
    assert!(app.derivatives(asset.id).await.is_empty());
    assert!(app.store_blobs().is_empty());
    assert_eq!(app.cache_blobs().len(), 1);
}

#[tokio::test]
async fn replace_with_background_delete_enqueues_cleanup() {
    let app = TestEngine::spawn().await;
    let asset = promoted(&app, b"first draft").await;

    let directives = Directives::new().with("promote", false).unwrap();
    app.engine
        .attacher()
        .replace(asset.id, NewFile::new("notes.txt", "second draft"), &directives)
        .await
        .unwrap();

    let pending = app.queue.pending();
    assert_eq!(pending.len(), 1);
    let JobOperation::DeleteFiles { files } = &pending[0].operation else {
        panic!("expected delete job, got {:?}", pending[0].operation);
    };
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.storage == StorageName::Store));
    assert_eq!(app.store_blobs().len(), 2, "nothing deleted until the job runs");

    let reports = app.drain_jobs().await;
    assert!(matches!(reports[..], [JobReport::FilesDeleted(2)]));
    assert!(app.store_blobs().is_empty());
}

#[tokio::test]
async fn replace_without_delete_retains_files() {
    let app = TestEngine::spawn().await;
    let asset = promoted(&app, b"first draft").await;

    let directives = Directives::new()
        .with("delete", false)
        .unwrap()
        .with("promote", false)
        .unwrap();
    app.engine
        .attacher()
        .replace(asset.id, NewFile::new("notes.txt", "second draft"), &directives)
        .await
        .unwrap();

    assert!(app.queue.published().is_empty());
    assert_eq!(app.store_blobs().len(), 2);
    assert!(app.derivatives(asset.id).await.is_empty());
}

#[tokio::test]
async fn replace_missing_asset_leaves_no_blob() {
    let app = TestEngine::spawn().await;
    let err = app
        .engine
        .attacher()
        .replace(Uuid::now_v7(), NewFile::new("a.txt", "x"), &Directives::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::AssetNotFound(_)));
    assert!(app.cache_blobs().is_empty());
}

#[tokio::test]
async fn destroy_removes_rows_and_files() {
    let app = TestEngine::spawn().await;
    let asset = promoted(&app, b"doomed").await;

    let directives = Directives::new()
        .with("delete", DirectiveValue::Inline)
        .unwrap();
    let disposal = app
        .engine
        .attacher()
        .destroy(asset.id, &directives)
        .await
        .unwrap();

    let Disposal::Deleted(files) = disposal else {
        panic!("expected inline deletion");
    };
    assert_eq!(files.len(), 2);
    assert!(app.reload(asset.id).await.is_none());
    assert!(app.derivatives(asset.id).await.is_empty());
    assert!(app.store_blobs().is_empty());
}

#[tokio::test]
async fn destroy_missing_asset_is_not_found() {
    let app = TestEngine::spawn().await;
    let id = Uuid::now_v7();
    let err = app
        .engine
        .attacher()
        .destroy(id, &Directives::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::AssetNotFound(missing) if missing == id));
    assert!(app.queue.published().is_empty());
}

#[tokio::test]
async fn create_derivatives_for_existing_asset() {
    let app = TestEngine::spawn().await;
    let asset = promoted(&app, b"plain words").await;

    let directives = Directives::new()
        .with("create_derivatives", DirectiveValue::Inline)
        .unwrap();
    let run = app
        .engine
        .attacher()
        .create_derivatives(asset.id, &DerivativeSelection::only(["gzip"]), &directives)
        .await
        .unwrap();

    let DerivativeRun::Completed(report) = run else {
        panic!("expected an inline run");
    };
    assert_eq!(report.attached_keys(), ["gzip"]);
    let keys: Vec<_> = app
        .derivatives(asset.id)
        .await
        .into_iter()
        .map(|d| d.key)
        .collect();
    assert_eq!(keys, ["excerpt", "gzip"]);
}
