use std::sync::atomic::Ordering;

use chrono::Utc;
use common::storage::{Fingerprint, StorageError};
use common::{DerivativeSelection, DirectiveValue, Directives};
use sea_orm::{ActiveModelTrait, DbErr, Set, SqlErr};
use uuid::Uuid;

use engine::entity::derivative;
use engine::{
    AbortReason, AttachOutcome, DerivativeRun, EngineError, GeneratorRegistry, NewDerivative,
    NewFile,
};

use crate::harness::TestEngine;
use crate::harness::generators::{Failing, Fixed, Toggle};

fn thumb(data: &str) -> NewDerivative {
    NewDerivative {
        key: "thumb".into(),
        data: data.as_bytes().to_vec(),
        extension: Some("png".into()),
        metadata: Default::default(),
    }
}

fn abc_registry() -> GeneratorRegistry {
    GeneratorRegistry::new()
        .with(Fixed::new("a"))
        .with(Fixed::new("b"))
        .with(Fixed::non_default("c"))
}

mod store {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attaches_converge_to_one_row() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("photo.png", b"pixels").await;
        let asset_id = asset.id;
        let expected = asset.parsed_fingerprint().unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = app.engine.derivative_store();
            handles.push(tokio::spawn(async move {
                store
                    .attach(asset_id, &expected, thumb(&format!("thumb {i}")))
                    .await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap().expect("attach failed");
            assert!(outcome.is_attached());
        }

        let rows = app.derivatives(asset.id).await;
        assert_eq!(rows.len(), 1);

        let blobs = app.derivative_blobs(asset.id, "thumb");
        assert_eq!(blobs.len(), 1, "loser blobs must be deleted: {blobs:?}");
        assert!(blobs[0].ends_with(&rows[0].location));
    }

    #[tokio::test]
    async fn attach_aborts_when_source_replaced_first() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("notes.txt", b"first draft").await;
        let stale = asset.parsed_fingerprint().unwrap();

        let directives = Directives::new()
            .with("promote", false)
            .unwrap()
            .with("delete", false)
            .unwrap();
        app.engine
            .attacher()
            .replace(asset.id, NewFile::new("notes.txt", "second draft"), &directives)
            .await
            .unwrap();

        let outcome = app
            .engine
            .derivative_store()
            .attach(asset.id, &stale, thumb("from the first draft"))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            AttachOutcome::Aborted(AbortReason::SourceChanged)
        ));
        assert!(app.derivatives(asset.id).await.is_empty());
        assert!(app.derivative_blobs(asset.id, "thumb").is_empty());
    }

    #[tokio::test]
    async fn attach_aborts_for_destroyed_asset() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("notes.txt", b"short lived").await;
        let expected = asset.parsed_fingerprint().unwrap();

        let directives = Directives::new()
            .with("delete", DirectiveValue::Inline)
            .unwrap();
        app.engine
            .attacher()
            .destroy(asset.id, &directives)
            .await
            .unwrap();

        let outcome = app
            .engine
            .derivative_store()
            .attach(asset.id, &expected, thumb("orphan"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AttachOutcome::Aborted(AbortReason::AssetMissing)
        ));
        assert!(app.derivative_blobs(asset.id, "thumb").is_empty());
    }

    #[tokio::test]
    async fn reattach_replaces_blob_of_existing_row() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("photo.png", b"pixels").await;
        let expected = asset.parsed_fingerprint().unwrap();
        let store = app.engine.derivative_store();

        let AttachOutcome::Attached(first) =
            store.attach(asset.id, &expected, thumb("v1")).await.unwrap()
        else {
            panic!("first attach aborted");
        };
        let AttachOutcome::Attached(second) =
            store.attach(asset.id, &expected, thumb("v2")).await.unwrap()
        else {
            panic!("second attach aborted");
        };

        assert_eq!(first.id, second.id);
        assert_ne!(first.location, second.location);
        assert_eq!(second.size, 2);

        let blobs = app.derivative_blobs(asset.id, "thumb");
        assert_eq!(blobs.len(), 1);
        assert_eq!(std::fs::read(&blobs[0]).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn unique_index_rejects_duplicate_rows() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("photo.png", b"pixels").await;

        let row = |location: &str| {
            let now = Utc::now();
            derivative::ActiveModel {
                id: Set(Uuid::now_v7()),
                asset_id: Set(asset.id),
                key: Set("thumb".into()),
                location: Set(location.into()),
                size: Set(1),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
        };

        row("a/one").insert(&app.engine.db).await.unwrap();
        let err: DbErr = row("a/two").insert(&app.engine.db).await.unwrap_err();
        assert!(matches!(
            err.sql_err(),
            Some(SqlErr::UniqueConstraintViolation(_))
        ));
    }
}

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn generation_twice_updates_rows_in_place() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("notes.txt", b"idempotent text").await;
        let selection = DerivativeSelection::only(["excerpt", "gzip"]);

        let first = app.engine.derivatives().run(asset.id, &selection).await.unwrap();
        let second = app.engine.derivatives().run(asset.id, &selection).await.unwrap();

        assert_eq!(first.attached_keys(), ["excerpt", "gzip"]);
        assert_eq!(second.attached_keys(), ["excerpt", "gzip"]);
        for (a, b) in first.attached.iter().zip(&second.attached) {
            assert_eq!(a.id, b.id);
            assert!(b.updated_at >= a.updated_at);
        }

        let rows = app.derivatives(asset.id).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(app.derivative_blobs(asset.id, "excerpt").len(), 1);
        assert_eq!(app.derivative_blobs(asset.id, "gzip").len(), 1);
    }

    #[tokio::test]
    async fn only_and_except_select_generators() {
        let app = TestEngine::spawn_with(|engine| engine.with_generators(abc_registry())).await;
        let pipeline = app.engine.derivatives();

        let asset = app.attach_pending("data.bin", b"payload").await;
        let only = pipeline
            .run(asset.id, &DerivativeSelection::only(["a", "b"]))
            .await
            .unwrap();
        assert_eq!(only.attached_keys(), ["a", "b"]);

        let reversed = pipeline
            .run(asset.id, &DerivativeSelection::only(["c", "a"]))
            .await
            .unwrap();
        assert_eq!(reversed.attached_keys(), ["c", "a"]);

        let other = app.attach_pending("other.bin", b"payload").await;
        let except = pipeline
            .run(other.id, &DerivativeSelection::except(["c"]))
            .await
            .unwrap();
        assert_eq!(except.attached_keys(), ["a", "b"]);

        let keys: Vec<_> = app
            .derivatives(other.id)
            .await
            .into_iter()
            .map(|d| d.key)
            .collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[tokio::test]
    async fn unknown_key_fails_before_enqueue() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("notes.txt", b"text").await;

        let err = app
            .engine
            .attacher()
            .create_derivatives(
                asset.id,
                &DerivativeSelection::only(["thumbnail"]),
                &Directives::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::UnknownDerivative(ref key) if key == "thumbnail"));
        assert!(err.is_configuration());
        assert!(app.queue.pending().is_empty());
    }

    #[tokio::test]
    async fn content_type_conditions_skip_generators() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("photo.png", b"not really a png").await;

        let report = app
            .engine
            .derivatives()
            .run(asset.id, &DerivativeSelection::Default)
            .await
            .unwrap();

        assert!(report.attached.is_empty());
        assert_eq!(report.skipped, ["excerpt"]);
        assert!(report.aborted.is_none());
    }

    #[tokio::test]
    async fn failing_generator_leaves_nothing_behind() {
        let app = TestEngine::spawn_with(|engine| {
            engine.with_generators(GeneratorRegistry::new().with(Failing))
        })
        .await;
        let asset = app.attach_pending("notes.txt", b"text").await;

        let err = app
            .engine
            .derivatives()
            .run(asset.id, &DerivativeSelection::only(["broken"]))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Generation { ref key, .. } if key == "broken"));
        assert!(!err.is_configuration());
        assert!(app.derivatives(asset.id).await.is_empty());
        assert!(app.derivative_blobs(asset.id, "broken").is_empty());
    }

    #[tokio::test]
    async fn skipped_generation_keeps_existing_derivative() {
        let toggle = Toggle::default();
        let registered = toggle.clone();
        let app = TestEngine::spawn_with(move |engine| {
            engine.with_generators(GeneratorRegistry::new().with(registered))
        })
        .await;
        let asset = app.attach_pending("notes.txt", b"keep me").await;

        let first = app
            .engine
            .derivatives()
            .run(asset.id, &DerivativeSelection::Default)
            .await
            .unwrap();
        assert_eq!(first.attached_keys(), ["toggle"]);

        toggle.skip.store(true, Ordering::SeqCst);
        let second = app
            .engine
            .derivatives()
            .run(asset.id, &DerivativeSelection::Default)
            .await
            .unwrap();
        assert!(second.attached.is_empty());
        assert_eq!(second.skipped, ["toggle"]);

        let rows = app.derivatives(asset.id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location, first.attached[0].location);
        assert_eq!(app.derivative_blobs(asset.id, "toggle").len(), 1);
    }

    #[tokio::test]
    async fn run_for_missing_asset_aborts() {
        let app = TestEngine::spawn().await;
        let report = app
            .engine
            .derivatives()
            .run(Uuid::now_v7(), &DerivativeSelection::Default)
            .await
            .unwrap();
        assert_eq!(report.aborted, Some(AbortReason::AssetMissing));
    }

    #[tokio::test]
    async fn run_follows_file_promoted_during_read() {
        let (app, held) = TestEngine::spawn_with_held_cache().await;
        let asset = app.attach_pending("notes.txt", b"read while moving").await;
        let asset_id = asset.id;

        held.hold_next();
        let engine = app.engine.clone();
        let run = tokio::spawn(async move {
            engine
                .derivatives()
                .run(asset_id, &DerivativeSelection::Default)
                .await
        });
        held.held().await;

        let directives = Directives::new()
            .with("promote", DirectiveValue::Inline)
            .unwrap()
            .with("create_derivatives", false)
            .unwrap();
        let outcome = app
            .engine
            .promotion()
            .promote(asset.id, &directives)
            .await
            .unwrap();
        assert!(outcome.is_stored());
        assert!(app.cache_blobs().is_empty());
        held.release();

        let report = run.await.unwrap().unwrap();
        assert!(report.aborted.is_none());
        assert_eq!(report.attached_keys(), ["excerpt"]);
        assert_eq!(app.derivatives(asset.id).await.len(), 1);
    }

    #[tokio::test]
    async fn run_fails_when_file_missing_in_place() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("notes.txt", b"about to vanish").await;
        std::fs::remove_file(app.cache_dir.join(&asset.location)).unwrap();

        let err = app
            .engine
            .derivatives()
            .run(asset.id, &DerivativeSelection::Default)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Storage(StorageError::NotFound(_))));
        assert!(app.derivatives(asset.id).await.is_empty());
    }

    #[tokio::test]
    async fn request_honors_create_derivatives_mode() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("notes.txt", b"mode check").await;
        let attacher = app.engine.attacher();

        let disabled = Directives::new().with("create_derivatives", false).unwrap();
        let run = attacher
            .create_derivatives(asset.id, &DerivativeSelection::Default, &disabled)
            .await
            .unwrap();
        assert!(matches!(run, DerivativeRun::Disabled));

        let run = attacher
            .create_derivatives(asset.id, &DerivativeSelection::Default, &Directives::new())
            .await
            .unwrap();
        assert!(matches!(run, DerivativeRun::Enqueued));
        assert_eq!(app.queue.pending().len(), 1);
        assert!(app.derivatives(asset.id).await.is_empty());

        app.drain_jobs().await;
        assert_eq!(app.derivatives(asset.id).await.len(), 1);
    }

    #[tokio::test]
    async fn fingerprint_is_sha512_of_bytes() {
        let app = TestEngine::spawn().await;
        let asset = app.attach_pending("notes.txt", b"hash me").await;
        assert_eq!(
            asset.parsed_fingerprint().unwrap(),
            Fingerprint::compute(b"hash me")
        );
        assert_eq!(asset.fingerprint.len(), 128);
    }
}

mod retry_bound {
    use sea_orm::{ConnectionTrait, DbBackend};

    use super::*;

    fn named(key: &str, data: &str) -> NewDerivative {
        NewDerivative {
            key: key.into(),
            ..thumb(data)
        }
    }

    /// Schema tweaks below would leak into other tests on a shared Postgres
    /// database, so these only run on the per-test SQLite file.
    fn is_sqlite(app: &TestEngine) -> bool {
        app.engine.db.get_database_backend() == DbBackend::Sqlite
    }

    #[tokio::test]
    async fn updates_that_never_land_exhaust_the_bound() {
        let app = TestEngine::spawn().await;
        if !is_sqlite(&app) {
            return;
        }
        let asset = app.attach_pending("photo.png", b"pixels").await;
        let expected = asset.parsed_fingerprint().unwrap();
        let store = app.engine.derivative_store();

        let AttachOutcome::Attached(original) = store
            .attach(asset.id, &expected, thumb("first"))
            .await
            .unwrap()
        else {
            panic!("first attach should succeed");
        };

        // Every update now affects no rows, as if the row vanished between
        // the conflict and the update.
        app.engine
            .db
            .execute_unprepared(
                "CREATE TRIGGER skip_derivative_updates BEFORE UPDATE ON derivative \
                 BEGIN SELECT RAISE(IGNORE); END",
            )
            .await
            .unwrap();

        let err = store
            .attach(asset.id, &expected, thumb("second"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict { ref key, attempts: 3, .. } if key == "thumb"
        ));

        let rows = app.derivatives(asset.id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location, original.location);
        let blobs = app.derivative_blobs(asset.id, "thumb");
        assert_eq!(blobs.len(), 1, "rejected blob must be deleted: {blobs:?}");
        assert!(blobs[0].ends_with(&original.location));
    }

    #[tokio::test]
    async fn conflicts_without_a_visible_row_exhaust_the_bound() {
        let app = TestEngine::spawn().await;
        if !is_sqlite(&app) {
            return;
        }
        let asset = app.attach_pending("photo.png", b"pixels").await;
        let expected = asset.parsed_fingerprint().unwrap();
        let store = app.engine.derivative_store();

        store
            .attach(asset.id, &expected, named("thumb", "small"))
            .await
            .unwrap();

        // A second key for the same asset now violates a unique index, but
        // there is no row under that key to fall back to.
        app.engine
            .db
            .execute_unprepared(
                "CREATE UNIQUE INDEX one_derivative_per_asset ON derivative (asset_id)",
            )
            .await
            .unwrap();

        let err = store
            .attach(asset.id, &expected, named("poster", "large"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict { ref key, attempts: 3, .. } if key == "poster"
        ));

        assert_eq!(app.derivatives(asset.id).await.len(), 1);
        assert!(app.derivative_blobs(asset.id, "poster").is_empty());
        assert_eq!(app.derivative_blobs(asset.id, "thumb").len(), 1);
    }
}
