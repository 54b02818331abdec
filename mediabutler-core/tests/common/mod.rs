//! Shared wiring for integration tests: in-memory store, in-memory
//! filesystem, and the real pipeline components on top.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mediabutler_core::classify::Classifier;
use mediabutler_core::clock::{Clock, SystemClock};
use mediabutler_core::events::{EventSink, InProcEventBus};
use mediabutler_core::fsx::{FileSystem, MemoryFs};
use mediabutler_core::organize::Organizer;
use mediabutler_core::pathing::PathBuilder;
use mediabutler_core::recovery::{ErrorClassifier, RollbackService};
use mediabutler_core::service::FileService;
use mediabutler_core::store::Store;
use mediabutler_model::{FileHash, TrackedFile};

pub const LIBRARY_ROOT: &str = "/library";

pub struct TestContext {
    pub fs: Arc<MemoryFs>,
    pub store: Arc<Store>,
    pub service: Arc<FileService>,
    pub organizer: Arc<Organizer>,
    pub rollback: Arc<RollbackService>,
    pub bus: Arc<InProcEventBus>,
    pub path_builder: Arc<PathBuilder>,
}

pub async fn context() -> TestContext {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let fs = Arc::new(MemoryFs::new());
    let bus = Arc::new(InProcEventBus::new(256));

    let store = Arc::new(
        Store::open_in_memory(
            Arc::clone(&clock),
            Arc::clone(&bus) as Arc<dyn EventSink>,
        )
        .await
        .expect("in-memory store"),
    );

    let path_builder = Arc::new(PathBuilder::new(
        Arc::clone(&fs) as Arc<dyn FileSystem>,
        Arc::clone(&clock),
        PathBuf::from(LIBRARY_ROOT),
    ));

    let service = Arc::new(FileService::new(
        Arc::clone(&store),
        Arc::clone(&fs) as Arc<dyn FileSystem>,
        Arc::clone(&path_builder),
        0.85,
        0.50,
        3,
    ));

    let rollback = Arc::new(RollbackService::new(
        Arc::clone(&store),
        Arc::clone(&fs) as Arc<dyn FileSystem>,
    ));

    let organizer = Arc::new(Organizer::new(
        Arc::clone(&store),
        Arc::clone(&fs) as Arc<dyn FileSystem>,
        Arc::clone(&path_builder),
        Arc::clone(&rollback),
        ErrorClassifier::new(vec![10, 20, 30], 3),
        Arc::clone(&service),
    ));

    TestContext {
        fs,
        store,
        service,
        organizer,
        rollback,
        bus,
        path_builder,
    }
}

/// Seed a file on disk and register it.
pub async fn seed_and_register(
    ctx: &TestContext,
    path: &str,
    contents: &[u8],
) -> TrackedFile {
    ctx.fs.add_file(path, contents.to_vec());
    ctx.service
        .register(Path::new(path))
        .await
        .expect("register")
}

/// Walk a file to READY_TO_MOVE: register, classify, confirm.
pub async fn stage_ready(
    ctx: &TestContext,
    path: &str,
    contents: &[u8],
    category: &str,
) -> FileHash {
    let file = seed_and_register(ctx, path, contents).await;
    let hash = file.hash.clone();
    ctx.service.begin_processing(&hash).await.expect("begin");
    ctx.service
        .update_classification(&hash, category, 0.92)
        .await
        .expect("classify");
    ctx.service.confirm(&hash, category).await.expect("confirm");
    hash
}

/// Stage only to CLASSIFIED, leaving confirmation to the caller.
pub async fn stage_classified(
    ctx: &TestContext,
    path: &str,
    contents: &[u8],
    category: &str,
) -> FileHash {
    let file = seed_and_register(ctx, path, contents).await;
    let hash = file.hash.clone();
    ctx.service.begin_processing(&hash).await.expect("begin");
    ctx.service
        .update_classification(&hash, category, 0.92)
        .await
        .expect("classify");
    hash
}

pub fn classifier_stub() -> Arc<dyn Classifier> {
    Arc::new(mediabutler_core::classify::UnknownClassifier)
}
