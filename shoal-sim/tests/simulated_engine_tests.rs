//! Integration tests for the simulated engine.
//!
//! Covers metadata timing, piece ordering around open readers, blocking
//! reads and the full registry/lifecycle/stream path on top of the
//! simulation.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use shoal_core::{
    Descriptor, EngineConfig, EngineTransfer, LifecycleController, TransferEngine, TransferError,
    TransferRegistry,
};
use shoal_sim::{Catalog, CatalogEntry, SimulatedEngine, SimulatedEngineBuilder, SimulationConfig};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::timeout;
use tokio_test::{assert_pending, assert_ready};

const PIECE: u64 = 4;

/// Ten pieces of four bytes, one piece completed per tick.
fn slow_config() -> SimulationConfig {
    SimulationConfig {
        metadata_delay: Duration::ZERO,
        download_speed_bps: 800,
        piece_length: PIECE,
        tick_interval: Duration::from_millis(5),
    }
}

fn two_file_entry() -> CatalogEntry {
    CatalogEntry::new(
        "pair",
        vec![
            ("pair/intro.txt".to_string(), Bytes::from_static(b"0123456789ab")),
            (
                "pair/main.bin".to_string(),
                Bytes::from_static(b"ABCDEFGHIJKLMNOPQRSTUVWXYZ!?"),
            ),
        ],
    )
}

struct SimFixture {
    engine: SimulatedEngine,
    entry: CatalogEntry,
    dir: tempfile::TempDir,
}

impl SimFixture {
    fn new(simulation: SimulationConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let entry = two_file_entry();
        let mut catalog = Catalog::new();
        catalog.insert(entry.clone()).unwrap();

        let builder = SimulatedEngineBuilder::new(catalog, simulation);
        let engine = builder.build_engine(&engine_config(&dir)).unwrap();
        Self { engine, entry, dir }
    }

    async fn add(&self) -> Arc<dyn EngineTransfer> {
        self.engine
            .add_descriptor(&Descriptor::parse(&self.entry.magnet()).unwrap())
            .await
            .unwrap()
    }
}

fn engine_config(dir: &tempfile::TempDir) -> EngineConfig {
    EngineConfig {
        download_directory: dir.path().to_path_buf(),
        settle_delay: Duration::from_millis(1),
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn test_metadata_publishes_layout_and_manifest() {
    let fixture = SimFixture::new(slow_config());
    let handle = fixture.add().await;
    assert_eq!(handle.name(), "pair");

    timeout(Duration::from_secs(2), handle.metadata_ready())
        .await
        .expect("metadata should arrive");

    let files = handle.files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].offset, 12);
    assert_eq!(handle.total_length(), 40);

    let manifest = fixture
        .dir
        .path()
        .join(format!("{}.torrent", fixture.entry.info_hash()));
    let mut written = false;
    for _ in 0..100 {
        if manifest.exists() {
            written = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(written);
}

#[tokio::test]
async fn test_unknown_content_never_gets_metadata() {
    let fixture = SimFixture::new(slow_config());
    let descriptor = Descriptor::parse(&"ee".repeat(20)).unwrap();
    let handle = fixture.engine.add_descriptor(&descriptor).await.unwrap();

    assert!(
        timeout(Duration::from_millis(50), handle.metadata_ready())
            .await
            .is_err()
    );
    assert!(handle.files().is_empty());
    assert_eq!(handle.name(), "ee".repeat(20));
}

#[tokio::test]
async fn test_duplicate_descriptor_is_rejected() {
    let fixture = SimFixture::new(slow_config());
    fixture.add().await;

    let result = fixture
        .engine
        .add_descriptor(&Descriptor::parse(&fixture.entry.magnet()).unwrap())
        .await;
    assert!(matches!(result, Err(TransferError::EngineRejected { .. })));
}

#[tokio::test]
async fn test_reader_window_is_fetched_first() {
    let fixture = SimFixture::new(slow_config());
    let handle = fixture.add().await;
    handle.metadata_ready().await;

    let mut reader = handle.new_reader();
    reader.set_responsive();
    reader.seek(std::io::SeekFrom::Start(36)).await.unwrap();

    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(2), reader.read_exact(&mut buf))
        .await
        .expect("read should complete once the piece arrives")
        .unwrap();
    assert_eq!(&buf, b"YZ!?");

    let sim = fixture.engine.transfer(&fixture.entry.info_hash()).unwrap();
    assert!(sim.has_byte(36));
    assert!(!sim.has_byte(0));
}

#[tokio::test]
async fn test_read_is_pending_until_piece_completes() {
    let fixture = SimFixture::new(SimulationConfig {
        download_speed_bps: 0,
        ..slow_config()
    });
    let handle = fixture.add().await;
    handle.metadata_ready().await;

    let mut reader = handle.new_reader();
    let mut buf = [0u8; 4];
    let mut read = tokio_test::task::spawn(reader.read(&mut buf));
    assert_pending!(read.poll());

    handle.drop_transfer();
    assert!(read.is_woken());
    let result = assert_ready!(read.poll());
    assert!(result.is_err());
}

#[tokio::test]
async fn test_download_all_completes_everything() {
    let fixture = SimFixture::new(SimulationConfig::instant());
    let handle = fixture.add().await;
    handle.metadata_ready().await;
    handle.download_all();

    let total = handle.total_length();
    timeout(Duration::from_secs(2), async {
        while handle.completed_length() < total {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("download should finish");

    let mut reader = handle.new_reader();
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents).await.unwrap();
    assert_eq!(contents, fixture.entry.data().as_ref());
}

#[tokio::test]
async fn test_close_drops_transfers() {
    let fixture = SimFixture::new(slow_config());
    let handle = fixture.add().await;

    fixture.engine.close().await;

    assert!(handle.is_dropped());
    assert!(fixture.engine.transfers().is_empty());
    let result = fixture
        .engine
        .add_descriptor(&Descriptor::parse(&fixture.entry.magnet()).unwrap())
        .await;
    assert!(matches!(result, Err(TransferError::EngineRejected { .. })));
}

#[tokio::test]
async fn test_stream_file_through_registry() {
    let dir = tempfile::tempdir().unwrap();
    let entry = two_file_entry();
    let mut catalog = Catalog::new();
    catalog.insert(entry.clone()).unwrap();
    let builder = SimulatedEngineBuilder::new(catalog, SimulationConfig::instant());

    let registry = Arc::new(TransferRegistry::new(Arc::new(builder)));
    registry.configure(engine_config(&dir)).await.unwrap();
    let controller = LifecycleController::new(Arc::clone(&registry));

    let info_hash = controller.add_descriptor(&entry.magnet()).await.unwrap();
    let id = info_hash.to_hex();
    let snapshot = timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = registry.get(&id).await.unwrap();
            if snapshot.started && snapshot.ready {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("transfer should auto-start");
    assert_eq!(snapshot.files[1].path, "pair/main.bin");

    let mut stream = registry.open_stream(&id, 1).await.unwrap();
    let mut contents = Vec::new();
    timeout(Duration::from_secs(2), stream.read_to_end(&mut contents))
        .await
        .expect("stream should finish")
        .unwrap();
    assert_eq!(contents, b"ABCDEFGHIJKLMNOPQRSTUVWXYZ!?");
}

#[tokio::test]
async fn test_start_file_after_readd_reaches_new_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let entry = two_file_entry();
    let mut catalog = Catalog::new();
    catalog.insert(entry.clone()).unwrap();
    let simulation = SimulationConfig {
        metadata_delay: Duration::from_millis(150),
        ..SimulationConfig::instant()
    };
    let builder = SimulatedEngineBuilder::new(catalog, simulation);

    let registry = Arc::new(TransferRegistry::new(Arc::new(builder)));
    registry
        .configure(EngineConfig {
            auto_start: false,
            ..engine_config(&dir)
        })
        .await
        .unwrap();
    let controller = LifecycleController::new(Arc::clone(&registry));
    let id = controller
        .add_descriptor(&entry.magnet())
        .await
        .unwrap()
        .to_hex();

    let wait_ready = || async {
        timeout(Duration::from_secs(2), async {
            loop {
                let listed = registry.list().await.unwrap();
                if listed[&entry.info_hash()].ready {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("metadata should arrive");
    };
    wait_ready().await;

    controller.start(&id).await.unwrap();
    controller.stop(&id).await.unwrap();
    controller.add_descriptor(&entry.magnet()).await.unwrap();

    let listed = registry.list().await.unwrap();
    assert!(!listed[&entry.info_hash()].ready);
    wait_ready().await;

    controller.start_file(&id, "pair/main.bin").await.unwrap();
    let snapshot = timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = registry.list().await.unwrap()[&entry.info_hash()].clone();
            if snapshot.completed_length >= 28 {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("high priority file should be fetched by the new transfer");
    assert!(snapshot.files[1].started);
    assert!(!snapshot.files[0].started);
}
