use hardware_pipeline::config::{ExportConfig, ExportFormat, StoreConfig};
use hardware_pipeline::{
    Availability, Category, Config, Health, IngestPipeline, ItemOutcome, Normalizer, Pipeline,
    PipelineError, QualityScorer, RawItem, StoreWriter, WriteOutcome,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.workers = 4;
    config.store = StoreConfig::at(dir.path().join("hardware.db"));
    config.store.write_timeout_ms = 2_000;
    config.export = ExportConfig {
        dir: dir.path().join("exports"),
        formats: vec![ExportFormat::Json, ExportFormat::Jsonl, ExportFormat::Csv],
        ..ExportConfig::default()
    };
    config
}

fn rtx_4070(price: &str, scraped_at: i64) -> RawItem {
    RawItem::new()
        .with("name", "RTX 4070")
        .with("brand", "NVIDIA")
        .with("price", price)
        .with("category", "Graphics Card")
        .with("availability", "In Stock")
        .with("source_url", "https://shop.example/products/rtx-4070")
        .with("scraped_timestamp", scraped_at)
}

#[tokio::test]
async fn first_scrape_inserts_and_rescrape_updates() {
    let dir = TempDir::new().unwrap();
    let pipeline = IngestPipeline::open(&config_in(&dir)).await.unwrap();
    let reader = pipeline.reader();

    let first = pipeline.process_item(rtx_4070("$599.99", 1_700_000_000)).await;
    let key = match &first {
        ItemOutcome::Inserted { receipt, low_quality } => {
            assert!(!low_quality);
            assert_eq!(receipt.outcome, WriteOutcome::Inserted);
            receipt.identity_key.clone()
        }
        other => panic!("expected insert, got {:?}", other),
    };

    let entity = reader.get_entity(&key).await.unwrap().unwrap();
    assert_eq!(entity.item.price.as_ref().unwrap().to_string(), "599.99");
    assert_eq!(entity.item.price.as_ref().unwrap().currency, "USD");
    assert_eq!(entity.item.category, Category::Gpu);
    assert_eq!(entity.item.availability, Availability::InStock);
    assert!(entity.item.quality_score >= 0.7);

    let second = pipeline.process_item(rtx_4070("$549.99", 1_700_003_600)).await;
    match &second {
        ItemOutcome::Updated { receipt, .. } => {
            assert_eq!(receipt.identity_key, key);
            assert_eq!(receipt.outcome, WriteOutcome::Updated { price_changed: true });
        }
        other => panic!("expected update, got {:?}", other),
    }

    let entity = reader.get_entity(&key).await.unwrap().unwrap();
    assert_eq!(entity.price_history.len(), 2);
    assert_eq!(entity.update_count, 1);
    assert_eq!(entity.first_seen, 1_700_000_000);
    assert_eq!(entity.last_updated, 1_700_003_600);
    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn unchanged_price_keeps_history_length() {
    let dir = TempDir::new().unwrap();
    let pipeline = IngestPipeline::open(&config_in(&dir)).await.unwrap();

    pipeline.process_item(rtx_4070("$599.99", 100)).await;
    let again = pipeline.process_item(rtx_4070("599.99 $", 200)).await;
    let key = again.receipt().unwrap().identity_key.clone();
    assert_eq!(
        again.receipt().unwrap().outcome,
        WriteOutcome::Updated { price_changed: false }
    );

    let entity = pipeline.reader().get_entity(&key).await.unwrap().unwrap();
    assert_eq!(entity.price_history.len(), 1);
    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn missing_source_url_never_reaches_the_store() {
    let dir = TempDir::new().unwrap();
    let pipeline = IngestPipeline::open(&config_in(&dir)).await.unwrap();

    let raw = RawItem::new()
        .with("name", "RTX 4070")
        .with("brand", "NVIDIA")
        .with("price", "$599.99");
    let outcome = pipeline.process_item(raw).await;
    assert!(matches!(
        outcome,
        ItemOutcome::Rejected {
            reason: PipelineError::MissingSourceUrl
        }
    ));
    assert_eq!(pipeline.reader().count().await.unwrap(), 0);
    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_inserts_create_exactly_one_entity() {
    let dir = TempDir::new().unwrap();
    let writer = Arc::new(StoreWriter::open(&StoreConfig::at(dir.path().join("hardware.db"))).await.unwrap());
    let item = Normalizer::new()
        .normalize(&rtx_4070("$599.99", 1_700_000_000))
        .unwrap();

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let writer = Arc::clone(&writer);
            let item = item.clone();
            tokio::spawn(async move { writer.insert("gpu|nvidia|rtx 4070", &item).await })
        })
        .collect();

    let mut created = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(PipelineError::DuplicateKey(key)) => {
                duplicates += 1;
                let receipt = writer.update(&key, &item).await.unwrap();
                assert!(matches!(receipt.outcome, WriteOutcome::Updated { .. }));
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(duplicates, 49);
    let reader = writer.reader();
    assert_eq!(reader.count().await.unwrap(), 1);
    let entity = reader.get_entity("gpu|nvidia|rtx 4070").await.unwrap().unwrap();
    assert_eq!(entity.update_count, 49);
    writer.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_batch_merges_duplicates() {
    let dir = TempDir::new().unwrap();
    let pipeline = IngestPipeline::open(&config_in(&dir)).await.unwrap();

    let batch = (0..20).map(|i| rtx_4070("$599.99", 1_000 + i)).collect();
    let report = pipeline.process_batch(batch).await;

    assert_eq!(report.len(), 20);
    assert_eq!(report.inserted(), 1);
    assert_eq!(report.updated() + report.merged(), 19);
    assert_eq!(report.health(), Health::Healthy);
    assert_eq!(pipeline.reader().count().await.unwrap(), 1);
    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn bad_items_are_isolated_within_a_batch() {
    let dir = TempDir::new().unwrap();
    let pipeline = IngestPipeline::open(&config_in(&dir)).await.unwrap();

    let batch = vec![
        rtx_4070("$599.99", 1),
        rtx_4070("price on request", 2),
        RawItem::new().with("name", "orphan"),
        RawItem::new()
            .with("name", "Ryzen 7 7800X3D Processor")
            .with("brand", "AMD")
            .with("price", "€449,00")
            .with("source_url", "https://shop.example/products/7800x3d"),
    ];
    let report = pipeline.process_batch(batch).await;

    assert_eq!(report.inserted(), 2);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.rejected(), 1);
    assert_eq!(report.health(), Health::Healthy);
    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn contended_store_defers_items_and_degrades_health() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.store.write_timeout_ms = 150;
    let pipeline = IngestPipeline::open(&config).await.unwrap();

    let blocker = Connection::open(&config.store.path).unwrap();
    blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let report = pipeline.process_batch(vec![rtx_4070("$599.99", 1)]).await;
    assert_eq!(report.deferred(), 1);
    assert_eq!(report.health(), Health::Degraded);
    match &report.outcomes[0] {
        ItemOutcome::Deferred {
            reason: PipelineError::StoreTimeout { attempts, .. },
            ..
        } => assert!(*attempts > 1),
        other => panic!("expected deferral, got {:?}", other),
    }

    blocker.execute_batch("ROLLBACK").unwrap();
    let retry = pipeline.process_batch(report.deferred_items()).await;
    assert_eq!(retry.inserted(), 1);
    assert_eq!(retry.health(), Health::Healthy);
    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn exports_reflect_the_store() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let pipeline = IngestPipeline::open(&config).await.unwrap();

    let gpu = rtx_4070("$599.99", 1).with("specifications", json!({"Memory": "12 GB", "Boost Clock": "2.48 GHz"}));
    let cpu = RawItem::new()
        .with("name", "Ryzen 7 7800X3D")
        .with("brand", "AMD")
        .with("category", "Processor")
        .with("price", "$449.00")
        .with("specifications", json!({"Cores": "8"}))
        .with("source_url", "https://shop.example/products/7800x3d");
    let report = pipeline.process_batch(vec![gpu, cpu]).await;
    assert_eq!(report.inserted(), 2);

    let summary = pipeline.exporter(config.export.clone()).export_now().await.unwrap();
    assert_eq!(summary.entity_count, 2);
    assert_eq!(summary.files.len(), 3);

    let json_path = config.export.dir.join("hardware.json");
    let value: Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    let entities = value.as_array().unwrap();
    assert_eq!(entities.len(), 2);
    assert!(entities.iter().all(|e| e["price_history"].as_array().unwrap().len() == 1));

    let jsonl = std::fs::read_to_string(config.export.dir.join("hardware.jsonl")).unwrap();
    assert_eq!(jsonl.lines().count(), 2);

    let mut csv = csv::Reader::from_path(config.export.dir.join("hardware.csv")).unwrap();
    let headers: Vec<String> = csv.headers().unwrap().iter().map(str::to_string).collect();
    let spec_columns: Vec<&String> = headers.iter().filter(|h| h.starts_with("spec_")).collect();
    assert_eq!(spec_columns.len(), 3);
    assert_eq!(csv.records().count(), 2);

    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn scheduler_serves_on_demand_exports_and_shuts_down() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.export.timestamped = true;
    config.export.formats = vec![ExportFormat::Json];
    let pipeline = IngestPipeline::open(&config).await.unwrap();
    pipeline.process_item(rtx_4070("$599.99", 1)).await;

    let scheduler = Arc::new(pipeline.exporter(config.export.clone()))
        .spawn_periodic(Duration::from_secs(3_600))
        .unwrap();
    let summary = scheduler.export_now().await.unwrap();
    assert_eq!(summary.entity_count, 1);

    let name = summary.files[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("hardware_"));
    assert!(name.ends_with(".json"));
    assert_eq!(name.len(), "hardware_YYYYmmdd_HHMMSS.json".len());

    scheduler.shutdown().await.unwrap();
    pipeline.close().await.unwrap();
}
