//! Basic usage of the cache backends.

use next_cache::{
    backend::{CacheBackend, CleanMode, FileBackend, SharedMemoryBackend},
    error::Result,
    options::{FileOptionsLayer, OptionsLayer},
    observability::LogMetrics,
    CacheService, HashAlgorithm,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Example entity: Employment
#[derive(Clone, Serialize, Deserialize, Debug)]
struct Employment {
    id: String,
    employer_name: String,
    salary: f64,
}

/// Simulated database lookup.
async fn fetch_employment(id: &str) -> Result<Employment> {
    println!("  [DB] Fetching employment: {}", id);
    Ok(Employment {
        id: id.to_string(),
        employer_name: "Acme Corp".to_string(),
        salary: 75000.0,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== next-cache - Basic Example ===\n");

    // 1. Shared-memory backend behind a service
    println!("1. Shared-memory backend with get_or_compute:");
    let cache = CacheService::new(SharedMemoryBackend::new());

    for attempt in 1..=2 {
        let emp = cache
            .get_or_compute("employment:emp_001", Some(300), || {
                fetch_employment("emp_001")
            })
            .await?;
        println!(
            "   ✓ attempt {}: {} at {} (${:.2})",
            attempt, emp.id, emp.employer_name, emp.salary
        );
    }

    // 2. File backend with compression and SHA-1 digests
    println!("\n2. File backend with gzip and sha1 integrity:");
    let dir = std::env::temp_dir().join("next-cache-demo");
    std::fs::create_dir_all(&dir)?;

    let caller = FileOptionsLayer::default()
        .output_directory(&dir)
        .compression(true, 6)
        .with_backend(
            OptionsLayer::from_env()
                .hash_algorithm(HashAlgorithm::Sha1)
                .life_time(600),
        );
    let files = FileBackend::new(&caller)
        .await?
        .with_metrics(Arc::new(LogMetrics));

    let emp = fetch_employment("emp_002").await?;
    files.add("employment:emp_002", &emp, None).await;
    println!(
        "   ✓ stored at {}",
        files.payload_path("employment:emp_002").display()
    );

    // 3. Touch extends the lifetime from the original write time
    println!("\n3. Touch:");
    if files.touch("employment:emp_002", 120).await {
        if let Some(record) = files.meta().load("employment:emp_002").await {
            println!(
                "   ✓ lifetime now {}s, expires at {}",
                record.life_time,
                record.expire()
            );
        }
    }

    // 4. Load back
    let loaded: Option<Employment> = files.load_value("employment:emp_002").await.into_option();
    println!("\n4. Loaded from disk: {:?}", loaded);

    // 5. Clean
    println!("\n5. Clean:");
    files.clean(CleanMode::All).await?;
    println!("   ✓ file cache cleared");
    if let Err(e) = files.clean(CleanMode::Old).await {
        println!("   ✓ clean(old) refused: {}", e);
    }

    println!("\n=== Example Complete ===\n");

    Ok(())
}
