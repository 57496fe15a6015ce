//! Prism demo binary
//!
//! Builds an in-process grid, indexes a few days of synthetic events and
//! runs a filtered, paginated query against them.

use std::sync::Arc;

use prism::{
    bitmap, keys, select_page, Config, DimensionFilter, DimensionIndex, Event, IndexResult,
    Indexer, KeyError, KeyValueGrid, MemoryGrid, PageRequest, RowSpan, TimeRange, TimeRangeIndex,
    DAY_MS,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_default();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("prism={}", config.logging.level)),
    );
    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Prism Dimensional Index v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Grid: {} nodes, {} replicas per shard",
        config.grid.nodes,
        config.grid.replicas
    );

    let grid: Arc<dyn KeyValueGrid> = Arc::new(MemoryGrid::new(&config.grid));
    let time_index = Arc::new(TimeRangeIndex::new(grid.clone()));
    let index = DimensionIndex::new(grid, time_index, config.index.clone());

    demo_ingest(&index).await?;
    demo_query(&index).await?;

    tracing::info!("Prism demo complete");
    Ok(())
}

async fn demo_ingest(index: &DimensionIndex) -> IndexResult<()> {
    tracing::info!("Indexing demo events...");

    let today = keys::day_start(chrono::Utc::now().timestamp_millis());
    let mut next_row = 0u64;

    for days_ago in (0..3i64).rev() {
        let day = today - days_ago * DAY_MS;
        let first_row = next_row;

        let mut events = Vec::with_capacity(500);
        for i in 0..500u64 {
            let status = if i % 5 == 0 { "error" } else { "ok" };
            let region = if i % 2 == 0 { "eu" } else { "us" };
            events.push(
                Event::new(next_row)
                    .dimension("status", status)
                    .dimension("region", region),
            );
            next_row += 1;
        }

        index.index_batch(day, &events).await?;
        index
            .add_time_index(
                TimeRange::new(day, day + 3_600_000),
                RowSpan::new(first_row, next_row),
            )
            .await?;
        tracing::info!("Indexed {} events for {}", events.len(), keys::iso(day)?);
    }

    // retract the first event of today; queries must no longer return it
    let today_first = next_row - 500;
    index.delete_rows(today, bitmap::of(&[today_first])).await?;
    tracing::info!("Deleted row {today_first}");

    Ok(())
}

async fn demo_query(index: &DimensionIndex) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Querying demo events...");

    let range = TimeRange::last_days(3);
    let filters = [
        DimensionFilter::new("status", "error"),
        DimensionFilter::new("region", "eu"),
    ];
    let rows = index.get_row_ids(range, &filters).await?;

    let total: usize = rows.values().map(Vec::len).sum();
    tracing::info!("Matched {} rows across {} days", total, rows.len());

    // first page, newest day first
    let page = select_page(&rows, &PageRequest::new(1, 20).descending())?;
    let view = page
        .into_iter()
        .map(|(day, ids)| Ok((keys::iso(day)?, ids)))
        .collect::<Result<Vec<(String, Vec<u64>)>, KeyError>>()?;
    println!("{}", serde_json::to_string_pretty(&view)?);

    Ok(())
}
