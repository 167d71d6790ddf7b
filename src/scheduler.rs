use std::time::Duration;

use futures::stream::FuturesUnordered;
use tokio_stream::StreamExt;

use crate::cron::pg::PgCronRegistry;
use crate::engine::Engine;

const IDLE_DELAY: Duration = Duration::from_secs(1);

async fn scheduling_loop(registry: PgCronRegistry, engine: Engine) -> anyhow::Result<()> {
    let mut reached_end = false;

    loop {
        registry.run_once(&engine, &mut reached_end).await?;
        if reached_end {
            reached_end = false;
            tokio::time::sleep(IDLE_DELAY).await;
        }
    }
}

/// The single scheduler role of the deployment. Within it, `tick_loops`
/// claim loops run concurrently; `SKIP LOCKED` claiming keeps them off
/// each other's entries, so simultaneous fires of different tasks proceed
/// in parallel.
pub async fn start(
    registry: PgCronRegistry,
    engine: Engine,
    tick_loops: usize,
) -> anyhow::Result<()> {
    println!("Cron scheduler started.");

    let mut tasks = FuturesUnordered::new();

    for _ in 0..tick_loops.max(1) {
        let registry = registry.clone();
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            scheduling_loop(registry, engine).await
        }));
    }

    if let Some(join_result) = tasks.next().await {
        let inner = join_result?;

        inner?;
    }

    Ok(())
}
