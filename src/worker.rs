use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::engine::Engine;
use crate::queue::Queue;

/// Queue-consuming role. The engine is fully constructed before the first
/// unit is claimed; units execute concurrently, one spawned task each.
pub async fn start(engine: Engine) -> anyhow::Result<()> {
    println!("Worker consuming the dispatch queue.");

    let handler = Arc::new(Dispatcher::new(engine.store.clone(), engine.http.clone()));

    engine.queue.consume(handler).await?;

    Ok(())
}
