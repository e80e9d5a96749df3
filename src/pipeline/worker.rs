use crate::config::PipelineConfig;
use crate::storage::writer;
use crate::types::ProcessedScan;
use deadpool_sqlite::Pool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;

/// Consume recorded scans from the channel and flush them to SQLite on
/// batch size or time trigger. Returns once the channel closes and the
/// buffer is drained.
pub async fn run_worker(mut rx: mpsc::Receiver<ProcessedScan>, pool: Pool, config: PipelineConfig) {
    let mut buffer: Vec<ProcessedScan> = Vec::with_capacity(config.flush_batch_size);
    let mut flush_timer = time::interval(Duration::from_secs(config.flush_interval_secs.max(1)));
    flush_timer.tick().await; // skip first immediate tick

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Some(scan) => {
                        buffer.push(scan);
                        if buffer.len() >= config.flush_batch_size {
                            flush(&pool, &mut buffer).await;
                        }
                    }
                    None => {
                        tracing::info!(pending = buffer.len(), "scan channel closed, draining buffer");
                        if !buffer.is_empty() {
                            flush(&pool, &mut buffer).await;
                        }
                        return;
                    }
                }
            }
            _ = flush_timer.tick() => {
                if !buffer.is_empty() {
                    flush(&pool, &mut buffer).await;
                }
            }
        }
    }
}

async fn flush(pool: &Pool, buffer: &mut Vec<ProcessedScan>) {
    let scans: Vec<ProcessedScan> = std::mem::take(buffer);
    let count = scans.len();

    // One retry, then the batch is dropped.
    for attempt in 0..2u8 {
        match writer::write_batch(pool, scans.clone()).await {
            Ok(_) => return,
            Err(e) => {
                if attempt == 0 {
                    tracing::warn!(error = %e, count, "scan flush failed, retrying in 500ms");
                    time::sleep(Duration::from_millis(500)).await;
                } else {
                    tracing::error!(error = %e, count, "scan flush retry failed, batch dropped");
                }
            }
        }
    }
}
