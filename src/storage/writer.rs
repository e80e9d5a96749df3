use crate::types::ProcessedScan;
use deadpool_sqlite::Pool;
use rusqlite::params;

/// Append a batch of scans in a single transaction.
pub async fn write_batch(
    pool: &Pool,
    scans: Vec<ProcessedScan>,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    if scans.is_empty() {
        return Ok(0);
    }

    let conn = pool.get().await?;
    let written = conn
        .interact(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut insert = tx.prepare_cached(
                    "INSERT INTO scans (scan_type, subject_id, scanned_at, received_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for scan in &scans {
                    insert.execute(params![
                        scan.scan_type.code(),
                        scan.subject_id,
                        scan.scanned_at,
                        scan.received_at,
                    ])?;
                }
            }
            tx.commit()?;
            tracing::debug!(count = scans.len(), "flushed scan batch to sqlite");
            Ok::<_, rusqlite::Error>(scans.len())
        })
        .await
        .map_err(|e| format!("interact error: {e}"))??;

    Ok(written)
}
