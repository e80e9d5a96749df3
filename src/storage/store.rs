use crate::error::AppResult;
use crate::types::{ScanEvent, ScanType};
use deadpool_sqlite::Pool;
use rusqlite::params;

/// Which scans to load. Every field narrows the result; `None` means no constraint.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub subject_id: Option<String>,
    pub types: Option<Vec<ScanType>>,
    /// Inclusive lower bound, ms since epoch.
    pub since: Option<i64>,
    /// Inclusive upper bound, ms since epoch.
    pub until: Option<i64>,
    /// Restrict to subjects registered under this owner.
    pub owner_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Handle to the append-only scan log. Cheap to clone; owns no state beyond the pool.
#[derive(Clone)]
pub struct ScanStore {
    pool: Pool,
}

impl ScanStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Scans matching `filter`, ascending by `scanned_at` then `id`. Aggregation
    /// relies on this order for its month sequence.
    pub async fn list_scans(&self, filter: ScanFilter) -> AppResult<Vec<ScanEvent>> {
        if matches!(filter.types, Some(ref types) if types.is_empty()) {
            return Ok(Vec::new());
        }

        let conn = self.pool.get().await?;
        let scans = conn
            .interact(move |conn| {
                let mut sql = String::from(
                    "SELECT id, scan_type, subject_id, scanned_at FROM scans WHERE 1=1",
                );
                let mut bind_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

                if let Some(ref subject_id) = filter.subject_id {
                    sql.push_str(&format!(" AND subject_id = ?{}", bind_values.len() + 1));
                    bind_values.push(Box::new(subject_id.clone()));
                }
                if let Some(ref types) = filter.types {
                    let mut slots = Vec::with_capacity(types.len());
                    for t in types {
                        bind_values.push(Box::new(t.code()));
                        slots.push(format!("?{}", bind_values.len()));
                    }
                    sql.push_str(&format!(" AND scan_type IN ({})", slots.join(", ")));
                }
                if let Some(since) = filter.since {
                    sql.push_str(&format!(" AND scanned_at >= ?{}", bind_values.len() + 1));
                    bind_values.push(Box::new(since));
                }
                if let Some(until) = filter.until {
                    sql.push_str(&format!(" AND scanned_at <= ?{}", bind_values.len() + 1));
                    bind_values.push(Box::new(until));
                }
                if let Some(ref owner_id) = filter.owner_id {
                    sql.push_str(&format!(
                        " AND subject_id IN (SELECT id FROM subjects WHERE owner_id = ?{})",
                        bind_values.len() + 1
                    ));
                    bind_values.push(Box::new(owner_id.clone()));
                }

                sql.push_str(" ORDER BY scanned_at ASC, id ASC");

                if let Some(limit) = filter.limit {
                    sql.push_str(&format!(
                        " LIMIT ?{} OFFSET ?{}",
                        bind_values.len() + 1,
                        bind_values.len() + 2
                    ));
                    bind_values.push(Box::new(limit));
                    bind_values.push(Box::new(filter.offset.unwrap_or(0)));
                }

                let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                    bind_values.iter().map(|b| b.as_ref()).collect();

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_ref.as_slice(), |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?;

                let mut scans = Vec::new();
                for row in rows {
                    let (id, code, subject_id, scanned_at) = row?;
                    match ScanType::from_code(code) {
                        Some(scan_type) => {
                            scans.push(ScanEvent::from_millis(id, scan_type, scanned_at, subject_id))
                        }
                        None => tracing::warn!(id, code, "skipping scan with unknown type code"),
                    }
                }
                Ok::<_, rusqlite::Error>(scans)
            })
            .await??;

        Ok(scans)
    }

    /// Append one scan stamped with the current time. Returns the new row id.
    pub async fn record_scan(&self, scan_type: ScanType, subject_id: &str) -> AppResult<i64> {
        let subject_id = subject_id.to_string();
        let now_ms = chrono::Utc::now().timestamp_millis();

        let conn = self.pool.get().await?;
        let id = conn
            .interact(move |conn| {
                conn.execute(
                    "INSERT INTO scans (scan_type, subject_id, scanned_at, received_at)
                     VALUES (?1, ?2, ?3, ?3)",
                    params![scan_type.code(), subject_id, now_ms],
                )?;
                Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
            })
            .await??;

        Ok(id)
    }

    /// Whether the database answers a trivial query.
    pub async fn ping(&self) -> bool {
        match self.pool.get().await {
            Ok(conn) => matches!(
                conn.interact(|conn| conn.execute_batch("SELECT 1")).await,
                Ok(Ok(()))
            ),
            Err(_) => false,
        }
    }
}
