use crate::config::IngestConfig;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::types::{ProcessedScan, RecordScan};
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Scans may be back-dated freely but not stamped further ahead than this.
const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

pub struct IngestState {
    pub config: IngestConfig,
    pub tx: mpsc::Sender<ProcessedScan>,
}

fn validate_scan(scan: &RecordScan, config: &IngestConfig, now_ms: i64) -> AppResult<()> {
    if scan.subject_id.trim().is_empty() {
        return Err(AppError::Validation("subject_id is required".to_string()));
    }
    if scan.subject_id.len() > config.max_subject_id_bytes {
        return Err(AppError::Validation(format!(
            "subject_id exceeds {} bytes",
            config.max_subject_id_bytes
        )));
    }
    if let Some(ts) = scan.scanned_at {
        if ts < 0 {
            return Err(AppError::Validation(
                "scanned_at must be a positive millisecond timestamp".to_string(),
            ));
        }
        if ts > now_ms + MAX_CLOCK_SKEW_MS {
            return Err(AppError::Validation(
                "scanned_at is in the future".to_string(),
            ));
        }
    }
    Ok(())
}

/// Validate and stamp a scan for the writer.
pub fn process_scan(scan: RecordScan, config: &IngestConfig) -> AppResult<ProcessedScan> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    validate_scan(&scan, config, now_ms)?;

    Ok(ProcessedScan {
        scan_type: scan.scan_type,
        subject_id: scan.subject_id,
        scanned_at: scan.scanned_at.unwrap_or(now_ms),
        received_at: now_ms,
    })
}

/// POST /v1/scans - Record one scan.
pub async fn record_single(
    State(state): State<Arc<IngestState>>,
    LoggedJson(scan): LoggedJson<RecordScan>,
) -> AppResult<Json<serde_json::Value>> {
    let processed = process_scan(scan, &state.config)?;

    // Backpressure: ACK even when the channel is full.
    if state.tx.try_send(processed).is_err() {
        tracing::warn!("scan channel full, scan dropped");
    }

    Ok(Json(serde_json::json!({ "status": "accepted" })))
}

#[derive(Deserialize)]
pub struct BatchPayload {
    pub scans: Vec<RecordScan>,
}

/// POST /v1/scans/batch - Record several scans; invalid items are reported by index.
pub async fn record_batch(
    State(state): State<Arc<IngestState>>,
    LoggedJson(payload): LoggedJson<BatchPayload>,
) -> AppResult<Json<serde_json::Value>> {
    if payload.scans.len() > state.config.max_batch_size {
        return Err(AppError::Validation(format!(
            "batch exceeds max size of {}",
            state.config.max_batch_size
        )));
    }

    let mut accepted = 0u64;
    let mut dropped = 0u64;
    let mut errors = Vec::new();

    for (i, scan) in payload.scans.into_iter().enumerate() {
        match process_scan(scan, &state.config) {
            Ok(processed) => {
                if state.tx.try_send(processed).is_err() {
                    dropped += 1;
                } else {
                    accepted += 1;
                }
            }
            Err(e) => {
                errors.push(serde_json::json!({
                    "index": i,
                    "error": e.to_string(),
                }));
            }
        }
    }

    if dropped > 0 {
        tracing::warn!(dropped, "scan channel full, batch partially dropped");
    }

    Ok(Json(serde_json::json!({
        "accepted": accepted,
        "dropped": dropped,
        "errors": errors,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScanType;

    fn config() -> IngestConfig {
        IngestConfig {
            max_payload_bytes: 32768,
            max_subject_id_bytes: 16,
            max_batch_size: 10,
            channel_capacity: 16,
        }
    }

    fn scan(subject: &str, scanned_at: Option<i64>) -> RecordScan {
        RecordScan {
            scan_type: ScanType::Vcard,
            subject_id: subject.to_string(),
            scanned_at,
        }
    }

    #[test]
    fn test_defaults_scanned_at_to_receive_time() {
        let processed = process_scan(scan("card-1", None), &config()).unwrap();
        assert_eq!(processed.scanned_at, processed.received_at);
        assert_eq!(processed.scan_type, ScanType::Vcard);
    }

    #[test]
    fn test_keeps_backdated_timestamp() {
        let processed = process_scan(scan("card-1", Some(1_700_000_000_000)), &config()).unwrap();
        assert_eq!(processed.scanned_at, 1_700_000_000_000);
    }

    #[test]
    fn test_rejects_bad_subjects_and_times() {
        assert!(process_scan(scan("  ", None), &config()).is_err());
        assert!(process_scan(scan("a-very-long-subject-id", None), &config()).is_err());
        assert!(process_scan(scan("card-1", Some(-5)), &config()).is_err());
        let tomorrow = chrono::Utc::now().timestamp_millis() + 86_400_000;
        assert!(process_scan(scan("card-1", Some(tomorrow)), &config()).is_err());
    }
}
