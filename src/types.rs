use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Category of a scanned artifact. The numeric codes are what the `scans`
/// table stores; 2 and 3 are reserved for event tickets and carry no default
/// output field.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Url,
    Vcard,
    EventTicketUnused,
    EventTicketUsed,
    Ticket,
    Product,
}

impl ScanType {
    pub const ALL: [ScanType; 6] = [
        ScanType::Url,
        ScanType::Vcard,
        ScanType::EventTicketUnused,
        ScanType::EventTicketUsed,
        ScanType::Ticket,
        ScanType::Product,
    ];

    pub fn code(self) -> i64 {
        match self {
            ScanType::Url => 0,
            ScanType::Vcard => 1,
            ScanType::EventTicketUnused => 2,
            ScanType::EventTicketUsed => 3,
            ScanType::Ticket => 4,
            ScanType::Product => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Url => "url",
            ScanType::Vcard => "vcard",
            ScanType::EventTicketUnused => "event_ticket_unused",
            ScanType::EventTicketUsed => "event_ticket_used",
            ScanType::Ticket => "ticket",
            ScanType::Product => "product",
        }
    }

    /// Parse a chart field / query-string name (`"url"`, `"vcard"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded scan of a subject. `scanned_at` is optional only because
/// the aggregation accepts input from outside the store; stored rows always
/// carry it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanEvent {
    pub id: i64,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub scanned_at: Option<DateTime<Utc>>,
    pub subject_id: String,
}

impl ScanEvent {
    /// Build from a stored millisecond timestamp. Out-of-range values become `None`.
    pub fn from_millis(id: i64, scan_type: ScanType, scanned_at_ms: i64, subject_id: String) -> Self {
        Self {
            id,
            scan_type,
            scanned_at: Utc.timestamp_millis_opt(scanned_at_ms).single(),
            subject_id,
        }
    }
}

/// Wire payload for recording a scan.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RecordScan {
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub subject_id: String,
    /// Milliseconds since epoch; defaults to receive time.
    pub scanned_at: Option<i64>,
}

/// Scan ready for the writer, timestamps resolved.
#[derive(Debug, Clone)]
pub struct ProcessedScan {
    pub scan_type: ScanType,
    pub subject_id: String,
    pub scanned_at: i64,
    pub received_at: i64,
}

/// Pagination parameters.
#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PaginationParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub db_ok: bool,
    pub buffer_usage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let codes: Vec<i64> = ScanType::ALL.iter().map(|t| t.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(ScanType::from_code(4), Some(ScanType::Ticket));
        assert_eq!(ScanType::from_code(9), None);
        assert_eq!(ScanType::from_code(-1), None);
    }

    #[test]
    fn test_from_name_is_case_insensitive() {
        assert_eq!(ScanType::from_name("VCard"), Some(ScanType::Vcard));
        assert_eq!(ScanType::from_name(" product "), Some(ScanType::Product));
        assert_eq!(ScanType::from_name("coupon"), None);
    }

    #[test]
    fn test_record_scan_wire_format() {
        let scan: RecordScan =
            serde_json::from_str(r#"{"type":"vcard","subject_id":"card-1"}"#).unwrap();
        assert_eq!(scan.scan_type, ScanType::Vcard);
        assert_eq!(scan.subject_id, "card-1");
        assert!(scan.scanned_at.is_none());

        let err = serde_json::from_str::<RecordScan>(r#"{"type":"fax","subject_id":"x"}"#);
        assert!(err.is_err(), "unknown scan type must be rejected at the wire");
    }

    #[test]
    fn test_from_millis_rejects_out_of_range() {
        let ok = ScanEvent::from_millis(1, ScanType::Url, 1_735_689_600_000, "a".into());
        assert!(ok.scanned_at.is_some());
        let bad = ScanEvent::from_millis(2, ScanType::Url, i64::MAX, "a".into());
        assert!(bad.scanned_at.is_none());
    }
}
