use crate::analytics::engine::MonthFormat;
use crate::error::{AppError, AppResult};
use crate::types::ScanType;
use serde::Deserialize;

/// GET /analytics/monthly
#[derive(Debug, Deserialize)]
pub struct MonthlyParams {
    #[serde(rename = "subjectId", alias = "subject_id")]
    pub subject_id: Option<String>,
    /// Comma-separated field names, e.g. `url,vcard,ticket,product`.
    pub types: Option<String>,
    /// `name` or `name+year`.
    pub format: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

/// GET /analytics/monthly/vcard-only
#[derive(Debug, Deserialize)]
pub struct SingleTypeParams {
    #[serde(rename = "subjectId", alias = "subject_id")]
    pub subject_id: Option<String>,
    pub format: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

/// GET /analytics/monthly/by-subject/{id}
#[derive(Debug, Deserialize)]
pub struct BySubjectParams {
    #[serde(rename = "type")]
    pub scan_type: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

/// Parse a comma-separated type list, keeping request order and dropping
/// duplicates. An absent or blank list yields `defaults`.
pub fn parse_types(raw: Option<&str>, defaults: &[ScanType]) -> AppResult<Vec<ScanType>> {
    let mut types = Vec::new();
    for name in raw.unwrap_or("").split(',').map(str::trim) {
        if name.is_empty() {
            continue;
        }
        let scan_type = ScanType::from_name(name)
            .ok_or_else(|| AppError::Validation(format!("unknown scan type: {name}")))?;
        if !types.contains(&scan_type) {
            types.push(scan_type);
        }
    }
    if types.is_empty() {
        types.extend_from_slice(defaults);
    }
    Ok(types)
}

pub fn parse_format(raw: Option<&str>, default: MonthFormat) -> AppResult<MonthFormat> {
    match raw {
        Some(s) if !s.trim().is_empty() => s.parse().map_err(AppError::Validation),
        _ => Ok(default),
    }
}

pub fn check_range(since: Option<i64>, until: Option<i64>) -> AppResult<()> {
    if let (Some(since), Some(until)) = (since, until) {
        if since > until {
            return Err(AppError::Validation(
                "since must not be after until".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_types_keeps_order_and_dedupes() {
        let types = parse_types(Some("product, url,product"), &[]).unwrap();
        assert_eq!(types, vec![ScanType::Product, ScanType::Url]);
    }

    #[test]
    fn test_parse_types_defaults_when_blank() {
        let defaults = [ScanType::Vcard];
        assert_eq!(parse_types(None, &defaults).unwrap(), vec![ScanType::Vcard]);
        assert_eq!(parse_types(Some(" , "), &defaults).unwrap(), vec![ScanType::Vcard]);
    }

    #[test]
    fn test_parse_types_rejects_unknown() {
        let err = parse_types(Some("url,coupon"), &[]).unwrap_err();
        assert!(err.to_string().contains("coupon"));
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format(None, MonthFormat::NameYear).unwrap(), MonthFormat::NameYear);
        assert_eq!(parse_format(Some("name"), MonthFormat::NameYear).unwrap(), MonthFormat::Name);
        assert!(parse_format(Some("quarter"), MonthFormat::Name).is_err());
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(Some(1), Some(2)).is_ok());
        assert!(check_range(Some(3), None).is_ok());
        assert!(check_range(Some(3), Some(2)).is_err());
    }
}
