//! Month bucketing of scan events into chart-ready series.
//!
//! Everything here is a pure function over an in-memory slice. Events without
//! a timestamp are dropped and scan types missing from the [`TypeMap`] are
//! counted towards no field.

use crate::types::{ScanEvent, ScanType};
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::HashMap;
use std::str::FromStr;

/// How a bucket's month label is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonthFormat {
    /// `"January"`; the same month of different years shares one bucket.
    #[default]
    Name,
    /// `"January 2025"`.
    NameYear,
}

impl MonthFormat {
    pub fn label(self, at: &DateTime<Utc>) -> String {
        match self {
            MonthFormat::Name => at.format("%B").to_string(),
            MonthFormat::NameYear => at.format("%B %Y").to_string(),
        }
    }
}

impl FromStr for MonthFormat {
    type Err = String;

    // A literal `+` in a query string decodes to a space, so accept both.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" | "month" => Ok(MonthFormat::Name),
            "name+year" | "name year" | "name_year" | "month+year" | "month_year" => {
                Ok(MonthFormat::NameYear)
            }
            other => Err(format!(
                "invalid month format: {other}. Valid values: name, name+year"
            )),
        }
    }
}

/// Ordered association of scan types to output field names.
///
/// Field order is the order of first registration. Several types may share a
/// field, in which case their scans are summed into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMap {
    fields: Vec<String>,
    slots: Vec<(ScanType, usize)>,
}

impl TypeMap {
    pub fn empty() -> Self {
        Self {
            fields: Vec::new(),
            slots: Vec::new(),
        }
    }

    /// Map `scan_type` to `field`. Re-mapping a type moves it to the new field.
    pub fn with(mut self, scan_type: ScanType, field: impl Into<String>) -> Self {
        let field = field.into();
        let idx = match self.fields.iter().position(|f| *f == field) {
            Some(idx) => idx,
            None => {
                self.fields.push(field);
                self.fields.len() - 1
            }
        };
        self.slots.retain(|(t, _)| *t != scan_type);
        self.slots.push((scan_type, idx));
        self
    }

    /// One field per type, named after the type.
    pub fn from_types(types: &[ScanType]) -> Self {
        types
            .iter()
            .fold(Self::empty(), |map, t| map.with(*t, t.as_str()))
    }

    pub fn field_index(&self, scan_type: ScanType) -> Option<usize> {
        self.slots
            .iter()
            .find(|(t, _)| *t == scan_type)
            .map(|(_, idx)| *idx)
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn types(&self) -> impl Iterator<Item = ScanType> + '_ {
        self.slots.iter().map(|(t, _)| *t)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for TypeMap {
    fn default() -> Self {
        Self::from_types(&[
            ScanType::Url,
            ScanType::Vcard,
            ScanType::Ticket,
            ScanType::Product,
        ])
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    pub type_map: TypeMap,
    pub month_format: MonthFormat,
}

#[derive(Debug, Clone, Default)]
pub struct SingleTypeOptions {
    pub subject_id: Option<String>,
    pub month_format: MonthFormat,
    /// Output field name; defaults to the scan type's name.
    pub field: Option<String>,
}

/// Counts for one month label, positionally aligned with the series' fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthRecord {
    pub month: String,
    pub counts: Vec<u64>,
}

/// Month buckets in output order. Serializes as
/// `[{ "month": "January", "<field>": n, ... }, ...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlySeries {
    fields: Vec<String>,
    records: Vec<MonthRecord>,
}

/// A [`MonthlySeries`] with exactly one field.
pub type SingleTypeSeries = MonthlySeries;

impl MonthlySeries {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn records(&self) -> &[MonthRecord] {
        &self.records
    }

    pub fn months(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.month.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, month: &str, field: &str) -> Option<u64> {
        let idx = self.fields.iter().position(|f| f == field)?;
        self.records
            .iter()
            .find(|r| r.month == month)
            .map(|r| r.counts[idx])
    }

    pub fn total(&self, field: &str) -> u64 {
        match self.fields.iter().position(|f| f == field) {
            Some(idx) => self.records.iter().map(|r| r.counts[idx]).sum(),
            None => 0,
        }
    }

    /// Flatten one field into a `label -> count` mapping, keeping bucket order.
    pub fn label_counts(&self, field: &str) -> LabelCounts {
        let idx = self.fields.iter().position(|f| f == field);
        LabelCounts(
            self.records
                .iter()
                .map(|r| (r.month.clone(), idx.map_or(0, |i| r.counts[i])))
                .collect(),
        )
    }
}

impl Serialize for MonthlySeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.records.len()))?;
        for record in &self.records {
            seq.serialize_element(&RecordView {
                fields: &self.fields,
                record,
            })?;
        }
        seq.end()
    }
}

struct RecordView<'a> {
    fields: &'a [String],
    record: &'a MonthRecord,
}

impl Serialize for RecordView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("month", &self.record.month)?;
        for (field, count) in self.fields.iter().zip(&self.record.counts) {
            map.serialize_entry(field, count)?;
        }
        map.end()
    }
}

/// `{ "<label>": count, ... }` in bucket order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCounts(pub Vec<(String, u64)>);

impl Serialize for LabelCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, count) in &self.0 {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

struct Bucket {
    month: String,
    earliest: DateTime<Utc>,
    counts: Vec<u64>,
}

fn bucket_events<'a>(
    events: impl IntoIterator<Item = &'a ScanEvent>,
    type_map: &TypeMap,
    month_format: MonthFormat,
) -> MonthlySeries {
    let width = type_map.fields().len();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<Bucket> = Vec::new();

    for event in events {
        let Some(at) = event.scanned_at else {
            continue;
        };
        let label = month_format.label(&at);
        let slot = match index.get(&label) {
            Some(&slot) => slot,
            None => {
                index.insert(label.clone(), buckets.len());
                buckets.push(Bucket {
                    month: label,
                    earliest: at,
                    counts: vec![0; width],
                });
                buckets.len() - 1
            }
        };

        let bucket = &mut buckets[slot];
        if at < bucket.earliest {
            bucket.earliest = at;
        }
        if let Some(field) = type_map.field_index(event.scan_type) {
            bucket.counts[field] += 1;
        }
    }

    // Stable: equal timestamps keep first-seen order. Already sorted when the
    // input is ascending by scanned_at.
    buckets.sort_by_key(|b| b.earliest);

    MonthlySeries {
        fields: type_map.fields().to_vec(),
        records: buckets
            .into_iter()
            .map(|b| MonthRecord {
                month: b.month,
                counts: b.counts,
            })
            .collect(),
    }
}

/// Bucket `events` by month label with one count per mapped field.
pub fn aggregate_by_month(events: &[ScanEvent], options: &AggregateOptions) -> MonthlySeries {
    bucket_events(events, &options.type_map, options.month_format)
}

/// Bucket only the scans of `scan_type` (and of `options.subject_id`, when set).
/// Filtering happens before labels are computed, so foreign scans never open a bucket.
pub fn aggregate_single_type(
    events: &[ScanEvent],
    scan_type: ScanType,
    options: &SingleTypeOptions,
) -> SingleTypeSeries {
    let field = options
        .field
        .clone()
        .unwrap_or_else(|| scan_type.as_str().to_string());
    let type_map = TypeMap::empty().with(scan_type, field);
    let subject = options.subject_id.as_deref();

    let scoped = events
        .iter()
        .filter(|e| e.scan_type == scan_type && subject.map_or(true, |s| e.subject_id == s));
    bucket_events(scoped, &type_map, options.month_format)
}
