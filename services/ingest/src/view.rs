//! View Query/Filter Layer
//!
//! Pure transforms over rows already fetched from the store:
//! - Date presets relative to an injected "today"
//! - Categorical filters and their option lists
//! - Free-text search, date sort, pagination
//!
//! Also the issuance before/after 18:00 split, the errors-tab display
//! helper, and the audit log filter.

use std::collections::BTreeSet;

use chrono::{Datelike, DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fields::RecordKind;
use crate::normalize::{normalize_text, parse_date};
use crate::records::AuditEntry;
use crate::store::StoredRow;

pub const PAGE_SIZE: usize = 50;
pub const AUDIT_PAGE_SIZE: usize = 10;

/// Placeholder shown for a missing value
pub const EMPTY_DISPLAY: &str = "—";

/// Dimension value meaning "no filter"
const ALL: &str = "All";

// =============================================================================
// VIEW SPECS
// =============================================================================

/// Fixed shape of one list view
#[derive(Debug, Clone, Copy)]
pub struct ViewSpec {
    /// Field the date preset and sort apply to
    pub date_field: &'static str,
    pub search_fields: &'static [&'static str],
    /// Fields offered as categorical filters
    pub dimensions: &'static [&'static str],
    /// Also search the values of `raw_data`
    pub search_raw: bool,
    pub page_size: usize,
}

pub const BILLING_VIEW: ViewSpec = ViewSpec {
    date_field: "issue_date",
    search_fields: &["policy_no", "client_name", "vehicle_no", "insurer", "cn_no", "account_no"],
    dimensions: &["insurer"],
    search_raw: false,
    page_size: PAGE_SIZE,
};

pub const OCR_VIEW: ViewSpec = ViewSpec {
    date_field: "created_at",
    search_fields: &["vehicle_no", "insured_name", "insurer", "file_name", "type_of_cover"],
    dimensions: &["insurer"],
    search_raw: false,
    page_size: PAGE_SIZE,
};

pub const ISSUANCE_VIEW: ViewSpec = ViewSpec {
    date_field: "purchased_date",
    search_fields: &["plate_no", "customer", "insurer", "partner", "coverage"],
    dimensions: &["insurer", "partner"],
    search_raw: false,
    page_size: PAGE_SIZE,
};

pub const ERRORS_VIEW: ViewSpec = ViewSpec {
    date_field: "created_at",
    search_fields: &["rejection_reason", "file_name", "source"],
    dimensions: &["source"],
    search_raw: true,
    page_size: PAGE_SIZE,
};

pub fn view_spec(kind: RecordKind) -> &'static ViewSpec {
    match kind {
        RecordKind::InsurerBilling => &BILLING_VIEW,
        RecordKind::Ocr => &OCR_VIEW,
        RecordKind::Issuance => &ISSUANCE_VIEW,
    }
}

// =============================================================================
// DATE PRESETS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "preset", rename_all = "snake_case")]
pub enum DatePreset {
    AllTime,
    #[default]
    ThisMonth,
    LastMonth,
    /// Inclusive; a missing `to` means the single day `from`
    Custom { from: NaiveDate, to: Option<NaiveDate> },
}

fn first_of_month(d: NaiveDate) -> NaiveDate {
    d - Duration::days(i64::from(d.day0()))
}

fn last_of_month(d: NaiveDate) -> NaiveDate {
    let first = first_of_month(d);
    let next = first + Duration::days(32);
    first_of_month(next) - Duration::days(1)
}

impl DatePreset {
    /// Inclusive date range, `None` for all time
    pub fn range(&self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match *self {
            Self::AllTime => None,
            Self::ThisMonth => Some((first_of_month(today), last_of_month(today))),
            Self::LastMonth => {
                let end = first_of_month(today) - Duration::days(1);
                Some((first_of_month(end), end))
            }
            Self::Custom { from, to } => {
                let to = to.unwrap_or(from);
                Some((from.min(to), from.max(to)))
            }
        }
    }

    /// Undated rows pass only the all-time preset
    pub fn contains(&self, date: Option<NaiveDate>, today: NaiveDate) -> bool {
        match (self.range(today), date) {
            (None, _) => true,
            (Some((start, end)), Some(d)) => start <= d && d <= end,
            (Some(_), None) => false,
        }
    }

    /// Parse `all_time | this_month | last_month | custom`.
    ///
    /// No preset means this month, as does `custom` without a `from` date.
    pub fn parse(
        name: Option<&str>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Self, String> {
        match name.map(str::trim).unwrap_or("") {
            "" | "this_month" => Ok(Self::ThisMonth),
            "all_time" | "all" => Ok(Self::AllTime),
            "last_month" => Ok(Self::LastMonth),
            "custom" => Ok(from.map_or(Self::ThisMonth, |from| Self::Custom { from, to })),
            other => Err(format!("unknown date preset '{}'", other)),
        }
    }
}

// =============================================================================
// FILTERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewFilters {
    pub preset: DatePreset,
    /// (dimension field, selected value); "All" and empty are ignored
    pub dimensions: Vec<(String, String)>,
    pub search: String,
    pub sort: SortOrder,
}

impl ViewFilters {
    pub fn selected(&self, dimension: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|(d, _)| d == dimension)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty() && *v != ALL)
    }

    /// Same filtering, ignoring how "no selection" is spelled
    pub fn equivalent(&self, other: &ViewFilters) -> bool {
        self.preset == other.preset
            && self.search == other.search
            && self.sort == other.sort
            && self
                .dimensions
                .iter()
                .chain(&other.dimensions)
                .all(|(d, _)| self.selected(d) == other.selected(d))
    }

    /// Opaque text form, handed to clients and sent back as `prev`
    pub fn key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_key(key: &str) -> Result<Self, String> {
        serde_json::from_str(key).map_err(|e| format!("invalid 'prev' filters: {}", e))
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn field_text(row: &StoredRow, field: &str) -> Option<String> {
    row.get(field).and_then(value_text)
}

/// Parsed date-time of a row field, if it parses
pub fn row_datetime(row: &StoredRow, field: &str) -> Option<NaiveDateTime> {
    field_text(row, field).and_then(|s| parse_date(&s))
}

pub fn filter_by_date(
    rows: &[StoredRow],
    field: &str,
    preset: DatePreset,
    today: NaiveDate,
) -> Vec<StoredRow> {
    rows.iter()
        .filter(|row| preset.contains(row_datetime(row, field).map(|dt| dt.date()), today))
        .cloned()
        .collect()
}

/// Exact match on a dimension; `None` or "All" keeps every row
pub fn filter_by_dimension(rows: Vec<StoredRow>, field: &str, selected: Option<&str>) -> Vec<StoredRow> {
    match selected.filter(|s| !s.is_empty() && *s != ALL) {
        None => rows,
        Some(wanted) => rows
            .into_iter()
            .filter(|row| field_text(row, field).as_deref() == Some(wanted))
            .collect(),
    }
}

/// Sorted distinct non-empty values of a dimension
pub fn dimension_options(rows: &[StoredRow], field: &str) -> Vec<String> {
    rows.iter()
        .filter_map(|row| field_text(row, field))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn row_matches(row: &StoredRow, spec: &ViewSpec, needle: &str) -> bool {
    let hit = |v: &Value| value_text(v).is_some_and(|s| s.to_lowercase().contains(needle));
    if spec.search_fields.iter().any(|f| row.get(*f).is_some_and(hit)) {
        return true;
    }
    spec.search_raw
        && row
            .get("raw_data")
            .and_then(Value::as_object)
            .is_some_and(|raw| raw.values().any(hit))
}

/// Case-insensitive substring search; blank query keeps every row
pub fn search(rows: Vec<StoredRow>, spec: &ViewSpec, query: &str) -> Vec<StoredRow> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| row_matches(row, spec, &needle))
        .collect()
}

/// Stable sort on a date field; unparseable dates sort as the epoch
pub fn sort_by_date(rows: &mut [StoredRow], field: &str, order: SortOrder) {
    let key = |row: &StoredRow| {
        row_datetime(row, field).unwrap_or(DateTime::<Utc>::UNIX_EPOCH.naive_utc())
    };
    rows.sort_by(|a, b| {
        let ord = key(a).cmp(&key(b));
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

/// Date preset, dimensions, search, then sort
pub fn apply(
    rows: &[StoredRow],
    spec: &ViewSpec,
    filters: &ViewFilters,
    today: NaiveDate,
) -> Vec<StoredRow> {
    let mut out = filter_by_date(rows, spec.date_field, filters.preset, today);
    for dimension in spec.dimensions {
        out = filter_by_dimension(out, dimension, filters.selected(dimension));
    }
    let mut out = search(out, spec, &filters.search);
    sort_by_date(&mut out, spec.date_field, filters.sort);
    out
}

// =============================================================================
// PAGINATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based, clamped into `1..=total_pages`
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub page_size: usize,
}

pub fn total_pages(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1)).max(1)
}

pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Page<T> {
    let size = page_size.max(1);
    let pages = total_pages(items.len(), size);
    let page = page.clamp(1, pages);
    let start = (page - 1) * size;
    Page {
        items: items.iter().skip(start).take(size).cloned().collect(),
        page,
        total_pages: pages,
        total_items: items.len(),
        page_size: size,
    }
}

// =============================================================================
// VIEW STATE
// =============================================================================

/// Interactive filter state; any filter change sends the view back to page 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    filters: ViewFilters,
    page: usize,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            filters: ViewFilters::default(),
            page: 1,
        }
    }
}

impl ViewState {
    pub fn new(filters: ViewFilters) -> Self {
        Self { filters, page: 1 }
    }

    pub fn filters(&self) -> &ViewFilters {
        &self.filters
    }

    pub fn page(&self) -> usize {
        self.page
    }

    fn changed(&mut self, changed: bool) {
        if changed {
            self.page = 1;
        }
    }

    /// Replace the filters; the page goes back to 1 unless nothing changed
    pub fn update(&mut self, filters: ViewFilters) {
        let changed = !self.filters.equivalent(&filters);
        self.filters = filters;
        self.changed(changed);
    }

    fn set_dimension(&mut self, dimension: &str, value: Option<&str>) {
        let before = self.filters.selected(dimension).map(str::to_string);
        self.filters.dimensions.retain(|(d, _)| d != dimension);
        if let Some(v) = value {
            self.filters.dimensions.push((dimension.to_string(), v.to_string()));
        }
        let after = self.filters.selected(dimension).map(str::to_string);
        self.changed(before != after);
    }

    /// Drop a selection that is no longer among the offered options
    pub fn reconcile_options(&mut self, dimension: &str, options: &[String]) {
        let stale = self
            .filters
            .selected(dimension)
            .is_some_and(|sel| !options.is_empty() && !options.iter().any(|o| o == sel));
        if stale {
            self.set_dimension(dimension, None);
        }
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page.max(1);
    }
}

// =============================================================================
// HTTP QUERY
// =============================================================================

/// Query-string form of a view request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewQuery {
    pub preset: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub insurer: Option<String>,
    pub partner: Option<String>,
    pub source: Option<String>,
    pub q: Option<String>,
    pub sort: Option<SortOrder>,
    pub page: Option<usize>,
    /// `filters_key` of the previous response for this view
    pub prev: Option<String>,
}

impl ViewQuery {
    pub fn filters(&self) -> Result<ViewFilters, String> {
        let preset = DatePreset::parse(self.preset.as_deref(), self.from, self.to)?;
        let dimensions = [
            ("insurer", &self.insurer),
            ("partner", &self.partner),
            ("source", &self.source),
        ]
        .into_iter()
        .filter_map(|(d, v)| v.as_ref().map(|v| (d.to_string(), v.clone())))
        .collect();
        Ok(ViewFilters {
            preset,
            dimensions,
            search: self.q.clone().unwrap_or_default(),
            sort: self.sort.unwrap_or_default(),
        })
    }

    pub fn page(&self) -> usize {
        self.page.unwrap_or(1)
    }

    /// Previous request's filters at the requested page, then this
    /// request's filters on top. Without `prev` the page is taken as is.
    pub fn state(&self) -> Result<ViewState, String> {
        let filters = self.filters()?;
        let previous = match self.prev.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => ViewFilters::from_key(key)?,
            None => filters.clone(),
        };
        let mut state = ViewState::new(previous);
        state.set_page(self.page());
        state.update(filters);
        Ok(state)
    }
}

// =============================================================================
// ISSUANCE STATS
// =============================================================================

/// Issuances purchased before vs at-or-after the 18:00 cutoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TimeSplit {
    pub before_cutoff: usize,
    pub after_cutoff: usize,
    pub undated: usize,
}

pub fn issuance_time_split(rows: &[StoredRow]) -> TimeSplit {
    let cutoff = NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN);
    rows.iter().fold(TimeSplit::default(), |mut acc, row| {
        match row_datetime(row, "purchased_date") {
            Some(dt) if dt.time() < cutoff => acc.before_cutoff += 1,
            Some(_) => acc.after_cutoff += 1,
            None => acc.undated += 1,
        }
        acc
    })
}

// =============================================================================
// ERRORS TAB
// =============================================================================

fn display(value: &Value) -> Option<String> {
    value_text(value)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Best-effort value from a quarantined raw row.
///
/// Tries each key by normalized header equality, then any header containing
/// one of the keys; "—" when nothing is found.
pub fn raw_display_value(raw: &Map<String, Value>, keys: &[&str]) -> String {
    let wanted: Vec<String> = keys.iter().map(|k| normalize_text(k)).collect();

    let exact = wanted.iter().find_map(|k| {
        raw.iter()
            .find(|(header, _)| normalize_text(header) == *k)
            .and_then(|(_, v)| display(v))
    });
    if let Some(v) = exact {
        return v;
    }

    raw.iter()
        .filter(|(header, _)| {
            let header = normalize_text(header);
            wanted.iter().any(|k| header.contains(k.as_str()))
        })
        .find_map(|(_, v)| display(v))
        .unwrap_or_else(|| EMPTY_DISPLAY.to_string())
}

// =============================================================================
// AUDIT LOG
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum AuditRange {
    #[default]
    #[serde(rename = "all")]
    All,
    #[serde(rename = "7d")]
    Days7,
    #[serde(rename = "30d")]
    Days30,
    #[serde(rename = "90d")]
    Days90,
}

impl AuditRange {
    /// Rolling window ending now
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = match self {
            Self::All => return None,
            Self::Days7 => 7,
            Self::Days30 => 30,
            Self::Days90 => 90,
        };
        Some(now - Duration::days(days))
    }
}

/// Time window and keyword search, newest first
pub fn filter_audit(
    entries: &[AuditEntry],
    range: AuditRange,
    keyword: &str,
    now: DateTime<Utc>,
) -> Vec<AuditEntry> {
    let since = range.since(now);
    let needle = keyword.trim().to_lowercase();
    let mut out: Vec<AuditEntry> = entries
        .iter()
        .filter(|e| since.map_or(true, |s| e.time >= s))
        .filter(|e| {
            needle.is_empty()
                || [&e.user_name, &e.event_type, &e.change, &e.item_affected]
                    .iter()
                    .any(|f| f.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect();
    out.sort_by(|a, b| b.time.cmp(&a.time));
    out
}
