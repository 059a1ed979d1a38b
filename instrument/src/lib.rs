//! Event capture for trade simulation runs.
//!
//! A `tracing` subscriber turns every info-level event into one row of the
//! table named after the event's target. Columns appear the first time a
//! field is seen; rows that never set a field hold a null there.
//!
//! # Usage
//!
//! ```ignore
//! // In simulation code:
//! tracing::info!(target: "caravan", event = "sell", item = %item, qty, price);
//!
//! // In a test:
//! let capture = instrument::Capture::begin();
//! // ... run the ledger ...
//! let journal = capture.finish();
//! let sales = journal.table("caravan").unwrap().to_dataframe()?;
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::subscriber::{DefaultGuard, Interest};
use tracing::{Event, Id, Level, Metadata, Subscriber};

/// One recorded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Count(u64),
    Real(f64),
    Flag(bool),
    Text(String),
}

/// Nullable column storage. The variant is fixed by the first value seen.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Int(Vec<Option<i64>>),
    Count(Vec<Option<u64>>),
    Real(Vec<Option<f64>>),
    Flag(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
}

impl Values {
    fn empty_like(cell: &Cell, rows: usize) -> Self {
        match cell {
            Cell::Int(_) => Values::Int(vec![None; rows]),
            Cell::Count(_) => Values::Count(vec![None; rows]),
            Cell::Real(_) => Values::Real(vec![None; rows]),
            Cell::Flag(_) => Values::Flag(vec![None; rows]),
            Cell::Text(_) => Values::Text(vec![None; rows]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Int(v) => v.len(),
            Values::Count(v) => v.len(),
            Values::Real(v) => v.len(),
            Values::Flag(v) => v.len(),
            Values::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a value, widening integers where that loses nothing. Returns false
    /// (and pushes a null) when the value does not fit the column.
    fn push(&mut self, cell: Cell) -> bool {
        match (self, cell) {
            (Values::Int(v), Cell::Int(x)) => v.push(Some(x)),
            (Values::Int(v), Cell::Count(x)) if x <= i64::MAX as u64 => v.push(Some(x as i64)),
            (Values::Count(v), Cell::Count(x)) => v.push(Some(x)),
            (Values::Count(v), Cell::Int(x)) if x >= 0 => v.push(Some(x as u64)),
            (Values::Real(v), Cell::Real(x)) => v.push(Some(x)),
            (Values::Real(v), Cell::Int(x)) => v.push(Some(x as f64)),
            (Values::Real(v), Cell::Count(x)) => v.push(Some(x as f64)),
            (Values::Flag(v), Cell::Flag(x)) => v.push(Some(x)),
            (Values::Text(v), Cell::Text(x)) => v.push(Some(x)),
            (column, _) => {
                column.push_null();
                return false;
            }
        }
        true
    }

    fn push_null(&mut self) {
        match self {
            Values::Int(v) => v.push(None),
            Values::Count(v) => v.push(None),
            Values::Real(v) => v.push(None),
            Values::Flag(v) => v.push(None),
            Values::Text(v) => v.push(None),
        }
    }

    fn to_column(&self, name: &str) -> Column {
        match self {
            Values::Int(v) => Column::new(name.into(), v),
            Values::Count(v) => Column::new(name.into(), v),
            Values::Real(v) => Column::new(name.into(), v),
            Values::Flag(v) => Column::new(name.into(), v),
            Values::Text(v) => Column::new(name.into(), v),
        }
    }
}

/// Rows captured for one target. Columns keep first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Table {
    names: Vec<String>,
    index: HashMap<String, usize>,
    columns: Vec<Values>,
    rows: usize,
    /// Values dropped because their type clashed with the column.
    pub rejected: usize,
}

impl Table {
    pub fn height(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<&Values> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    /// Rows whose text field `name` equals `value`.
    pub fn count_where(&self, name: &str, value: &str) -> usize {
        match self.column(name) {
            Some(Values::Text(v)) => v.iter().filter(|x| x.as_deref() == Some(value)).count(),
            _ => 0,
        }
    }

    /// Sum of a numeric column, nulls skipped.
    pub fn sum(&self, name: &str) -> f64 {
        match self.column(name) {
            Some(Values::Int(v)) => v.iter().flatten().map(|&x| x as f64).sum(),
            Some(Values::Count(v)) => v.iter().flatten().map(|&x| x as f64).sum(),
            Some(Values::Real(v)) => v.iter().flatten().sum(),
            _ => 0.0,
        }
    }

    fn append(&mut self, row: Vec<(String, Cell)>) {
        for (name, cell) in row {
            let slot = match self.index.get(&name) {
                Some(&i) => i,
                None => {
                    self.columns.push(Values::empty_like(&cell, self.rows));
                    self.names.push(name.clone());
                    self.index.insert(name, self.columns.len() - 1);
                    self.columns.len() - 1
                }
            };
            let column = &mut self.columns[slot];
            // A repeated field within one event keeps the first value.
            if column.len() > self.rows {
                continue;
            }
            if !column.push(cell) {
                self.rejected += 1;
            }
        }
        self.rows += 1;
        for column in &mut self.columns {
            while column.len() < self.rows {
                column.push_null();
            }
        }
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .names
            .iter()
            .zip(&self.columns)
            .map(|(name, values)| values.to_column(name))
            .collect();
        DataFrame::new(columns)
    }
}

/// All tables from one capture, keyed by target.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    tables: BTreeMap<String, Table>,
}

impl Journal {
    pub fn table(&self, target: &str) -> Option<&Table> {
        self.tables.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Row count per target.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        self.tables
            .iter()
            .map(|(target, table)| (target.clone(), table.height()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn to_dataframes(&self) -> PolarsResult<BTreeMap<String, DataFrame>> {
        self.tables
            .iter()
            .map(|(target, table)| Ok((target.clone(), table.to_dataframe()?)))
            .collect()
    }
}

thread_local! {
    static JOURNAL: RefCell<Journal> = RefCell::default();
}

/// Take everything captured on this thread so far.
pub fn take() -> Journal {
    JOURNAL.with(|j| std::mem::take(&mut *j.borrow_mut()))
}

pub fn clear() {
    JOURNAL.with(|j| *j.borrow_mut() = Journal::default());
}

// === Subscriber ===

#[derive(Default)]
struct RowVisitor {
    row: Vec<(String, Cell)>,
}

impl RowVisitor {
    fn put(&mut self, field: &Field, cell: Cell) {
        self.row.push((field.name().to_string(), cell));
    }
}

impl Visit for RowVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Cell::Int(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Cell::Count(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Cell::Real(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Cell::Flag(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Cell::Text(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Cell::Text(format!("{value:?}")));
    }
}

/// Subscriber that appends info-level events to the thread-local journal.
/// Spans are ignored.
#[derive(Debug, Clone, Default)]
pub struct TableSubscriber {
    /// When set, only these targets are kept.
    only: Option<BTreeSet<String>>,
}

impl TableSubscriber {
    pub fn only<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            only: Some(targets.into_iter().map(Into::into).collect()),
        }
    }

    fn wants(&self, target: &str) -> bool {
        self.only.as_ref().is_none_or(|set| set.contains(target))
    }
}

impl Subscriber for TableSubscriber {
    // Captures are scoped per thread with different filters, so callsite
    // interest cannot be cached.
    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
        Interest::sometimes()
    }

    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= Level::INFO && self.wants(metadata.target())
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut visitor = RowVisitor::default();
        event.record(&mut visitor);
        let target = event.metadata().target().to_string();
        JOURNAL.with(|j| {
            j.borrow_mut()
                .tables
                .entry(target)
                .or_default()
                .append(visitor.row);
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Scoped capture on the current thread. Starts from an empty journal and
/// restores the previous default subscriber when finished or dropped.
pub struct Capture {
    guard: DefaultGuard,
}

impl Capture {
    pub fn begin() -> Self {
        Self::with_subscriber(TableSubscriber::default())
    }

    pub fn targets<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_subscriber(TableSubscriber::only(targets))
    }

    fn with_subscriber(subscriber: TableSubscriber) -> Self {
        clear();
        Self {
            guard: tracing::subscriber::set_default(subscriber),
        }
    }

    /// Stop capturing and hand back what was recorded.
    pub fn finish(self) -> Journal {
        drop(self.guard);
        take()
    }
}
