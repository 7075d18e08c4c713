//! Shared table handles.
//!
//! A [`TableHandle`] is the unit that views and backends hold on to. Reads
//! and writes go through a lock so views created on one thread observe
//! updates made on another; deleting the handle invalidates every view.

use crate::column::{ColumnType, ColumnValue};
use crate::config::{ViewConfig, ViewPlan};
use crate::error::{EngineError, Result};
use crate::expr;
use crate::table::{Row, Schema, Table, TableData};
use crate::view::View;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

struct Shared {
    name: String,
    alive: AtomicBool,
    data: RwLock<Option<Table>>,
}

/// Cloneable reference to a live table.
#[derive(Clone)]
pub struct TableHandle {
    shared: Arc<Shared>,
}

impl TableHandle {
    pub fn new(table: Table) -> Self {
        TableHandle {
            shared: Arc::new(Shared {
                name: table.name().to_string(),
                alive: AtomicBool::new(true),
                data: RwLock::new(Some(table)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Runs `f` against the table under a read lock.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Table) -> Result<T>) -> Result<T> {
        if !self.is_alive() {
            return Err(EngineError::ViewInvalidated);
        }
        let guard = self.shared.data.read().unwrap_or_else(PoisonError::into_inner);
        let table = guard.as_ref().ok_or(EngineError::ViewInvalidated)?;
        f(table)
    }

    /// Runs `f` against the table under the write lock.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        if !self.is_alive() {
            return Err(EngineError::ViewInvalidated);
        }
        let mut guard = self.shared.data.write().unwrap_or_else(PoisonError::into_inner);
        let table = guard.as_mut().ok_or(EngineError::ViewInvalidated)?;
        f(table)
    }

    pub fn schema(&self) -> Result<Schema> {
        self.read(|t| Ok(t.schema().clone()))
    }

    pub fn size(&self) -> Result<usize> {
        self.read(|t| Ok(t.len()))
    }

    pub fn index_column(&self) -> Result<Option<String>> {
        self.read(|t| Ok(t.index_column().map(str::to_string)))
    }

    pub fn update(&self, rows: Vec<Row>) -> Result<()> {
        let count = rows.len();
        self.write(|t| t.update(rows))?;
        debug!("Updated table '{}' with {} rows", self.name(), count);
        Ok(())
    }

    pub fn update_data(&self, data: &TableData) -> Result<()> {
        self.write(|t| t.update_data(data))
    }

    pub fn remove(&self, keys: &[ColumnValue]) -> Result<usize> {
        let removed = self.write(|t| t.remove(keys))?;
        debug!("Removed {} rows from table '{}'", removed, self.name());
        Ok(removed)
    }

    pub fn validate_expression(&self, source: &str) -> Result<ColumnType> {
        self.read(|t| expr::validate_expression(t.schema(), source))
    }

    /// Creates a view. The config is fully validated first; on error no
    /// view exists.
    pub fn view(&self, config: ViewConfig) -> Result<View> {
        let plan = self.read(|t| ViewPlan::new(config, t.schema()))?;
        Ok(View::new(self.clone(), plan))
    }

    /// Drops the table data. Every view over it becomes invalid. Deleting
    /// twice is a no-op.
    pub fn delete(&self) -> Result<()> {
        if !self.shared.alive.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut guard = self.shared.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
        info!("Deleted table '{}'", self.shared.name);
        Ok(())
    }
}

impl std::fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandle")
            .field("name", &self.shared.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}
