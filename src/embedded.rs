//! The in-process backend: tables and views held in memory.

use crate::column::{ColumnType, ColumnValue};
use crate::config::ViewConfig;
use crate::data::{DataResponse, DataSlice};
use crate::error::{EngineError, Result};
use crate::features::Features;
use crate::handle::TableHandle;
use crate::handler::VirtualServerHandler;
use crate::table::{Schema, Table, TableData, TableOptions};
use crate::view::{View, ViewWindow};
use async_trait::async_trait;
use indexmap::IndexMap;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Owns [`TableHandle`]s and [`View`]s by id. Each table carries its own
/// lock, so calls against different tables never wait on each other.
#[derive(Default)]
pub struct EmbeddedHandler {
    tables: RwLock<IndexMap<String, TableHandle>>,
    views: RwLock<HashMap<String, Arc<View>>>,
}

impl EmbeddedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing table under its name.
    pub fn add_table(&self, table: Table) -> Result<TableHandle> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.contains_key(table.name()) {
            return Err(EngineError::DuplicateId(table.name().to_string()));
        }
        let handle = TableHandle::new(table);
        info!("Hosting table '{}'", handle.name());
        tables.insert(handle.name().to_string(), handle.clone());
        Ok(handle)
    }

    pub fn table(&self, table_id: &str) -> Result<TableHandle> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("table '{}'", table_id)))
    }

    pub fn view(&self, view_id: &str) -> Result<Arc<View>> {
        self.views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(view_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("view '{}'", view_id)))
    }
}

#[async_trait]
impl VirtualServerHandler for EmbeddedHandler {
    async fn get_hosted_tables(&self) -> Result<Vec<String>> {
        Ok(self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    async fn table_schema(&self, table_id: &str) -> Result<Schema> {
        self.table(table_id)?.schema()
    }

    async fn table_size(&self, table_id: &str) -> Result<usize> {
        self.table(table_id)?.size()
    }

    async fn table_make_view(&self, table_id: &str, view_id: &str, config: &ViewConfig) -> Result<()> {
        let table = self.table(table_id)?;
        let mut views = self.views.write().unwrap_or_else(PoisonError::into_inner);
        if views.get(view_id).map(|v| v.is_alive()).unwrap_or(false) {
            return Err(EngineError::DuplicateId(view_id.to_string()));
        }
        let view = table.view(config.clone())?;
        views.insert(view_id.to_string(), Arc::new(view));
        debug!("Registered view '{}' on table '{}'", view_id, table_id);
        Ok(())
    }

    async fn view_delete(&self, view_id: &str) -> Result<()> {
        let removed = self
            .views
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(view_id);
        match removed {
            Some(view) => view.delete(),
            None => Ok(()),
        }
    }

    async fn view_get_data(&self, view_id: &str, _config: &ViewConfig, window: &ViewWindow) -> Result<DataSlice> {
        self.view(view_id)?.get_data(window)
    }

    async fn table_column_size(&self, table_id: &str) -> Result<usize> {
        Ok(self.table(table_id)?.schema()?.len())
    }

    async fn view_size(&self, view_id: &str) -> Result<usize> {
        self.view(view_id)?.num_rows()
    }

    async fn view_schema(&self, view_id: &str, _config: &ViewConfig) -> Result<Schema> {
        self.view(view_id)?.schema()
    }

    async fn view_column_size(&self, view_id: &str, _config: &ViewConfig) -> Result<usize> {
        self.view(view_id)?.num_columns()
    }

    async fn view_column_paths(&self, view_id: &str, _config: &ViewConfig) -> Result<Vec<String>> {
        self.view(view_id)?.column_paths(&ViewWindow::default())
    }

    async fn view_expression_schema(&self, view_id: &str, _config: &ViewConfig) -> Result<Schema> {
        self.view(view_id)?.expression_schema()
    }

    async fn view_data_response(&self, view_id: &str, _config: &ViewConfig, window: &ViewWindow) -> Result<DataResponse> {
        self.view(view_id)?.to_data_response(window)
    }

    async fn table_validate_expression(&self, table_id: &str, expression: &str) -> Result<ColumnType> {
        self.table(table_id)?.validate_expression(expression)
    }

    async fn get_features(&self) -> Result<Features> {
        Ok(Features::all())
    }

    async fn make_table(&self, table_id: &str, data: &TableData, options: &TableOptions) -> Result<()> {
        let table = Table::from_data(table_id.to_string(), data, options.clone())?;
        self.add_table(table).map(|_| ())
    }

    async fn table_update(&self, table_id: &str, data: &TableData) -> Result<()> {
        self.table(table_id)?.update_data(data)
    }

    async fn table_remove(&self, table_id: &str, keys: &[ColumnValue]) -> Result<usize> {
        self.table(table_id)?.remove(keys)
    }

    /// Drops the table. Views over it stay registered but fail with
    /// `ViewInvalidated` until deleted.
    async fn table_delete(&self, table_id: &str) -> Result<()> {
        let removed = self
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(table_id);
        match removed {
            Some(table) => table.delete(),
            None => Err(EngineError::NotFound(format!("table '{}'", table_id))),
        }
    }
}
