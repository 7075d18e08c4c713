//! The virtual server handler surface.
//!
//! Every backend (the embedded engine, a SQL database, anything else that
//! can answer table and view queries) implements [`VirtualServerHandler`].
//! The session only ever talks to `Arc<dyn VirtualServerHandler>`.

use crate::column::{ColumnType, ColumnValue};
use crate::config::ViewConfig;
use crate::data::{DataResponse, DataSlice};
use crate::error::{EngineError, Result};
use crate::features::Features;
use crate::table::{Schema, TableData, TableOptions};
use crate::view::ViewWindow;
use async_trait::async_trait;

/// Backend for tables and views addressed by string ids.
///
/// Synchronous backends simply return ready futures. Optional methods have
/// defaults: sizes and schemas fall back to the table-level calls, and the
/// mutating extras report `Unsupported`.
#[async_trait]
pub trait VirtualServerHandler: Send + Sync {
    // Required

    /// Names of the tables this backend serves to every client.
    async fn get_hosted_tables(&self) -> Result<Vec<String>>;

    async fn table_schema(&self, table_id: &str) -> Result<Schema>;

    async fn table_size(&self, table_id: &str) -> Result<usize>;

    /// Compiles `config` against `table_id` and registers the result under
    /// `view_id`.
    async fn table_make_view(&self, table_id: &str, view_id: &str, config: &ViewConfig) -> Result<()>;

    /// Releases a view and whatever the backend allocated for it.
    async fn view_delete(&self, view_id: &str) -> Result<()>;

    /// Reads `window` of a view into a fresh slice.
    async fn view_get_data(&self, view_id: &str, config: &ViewConfig, window: &ViewWindow) -> Result<DataSlice>;

    // Optional

    async fn table_column_size(&self, table_id: &str) -> Result<usize> {
        Ok(self.table_schema(table_id).await?.len())
    }

    async fn view_size(&self, view_id: &str) -> Result<usize> {
        self.table_size(view_id).await
    }

    async fn view_schema(&self, view_id: &str, _config: &ViewConfig) -> Result<Schema> {
        self.table_schema(view_id).await
    }

    async fn view_column_size(&self, view_id: &str, config: &ViewConfig) -> Result<usize> {
        Ok(self.view_schema(view_id, config).await?.len())
    }

    async fn view_column_paths(&self, view_id: &str, config: &ViewConfig) -> Result<Vec<String>> {
        let schema = self.view_schema(view_id, config).await?;
        Ok(schema.column_names().into_iter().map(str::to_string).collect())
    }

    async fn view_expression_schema(&self, _view_id: &str, _config: &ViewConfig) -> Result<Schema> {
        Schema::new(Vec::new())
    }

    /// The window in the grid renderer's response shape. Backends whose
    /// views change underneath readers override this to read the data and
    /// its sizes from one snapshot.
    async fn view_data_response(&self, view_id: &str, config: &ViewConfig, window: &ViewWindow) -> Result<DataResponse> {
        let slice = self.view_get_data(view_id, config, window).await?;
        let num_rows = self.view_size(view_id).await?;
        let num_columns = self.view_column_size(view_id, config).await?;
        Ok(slice.to_data_response(
            num_rows,
            num_columns,
            config.group_by.len(),
            config.split_by.len() + 1,
        ))
    }

    /// Type-checks an expression. Backends without a checker report float.
    async fn table_validate_expression(&self, _table_id: &str, _expression: &str) -> Result<ColumnType> {
        Ok(ColumnType::Float)
    }

    async fn get_features(&self) -> Result<Features> {
        Ok(Features::default())
    }

    async fn make_table(&self, _table_id: &str, _data: &TableData, _options: &TableOptions) -> Result<()> {
        Err(EngineError::Unsupported("make_table".to_string()))
    }

    async fn table_update(&self, _table_id: &str, _data: &TableData) -> Result<()> {
        Err(EngineError::Unsupported("table_update".to_string()))
    }

    async fn table_remove(&self, _table_id: &str, _keys: &[ColumnValue]) -> Result<usize> {
        Err(EngineError::Unsupported("table_remove".to_string()))
    }

    async fn table_delete(&self, _table_id: &str) -> Result<()> {
        Err(EngineError::Unsupported("table_delete".to_string()))
    }
}
