/// Wire message types for client-server communication
use crate::column::{ColumnType, ColumnValue};
use crate::config::ViewConfig;
use crate::data::DataResponse;
use crate::error::{EngineError, SourceSpan};
use crate::features::Features;
use crate::table::{Schema, TableData, TableOptions};
use crate::view::{ViewDimensions, ViewWindow};
use serde::{Deserialize, Serialize};

/// Requests sent from client to session: `{"cmd": "...", "args": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "args", rename_all = "snake_case")]
pub enum Request {
    /// Session bootstrap.
    Init,

    GetHostedTables,

    GetFeatures,

    /// Create a table. Hosted tables are visible to every client.
    MakeTable {
        table_id: String,
        data: TableData,
        #[serde(default)]
        options: TableOptions,
        #[serde(default)]
        hosted: bool,
    },

    TableSchema { table_id: String },

    TableSize { table_id: String },

    TableValidateExpression { table_id: String, expression: String },

    TableUpdate { table_id: String, data: TableData },

    /// Remove rows by index value (or implicit row id).
    TableRemove { table_id: String, keys: Vec<ColumnValue> },

    TableDelete { table_id: String },

    TableMakeView {
        table_id: String,
        view_id: String,
        #[serde(default)]
        config: ViewConfig,
    },

    ViewGetConfig { view_id: String },

    ViewSchema { view_id: String },

    ViewExpressionSchema { view_id: String },

    ViewDimensions { view_id: String },

    ViewColumnPaths { view_id: String },

    ViewToColumnsString {
        view_id: String,
        #[serde(default)]
        window: ViewWindow,
    },

    ViewToJsonString {
        view_id: String,
        #[serde(default)]
        window: ViewWindow,
    },

    ViewGetData {
        view_id: String,
        #[serde(default)]
        window: ViewWindow,
    },

    ViewDelete { view_id: String },
}

/// Responses sent from session to client, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Init { client_id: String },

    Tables { tables: Vec<String> },

    Features { features: Features },

    Schema { schema: Schema },

    Size { size: usize },

    ColumnType { column_type: ColumnType },

    /// Rows removed by `table_remove`.
    Removed { count: usize },

    Config { config: ViewConfig },

    Dimensions { dimensions: ViewDimensions },

    ColumnPaths { paths: Vec<String> },

    /// Pre-serialized JSON from `view_to_columns_string`/`view_to_json_string`.
    Json { json: String },

    Data { data: DataResponse },

    /// The request succeeded with nothing to return.
    Ok,

    Error {
        kind: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        span: Option<SourceSpan>,
    },
}

impl From<EngineError> for Response {
    fn from(error: EngineError) -> Self {
        Response::Error {
            kind: error.kind().to_string(),
            span: error.span(),
            message: error.to_string(),
        }
    }
}
