//! PivotView - Columnar View Engine
//!
//! Typed in-memory tables, views with filter, sort, pivot and computed
//! columns, windowed column-major reads, and a [`VirtualServerHandler`]
//! surface that lets SQL engines serve the same table/view contract.
//!
//! ```
//! use pivotview::{Table, TableHandle, ViewConfig, ViewWindow};
//!
//! let table = TableHandle::new(
//!     Table::from_json("sales", r#"[{"Region": "West", "Sales": 10.0}, {"Region": "East", "Sales": 5.0}]"#).unwrap(),
//! );
//! let config: ViewConfig = serde_json::from_str(r#"{"group_by": ["Region"], "columns": ["Sales"]}"#).unwrap();
//! let view = table.view(config).unwrap();
//! let columns = view.to_columns(&ViewWindow::default()).unwrap();
//! assert_eq!(columns["Sales"], serde_json::json!([15.0, 10.0, 5.0]));
//! ```

pub mod aggregate;
pub mod column;
pub mod config;
pub mod data;
pub mod embedded;
pub mod error;
pub mod expr;
pub mod features;
pub mod handle;
pub mod handler;
pub mod messages;
pub mod pivot;
pub mod session;
pub mod sql_handler;
pub mod sql_model;
pub mod table;
pub mod view;

pub use aggregate::Aggregate;
pub use column::{Column, ColumnType, ColumnValue};
pub use config::{Filter, FilterOp, FilterTerm, Scalar, Sort, SortDir, ViewConfig};
pub use data::{DataColumn, DataResponse, DataSlice, SetDataColumn};
pub use embedded::EmbeddedHandler;
pub use error::{EngineError, Result, SourceSpan};
pub use expr::validate_expression;
pub use features::Features;
pub use handle::TableHandle;
pub use handler::VirtualServerHandler;
pub use messages::{Request, Response};
pub use session::Session;
pub use sql_handler::{QueryResult, SqlConnection, SqlDialect, SqlHandler};
pub use sql_model::{SqlModel, SqlModelOptions};
pub use table::{Row, Schema, Table, TableData, TableOptions};
pub use view::{View, ViewDimensions, ViewWindow};

// WebSocket server modules - only when server feature is enabled
#[cfg(feature = "server")]
pub mod websocket;
#[cfg(feature = "server")]
pub mod server;
