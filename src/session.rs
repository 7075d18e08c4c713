//! Session: the id registry in front of a backend.
//!
//! A [`Session`] maps caller-chosen table and view ids onto one
//! [`VirtualServerHandler`], tracks which client owns what, and routes wire
//! [`Request`]s. Hosted tables are visible to every client; private tables
//! only to the client that created them. Deleted view ids are remembered so
//! later calls fail with `ViewInvalidated` instead of `NotFound`.

use crate::column::{ColumnType, ColumnValue};
use crate::config::ViewConfig;
use crate::data::DataResponse;
use crate::error::{EngineError, Result};
use crate::features::Features;
use crate::handler::VirtualServerHandler;
use crate::messages::{Request, Response};
use crate::table::{Schema, TableData, TableOptions};
use crate::view::{ViewDimensions, ViewWindow};
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Owner of a table: `None` for hosted tables.
#[derive(Debug, Clone)]
struct TableEntry {
    owner: Option<String>,
}

#[derive(Debug, Clone)]
struct ViewEntry {
    client: String,
    table_id: String,
    config: ViewConfig,
    /// False while the backend is still building the view.
    ready: bool,
    /// Which `table_make_view` call reserved the id.
    reservation: u64,
}

#[derive(Debug, Default)]
struct Registry {
    next_client: u64,
    next_reservation: u64,
    clients: HashSet<String>,
    tables: IndexMap<String, TableEntry>,
    views: HashMap<String, ViewEntry>,
    retired: HashSet<String>,
}

impl Registry {
    fn visible(&self, client: &str, table_id: &str) -> bool {
        match self.tables.get(table_id) {
            Some(TableEntry { owner: None }) => true,
            Some(TableEntry { owner: Some(owner) }) => owner == client,
            None => false,
        }
    }

    fn check_client(&self, client: &str) -> Result<()> {
        if self.clients.contains(client) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("client '{}'", client)))
        }
    }

    fn check_table(&self, client: &str, table_id: &str) -> Result<()> {
        self.check_client(client)?;
        if self.visible(client, table_id) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("table '{}'", table_id)))
        }
    }

    fn view(&self, client: &str, view_id: &str) -> Result<ViewEntry> {
        self.check_client(client)?;
        match self.views.get(view_id) {
            Some(entry) if entry.ready && entry.client == client => Ok(entry.clone()),
            _ if self.retired.contains(view_id) => Err(EngineError::ViewInvalidated),
            _ => Err(EngineError::NotFound(format!("view '{}'", view_id))),
        }
    }

    /// Moves a view to the retired set; true if it was registered.
    fn retire(&mut self, view_id: &str) -> bool {
        let removed = self.views.remove(view_id).is_some();
        if removed {
            self.retired.insert(view_id.to_string());
        }
        removed
    }
}

/// Multi-client front end over one backend.
///
/// ```
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// use pivotview::{EmbeddedHandler, Session, TableData, TableOptions, ViewConfig, ViewWindow};
/// use std::sync::Arc;
///
/// let session = Session::new(Arc::new(EmbeddedHandler::new()));
/// let client = session.init().await.unwrap();
/// let data = TableData::Json(r#"[{"x": 1}, {"x": 2}]"#.to_string());
/// session.make_table(&client, "t", &data, &TableOptions::default(), false).await.unwrap();
/// session.table_make_view(&client, "t", "v", ViewConfig::default()).await.unwrap();
/// let json = session.view_to_columns_string(&client, "v", &ViewWindow::default()).await.unwrap();
/// assert_eq!(json, r#"{"x":[1,2]}"#);
/// # });
/// ```
pub struct Session {
    handler: Arc<dyn VirtualServerHandler>,
    registry: Mutex<Registry>,
}

impl Session {
    pub fn new(handler: Arc<dyn VirtualServerHandler>) -> Self {
        Session {
            handler,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn handler(&self) -> &Arc<dyn VirtualServerHandler> {
        &self.handler
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new client and picks up the backend's hosted tables.
    pub async fn init(&self) -> Result<String> {
        let hosted = self.handler.get_hosted_tables().await?;
        let mut registry = self.registry();
        for table_id in hosted {
            registry.tables.entry(table_id).or_insert(TableEntry { owner: None });
        }
        registry.next_client += 1;
        let client = format!("client-{}", registry.next_client);
        registry.clients.insert(client.clone());
        info!("Client '{}' connected", client);
        Ok(client)
    }

    /// Deletes the client's views and private tables. Backend failures are
    /// logged and skipped so cleanup always finishes.
    pub async fn close_client(&self, client: &str) {
        let (views, tables) = {
            let mut registry = self.registry();
            if !registry.clients.remove(client) {
                return;
            }
            let views: Vec<String> = registry
                .views
                .iter()
                .filter(|(_, entry)| entry.client == client)
                .map(|(id, _)| id.clone())
                .collect();
            for view_id in &views {
                registry.retire(view_id);
            }
            let tables: Vec<String> = registry
                .tables
                .iter()
                .filter(|(_, entry)| entry.owner.as_deref() == Some(client))
                .map(|(id, _)| id.clone())
                .collect();
            (views, tables)
        };

        for view_id in &views {
            if let Err(e) = self.handler.view_delete(view_id).await {
                warn!("Failed to delete view '{}': {}", view_id, e);
            }
        }
        for table_id in &tables {
            if let Err(e) = self.delete_table(table_id).await {
                warn!("Failed to delete table '{}': {}", table_id, e);
            }
        }
        info!(
            "Client '{}' disconnected, released {} views and {} tables",
            client,
            views.len(),
            tables.len()
        );
    }

    /// Hosted tables plus the client's own.
    pub async fn get_hosted_tables(&self, client: &str) -> Result<Vec<String>> {
        let registry = self.registry();
        registry.check_client(client)?;
        Ok(registry
            .tables
            .keys()
            .filter(|id| registry.visible(client, id))
            .cloned()
            .collect())
    }

    pub async fn get_features(&self) -> Result<Features> {
        self.handler.get_features().await
    }

    pub async fn make_table(
        &self,
        client: &str,
        table_id: &str,
        data: &TableData,
        options: &TableOptions,
        hosted: bool,
    ) -> Result<()> {
        {
            let mut registry = self.registry();
            registry.check_client(client)?;
            if registry.tables.contains_key(table_id) {
                return Err(EngineError::DuplicateId(table_id.to_string()));
            }
            let owner = if hosted { None } else { Some(client.to_string()) };
            registry.tables.insert(table_id.to_string(), TableEntry { owner });
        }
        if let Err(e) = self.handler.make_table(table_id, data, options).await {
            self.registry().tables.shift_remove(table_id);
            return Err(e);
        }
        debug!("Client '{}' created table '{}'", client, table_id);
        Ok(())
    }

    pub async fn table_schema(&self, client: &str, table_id: &str) -> Result<Schema> {
        self.registry().check_table(client, table_id)?;
        self.handler.table_schema(table_id).await
    }

    pub async fn table_size(&self, client: &str, table_id: &str) -> Result<usize> {
        self.registry().check_table(client, table_id)?;
        self.handler.table_size(table_id).await
    }

    pub async fn table_validate_expression(&self, client: &str, table_id: &str, expression: &str) -> Result<ColumnType> {
        self.registry().check_table(client, table_id)?;
        self.handler.table_validate_expression(table_id, expression).await
    }

    pub async fn table_update(&self, client: &str, table_id: &str, data: &TableData) -> Result<()> {
        self.registry().check_table(client, table_id)?;
        self.handler.table_update(table_id, data).await
    }

    pub async fn table_remove(&self, client: &str, table_id: &str, keys: &[ColumnValue]) -> Result<usize> {
        self.registry().check_table(client, table_id)?;
        self.handler.table_remove(table_id, keys).await
    }

    /// Deletes a table and invalidates every view over it, whoever owns
    /// the view.
    pub async fn table_delete(&self, client: &str, table_id: &str) -> Result<()> {
        self.registry().check_table(client, table_id)?;
        self.delete_table(table_id).await
    }

    async fn delete_table(&self, table_id: &str) -> Result<()> {
        let views: Vec<String> = {
            let mut registry = self.registry();
            let views: Vec<String> = registry
                .views
                .iter()
                .filter(|(_, entry)| entry.table_id == table_id)
                .map(|(id, _)| id.clone())
                .collect();
            for view_id in &views {
                registry.retire(view_id);
            }
            registry.tables.shift_remove(table_id);
            views
        };
        for view_id in &views {
            if let Err(e) = self.handler.view_delete(view_id).await {
                warn!("Failed to delete view '{}' of table '{}': {}", view_id, table_id, e);
            }
        }
        self.handler.table_delete(table_id).await?;
        info!("Deleted table '{}' and {} dependent views", table_id, views.len());
        Ok(())
    }

    /// Builds a view. The id is reserved before the backend call, so a
    /// concurrent request for the same id fails with `DuplicateId`.
    pub async fn table_make_view(&self, client: &str, table_id: &str, view_id: &str, config: ViewConfig) -> Result<()> {
        let reservation = {
            let mut registry = self.registry();
            registry.check_table(client, table_id)?;
            if registry.views.contains_key(view_id) {
                return Err(EngineError::DuplicateId(view_id.to_string()));
            }
            registry.next_reservation += 1;
            let reservation = registry.next_reservation;
            registry.views.insert(
                view_id.to_string(),
                ViewEntry {
                    client: client.to_string(),
                    table_id: table_id.to_string(),
                    config: config.clone(),
                    ready: false,
                    reservation,
                },
            );
            reservation
        };

        let result = self.handler.table_make_view(table_id, view_id, &config).await;
        {
            let mut guard = self.registry();
            let registry = &mut *guard;
            let entry = registry
                .views
                .get_mut(view_id)
                .filter(|entry| entry.reservation == reservation);
            match (result, entry) {
                (Ok(()), Some(entry)) => {
                    entry.ready = true;
                    registry.retired.remove(view_id);
                    debug!("Client '{}' created view '{}' on '{}'", client, view_id, table_id);
                    return Ok(());
                }
                (Ok(()), None) => {}
                (Err(e), entry) => {
                    if entry.is_some() {
                        registry.views.remove(view_id);
                    }
                    return Err(e);
                }
            }
        }

        // The table was deleted while the view was being built: the id is
        // already retired, so drop what the backend built.
        if let Err(e) = self.handler.view_delete(view_id).await {
            warn!("Failed to delete orphaned view '{}': {}", view_id, e);
        }
        Err(EngineError::ViewInvalidated)
    }

    pub async fn view_get_config(&self, client: &str, view_id: &str) -> Result<ViewConfig> {
        Ok(self.registry().view(client, view_id)?.config)
    }

    pub async fn view_schema(&self, client: &str, view_id: &str) -> Result<Schema> {
        let entry = self.registry().view(client, view_id)?;
        self.handler.view_schema(view_id, &entry.config).await
    }

    pub async fn view_expression_schema(&self, client: &str, view_id: &str) -> Result<Schema> {
        let entry = self.registry().view(client, view_id)?;
        self.handler.view_expression_schema(view_id, &entry.config).await
    }

    pub async fn view_dimensions(&self, client: &str, view_id: &str) -> Result<ViewDimensions> {
        let entry = self.registry().view(client, view_id)?;
        Ok(ViewDimensions {
            num_table_rows: self.handler.table_size(&entry.table_id).await?,
            num_table_columns: self.handler.table_column_size(&entry.table_id).await?,
            num_view_rows: self.handler.view_size(view_id).await?,
            num_view_columns: self.handler.view_column_size(view_id, &entry.config).await?,
        })
    }

    pub async fn view_column_paths(&self, client: &str, view_id: &str) -> Result<Vec<String>> {
        let entry = self.registry().view(client, view_id)?;
        self.handler.view_column_paths(view_id, &entry.config).await
    }

    pub async fn view_to_columns_string(&self, client: &str, view_id: &str, window: &ViewWindow) -> Result<String> {
        let entry = self.registry().view(client, view_id)?;
        self.handler
            .view_get_data(view_id, &entry.config, window)
            .await?
            .to_columns_string()
    }

    pub async fn view_to_json_string(&self, client: &str, view_id: &str, window: &ViewWindow) -> Result<String> {
        let entry = self.registry().view(client, view_id)?;
        self.handler
            .view_get_data(view_id, &entry.config, window)
            .await?
            .to_rows_string()
    }

    /// The window in the grid renderer's response shape.
    pub async fn view_get_data(&self, client: &str, view_id: &str, window: &ViewWindow) -> Result<DataResponse> {
        let entry = self.registry().view(client, view_id)?;
        self.handler.view_data_response(view_id, &entry.config, window).await
    }

    /// Deleting an already deleted or unknown view is a no-op.
    pub async fn view_delete(&self, client: &str, view_id: &str) -> Result<()> {
        {
            let mut registry = self.registry();
            registry.check_client(client)?;
            match registry.views.get(view_id) {
                Some(entry) if entry.client == client && entry.ready => {
                    registry.retire(view_id);
                }
                Some(_) => return Err(EngineError::NotFound(format!("view '{}'", view_id))),
                None => return Ok(()),
            }
        }
        self.handler.view_delete(view_id).await
    }

    /// Routes one wire request. Failures become [`Response::Error`].
    pub async fn handle_request(&self, client: &str, request: Request) -> Response {
        match self.dispatch(client, request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Request from '{}' failed: {}", client, e);
                Response::from(e)
            }
        }
    }

    async fn dispatch(&self, client: &str, request: Request) -> Result<Response> {
        Ok(match request {
            Request::Init => Response::Init {
                client_id: self.init().await?,
            },
            Request::GetHostedTables => Response::Tables {
                tables: self.get_hosted_tables(client).await?,
            },
            Request::GetFeatures => Response::Features {
                features: self.get_features().await?,
            },
            Request::MakeTable {
                table_id,
                data,
                options,
                hosted,
            } => {
                self.make_table(client, &table_id, &data, &options, hosted).await?;
                Response::Ok
            }
            Request::TableSchema { table_id } => Response::Schema {
                schema: self.table_schema(client, &table_id).await?,
            },
            Request::TableSize { table_id } => Response::Size {
                size: self.table_size(client, &table_id).await?,
            },
            Request::TableValidateExpression { table_id, expression } => Response::ColumnType {
                column_type: self.table_validate_expression(client, &table_id, &expression).await?,
            },
            Request::TableUpdate { table_id, data } => {
                self.table_update(client, &table_id, &data).await?;
                Response::Ok
            }
            Request::TableRemove { table_id, keys } => Response::Removed {
                count: self.table_remove(client, &table_id, &keys).await?,
            },
            Request::TableDelete { table_id } => {
                self.table_delete(client, &table_id).await?;
                Response::Ok
            }
            Request::TableMakeView {
                table_id,
                view_id,
                config,
            } => {
                self.table_make_view(client, &table_id, &view_id, config).await?;
                Response::Ok
            }
            Request::ViewGetConfig { view_id } => Response::Config {
                config: self.view_get_config(client, &view_id).await?,
            },
            Request::ViewSchema { view_id } => Response::Schema {
                schema: self.view_schema(client, &view_id).await?,
            },
            Request::ViewExpressionSchema { view_id } => Response::Schema {
                schema: self.view_expression_schema(client, &view_id).await?,
            },
            Request::ViewDimensions { view_id } => Response::Dimensions {
                dimensions: self.view_dimensions(client, &view_id).await?,
            },
            Request::ViewColumnPaths { view_id } => Response::ColumnPaths {
                paths: self.view_column_paths(client, &view_id).await?,
            },
            Request::ViewToColumnsString { view_id, window } => Response::Json {
                json: self.view_to_columns_string(client, &view_id, &window).await?,
            },
            Request::ViewToJsonString { view_id, window } => Response::Json {
                json: self.view_to_json_string(client, &view_id, &window).await?,
            },
            Request::ViewGetData { view_id, window } => Response::Data {
                data: self.view_get_data(client, &view_id, &window).await?,
            },
            Request::ViewDelete { view_id } => {
                self.view_delete(client, &view_id).await?;
                Response::Ok
            }
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("Session")
            .field("clients", &registry.clients.len())
            .field("tables", &registry.tables.len())
            .field("views", &registry.views.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataSlice;
    use crate::embedded::EmbeddedHandler;
    use crate::table::Table;
    use serde_json::json;

    const SALES: &str = r#"[
        {"Region": "West", "Sales": 10.0},
        {"Region": "East", "Sales": 5.0},
        {"Region": "West", "Sales": 20.0}
    ]"#;

    async fn session() -> (Session, String) {
        let session = Session::new(Arc::new(EmbeddedHandler::new()));
        let client = session.init().await.unwrap();
        session
            .make_table(&client, "sales", &TableData::Json(SALES.to_string()), &TableOptions::default(), true)
            .await
            .unwrap();
        (session, client)
    }

    fn config(json: &str) -> ViewConfig {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_init_imports_hosted_tables() {
        let handler = EmbeddedHandler::new();
        let schema = Schema::new(vec![("x".to_string(), ColumnType::Integer)]).unwrap();
        handler
            .add_table(Table::new("preloaded".to_string(), schema, TableOptions::default()).unwrap())
            .unwrap();
        let session = Session::new(Arc::new(handler));
        let client = session.init().await.unwrap();
        assert_eq!(session.get_hosted_tables(&client).await.unwrap(), vec!["preloaded"]);
        assert!(matches!(
            session.get_hosted_tables("stranger").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_private_tables() {
        let (session, alice) = session().await;
        let bob = session.init().await.unwrap();
        session
            .make_table(&alice, "mine", &TableData::Json("[{\"a\": 1}]".to_string()), &TableOptions::default(), false)
            .await
            .unwrap();

        assert_eq!(session.get_hosted_tables(&alice).await.unwrap(), vec!["sales", "mine"]);
        assert_eq!(session.get_hosted_tables(&bob).await.unwrap(), vec!["sales"]);
        assert!(matches!(session.table_size(&bob, "mine").await, Err(EngineError::NotFound(_))));
        assert!(matches!(
            session
                .make_table(&bob, "mine", &TableData::Json("[]".to_string()), &TableOptions::default(), false)
                .await,
            Err(EngineError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_view_lifecycle() {
        let (session, client) = session().await;
        let cfg = config(r#"{"group_by": ["Region"], "columns": ["Sales"]}"#);
        session.table_make_view(&client, "sales", "v1", cfg.clone()).await.unwrap();
        assert!(matches!(
            session.table_make_view(&client, "sales", "v1", cfg.clone()).await,
            Err(EngineError::DuplicateId(_))
        ));
        assert_eq!(session.view_get_config(&client, "v1").await.unwrap(), cfg);

        let dims = session.view_dimensions(&client, "v1").await.unwrap();
        assert_eq!(dims.num_table_rows, 3);
        assert_eq!(dims.num_view_rows, 3);
        assert_eq!(dims.num_view_columns, 1);

        session.view_delete(&client, "v1").await.unwrap();
        session.view_delete(&client, "v1").await.unwrap();
        assert!(matches!(
            session.view_schema(&client, "v1").await,
            Err(EngineError::ViewInvalidated)
        ));

        session.table_make_view(&client, "sales", "v1", cfg).await.unwrap();
        assert_eq!(session.view_dimensions(&client, "v1").await.unwrap().num_view_rows, 3);
    }

    #[tokio::test]
    async fn test_failed_view_releases_id() {
        let (session, client) = session().await;
        assert!(matches!(
            session
                .table_make_view(&client, "sales", "v", config(r#"{"group_by": ["Nope"]}"#))
                .await,
            Err(EngineError::UnknownColumn(_))
        ));
        session.table_make_view(&client, "sales", "v", ViewConfig::default()).await.unwrap();
    }

    /// Holds every view build open until released, and tracks which views
    /// the backend still has.
    #[derive(Default)]
    struct Gated {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        views: Mutex<HashSet<String>>,
    }

    #[async_trait::async_trait]
    impl VirtualServerHandler for Gated {
        async fn get_hosted_tables(&self) -> Result<Vec<String>> {
            Ok(vec!["sales".to_string()])
        }

        async fn table_schema(&self, _table_id: &str) -> Result<Schema> {
            Schema::new(vec![("x".to_string(), ColumnType::Integer)])
        }

        async fn table_size(&self, _table_id: &str) -> Result<usize> {
            Ok(0)
        }

        async fn table_make_view(&self, _table_id: &str, view_id: &str, _config: &ViewConfig) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            self.views.lock().unwrap().insert(view_id.to_string());
            Ok(())
        }

        async fn view_delete(&self, view_id: &str) -> Result<()> {
            self.views.lock().unwrap().remove(view_id);
            Ok(())
        }

        async fn view_get_data(&self, _view_id: &str, _config: &ViewConfig, _window: &ViewWindow) -> Result<DataSlice> {
            Ok(DataSlice::new())
        }

        async fn table_delete(&self, _table_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_table_deleted_while_view_builds() {
        let backend = Arc::new(Gated::default());
        let session = Session::new(backend.clone());
        let client = session.init().await.unwrap();

        let (made, _) = tokio::join!(
            session.table_make_view(&client, "sales", "v", ViewConfig::default()),
            async {
                backend.entered.notified().await;
                session.table_delete(&client, "sales").await.unwrap();
                backend.release.notify_one();
            }
        );
        assert!(matches!(made, Err(EngineError::ViewInvalidated)));
        assert!(matches!(
            session.view_get_config(&client, "v").await,
            Err(EngineError::ViewInvalidated)
        ));
        assert!(backend.views.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_table_delete_cascades() {
        let (session, alice) = session().await;
        let bob = session.init().await.unwrap();
        session.table_make_view(&alice, "sales", "a", ViewConfig::default()).await.unwrap();
        session.table_make_view(&bob, "sales", "b", ViewConfig::default()).await.unwrap();

        session.table_delete(&alice, "sales").await.unwrap();
        for (client, view) in [(&alice, "a"), (&bob, "b")] {
            assert!(matches!(
                session.view_to_json_string(client, view, &ViewWindow::default()).await,
                Err(EngineError::ViewInvalidated)
            ));
        }
        assert!(session.get_hosted_tables(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_client() {
        let (session, alice) = session().await;
        let bob = session.init().await.unwrap();
        session
            .make_table(&alice, "mine", &TableData::Json("[{\"a\": 1}]".to_string()), &TableOptions::default(), false)
            .await
            .unwrap();
        session.table_make_view(&alice, "sales", "a", ViewConfig::default()).await.unwrap();

        session.close_client(&alice).await;
        session.close_client(&alice).await;
        assert!(session.handler().view_size("a").await.is_err());
        assert!(matches!(session.handler().table_size("mine").await, Err(EngineError::NotFound(_))));
        assert_eq!(session.get_hosted_tables(&bob).await.unwrap(), vec!["sales"]);
    }

    #[tokio::test]
    async fn test_handle_request() {
        let (session, client) = session().await;
        let request: Request = serde_json::from_value(json!({
            "cmd": "table_make_view",
            "args": {"table_id": "sales", "view_id": "v", "config": {"sort": [["Sales", "desc"]]}}
        }))
        .unwrap();
        assert_eq!(session.handle_request(&client, request).await, Response::Ok);

        let request = Request::ViewToColumnsString {
            view_id: "v".to_string(),
            window: ViewWindow::default(),
        };
        let Response::Json { json } = session.handle_request(&client, request).await else {
            panic!("expected json");
        };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["Sales"], json!([20.0, 10.0, 5.0]));

        let response = session
            .handle_request(&client, Request::ViewSchema { view_id: "missing".to_string() })
            .await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["kind"], "NotFound");
    }

    #[tokio::test]
    async fn test_get_data_response() {
        let (session, client) = session().await;
        session
            .table_make_view(&client, "sales", "v", config(r#"{"group_by": ["Region"], "columns": ["Sales"]}"#))
            .await
            .unwrap();
        let response = session.view_get_data(&client, "v", &ViewWindow::default()).await.unwrap();
        assert_eq!(response.num_rows, 3);
        assert_eq!(response.num_row_headers, 1);
        assert_eq!(response.row_headers, vec![vec![], vec![json!("West")], vec![json!("East")]]);
        assert_eq!(response.data, vec![vec![json!(35.0), json!(30.0), json!(5.0)]]);
        assert_eq!(response.metadata, vec![vec![json!(0), json!(1), json!(1)]]);
    }
}
