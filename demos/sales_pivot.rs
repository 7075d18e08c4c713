/// Sales pivot demo
///
/// Builds a small sales table, pivots it by region and product, and
/// prints the result in the shapes a grid client would request.
use pivotview::{EmbeddedHandler, Request, Response, Session, TableData, TableOptions, ViewConfig, ViewWindow};
use std::sync::Arc;

const SALES: &str = "Region,State,Product,Sales,Quantity
West,CA,Chairs,261.96,2
West,CA,Labels,14.62,2
West,OR,Tables,957.58,5
East,NY,Chairs,731.94,3
East,NY,Phones,907.15,6
South,FL,Binders,22.37,2
Central,TX,Phones,371.17,4
";

#[tokio::main]
async fn main() -> pivotview::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let session = Session::new(Arc::new(EmbeddedHandler::new()));
    let client = session.init().await?;
    session
        .make_table(&client, "sales", &TableData::Csv(SALES.to_string()), &TableOptions::default(), true)
        .await?;

    println!("Schema: {}", serde_json::to_string(&session.table_schema(&client, "sales").await?).unwrap_or_default());

    let config: ViewConfig = serde_json::from_str(
        r#"{
            "group_by": ["Region"],
            "split_by": ["Product"],
            "columns": ["Sales"],
            "sort": [["Sales", "desc"]]
        }"#,
    )
    .unwrap_or_default();
    session.table_make_view(&client, "sales", "by_region", config).await?;

    let dims = session.view_dimensions(&client, "by_region").await?;
    println!("{} rows x {} columns", dims.num_view_rows, dims.num_view_columns);

    for path in session.view_column_paths(&client, "by_region").await? {
        println!("  column {}", path);
    }

    let rows = session
        .view_to_json_string(&client, "by_region", &ViewWindow::default())
        .await?;
    println!("Rows: {}", rows);

    // The same request the WebSocket transport routes.
    let request = Request::ViewGetData {
        view_id: "by_region".to_string(),
        window: ViewWindow::rows(0, 3),
    };
    if let Response::Data { data } = session.handle_request(&client, request).await {
        println!("Row headers: {:?}", data.row_headers);
        println!("Column headers: {:?}", data.column_headers);
    }

    session.close_client(&client).await;
    Ok(())
}
