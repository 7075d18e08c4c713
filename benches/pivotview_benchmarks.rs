use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pivotview::*;

const REGIONS: [&str; 4] = ["West", "East", "South", "Central"];
const PRODUCTS: [&str; 5] = ["Chairs", "Tables", "Phones", "Binders", "Labels"];

fn sales_table(size: usize) -> TableHandle {
    let schema = Schema::new(vec![
        ("Region".to_string(), ColumnType::String),
        ("Product".to_string(), ColumnType::String),
        ("Quantity".to_string(), ColumnType::Integer),
        ("Sales".to_string(), ColumnType::Float),
    ])
    .unwrap();
    let table = TableHandle::new(Table::new("sales".to_string(), schema, TableOptions::default()).unwrap());
    let rows = (0..size)
        .map(|i| {
            let mut row = Row::new();
            row.insert("Region".to_string(), ColumnValue::String(REGIONS[i % REGIONS.len()].to_string()));
            row.insert("Product".to_string(), ColumnValue::String(PRODUCTS[i % PRODUCTS.len()].to_string()));
            row.insert("Quantity".to_string(), ColumnValue::Integer((i % 7) as i64));
            row.insert("Sales".to_string(), ColumnValue::Float((i * 37 % 1000) as f64 / 10.0));
            row
        })
        .collect();
    table.update(rows).unwrap();
    table
}

fn config(json: &str) -> ViewConfig {
    serde_json::from_str(json).unwrap()
}

/// Full reads rebuild the view each iteration so the cache never hits.
fn bench_view(c: &mut Criterion, name: &str, view_config: &str) {
    let mut group = c.benchmark_group(name);

    for size in [1000, 10000, 100000].iter() {
        let table = sales_table(*size);
        let view_config = config(view_config);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let view = table.view(view_config.clone()).unwrap();
                black_box(view.get_data(&ViewWindow::rows(0, 100)).unwrap())
            });
        });
    }
    group.finish();
}

fn bench_flat_sorted(c: &mut Criterion) {
    bench_view(c, "flat_sorted", r#"{"sort": [["Sales", "desc"]]}"#);
}

fn bench_filtered(c: &mut Criterion) {
    bench_view(
        c,
        "filtered",
        r#"{"filter": [["Region", "==", "West"], ["Sales", ">", 50.0]]}"#,
    );
}

fn bench_group_by(c: &mut Criterion) {
    bench_view(
        c,
        "group_by",
        r#"{"group_by": ["Region", "Product"], "columns": ["Sales", "Quantity"], "aggregates": {"Quantity": "avg"}}"#,
    );
}

fn bench_split_by(c: &mut Criterion) {
    bench_view(
        c,
        "split_by",
        r#"{"group_by": ["Region"], "split_by": ["Product"], "columns": ["Sales"], "sort": [["Sales", "desc"]]}"#,
    );
}

fn bench_cached_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_window");

    for size in [1000, 10000, 100000].iter() {
        let table = sales_table(*size);
        let view = table.view(config(r#"{"sort": [["Sales", "asc"]]}"#)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let start = black_box(size / 2);
                view.get_data(&ViewWindow::rows(start, start + 50)).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_flat_sorted,
    bench_filtered,
    bench_group_by,
    bench_split_by,
    bench_cached_window
);
criterion_main!(benches);
