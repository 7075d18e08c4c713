//! Pivot engine: row and column key trees with rolled-up aggregates.
//!
//! Both hierarchies are the same structure, a [`KeyTree`] whose children
//! keep the first-seen order of their keys. Rows are accumulated into
//! `(row leaf, column leaf)` cells, then rolled up along the column tree
//! and finally along the row tree, so every node holds the exact aggregate
//! of the rows under its path.

use crate::aggregate::AggState;
use crate::column::{ColumnType, ColumnValue};
use crate::config::{PlanColumn, SortDir, ViewPlan};
use crate::view::Frame;
use std::cmp::Ordering;
use std::collections::HashMap;

const ROOT: usize = 0;

/// Separator between split keys and the column name in a column path.
pub const PATH_SEPARATOR: &str = "|";

struct KeyNode {
    key: ColumnValue,
    parent: usize,
    depth: usize,
    children: Vec<usize>,
    index: HashMap<ColumnValue, usize>,
}

/// Tree of key paths. Node 0 is the root (empty path); children always
/// have larger ids than their parent.
struct KeyTree {
    nodes: Vec<KeyNode>,
}

impl KeyTree {
    fn new() -> Self {
        KeyTree {
            nodes: vec![KeyNode {
                key: ColumnValue::Null,
                parent: ROOT,
                depth: 0,
                children: Vec::new(),
                index: HashMap::new(),
            }],
        }
    }

    fn child(&mut self, parent: usize, key: &ColumnValue) -> usize {
        if let Some(id) = self.nodes[parent].index.get(key) {
            return *id;
        }
        let id = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.nodes.push(KeyNode {
            key: key.clone(),
            parent,
            depth,
            children: Vec::new(),
            index: HashMap::new(),
        });
        self.nodes[parent].children.push(id);
        self.nodes[parent].index.insert(key.clone(), id);
        id
    }

    fn path(&self, mut id: usize) -> Vec<ColumnValue> {
        let mut path = Vec::with_capacity(self.nodes[id].depth);
        while id != ROOT {
            path.push(self.nodes[id].key.clone());
            id = self.nodes[id].parent;
        }
        path.reverse();
        path
    }

    fn preorder(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        out
    }

    /// Sorts every sibling group with `cmp`. Groups for which `cmp` is
    /// `None` keep first-seen order.
    fn sort_children<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&KeyTree, usize, usize, usize) -> Option<Ordering>,
    {
        for parent in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[parent].children);
            let depth = self.nodes[parent].depth + 1;
            if children.len() > 1 && cmp(self, depth, children[0], children[0]).is_some() {
                children.sort_by(|a, b| cmp(self, depth, *a, *b).unwrap_or(Ordering::Equal));
            }
            self.nodes[parent].children = children;
        }
    }
}

/// Compares two cells for a sort direction. Nulls sort first ascending and
/// last descending; "abs" directions compare magnitudes.
pub(crate) fn compare_for_sort(a: &ColumnValue, b: &ColumnValue, dir: SortDir) -> Ordering {
    let ordering = if dir.is_abs() {
        magnitude(a).total_cmp(&magnitude(b))
    } else {
        a.total_cmp(b)
    };
    if dir.is_desc() {
        ordering.reverse()
    } else {
        ordering
    }
}

fn magnitude(value: &ColumnValue) -> ColumnValue {
    match value {
        ColumnValue::Integer(v) => ColumnValue::Integer(v.saturating_abs()),
        ColumnValue::Float(v) => ColumnValue::Float(v.abs()),
        other => other.clone(),
    }
}

/// One output row of a pivoted view.
#[derive(Debug, Clone)]
pub(crate) struct PivotRow {
    pub path: Vec<ColumnValue>,
    pub values: Vec<ColumnValue>,
}

/// Fully rolled-up and ordered pivot output.
#[derive(Debug, Clone)]
pub(crate) struct PivotResult {
    pub rows: Vec<PivotRow>,
    /// Split keys followed by the column name, one entry per output column.
    pub column_headers: Vec<Vec<String>>,
    pub column_types: Vec<ColumnType>,
}

impl PivotResult {
    pub fn column_path(&self, index: usize) -> String {
        self.column_headers[index].join(PATH_SEPARATOR)
    }
}

enum RowTerm {
    Key(SortDir),
    Value(usize, SortDir),
}

struct Cells {
    columns: Vec<PlanColumn>,
    states: HashMap<(usize, usize), Vec<AggState>>,
}

impl Cells {
    fn new_states(&self) -> Vec<AggState> {
        self.columns.iter().map(|c| AggState::new(c.aggregate)).collect()
    }

    fn merge_into(&mut self, from: (usize, usize), into: (usize, usize)) {
        if let Some(child) = self.states.remove(&from) {
            let fresh = self.new_states();
            let parent = self.states.entry(into).or_insert(fresh);
            for (state, other) in parent.iter_mut().zip(&child) {
                state.merge(other);
            }
            self.states.insert(from, child);
        }
    }

    /// A missing cell is a group with no rows under that split, except the
    /// grand total, which still aggregates the empty set (count is 0).
    fn value(&self, row: usize, col: usize, k: usize) -> ColumnValue {
        let column = &self.columns[k];
        match self.states.get(&(row, col)) {
            Some(states) => states[k].finish(column.input_type),
            None if row == ROOT && col == ROOT => AggState::new(column.aggregate).finish(column.input_type),
            None => ColumnValue::Null,
        }
    }
}

/// Builds the pivot over `rows` (table row numbers that passed the filter,
/// in table order).
pub(crate) fn build(plan: &ViewPlan, frame: &Frame<'_>, rows: &[usize]) -> PivotResult {
    // Visible columns first, then sort-only columns.
    let mut columns = plan.columns.clone();
    for term in &plan.sort {
        if !columns.iter().any(|c| c.name == term.column.name) {
            columns.push(term.column.clone());
        }
    }
    let mut cells = Cells {
        columns,
        states: HashMap::new(),
    };

    let mut row_tree = KeyTree::new();
    let mut col_tree = KeyTree::new();
    for &row in rows {
        let mut r = ROOT;
        for column in &plan.group_by {
            r = row_tree.child(r, frame.value(column.source, row));
        }
        let mut c = ROOT;
        for column in &plan.split_by {
            c = col_tree.child(c, frame.value(column.source, row));
        }
        if !cells.states.contains_key(&(r, c)) {
            let fresh = cells.new_states();
            cells.states.insert((r, c), fresh);
        }
        if let Some(states) = cells.states.get_mut(&(r, c)) {
            for (state, column) in states.iter_mut().zip(&cells.columns) {
                state.push(row, frame.value(column.source, row));
            }
        }
    }

    // Roll up along the column tree for every row leaf, then along the row
    // tree for every column node. Children have larger ids than parents.
    let row_depth = plan.group_by.len();
    for r in 0..row_tree.nodes.len() {
        if row_tree.nodes[r].depth != row_depth {
            continue;
        }
        for c in (1..col_tree.nodes.len()).rev() {
            cells.merge_into((r, c), (r, col_tree.nodes[c].parent));
        }
    }
    for r in (1..row_tree.nodes.len()).rev() {
        let parent = row_tree.nodes[r].parent;
        for c in 0..col_tree.nodes.len() {
            cells.merge_into((r, c), (parent, c));
        }
    }

    sort_rows(plan, &cells, &mut row_tree);
    if !plan.split_by.is_empty() {
        sort_columns(plan, &cells, &mut col_tree);
    }

    let split_depth = plan.split_by.len();
    let col_leaves: Vec<usize> = col_tree
        .preorder()
        .into_iter()
        .filter(|c| col_tree.nodes[*c].depth == split_depth)
        .collect();

    let mut column_headers = Vec::new();
    let mut column_types = Vec::new();
    let mut slots = Vec::new();
    for &c in &col_leaves {
        let keys: Vec<String> = col_tree.path(c).iter().map(|k| k.to_string()).collect();
        for (k, column) in plan.columns.iter().enumerate() {
            let mut header = keys.clone();
            header.push(column.name.clone());
            column_headers.push(header);
            column_types.push(column.output_type());
            slots.push((c, k));
        }
    }

    let rows = row_tree
        .preorder()
        .into_iter()
        .map(|r| PivotRow {
            path: row_tree.path(r),
            values: slots.iter().map(|&(c, k)| cells.value(r, c, k)).collect(),
        })
        .collect();

    PivotResult {
        rows,
        column_headers,
        column_types,
    }
}

/// Orders row siblings by the sort terms that apply at their depth: a term
/// on the group_by column of that depth compares keys, a term on any other
/// column compares each node's total. Ties fall back to key order.
fn sort_rows(plan: &ViewPlan, cells: &Cells, tree: &mut KeyTree) {
    let terms_at = |depth: usize| -> Vec<RowTerm> {
        plan.sort
            .iter()
            .filter(|term| !term.dir.is_none() && !term.dir.is_col())
            .filter_map(|term| {
                match plan.group_by.iter().position(|g| g.name == term.column.name) {
                    Some(level) if level + 1 == depth => Some(RowTerm::Key(term.dir)),
                    Some(_) => None,
                    None => cells
                        .columns
                        .iter()
                        .position(|c| c.name == term.column.name)
                        .map(|k| RowTerm::Value(k, term.dir)),
                }
            })
            .collect()
    };
    let terms: Vec<Vec<RowTerm>> = (0..=plan.group_by.len() + 1).map(terms_at).collect();
    let mut totals: HashMap<(usize, usize), ColumnValue> = HashMap::new();

    tree.sort_children(|tree, depth, a, b| {
        let terms = terms.get(depth).filter(|t| !t.is_empty())?;
        for term in terms {
            let ordering = match term {
                RowTerm::Key(dir) => compare_for_sort(&tree.nodes[a].key, &tree.nodes[b].key, *dir),
                RowTerm::Value(k, dir) => {
                    let va = totals.entry((a, *k)).or_insert_with(|| cells.value(a, ROOT, *k)).clone();
                    let vb = totals.entry((b, *k)).or_insert_with(|| cells.value(b, ROOT, *k)).clone();
                    compare_for_sort(&va, &vb, *dir)
                }
            };
            if ordering != Ordering::Equal {
                return Some(ordering);
            }
        }
        Some(tree.nodes[a].key.total_cmp(&tree.nodes[b].key))
    });
}

/// Orders split_by siblings by the grand total of each "col" sort term's
/// column under that subtree.
fn sort_columns(plan: &ViewPlan, cells: &Cells, tree: &mut KeyTree) {
    let terms: Vec<(usize, SortDir)> = plan
        .sort
        .iter()
        .filter(|term| term.dir.is_col())
        .filter_map(|term| {
            cells
                .columns
                .iter()
                .position(|c| c.name == term.column.name)
                .map(|k| (k, term.dir))
        })
        .collect();
    if terms.is_empty() {
        return;
    }

    tree.sort_children(|tree, _, a, b| {
        for (k, dir) in &terms {
            let ordering = compare_for_sort(&cells.value(ROOT, a, *k), &cells.value(ROOT, b, *k), *dir);
            if ordering != Ordering::Equal {
                return Some(ordering);
            }
        }
        Some(tree.nodes[a].key.total_cmp(&tree.nodes[b].key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ViewConfig, ViewPlan};
    use crate::table::{Row, Schema, Table, TableOptions};

    fn sales_table() -> Table {
        let schema = Schema::new(vec![
            ("Region".to_string(), ColumnType::String),
            ("State".to_string(), ColumnType::String),
            ("Segment".to_string(), ColumnType::String),
            ("Sales".to_string(), ColumnType::Float),
        ])
        .unwrap();
        let mut table = Table::new("sales".to_string(), schema, TableOptions::default()).unwrap();
        let data = [
            ("West", "California", "Consumer", 10.0),
            ("East", "New York", "Corporate", 5.0),
            ("West", "Oregon", "Corporate", 20.0),
            ("West", "California", "Corporate", 1.0),
            ("East", "Maine", "Consumer", 2.0),
        ];
        let rows = data
            .iter()
            .map(|(region, state, segment, sales)| {
                let mut row = Row::new();
                row.insert("Region".to_string(), ColumnValue::String(region.to_string()));
                row.insert("State".to_string(), ColumnValue::String(state.to_string()));
                row.insert("Segment".to_string(), ColumnValue::String(segment.to_string()));
                row.insert("Sales".to_string(), ColumnValue::Float(*sales));
                row
            })
            .collect();
        table.update(rows).unwrap();
        table
    }

    fn pivot(table: &Table, config: &str) -> PivotResult {
        let config: ViewConfig = serde_json::from_str(config).unwrap();
        let plan = ViewPlan::new(config, table.schema()).unwrap();
        let frame = Frame::new(table, &[]);
        let rows: Vec<usize> = (0..table.len()).collect();
        build(&plan, &frame, &rows)
    }

    fn s(v: &str) -> ColumnValue {
        ColumnValue::String(v.to_string())
    }

    fn summary(result: &PivotResult) -> Vec<(Vec<ColumnValue>, ColumnValue)> {
        result
            .rows
            .iter()
            .map(|r| (r.path.clone(), r.values[0].clone()))
            .collect()
    }

    #[test]
    fn test_empty_input_total() {
        let table = sales_table();
        let config: ViewConfig = serde_json::from_str(
            r#"{"group_by": ["Region"], "columns": ["State", "Sales"], "aggregates": {"State": "count", "Sales": "sum"}}"#,
        )
        .unwrap();
        let plan = ViewPlan::new(config, table.schema()).unwrap();
        let result = build(&plan, &Frame::new(&table, &[]), &[]);
        assert_eq!(result.rows.len(), 1);
        assert!(result.rows[0].path.is_empty());
        assert_eq!(result.rows[0].values, vec![ColumnValue::Integer(0), ColumnValue::Null]);
    }

    #[test]
    fn test_two_level_tree_first_seen_order() {
        let table = sales_table();
        let result = pivot(&table, r#"{"group_by": ["Region", "State"], "columns": ["Sales"]}"#);
        assert_eq!(
            summary(&result),
            vec![
                (vec![], ColumnValue::Float(38.0)),
                (vec![s("West")], ColumnValue::Float(31.0)),
                (vec![s("West"), s("California")], ColumnValue::Float(11.0)),
                (vec![s("West"), s("Oregon")], ColumnValue::Float(20.0)),
                (vec![s("East")], ColumnValue::Float(7.0)),
                (vec![s("East"), s("New York")], ColumnValue::Float(5.0)),
                (vec![s("East"), s("Maine")], ColumnValue::Float(2.0)),
            ]
        );
        assert_eq!(result.column_headers, vec![vec!["Sales".to_string()]]);
    }

    #[test]
    fn test_sort_by_aggregate_per_level() {
        let table = sales_table();
        let result = pivot(
            &table,
            r#"{"group_by": ["Region", "State"], "columns": ["Sales"], "sort": [["Sales", "asc"]]}"#,
        );
        let paths: Vec<Vec<ColumnValue>> = result.rows.iter().map(|r| r.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                vec![],
                vec![s("East")],
                vec![s("East"), s("Maine")],
                vec![s("East"), s("New York")],
                vec![s("West")],
                vec![s("West"), s("California")],
                vec![s("West"), s("Oregon")],
            ]
        );
    }

    #[test]
    fn test_sort_by_group_key_and_hidden_column() {
        let table = sales_table();
        let result = pivot(&table, r#"{"group_by": ["Region"], "columns": ["Sales"], "sort": [["Region", "asc"]]}"#);
        assert_eq!(result.rows[1].path, vec![s("East")]);

        // Sorting by a column that is not displayed still uses its totals.
        let result = pivot(
            &table,
            r#"{"group_by": ["State"], "columns": ["Region"], "sort": [["Sales", "desc"]]}"#,
        );
        assert_eq!(result.rows[1].path, vec![s("Oregon")]);
        assert_eq!(result.rows[1].values, vec![ColumnValue::Integer(1)]);
    }

    #[test]
    fn test_split_by_column_paths() {
        let table = sales_table();
        let result = pivot(&table, r#"{"group_by": ["Region"], "split_by": ["Segment"], "columns": ["Sales"]}"#);
        let paths: Vec<String> = (0..result.column_headers.len()).map(|i| result.column_path(i)).collect();
        assert_eq!(paths, vec!["Consumer|Sales", "Corporate|Sales"]);
        assert_eq!(result.rows[0].values, vec![ColumnValue::Float(12.0), ColumnValue::Float(26.0)]);
        assert_eq!(result.rows[1].values, vec![ColumnValue::Float(10.0), ColumnValue::Float(21.0)]);
        assert_eq!(result.rows[2].values, vec![ColumnValue::Float(2.0), ColumnValue::Float(5.0)]);
    }

    #[test]
    fn test_col_sort_orders_split_groups() {
        let table = sales_table();
        let result = pivot(
            &table,
            r#"{"split_by": ["Segment"], "columns": ["Sales"], "sort": [["Sales", "col desc"]]}"#,
        );
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.column_path(0), "Corporate|Sales");
        assert_eq!(result.rows[0].values, vec![ColumnValue::Float(26.0), ColumnValue::Float(12.0)]);
    }

    #[test]
    fn test_avg_is_not_mean_of_means() {
        let table = sales_table();
        let result = pivot(
            &table,
            r#"{"group_by": ["Region", "State"], "columns": ["Sales"], "aggregates": {"Sales": "avg"}}"#,
        );
        // West rows: 10, 20, 1. Mean of the state means would be (5.5 + 20) / 2.
        assert_eq!(result.rows[1].values[0], ColumnValue::Float(31.0 / 3.0));
        assert_eq!(result.column_types, vec![ColumnType::Float]);
    }

    #[test]
    fn test_compare_for_sort() {
        let a = ColumnValue::Float(-10.0);
        let b = ColumnValue::Float(3.0);
        assert_eq!(compare_for_sort(&a, &b, SortDir::Asc), Ordering::Less);
        assert_eq!(compare_for_sort(&a, &b, SortDir::AscAbs), Ordering::Greater);
        assert_eq!(compare_for_sort(&ColumnValue::Null, &b, SortDir::Desc), Ordering::Greater);
    }
}
