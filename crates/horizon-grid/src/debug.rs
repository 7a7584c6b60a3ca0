//! Human-readable dumps of a table's element tree.

use std::fmt;

use horizon_grid_core::{EventKind, TableElement, TreeFormatOptions, TreeWriter};

use crate::cell::Cell;
use crate::table::Table;

/// Debug utility for visualizing a table.
///
/// Rows are listed with their cells, then columns, then subsets:
///
/// ```text
/// table 'budget' [#1] (2 pending)
/// ├── row 0 [#2]
/// │  └── cell [0, 0] [#4] = 14
/// ├── column 0 [#3]
/// └── subset 'totals' [#5] (1 rows, 0 columns)
/// ```
#[derive(Debug, Clone, Default)]
pub struct TableTreeDebug {
    options: TreeFormatOptions,
}

impl TableTreeDebug {
    /// Create a visualizer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a visualizer with custom options.
    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Format `table`.
    pub fn format(&self, table: &Table) -> String {
        let mut writer = TreeWriter::new(&self.options);

        let mut header = TableElement::label(table);
        self.decorate(&mut header, table);
        let pending = table.pending().pending_count();
        if pending > 0 {
            header.push_str(&format!(" ({pending} pending)"));
        }
        writer.header(&header);

        let rows = table.rows();
        let columns = table.columns();
        let subsets = table.subsets();
        let total = rows.len() + columns.len() + subsets.len();
        let mut written = 0;

        for row in &rows {
            written += 1;
            let mut text = TableElement::label(row.as_ref());
            self.decorate(&mut text, row.as_ref());
            writer.node(1, written == total, &text);

            let cells = row.cells();
            for (i, cell) in cells.iter().enumerate() {
                writer.node(2, i + 1 == cells.len(), &self.cell_text(table, cell));
            }
        }

        for column in &columns {
            written += 1;
            let mut text = TableElement::label(column.as_ref());
            self.decorate(&mut text, column.as_ref());
            writer.node(1, written == total, &text);
        }

        for subset in &subsets {
            written += 1;
            let mut text = TableElement::label(subset.as_ref());
            self.decorate(&mut text, subset.as_ref());
            text.push_str(&format!(
                " ({} rows, {} columns)",
                subset.rows().len(),
                subset.columns().len()
            ));
            writer.node(1, written == total, &text);
        }

        writer.finish()
    }

    fn cell_text(&self, table: &Table, cell: &Cell) -> String {
        let mut text = TableElement::label(cell);
        self.decorate(&mut text, cell);
        if self.options.show_values {
            let value = cell.value();
            if !value.is_empty() {
                text.push_str(&format!(" = {value}"));
            }
            if let Some(derivation) = cell.derivation() {
                text.push_str(&format!(" <- {}", derivation.formula()));
            }
        }
        if let Some(state) = table.pending().state_of(cell.id()) {
            text.push_str(&format!(" ({state:?})"));
        }
        text
    }

    fn decorate(&self, text: &mut String, element: &dyn TableElement) {
        if self.options.show_ids {
            text.push_str(&format!(" [{}]", element.element_id()));
        }
        if self.options.show_listeners {
            let registry = element.listeners();
            let count: usize = EventKind::ALL.iter().map(|k| registry.count(*k)).sum();
            if count > 0 {
                text.push_str(&format!(" <{count} listeners>"));
            }
        }
    }

    /// Wrap `table` for use with `{}`.
    pub fn display<'a>(&'a self, table: &'a Table) -> impl fmt::Display + 'a {
        TreeDisplay {
            debug: self,
            table,
        }
    }
}

struct TreeDisplay<'a> {
    debug: &'a TableTreeDebug,
    table: &'a Table,
}

impl fmt::Display for TreeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug.format(self.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use horizon_grid_core::TreeStyle;

    #[test]
    fn test_format_lists_rows_with_cells() {
        let table = Table::builder("budget")
            .config(GridConfig::inline())
            .build()
            .unwrap();
        let row = table.add_row().unwrap();
        let column = table.add_column().unwrap();
        table.cell(&row, &column).unwrap().set_value(14).unwrap();

        let options = TreeFormatOptions {
            style: TreeStyle::Ascii,
            ..TreeFormatOptions::minimal()
        };
        let text = TableTreeDebug::with_options(options).format(&table);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["table 'budget'", "+-- row 0", "|  `-- cell [0, 0]", "`-- column 0"]
        );
    }

    #[test]
    fn test_values_shown_by_default() {
        let table = Table::builder("t")
            .config(GridConfig::inline())
            .build()
            .unwrap();
        table.add_row().unwrap();
        table.add_column().unwrap();
        table.cell_at(0, 0).unwrap().set_value("hi").unwrap();

        let text = TableTreeDebug::new().display(&table).to_string();
        assert!(text.contains("= hi"));
    }
}
