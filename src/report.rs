//! Report rendering
//!
//! One row per (schema, table, target), one column per test mode.

use crate::results::{Results, ERROR_MARKER};
use std::io::{self, Write};

impl Results {
    /// Header plus one row per (schema, table, target); missing cells hold the error marker.
    pub fn table_rows(&self) -> (Vec<String>, Vec<Vec<String>>) {
        let mut header = vec![
            "SCHEMA".to_string(),
            "TABLE".to_string(),
            "TARGET".to_string(),
        ];
        header.extend(self.test_modes.iter().map(|m| m.as_str().to_uppercase()));

        let mut rows = Vec::new();
        for (schema, tables) in &self.content {
            for table in tables.keys() {
                for target in &self.target_names {
                    let mut row = vec![schema.clone(), table.clone(), target.clone()];
                    row.extend(self.test_modes.iter().map(|mode| {
                        self.output_for(schema, table, *mode, target)
                            .unwrap_or(ERROR_MARKER)
                            .to_string()
                    }));
                    rows.push(row);
                }
            }
        }

        (header, rows)
    }

    /// Render the results as an ASCII table.
    pub fn write_as_table<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let (header, rows) = self.table_rows();

        let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let border = format!(
            "+{}+",
            widths
                .iter()
                .map(|w| "-".repeat(w + 2))
                .collect::<Vec<_>>()
                .join("+")
        );

        let line = |cells: &[String]| {
            let padded: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!(" {:<width$} ", cell, width = width))
                .collect();
            format!("|{}|", padded.join("|"))
        };

        writeln!(writer, "{}", border)?;
        writeln!(writer, "{}", line(&header))?;
        writeln!(writer, "{}", border)?;
        for row in &rows {
            writeln!(writer, "{}", line(row))?;
        }
        writeln!(writer, "{}", border)?;
        Ok(())
    }

    /// Render the aggregate structure as pretty JSON.
    pub fn write_as_json<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, self)?;
        writeln!(writer)
    }
}
