use crate::core::db::{TabularResult, Value};
use crate::core::{ConsoleError, Result};

/// Results Grid Module
///
/// Renders a `TabularResult` as an aligned text grid for the console and
/// exports it as CSV, JSON or Markdown.

use std::str::FromStr;

/// Shown in place of a grid when a result has no rows.
pub const NO_DATA: &str = "No data found.";

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Markdown,
}

impl FromStr for ExportFormat {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            _ => Err(ConsoleError::Ui(format!(
                "Unsupported export format: '{}'. Supported formats: csv, json, markdown",
                s
            ))),
        }
    }
}

/// Display-ready view over a result.
#[derive(Debug, Clone)]
pub struct ResultsGrid<'a> {
    result: &'a TabularResult,
}

impl<'a> ResultsGrid<'a> {
    pub fn new(result: &'a TabularResult) -> Self {
        ResultsGrid { result }
    }

    fn cells(&self) -> Vec<Vec<String>> {
        self.result
            .rows
            .iter()
            .map(|row| row.iter().map(Value::to_string).collect())
            .collect()
    }

    /// Renders headers and rows with columns padded to a common width.
    pub fn render(&self) -> String {
        if self.result.is_empty() {
            return format!("{}\n", NO_DATA);
        }

        let cells = self.cells();
        let mut widths: Vec<usize> = self.result.columns.iter().map(|h| h.chars().count()).collect();
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                let len = cell.chars().count();
                match widths.get_mut(i) {
                    Some(w) => *w = (*w).max(len),
                    None => widths.push(len),
                }
            }
        }

        let pad_line = |values: &[String]| -> String {
            let padded: Vec<String> = values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v, width = *w))
                .collect();
            padded.join(" | ").trim_end().to_string()
        };

        let mut output = String::new();
        if !self.result.columns.is_empty() {
            output.push_str(&pad_line(&self.result.columns));
            output.push('\n');
            let underline: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            output.push_str(&underline.join("-|-"));
            output.push('\n');
        }
        for row in &cells {
            output.push_str(&pad_line(row));
            output.push('\n');
        }
        output.push_str(&format!("({} rows)\n", self.result.row_count()));
        output
    }

    /// Exports the grid data to a specified format.
    pub fn export(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Csv => Ok(self.export_to_csv()),
            ExportFormat::Json => self.export_to_json(),
            ExportFormat::Markdown => Ok(self.export_to_markdown()),
        }
    }

    fn export_to_csv(&self) -> String {
        let mut output = String::new();
        if !self.result.columns.is_empty() {
            let headers: Vec<String> = self.result.columns.iter().map(|h| csv_field(h)).collect();
            output.push_str(&headers.join(","));
            output.push('\n');
        }
        for row in &self.result.rows {
            let fields: Vec<String> = row
                .iter()
                .map(|v| match v {
                    Value::Null => String::new(),
                    other => csv_field(&other.to_string()),
                })
                .collect();
            output.push_str(&fields.join(","));
            output.push('\n');
        }
        output
    }

    fn export_to_json(&self) -> Result<String> {
        let mut rows = Vec::with_capacity(self.result.row_count());
        for row in &self.result.rows {
            let mut object = serde_json::Map::new();
            for (header, value) in self.result.columns.iter().zip(row) {
                object.insert(header.clone(), serde_json::to_value(value)?);
            }
            rows.push(serde_json::Value::Object(object));
        }
        Ok(serde_json::to_string(&rows)?)
    }

    fn export_to_markdown(&self) -> String {
        let mut output = String::new();
        if !self.result.columns.is_empty() {
            output.push_str(&format!("| {} |\n", self.result.columns.join(" | ")));
            let underline: Vec<String> = self
                .result
                .columns
                .iter()
                .map(|h| "-".repeat(h.len().max(3)))
                .collect();
            output.push_str(&format!("| {} |\n", underline.join(" | ")));
        }
        for row in self.cells() {
            let escaped: Vec<String> = row.iter().map(|c| c.replace('|', "\\|")).collect();
            output.push_str(&format!("| {} |\n", escaped.join(" | ")));
        }
        output
    }
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}
