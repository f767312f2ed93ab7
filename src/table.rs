use unicode_width::UnicodeWidthStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

struct Column {
    header: String,
    align: Align,
    data: Vec<String>,
}

/// A builder for aligned tabular output.
///
/// Columns are added with `column()` (right-aligned, for numbers) or `text()`
/// (left-aligned). Every cell is padded to its column's width, and trailing whitespace is
/// trimmed from each rendered line, so a left-aligned last column leaves no padding behind.
pub struct Table {
    columns: Vec<Column>,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Table {
            columns: Vec::new(),
        }
    }

    /// Add a right-aligned column with the given header and data rows.
    pub fn column(self, header: impl Into<String>, data: Vec<String>) -> Self {
        self.aligned(header, Align::Right, data)
    }

    /// Add a left-aligned column with the given header and data rows.
    pub fn text(self, header: impl Into<String>, data: Vec<String>) -> Self {
        self.aligned(header, Align::Left, data)
    }

    fn aligned(mut self, header: impl Into<String>, align: Align, data: Vec<String>) -> Self {
        self.columns.push(Column {
            header: header.into(),
            align,
            data,
        });
        self
    }

    /// Render the table. Missing cells of shorter columns show as `-`.
    pub fn render(&self) -> String {
        if self.columns.is_empty() {
            return String::new();
        }

        // Column widths: max of header and data widths (using Unicode width)
        let widths: Vec<usize> = self
            .columns
            .iter()
            .map(|col| {
                let max_data = col.data.iter().map(|v| v.width()).max().unwrap_or(0);
                std::cmp::max(col.header.width(), max_data)
            })
            .collect();

        let mut lines = Vec::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, &w)| ljust(&c.header, w))
            .collect();
        lines.push(header.join("  ").trim_end().to_string());

        let num_rows = self.columns.iter().map(|c| c.data.len()).max().unwrap_or(0);
        for row_idx in 0..num_rows {
            let row: Vec<String> = self
                .columns
                .iter()
                .zip(&widths)
                .map(|(col, &w)| {
                    let val = col.data.get(row_idx).map(|s| s.as_str()).unwrap_or("-");
                    match col.align {
                        Align::Left => ljust(val, w),
                        Align::Right => rjust(val, w),
                    }
                })
                .collect();
            lines.push(row.join("  ").trim_end().to_string());
        }
        lines.join("\n")
    }

    /// Print the table to stdout with aligned columns.
    pub fn print(&self) {
        if !self.columns.is_empty() {
            println!("{}", self.render());
        }
    }
}

/// Left-justify string to given width (using Unicode display width).
fn ljust(s: &str, width: usize) -> String {
    let current_width = s.width();
    if current_width >= width {
        s.to_string()
    } else {
        format!("{}{}", s, " ".repeat(width - current_width))
    }
}

/// Right-justify string to given width (using Unicode display width).
fn rjust(s: &str, width: usize) -> String {
    let current_width = s.width();
    if current_width >= width {
        s.to_string()
    } else {
        format!("{}{}", " ".repeat(width - current_width), s)
    }
}
