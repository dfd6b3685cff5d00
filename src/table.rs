use std::borrow::Cow;
use std::fmt::Write as _;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Cells wider than this are truncated with `..` in terminal previews.
pub const MAX_CELL_WIDTH: usize = 40;

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers
        .iter()
        .map(|h| display_width(&sanitize_cell(h)))
        .collect::<Vec<_>>();

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(&sanitize_cell(cell)));
        }
    }

    for width in &mut widths {
        *width = (*width).clamp(1, MAX_CELL_WIDTH);
    }

    let mut output = String::new();

    let header_line = format_row(headers, &widths);
    let _ = writeln!(output, "{header_line}");

    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<usize>>();
    let separator_cells = separator_widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>();
    let separator_line = format_row(&separator_cells, &separator_widths);
    let _ = writeln!(output, "{separator_line}");

    for row in rows {
        let row_line = format_row(row, &widths);
        let _ = writeln!(output, "{row_line}");
    }

    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    let rendered = render_table(headers, rows);
    print!("{rendered}");
}

/// Two-column `key  value` listing for report summaries.
pub fn print_key_values<K, V>(pairs: &[(K, V)])
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let headers = vec!["field".to_string(), "value".to_string()];
    let rows = pairs
        .iter()
        .map(|(k, v)| vec![k.as_ref().to_string(), v.as_ref().to_string()])
        .collect::<Vec<_>>();
    print_table(&headers, &rows);
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut cells = Vec::with_capacity(values.len());
    for (idx, value) in values.iter().enumerate() {
        let Some(&width) = widths.get(idx) else {
            break;
        };
        let sanitized = sanitize_cell(value);
        let mut cell = truncate_display(&sanitized, width);
        let padding = width.saturating_sub(display_width(&cell));
        if padding > 0 {
            cell.push_str(&" ".repeat(padding));
        }
        cells.push(cell);
    }
    let mut line = cells.join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

/// Terminal columns occupied by `value`; Hangul and other wide glyphs count twice.
fn display_width(value: &str) -> usize {
    UnicodeWidthStr::width(value)
}

fn truncate_display(value: &str, width: usize) -> String {
    if display_width(value) <= width {
        return value.to_string();
    }
    let budget = width.saturating_sub(2);
    let mut used = 0;
    let mut truncated = String::new();
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + ch_width > budget {
            break;
        }
        used += ch_width;
        truncated.push(ch);
    }
    truncated.push_str("..");
    truncated
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        let mut sanitized = String::with_capacity(value.len());
        for ch in value.chars() {
            match ch {
                '\n' | '\r' | '\t' => sanitized.push(' '),
                other => sanitized.push(other),
            }
        }
        Cow::Owned(sanitized)
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_characters_align() {
        let headers = vec!["날짜".to_string(), "amount".to_string()];
        let rows = vec![vec!["2024-01-01".to_string(), "4500".to_string()]];
        let rendered = render_table(&headers, &rows);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "날짜        amount");
        assert_eq!(lines[2], "2024-01-01  4500");
    }

    #[test]
    fn long_cells_are_truncated() {
        let headers = vec!["적요".to_string()];
        let rows = vec![vec!["x".repeat(MAX_CELL_WIDTH + 10)]];
        let rendered = render_table(&headers, &rows);
        let last = rendered.lines().last().unwrap();
        assert_eq!(display_width(last), MAX_CELL_WIDTH);
        assert!(last.ends_with(".."));
    }

    #[test]
    fn control_characters_become_spaces() {
        let rendered = render_table(&["a".to_string()], &[vec!["x\ny".to_string()]]);
        assert!(rendered.contains("x y"));
    }
}
