use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn pad(cell: &str, width: usize) -> String {
    let len = cell.chars().count();
    format!("{cell}{}", " ".repeat(width.saturating_sub(len)))
}

/// Print rows as space-aligned columns under a dashed header.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<String>| println!("{}", cells.join("  ").trim_end());

    line(headers.iter().zip(&widths).map(|(h, w)| pad(h, *w)).collect());
    line(widths.iter().map(|w| "-".repeat(*w)).collect());
    for row in &rows {
        line(row.iter().zip(&widths).map(|(c, w)| pad(c, *w)).collect());
    }
}

/// Print `label: value` pairs with the values aligned.
pub fn print_fields(fields: &[(&str, String)]) {
    let width = fields.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
    for (label, value) in fields {
        println!("{}  {value}", pad(&format!("{label}:"), width + 1));
    }
}

/// Placeholder for an empty cell.
pub fn or_dash(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "-".to_string(),
    }
}
