use std::io::Write;

use anyhow::{Context, Result};

use super::model::{Dataset, Record};

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Write records as a pretty-printed JSON array.
pub fn write_json<'a, W, I>(records: I, writer: W) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a Record>,
{
    let records: Vec<&Record> = records.into_iter().collect();
    serde_json::to_writer_pretty(writer, &records).context("writing JSON")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// CSV layout: `key`, `kind`, then one column per field name of the dataset
/// in sorted order. Repeated fields are joined with `;`, e.g.
/// `"Alice;Bob"` for two authors.
pub fn write_csv<'a, W, I>(dataset: &Dataset, records: I, writer: W) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a Record>,
{
    let mut csv_writer = csv::Writer::from_writer(writer);

    let columns: Vec<&str> = dataset.field_names.iter().map(String::as_str).collect();
    let mut header = vec!["key", "kind"];
    header.extend(&columns);
    csv_writer.write_record(&header).context("writing CSV header")?;

    for record in records {
        let mut row = Vec::with_capacity(columns.len() + 2);
        row.push(record.key().unwrap_or("").to_string());
        row.push(record.kind.clone());
        for column in &columns {
            row.push(record.values(column).collect::<Vec<_>>().join(";"));
        }
        csv_writer
            .write_record(&row)
            .with_context(|| format!("writing CSV row for `{}`", record.key().unwrap_or("?")))?;
    }

    csv_writer.flush().context("flushing CSV")?;
    Ok(())
}
