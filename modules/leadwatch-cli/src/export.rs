//! File exports for stored businesses.

use std::path::Path;

use anyhow::{Context, Result};

use leadwatch_store::StoredBusiness;

const CSV_HEADER: [&str; 12] = [
    "name",
    "phone",
    "category",
    "city",
    "state",
    "zip_code",
    "website",
    "reviews",
    "rating",
    "source_url",
    "first_seen",
    "last_seen",
];

pub fn write_csv(rows: &[StoredBusiness], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(CSV_HEADER)?;
    for row in rows {
        let rating = row.rating.map(|r| r.to_string()).unwrap_or_default();
        let first_seen = row.first_seen.to_rfc3339();
        let last_seen = row.last_seen.to_rfc3339();
        writer.write_record([
            row.name.as_str(),
            row.phone.as_str(),
            row.category.as_str(),
            row.city.as_str(),
            row.state.as_str(),
            row.zip_code.as_str(),
            row.website.as_deref().unwrap_or(""),
            row.reviews.as_str(),
            rating.as_str(),
            row.source_url.as_str(),
            first_seen.as_str(),
            last_seen.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json(rows: &[StoredBusiness], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(rows)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
