//! Statement construction with identifier and literal quoting

use chrono::NaiveDate;

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_literal(literal: &str) -> String {
    format!("'{}'", literal.replace('\'', "''"))
}

pub fn qualified_table_name(catalog: &str, schema: &str, table: &str) -> String {
    format!(
        "{}.{}.{}",
        quote_ident(catalog),
        quote_ident(schema),
        quote_ident(table)
    )
}

pub fn expire_snapshots_statement(
    qualified_table: &str,
    retention_days: i64,
    retain_last: i64,
) -> String {
    let retention_threshold = format!("{retention_days}d");
    format!(
        "ALTER TABLE {qualified_table} EXECUTE expire_snapshots(retention_threshold => {}, retain_last => {retain_last}, clean_expired_metadata => true)",
        quote_literal(&retention_threshold),
    )
}

pub fn remove_orphan_files_statement(qualified_table: &str, retention_days: i64) -> String {
    let retention_threshold = format!("{retention_days}d");
    format!(
        "ALTER TABLE {qualified_table} EXECUTE remove_orphan_files(retention_threshold => {})",
        quote_literal(&retention_threshold),
    )
}

/// The day-partition predicate keeps the rewrite bounded to the requested
/// window.
pub fn optimize_statement(
    qualified_table: &str,
    file_size_threshold_mb: i64,
    day_column: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> (String, String) {
    let threshold = format!("{file_size_threshold_mb}MB");
    let where_clause = format!(
        "date({col}) >= date '{from}' AND date({col}) <= date '{to}'",
        col = quote_ident(day_column),
        from = from.format("%Y-%m-%d"),
        to = to.format("%Y-%m-%d"),
    );
    let statement = format!(
        "ALTER TABLE {qualified_table} EXECUTE optimize(file_size_threshold => {}) WHERE {where_clause}",
        quote_literal(&threshold),
    );

    (statement, where_clause)
}
