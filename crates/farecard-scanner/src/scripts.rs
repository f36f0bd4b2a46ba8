//! In-page extraction functions.
//!
//! Each script is a self-invoking expression prefixed with a `/*farecard:NAME*/`
//! tag so failures can be attributed in logs. Selectors are embedded as JSON
//! string literals.

use farecard_browser::actions::js_string;

const TAG_PREFIX: &str = "/*farecard:";

fn tagged(name: &str, body: &str) -> String {
    format!("{TAG_PREFIX}{name}*/{body}")
}

/// Name a script was tagged with, e.g. `table-html` or `row:3`.
#[must_use]
pub fn script_tag(script: &str) -> Option<&str> {
    let rest = script.strip_prefix(TAG_PREFIX)?;
    rest.split_once("*/").map(|(name, _)| name)
}

/// Every option of the partition selector as `[{id, label}]`.
#[must_use]
pub fn partition_options(selector: &str) -> String {
    tagged(
        "options",
        &format!(
            r#"(() => {{
    const select = document.querySelector({sel});
    if (!select) return [];
    return Array.from(select.options).map(o => ({{ id: o.value, label: (o.textContent || "").trim() }}));
}})()"#,
            sel = js_string(selector)
        ),
    )
}

/// Row count and rendered text of the results table; hashed into a
/// content signature by the caller.
#[must_use]
pub fn table_signature(table: &str) -> String {
    tagged(
        "signature",
        &format!(
            r#"(() => {{
    const table = document.querySelector({sel});
    if (!table) return "";
    return table.rows.length + "\n" + (table.innerText || "");
}})()"#,
            sel = js_string(table)
        ),
    )
}

/// Markup of the results table, or `""` when it is not rendered.
///
/// Header and data rows are told apart by the caller.
#[must_use]
pub fn table_html(table: &str) -> String {
    tagged(
        "table-html",
        &format!(
            r#"(() => {{
    const table = document.querySelector({sel});
    return table ? table.outerHTML : "";
}})()"#,
            sel = js_string(table)
        ),
    )
}

/// Number of rows in the results table, header rows included.
#[must_use]
pub fn row_count(table: &str) -> String {
    tagged(
        "row-count",
        &format!(
            r#"(() => {{
    const table = document.querySelector({sel});
    return table ? table.rows.length : 0;
}})()"#,
            sel = js_string(table)
        ),
    )
}

/// Markup of the row at `index`, or `null` past the end.
#[must_use]
pub fn row_html(table: &str, index: usize) -> String {
    tagged(
        &format!("row:{index}"),
        &format!(
            r#"(() => {{
    const table = document.querySelector({sel});
    const row = table ? table.rows[{index}] : null;
    return row ? row.outerHTML : null;
}})()"#,
            sel = js_string(table)
        ),
    )
}
