use async_trait::async_trait;
use vcdmig_domain::Element;

use crate::error::ClientError;

/// The REST surface of one vCloud Director instance.
///
/// Everything above this trait (reader, resolver, builders) is written
/// against it, so a whole migration can run against [`SimPlatform`]
/// (crate::sim::SimPlatform) in tests exactly as it runs against
/// [`VcdClient`](crate::vcd::VcdClient) in production.
///
/// `href` arguments are absolute URLs as returned by the platform itself.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Short label for log lines: `"source"` / `"target"`.
    fn label(&self) -> &str;

    /// Base URL of the instance, without a trailing slash.
    fn base_url(&self) -> &str;

    /// Run the query service for `query_type` with a `filter` expression
    /// (`name==Acme;org==...`, empty for none). Returns every record across
    /// all result pages.
    async fn query(&self, query_type: &str, filter: &str) -> Result<Vec<Element>, ClientError>;

    async fn get(&self, href: &str) -> Result<Element, ClientError>;

    async fn post(&self, href: &str, media_type: &str, body: &Element) -> Result<Element, ClientError>;

    async fn put(&self, href: &str, media_type: &str, body: &Element) -> Result<Element, ClientError>;

    /// End the session. Callers log failures rather than propagate them.
    async fn close(&self) -> Result<(), ClientError>;
}

// ── Query filter helpers ──────────────────────────────────────────────────────

/// `key==value` with the filter grammar's reserved characters escaped.
pub fn filter_eq(key: &str, value: &str) -> String {
    format!("{}=={}", key, escape_filter_value(value))
}

/// `name==value`, the most common filter.
pub fn name_filter(name: &str) -> String {
    filter_eq("name", name)
}

/// Join filter terms with the AND operator.
pub fn filter_and(terms: &[String]) -> String {
    terms.join(";")
}

/// Escape `; , ( ) =` inside a filter value. `*` is left alone so wildcard
/// searches keep working.
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("%3B"),
            ',' => out.push_str("%2C"),
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            '=' => out.push_str("%3D"),
            '%' => out.push_str("%25"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape_filter_value(value: &str) -> String {
    value
        .replace("%3B", ";")
        .replace("%2C", ",")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%3D", "=")
        .replace("%25", "%")
}

/// Records in a query result: every child carrying an `href`, minus links.
pub fn query_records(page: &Element) -> Vec<Element> {
    page.children
        .iter()
        .filter(|c| c.local_name() != "Link" && c.attr("href").is_some())
        .cloned()
        .collect()
}
