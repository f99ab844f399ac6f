use swh_shared::TimeCatalog;
use tracing::{info, warn};

use crate::config::{upstream_connect_timeout, upstream_http_timeout};

const USER_AGENT: &str = "swh-overlay/0.1";
const TIME_DIMENSION: &str = "time";

pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    let request_timeout = upstream_http_timeout();
    let connect_timeout = upstream_connect_timeout();
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .build()
        .or_else(|e| {
            warn!(
                error = %e,
                "failed to build configured HTTP client, retrying without custom user-agent"
            );
            reqwest::Client::builder()
                .timeout(request_timeout)
                .connect_timeout(connect_timeout)
                .build()
        })
}

/// Fetch the capabilities document and read its time dimension.
///
/// Never fails: any problem is logged and yields an empty catalog.
pub async fn fetch_time_catalog(client: &reqwest::Client, url: &str) -> TimeCatalog {
    let body = match fetch_capabilities(client, url).await {
        Ok(body) => body,
        Err(e) => {
            warn!(url, error = %e, "failed to fetch capabilities");
            return TimeCatalog::default();
        }
    };

    match parse_capabilities(&body) {
        Ok(Some(catalog)) => {
            info!(url, times = catalog.len(), "loaded forecast time catalog");
            catalog
        }
        Ok(None) => {
            warn!(url, "capabilities document has no time dimension");
            TimeCatalog::default()
        }
        Err(e) => {
            warn!(url, error = %e, "capabilities document is not valid XML");
            TimeCatalog::default()
        }
    }
}

async fn fetch_capabilities(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| format!("failed to read response body: {e}"))?;

    if !status.is_success() {
        let preview = body.chars().take(200).collect::<String>();
        return Err(format!("upstream status {status}; body preview: {preview}"));
    }
    Ok(body)
}

/// `Ok(None)` when the document parses but carries no `Dimension name="time"`.
pub fn parse_capabilities(xml: &str) -> Result<Option<TimeCatalog>, roxmltree::Error> {
    let doc = roxmltree::Document::parse(xml)?;
    let Some(dimension) = doc.descendants().find(|node| {
        node.is_element()
            && node.tag_name().name() == "Dimension"
            && node.attribute("name") == Some(TIME_DIMENSION)
    }) else {
        return Ok(None);
    };

    let text: String = dimension
        .descendants()
        .filter(|node| node.is_text())
        .filter_map(|node| node.text())
        .collect();

    let parsed = TimeCatalog::from_comma_separated(text.trim());
    if !parsed.rejected.is_empty() {
        warn!(
            rejected = parsed.rejected.len(),
            sample = ?parsed.rejected.first(),
            "skipping unparseable timestamps in time dimension"
        );
    }
    Ok(Some(parsed.catalog))
}
