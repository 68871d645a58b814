// src/paging.rs
//! Bounded cursor pagination over `value` + `@odata.nextLink` collections.
//!
//! One loop shared by every connector that lists Graph/ARM collections:
//! follow the server-issued next-page URL until exhaustion, the item cap,
//! or the page cap, whichever comes first. Cursor URLs are opaque and are
//! never parsed or rewritten; the initial OData query parameters apply to
//! the first request only.

use std::future::Future;

use serde_json::Value;

use crate::error::ConnectorError;

/// Field carrying the opaque next-page URL in Graph responses. ARM uses
/// `nextLink`; [`follow_value_pages`] accepts both.
pub const ODATA_NEXT_LINK: &str = "@odata.nextLink";
pub const ARM_NEXT_LINK: &str = "nextLink";

#[derive(Debug, Clone)]
pub struct PageSpec {
    /// `$top` requested per page (>0).
    pub page_size: u32,
    /// Hard cap on accumulated items; `None` means unbounded.
    pub max_items: Option<usize>,
    /// Hard cap on upstream requests (>0).
    pub max_pages: usize,
}

impl PageSpec {
    pub fn new(page_size: u32, max_items: Option<usize>, max_pages: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            max_items,
            max_pages: max_pages.max(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct PagedOutcome {
    pub items: Vec<Value>,
    pub total_retrieved: usize,
    pub pages_processed: usize,
}

impl PagedOutcome {
    /// Envelope fragment `{"value": [...], "@odata.count": n}` used by the
    /// SharePoint-family list actions.
    pub fn into_value_collection(self) -> Value {
        serde_json::json!({
            "value": self.items,
            "@odata.count": self.total_retrieved,
        })
    }
}

fn next_link(body: &Value) -> Option<String> {
    body.get(ODATA_NEXT_LINK)
        .or_else(|| body.get(ARM_NEXT_LINK))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Repeatedly fetch pages starting at `start_url`, accumulating the `value`
/// batches. `fetch(url, is_first)` issues one GET; `is_first` is true only
/// for the very first request, which is the only one that carries the
/// caller's initial query parameters.
///
/// A missing or non-array `value` terminates the loop cleanly with whatever
/// was accumulated (malformed-response termination, not an error). Any
/// fetch error aborts the whole call; there is no retry and no
/// partial-result return on error.
pub async fn follow_value_pages<F, Fut>(
    start_url: &str,
    spec: &PageSpec,
    mut fetch: F,
) -> Result<PagedOutcome, ConnectorError>
where
    F: FnMut(String, bool) -> Fut,
    Fut: Future<Output = Result<Value, ConnectorError>>,
{
    let mut out = PagedOutcome::default();
    let mut cursor = Some(start_url.to_string());

    while let Some(url) = cursor.take() {
        if out.pages_processed >= spec.max_pages {
            break;
        }
        if let Some(cap) = spec.max_items {
            if out.items.len() >= cap {
                break;
            }
        }
        let is_first = out.pages_processed == 0 && url == start_url;
        out.pages_processed += 1;

        let body = fetch(url, is_first).await?;
        let batch = match body.get("value").and_then(|v| v.as_array()) {
            Some(b) => b,
            None => {
                tracing::warn!("paged response without a 'value' array, stopping");
                break;
            }
        };
        for item in batch {
            if let Some(cap) = spec.max_items {
                if out.items.len() >= cap {
                    break;
                }
            }
            out.items.push(item.clone());
        }
        if let Some(cap) = spec.max_items {
            if out.items.len() >= cap {
                break;
            }
        }
        cursor = next_link(&body);
    }

    out.total_retrieved = out.items.len();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn page(items: &[i64], next: Option<&str>) -> Value {
        let mut v = json!({ "value": items });
        if let Some(n) = next {
            v[ODATA_NEXT_LINK] = json!(n);
        }
        v
    }

    #[tokio::test]
    async fn single_request_when_no_next_link() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let spec = PageSpec::new(50, None, 20);
        let out = follow_value_pages("https://u/items", &spec, move |_url, first| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                assert!(first);
                Ok(page(&[1, 2, 3], None))
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.pages_processed, 1);
        assert_eq!(out.total_retrieved, 3);
    }

    #[tokio::test]
    async fn respects_max_pages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let spec = PageSpec::new(2, None, 3);
        let out = follow_value_pages("https://u/items", &spec, move |_url, _first| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(page(&[1, 2], Some("https://u/items?$skiptoken=x")))
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(out.pages_processed, 3);
        assert_eq!(out.total_retrieved, 6);
    }

    #[tokio::test]
    async fn caps_items_mid_batch() {
        let spec = PageSpec::new(2, Some(3), 20);
        let out = follow_value_pages("https://u/items", &spec, |_url, _first| async {
            Ok(page(&[1, 2], Some("https://u/next")))
        })
        .await
        .unwrap();
        assert_eq!(out.total_retrieved, 3);
        assert_eq!(out.pages_processed, 2);
    }

    #[tokio::test]
    async fn initial_query_only_on_first_request() {
        let firsts = Arc::new(AtomicUsize::new(0));
        let f = firsts.clone();
        let spec = PageSpec::new(1, None, 5);
        let out = follow_value_pages("https://u/items", &spec, move |url, first| {
            let f = f.clone();
            async move {
                if first {
                    f.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(url, "https://u/items");
                    Ok(page(&[1], Some("https://u/items?$skiptoken=a")))
                } else {
                    // cursor URL used verbatim
                    assert!(url.contains("$skiptoken"));
                    Ok(page(&[2], None))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(firsts.load(Ordering::SeqCst), 1);
        assert_eq!(out.total_retrieved, 2);
    }

    #[tokio::test]
    async fn malformed_value_terminates_without_error() {
        let spec = PageSpec::new(2, None, 20);
        let out = follow_value_pages("https://u/items", &spec, |_url, first| async move {
            if first {
                Ok(page(&[1, 2], Some("https://u/next")))
            } else {
                Ok(json!({ "value": "not-a-list" }))
            }
        })
        .await
        .unwrap();
        assert_eq!(out.total_retrieved, 2);
        assert_eq!(out.pages_processed, 2);
    }

    #[tokio::test]
    async fn fetch_error_aborts_without_partial_result() {
        let spec = PageSpec::new(2, None, 20);
        let res = follow_value_pages("https://u/items", &spec, |_url, first| async move {
            if first {
                Ok(page(&[1, 2], Some("https://u/next")))
            } else {
                Err(ConnectorError::Upstream {
                    status: 503,
                    code: None,
                    message: "unavailable".to_string(),
                })
            }
        })
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn arm_next_link_is_followed_too() {
        let spec = PageSpec::new(2, None, 5);
        let out = follow_value_pages("https://m/rg", &spec, |_url, first| async move {
            if first {
                Ok(json!({ "value": [1], "nextLink": "https://m/rg?page=2" }))
            } else {
                Ok(json!({ "value": [2] }))
            }
        })
        .await
        .unwrap();
        assert_eq!(out.total_retrieved, 2);
        assert_eq!(out.pages_processed, 2);
    }
}
