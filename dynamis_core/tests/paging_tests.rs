//! Black-box tests for the bounded cursor pagination contract and the
//! identifier classification rules, driven through the public API.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dynamis_core::error::ConnectorError;
use dynamis_core::ident::ItemRef;
use dynamis_core::paging::{follow_value_pages, PageSpec, ODATA_NEXT_LINK};

fn page_of(count: usize, offset: usize, next: Option<&str>) -> Value {
    let items: Vec<Value> = (0..count).map(|i| json!({ "n": offset + i })).collect();
    let mut body = json!({ "value": items });
    if let Some(next) = next {
        body[ODATA_NEXT_LINK] = json!(next);
    }
    body
}

#[tokio::test]
async fn item_cap_holds_regardless_of_upstream_page_size() {
    // upstream hands back 10 items per page no matter what we asked for
    for cap in [1usize, 5, 9, 10, 25] {
        let spec = PageSpec::new(3, Some(cap), 100);
        let out = follow_value_pages("https://u/items", &spec, move |_url, _first| async move {
            Ok(page_of(10, 0, Some("https://u/items?page=next")))
        })
        .await
        .unwrap();
        assert!(out.total_retrieved <= cap, "cap {} exceeded", cap);
        assert_eq!(out.items.len(), out.total_retrieved);
    }
}

#[tokio::test]
async fn page_cap_bounds_request_count() {
    for max_pages in [1usize, 2, 7] {
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        let spec = PageSpec::new(2, None, max_pages);
        let out = follow_value_pages("https://u/items", &spec, move |_url, _first| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(page_of(2, n * 2, Some("https://u/items?cursor=more")))
            }
        })
        .await
        .unwrap();
        assert_eq!(requests.load(Ordering::SeqCst), max_pages);
        assert_eq!(out.pages_processed, max_pages);
    }
}

#[tokio::test]
async fn exhaustion_without_cursor_means_one_request() {
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();
    let spec = PageSpec::new(50, Some(1000), 100);
    let out = follow_value_pages("https://u/items", &spec, move |_url, _first| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(page_of(4, 0, None))
        }
    })
    .await
    .unwrap();
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert_eq!(out.pages_processed, 1);
    assert_eq!(out.total_retrieved, 4);
}

#[tokio::test]
async fn non_list_value_terminates_cleanly_with_partial_accumulation() {
    let spec = PageSpec::new(2, None, 100);
    let out = follow_value_pages("https://u/items", &spec, |_url, first| async move {
        if first {
            Ok(page_of(2, 0, Some("https://u/items?cursor=b")))
        } else {
            Ok(json!({ "value": { "unexpected": "object" } }))
        }
    })
    .await
    .unwrap();
    assert_eq!(out.total_retrieved, 2);
    assert_eq!(out.pages_processed, 2);
}

#[tokio::test]
async fn cursor_urls_are_used_verbatim() {
    // opaque cursor with query noise must round-trip untouched
    let cursor = "https://u/items?$skiptoken=X%27abc%20def%27&weird=1";
    let spec = PageSpec::new(2, None, 10);
    let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let sink = seen.clone();
    let out = follow_value_pages("https://u/items", &spec, move |url, first| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(url);
            if first {
                Ok(page_of(1, 0, Some(cursor)))
            } else {
                Ok(page_of(1, 1, None))
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(out.total_retrieved, 2);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], "https://u/items");
    assert_eq!(seen[1], cursor);
}

#[tokio::test]
async fn upstream_error_surfaces_structured_not_partial() {
    let spec = PageSpec::new(2, None, 10);
    let err = follow_value_pages("https://u/items", &spec, |_url, first| async move {
        if first {
            Ok(page_of(2, 0, Some("https://u/next")))
        } else {
            Err(ConnectorError::Upstream {
                status: 429,
                code: Some("activityLimitReached".to_string()),
                message: "throttled".to_string(),
            })
        }
    })
    .await
    .unwrap_err();
    match err {
        ConnectorError::Upstream { status, code, .. } => {
            assert_eq!(status, 429);
            assert_eq!(code.as_deref(), Some("activityLimitReached"));
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
}

#[test]
fn strings_with_slashes_never_classify_as_ids() {
    for input in [
        "a/b",
        "/Documents/quarterly report",
        "deeply/nested/path/with/many/segments/and/a/very/long/total/length/indeed.txt",
    ] {
        assert!(matches!(ItemRef::classify(input), ItemRef::Path(_)));
    }
}

#[test]
fn tagged_discriminant_overrides_classification() {
    let ambiguous = "ABCDEFGHIJKLMNOPQRSTUVWXYZABCDEFGHIJKLMNOPQ";
    assert!(matches!(ItemRef::classify(ambiguous), ItemRef::Id(_)));
    let tagged = ItemRef::from_value(&json!({ "path": ambiguous })).unwrap();
    assert_eq!(tagged, ItemRef::Path(ambiguous.to_string()));
}
