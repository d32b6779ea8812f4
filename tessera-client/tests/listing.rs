//! Paginated listing against the mock store.

mod common;

use common::Harness;
use futures_util::StreamExt;
use serde_json::json;
use tessera_client::{AccessLayer, PageParams};
use tessera_core::{DescriptorTable, Method, OpContext, PageSize, ResourceDescriptor};
use tessera_test_utils::{fixtures, Fault};

#[tokio::test]
async fn test_dump_reads_every_page() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 240);

    let all = harness
        .handle("role", None, None)
        .dump(&OpContext::new(), PageParams::new())
        .await
        .expect("dump");
    assert_eq!(all.len(), 240);
    assert_eq!(all[0].rest_key(), Some("00001"));
    assert_eq!(all[239].logical_id(), Some("role-239"));
    assert_eq!(harness.mock.calls(Method::Get), 3);
}

#[tokio::test]
async fn test_exact_multiple_needs_terminating_page() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 200);

    let all = harness
        .handle("role", None, None)
        .dump(&OpContext::new(), PageParams::new())
        .await
        .expect("dump");
    assert_eq!(all.len(), 200);
    assert_eq!(harness.mock.calls(Method::Get), 3);
}

#[tokio::test]
async fn test_pager_yields_pages_then_ends() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 240);
    let ctx = OpContext::new();

    let mut pager = harness.handle("role", None, None).pages(PageParams::new());
    assert_eq!(pager.page_size(), Some(100));

    let mut sizes = Vec::new();
    while let Some(page) = pager.next_page(&ctx).await {
        sizes.push(page.expect("page").len());
    }
    assert_eq!(sizes, [100, 100, 40]);
    assert!(pager.is_done());
    assert!(pager.next_page(&ctx).await.is_none());
}

#[tokio::test]
async fn test_smaller_count_means_more_requests() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 240);

    let handle = harness.handle("role", None, None);
    assert_eq!(handle.pages(PageParams::new().with_count(500)).page_size(), Some(100));

    let all = handle
        .dump(&OpContext::new(), PageParams::new().with_count(50))
        .await
        .expect("dump");
    assert_eq!(all.len(), 240);
    assert_eq!(harness.mock.calls(Method::Get), 5);
}

#[tokio::test]
async fn test_offset_and_fields_are_forwarded() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 240);

    let tail = harness
        .handle("role", None, None)
        .dump(
            &OpContext::new(),
            PageParams::new().with_offset(230).with_fields(["capabilities"]),
        )
        .await
        .expect("dump");
    assert_eq!(tail.len(), 10);
    assert_eq!(tail[0].logical_id(), Some("role-230"));
    assert_eq!(tail[0].fields(), ["capabilities", "id", "name"]);
    assert_eq!(harness.mock.calls(Method::Get), 1);
}

#[tokio::test]
async fn test_stream_yields_every_item() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 240);

    let mut items = Box::pin(
        harness
            .handle("role", None, None)
            .stream(OpContext::new(), PageParams::new()),
    );
    let mut count = 0;
    while let Some(item) = items.next().await {
        item.expect("item");
        count += 1;
    }
    assert_eq!(count, 240);
    assert_eq!(harness.mock.calls(Method::Get), 3);
}

#[tokio::test]
async fn test_stream_is_lazy() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 240);

    let first: Vec<_> = harness
        .handle("role", None, None)
        .stream(OpContext::new(), PageParams::new())
        .take(5)
        .collect()
        .await;
    assert_eq!(first.len(), 5);
    assert_eq!(harness.mock.calls(Method::Get), 1);
}

#[tokio::test]
async fn test_unbounded_type_lists_in_one_request() {
    let harness = Harness::new();
    for i in 0..300 {
        harness
            .mock
            .insert("config/lookup_table", json!({"name": format!("table-{:03}", i)}));
    }

    let handle = harness.handle("lookup_table", None, None);
    assert_eq!(handle.pages(PageParams::new()).page_size(), None);
    let all = handle
        .dump(&OpContext::new(), PageParams::new())
        .await
        .expect("dump");
    assert_eq!(all.len(), 300);
    assert_eq!(harness.mock.calls(Method::Get), 1);
    assert!(!harness.mock.requests()[0].1.contains("count="));
}

#[tokio::test]
async fn test_page_error_ends_listing() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 240);
    let ctx = OpContext::new();

    let mut pager = harness.handle("role", None, None).pages(PageParams::new());
    assert_eq!(pager.next_page(&ctx).await.expect("page").expect("ok").len(), 100);

    harness.mock.fail_next(Method::Get, Fault::Status(401), 1);
    assert!(pager.next_page(&ctx).await.expect("page").is_err());
    assert!(pager.next_page(&ctx).await.is_none());
}

#[tokio::test]
async fn test_zero_page_size_lists_in_one_request() {
    let harness = Harness::new();
    let descriptor = ResourceDescriptor::new("widget", "config", "id", "name")
        .with_page_size(PageSize::Bounded(0));
    harness.mock.register(&descriptor);
    for i in 0..30 {
        harness
            .mock
            .insert("config/widget", json!({"id": format!("{:02}", i), "name": format!("w{}", i)}));
    }
    let layer = AccessLayer::builder()
        .descriptors(DescriptorTable::from_descriptors([descriptor]))
        .transport(harness.mock.clone())
        .build();

    let handle = layer
        .resource(&fixtures::client_config(), None, None, "widget")
        .expect("custom type");
    assert_eq!(handle.pages(PageParams::new()).page_size(), None);
    let all = handle
        .dump(&OpContext::with_timeout(std::time::Duration::from_secs(5)), PageParams::new())
        .await
        .expect("dump");
    assert_eq!(all.len(), 30);
    assert_eq!(harness.mock.calls(Method::Get), 1);
}
