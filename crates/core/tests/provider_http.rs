//! Provider adapters and the HTTP resolver against a local mock server.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harvester_core::{
    create_adapter, describe_collection, plan_gap_fill, testing::fixtures, AlchemyConfig,
    CollectionDescriptor, FsSink, HttpSourceResolver, IngestConfig, IngestionOrchestrator,
    NftScanConfig, PageCursor, ProviderAdapter, ProviderError, ProviderKind, RequestThrottle,
    ResolverConfig, RetryPolicy, RunHandle, RunPhase,
};

const KEY: &str = "test-key";

fn alchemy(server: &MockServer) -> AlchemyConfig {
    AlchemyConfig::default()
        .with_api_keys(vec![KEY.to_string()])
        .with_base_url(server.uri())
        .with_page_size(2)
}

fn nftscan(server: &MockServer) -> NftScanConfig {
    NftScanConfig::default()
        .with_api_keys(vec![KEY.to_string()])
        .with_base_url(server.uri())
        .with_page_size(2)
}

fn adapter(
    server: &MockServer,
    descriptor: &harvester_core::CollectionDescriptor,
) -> Arc<dyn ProviderAdapter> {
    create_adapter(
        descriptor,
        &alchemy(server),
        &nftscan(server),
        RequestThrottle::unlimited(),
    )
    .unwrap()
}

fn alchemy_nft(id: u64, media: &str) -> serde_json::Value {
    json!({
        "tokenId": id.to_string(),
        "tokenUri": format!("https://meta.example/{}", id),
        "image": { "cachedUrl": media, "contentType": "image/png" },
        "raw": { "metadata": { "name": format!("#{}", id) } }
    })
}

#[tokio::test]
async fn test_alchemy_contract_follows_page_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/nft/v3/{}/getNFTsForContract", KEY)))
        .and(query_param("startToken", "0"))
        .and(query_param("withMetadata", "true"))
        .and(query_param("contractAddress", fixtures::CONTRACT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nfts": [alchemy_nft(0, "https://cdn.example/0.png"), {"broken": true}],
            "pageKey": "0x02"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/nft/v3/{}/getNFTsForContract", KEY)))
        .and(query_param("startToken", "0x02"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nfts": [alchemy_nft(2, "https://cdn.example/2.png")]
        })))
        .mount(&server)
        .await;

    let adapter = adapter(&server, &fixtures::descriptor(ProviderKind::AlchemyContract));

    let first = adapter.fetch_page(&PageCursor::Offset(0)).await.unwrap();
    assert_eq!(first.records.len(), 1);
    assert_eq!(first.skipped, 1);
    assert_eq!(first.records[0].id, "0");
    assert_eq!(first.next_cursor, Some(PageCursor::Token("0x02".into())));

    let second = adapter
        .fetch_page(first.next_cursor.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(second.records[0].id, "2");
    assert_eq!(second.next_cursor, None);
}

#[tokio::test]
async fn test_alchemy_batch_posts_token_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/nft/v3/{}/getNFTMetadataBatch", KEY)))
        .and(body_partial_json(json!({
            "tokens": [
                {"contractAddress": fixtures::CONTRACT, "tokenId": "1"},
                {"contractAddress": fixtures::CONTRACT, "tokenId": "2"}
            ],
            "refreshCache": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nfts": [alchemy_nft(1, "https://cdn.example/1.png"), alchemy_nft(2, "https://cdn.example/2.png")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let descriptor = fixtures::descriptor(ProviderKind::AlchemyBatch)
        .with_total(3)
        .with_start_index(1);
    let adapter = adapter(&server, &descriptor);

    let page = adapter.fetch_page(&PageCursor::Offset(0)).await.unwrap();
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.next_cursor, Some(PageCursor::Offset(2)));

    let err = adapter
        .fetch_page(&PageCursor::Token("abc".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidCursor(_)));
}

#[tokio::test]
async fn test_nftscan_body_code_429_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/assets/batch"))
        .and(header("x-api-key", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 429,
            "msg": "Too many requests",
            "data": null
        })))
        .mount(&server)
        .await;

    let descriptor = fixtures::descriptor(ProviderKind::NftscanBatch).with_total(4);
    let adapter = adapter(&server, &descriptor);

    let err = adapter.fetch_page(&PageCursor::Offset(0)).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }));
}

#[tokio::test]
async fn test_nftscan_html_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/assets/batch"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>Cloudflare</html>"),
        )
        .mount(&server)
        .await;

    let descriptor = fixtures::descriptor(ProviderKind::NftscanBatch).with_total(4);
    let adapter = adapter(&server, &descriptor);

    let err = adapter.fetch_page(&PageCursor::Offset(0)).await.unwrap_err();
    assert!(matches!(err, ProviderError::Protocol(_)));
}

#[tokio::test]
async fn test_missing_api_key_is_not_configured() {
    let descriptor = fixtures::descriptor(ProviderKind::AlchemyContract);
    let result = create_adapter(
        &descriptor,
        &AlchemyConfig::default(),
        &NftScanConfig::default(),
        RequestThrottle::unlimited(),
    );
    assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
}

#[tokio::test]
async fn test_end_to_end_over_http() {
    let server = MockServer::start().await;
    let media = |id: u64| format!("{}/media/{}.png", server.uri(), id);

    Mock::given(method("GET"))
        .and(path(format!("/nft/v3/{}/getNFTsForContract", KEY)))
        .and(query_param("startToken", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nfts": [alchemy_nft(0, &media(0)), alchemy_nft(1, &media(1))],
            "pageKey": "2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/nft/v3/{}/getNFTsForContract", KEY)))
        .and(query_param("startToken", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nfts": [alchemy_nft(2, &media(2))]
        })))
        .mount(&server)
        .await;
    for id in [0, 2] {
        Mock::given(method("GET"))
            .and(path(format!("/media/{}.png", id)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG".to_vec()))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/media/1.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(FsSink::new(temp_dir.path(), "Http Collection"));
    let resolver = HttpSourceResolver::new(
        &ResolverConfig::default().with_gateways(vec![]),
        RequestThrottle::unlimited(),
        RetryPolicy::fast(2),
    )
    .unwrap();
    let descriptor = fixtures::descriptor(ProviderKind::AlchemyContract);

    let orchestrator = IngestionOrchestrator::new(
        IngestConfig::default(),
        adapter(&server, &descriptor),
        Arc::new(resolver),
        Arc::clone(&sink),
    )
    .with_retry_policy(RetryPolicy::fast(2));
    let report = orchestrator.run(&descriptor, &RunHandle::new()).await;

    assert_eq!(report.state, RunPhase::Completed);
    assert_eq!(report.records_processed, 3);
    assert_eq!(report.media_written, 2);
    assert_eq!(report.media_failures, 1);
    assert_eq!(report.failed_ids, vec!["1".to_string()]);
    assert!(sink.has_media("0", ".png").await);
    assert!(sink.has_metadata("1").await);
    assert!(!sink.has_media("1", ".png").await);
}

#[tokio::test]
async fn test_describe_collection_fills_descriptor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/nft/v3/{}/getNFTMetadataBatch", KEY)))
        .and(body_partial_json(json!({
            "tokens": [
                {"contractAddress": fixtures::CONTRACT, "tokenId": "0"},
                {"contractAddress": fixtures::CONTRACT, "tokenId": "1"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nfts": [
                {
                    "tokenId": "0",
                    "contract": {"name": "Sampled Apes", "totalSupply": "3"},
                    "raw": {"metadata": {}, "error": "Token does not exist"}
                },
                {
                    "tokenId": "1",
                    "contract": {"name": "Sampled Apes", "totalSupply": "3"},
                    "image": {"cachedUrl": "https://cdn.example/1", "contentType": "image/gif"},
                    "raw": {"metadata": {"name": "#1"}}
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut descriptor = CollectionDescriptor::new(
        harvester_core::Chain::Ethereum,
        ProviderKind::AlchemyBatch,
        fixtures::CONTRACT,
        "",
    );
    let info = describe_collection(&descriptor, &alchemy(&server), RequestThrottle::unlimited())
        .await
        .unwrap();
    info.apply(&mut descriptor);

    assert_eq!(descriptor.name, "Sampled Apes");
    assert_eq!(descriptor.total, 3);
    assert_eq!(descriptor.start_index, 1);
    assert_eq!(descriptor.candidate_format, ".gif");
}

#[tokio::test]
async fn test_gap_fill_fetches_only_missing_tokens() {
    let server = MockServer::start().await;
    let media = |id: u64| format!("{}/media/{}.png", server.uri(), id);

    // Only ids 2 and 4 may be requested; the batch mock rejects any other body.
    Mock::given(method("POST"))
        .and(path(format!("/nft/v3/{}/getNFTMetadataBatch", KEY)))
        .and(body_partial_json(json!({
            "tokens": [
                {"contractAddress": fixtures::CONTRACT, "tokenId": "2"},
                {"contractAddress": fixtures::CONTRACT, "tokenId": "4"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nfts": [alchemy_nft(2, &media(2)), alchemy_nft(4, &media(4))]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/media/[24]\.png$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG".to_vec()))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(FsSink::new(temp_dir.path(), "Gappy"));
    sink.prepare().await.unwrap();
    for id in ["1", "3"] {
        sink.write_media(id, ".png", b"x").await.unwrap();
        sink.write_metadata(id, &json!({"name": id})).await.unwrap();
    }
    // Half-written token: metadata without media.
    sink.write_metadata("4", &json!({"name": "4"})).await.unwrap();

    let descriptor = fixtures::descriptor(ProviderKind::AlchemyContract)
        .with_total(4)
        .with_start_index(1);
    let narrowed = plan_gap_fill(&descriptor, &sink).await.unwrap().unwrap();
    assert_eq!(narrowed.provider, ProviderKind::AlchemyBatch);

    let resolver = HttpSourceResolver::new(
        &ResolverConfig::default().with_gateways(vec![]),
        RequestThrottle::unlimited(),
        RetryPolicy::fast(2),
    )
    .unwrap();
    let orchestrator = IngestionOrchestrator::new(
        IngestConfig::default()
            .with_resume(false)
            .with_persist_progress(false),
        adapter(&server, &narrowed),
        Arc::new(resolver),
        Arc::clone(&sink),
    );
    let report = orchestrator.run(&narrowed, &RunHandle::new()).await;

    assert_eq!(report.state, RunPhase::Completed);
    assert_eq!(report.records_processed, 2);
    assert_eq!(report.media_written, 2);
    assert!(sink.load_progress().await.unwrap().is_none());

    let all: Vec<String> = (1..=4).map(|id| id.to_string()).collect();
    assert!(sink.missing_ids(&all).await.unwrap().is_empty());
    assert!(plan_gap_fill(&descriptor, &sink).await.unwrap().is_none());
}
