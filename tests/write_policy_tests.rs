//! Write-gating and tier-strictness invariants.

mod common;

use reprise::{
    CacheTier, GatewayPlugin, PreHookOutcome, RequestContext, RequestOptions, ShortCircuit,
    UpstreamError,
};

use common::harness::{
    RequestExt, TestPluginConfig, chat_request, chunk, response_body, spawn_test_plugin,
    stream_request,
};

const NAMESPACE: &str = "SemanticCachePlugin";

#[tokio::test]
async fn test_missing_cache_key_bypasses_cache_entirely() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;

    let mut ctx = RequestContext::new(RequestOptions::default());
    let outcome = harness
        .plugin
        .pre_hook(&mut ctx, chat_request("hello", 0.0, 10))
        .await
        .unwrap();
    assert!(matches!(outcome, PreHookOutcome::Forward(_)));
    assert!(ctx.request_id().is_none(), "no request id without a cache key");

    let returned = harness
        .plugin
        .post_hook(&ctx, Ok(response_body("resp", "hi")))
        .await
        .unwrap();
    assert!(returned.extra.cache_debug.is_none());

    harness.plugin.settle_writes().await;
    assert_eq!(harness.store.entry_count(NAMESPACE), Some(0));
}

#[tokio::test]
async fn test_conversation_history_threshold_bypasses_cache() {
    let harness = spawn_test_plugin(TestPluginConfig {
        conversation_history_threshold: 2,
        ..Default::default()
    })
    .await;

    let long = chat_request("turn three", 0.0, 10)
        .with_system("persona")
        .with_system("another instruction");
    assert_eq!(long.input.message_count(), 3);

    let mut ctx = RequestContext::new(RequestOptions::with_cache_key("k1"));
    let outcome = harness.plugin.pre_hook(&mut ctx, long).await.unwrap();
    assert!(matches!(outcome, PreHookOutcome::Forward(_)));
    assert!(ctx.request_id().is_none());

    harness
        .plugin
        .post_hook(&ctx, Ok(response_body("resp", "hi")))
        .await
        .unwrap();
    harness.plugin.settle_writes().await;
    assert_eq!(harness.store.entry_count(NAMESPACE), Some(0));
}

#[tokio::test]
async fn test_no_store_blocks_writes_but_not_reads() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;
    let request = chat_request("cache me once", 0.0, 10);

    let no_store = RequestOptions {
        cache_key: Some("k1".to_string()),
        no_store: true,
        ..Default::default()
    };

    // A no-store request never writes.
    let mut ctx = RequestContext::new(no_store.clone());
    let outcome = harness.plugin.pre_hook(&mut ctx, request.clone()).await.unwrap();
    assert!(matches!(outcome, PreHookOutcome::Forward(_)));
    harness
        .plugin
        .post_hook(&ctx, Ok(response_body("resp", "first")))
        .await
        .unwrap();
    harness.plugin.settle_writes().await;
    assert_eq!(harness.store.entry_count(NAMESPACE), Some(0));

    // Populate through a normal request, then read with no-store.
    harness
        .run_miss(
            RequestOptions::with_cache_key("k1"),
            request.clone(),
            response_body("resp", "stored"),
        )
        .await;

    let mut ctx = RequestContext::new(no_store);
    let outcome = harness.plugin.pre_hook(&mut ctx, request).await.unwrap();
    assert!(
        matches!(outcome, PreHookOutcome::Cached(_)),
        "no-store must still permit reads"
    );
}

#[tokio::test]
async fn test_model_mismatch_misses_when_cache_by_model() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;

    harness
        .run_miss(
            RequestOptions::with_cache_key("k1"),
            chat_request("same prompt", 0.0, 10),
            response_body("resp", "from model a"),
        )
        .await;

    let other_model = chat_request("same prompt", 0.0, 10).with_model("other-model");
    let mut ctx = RequestContext::new(RequestOptions::with_cache_key("k1"));
    let outcome = harness.plugin.pre_hook(&mut ctx, other_model).await.unwrap();
    assert!(matches!(outcome, PreHookOutcome::Forward(_)));
}

#[tokio::test]
async fn test_tools_mismatch_misses_both_tiers() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;

    harness
        .run_miss(
            RequestOptions::with_cache_key("k1"),
            chat_request("same prompt", 0.0, 10)
                .with_tools(vec![serde_json::json!({"name": "lookup"})]),
            response_body("resp", "with tools"),
        )
        .await;

    let different_tools = chat_request("same prompt", 0.0, 10)
        .with_tools(vec![serde_json::json!({"name": "search"})]);
    let mut ctx = RequestContext::new(RequestOptions::with_cache_key("k1"));
    let outcome = harness
        .plugin
        .pre_hook(&mut ctx, different_tools)
        .await
        .unwrap();
    assert!(matches!(outcome, PreHookOutcome::Forward(_)));
}

#[tokio::test]
async fn test_cache_key_partitions_are_isolated() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;
    let request = chat_request("tenant data", 0.0, 10);

    harness
        .run_miss(
            RequestOptions::with_cache_key("tenant-a"),
            request.clone(),
            response_body("resp", "a's answer"),
        )
        .await;

    let mut ctx = RequestContext::new(RequestOptions::with_cache_key("tenant-b"));
    let outcome = harness.plugin.pre_hook(&mut ctx, request).await.unwrap();
    assert!(matches!(outcome, PreHookOutcome::Forward(_)));
}

#[tokio::test]
async fn test_stream_error_results_in_zero_writes() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;

    let mut ctx = RequestContext::new(RequestOptions::with_cache_key("k1"));
    let outcome = harness
        .plugin
        .pre_hook(&mut ctx, stream_request("doomed stream", 0.0))
        .await
        .unwrap();
    assert!(matches!(outcome, PreHookOutcome::Forward(_)));

    harness
        .plugin
        .post_hook(&ctx, Ok(chunk(0, "partial", None)))
        .await
        .unwrap();
    let err = harness
        .plugin
        .post_hook(
            &ctx,
            Err(UpstreamError {
                status: Some(502),
                message: "upstream reset".to_string(),
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status, Some(502));

    harness.plugin.settle_writes().await;
    assert_eq!(harness.store.entry_count(NAMESPACE), Some(0));
}

#[tokio::test]
async fn test_direct_only_writes_are_invisible_to_semantic_tier() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;
    let request = chat_request("tier restricted", 0.0, 10);

    let direct_only = RequestOptions {
        cache_key: Some("k1".to_string()),
        cache_type: Some(CacheTier::Direct),
        ..Default::default()
    };
    harness
        .run_miss(direct_only.clone(), request.clone(), response_body("resp", "direct"))
        .await;

    // Same fingerprint hits directly.
    let mut ctx = RequestContext::new(direct_only);
    let outcome = harness.plugin.pre_hook(&mut ctx, request.clone()).await.unwrap();
    assert!(matches!(outcome, PreHookOutcome::Cached(_)));

    // The semantic tier cannot see an embedding-less entry.
    let semantic_only = RequestOptions {
        cache_key: Some("k1".to_string()),
        cache_type: Some(CacheTier::Semantic),
        threshold: Some(0.0),
        ..Default::default()
    };
    let mut ctx = RequestContext::new(semantic_only);
    let outcome = harness.plugin.pre_hook(&mut ctx, request).await.unwrap();
    assert!(matches!(outcome, PreHookOutcome::Forward(_)));
}

#[tokio::test]
async fn test_semantic_only_writes_omit_the_direct_hash() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;
    let request = chat_request("semantic only entry", 0.0, 10);

    let semantic_only = RequestOptions {
        cache_key: Some("k1".to_string()),
        cache_type: Some(CacheTier::Semantic),
        ..Default::default()
    };
    let mut ctx = RequestContext::new(semantic_only);
    let outcome = harness.plugin.pre_hook(&mut ctx, request.clone()).await.unwrap();
    assert!(matches!(outcome, PreHookOutcome::Forward(_)));
    harness
        .plugin
        .post_hook(&ctx, Ok(response_body("resp", "semantic")))
        .await
        .unwrap();
    harness.plugin.settle_writes().await;

    let request_id = ctx.request_id().expect("caching engaged");
    let metadata = harness
        .store
        .entry_metadata(NAMESPACE, request_id)
        .expect("entry written under the request id");
    assert!(!metadata.contains_key("request_hash"));
    assert!(metadata.contains_key("params_hash"));

    // An identical request restricted to the direct tier cannot match it.
    let direct_only = RequestOptions {
        cache_key: Some("k1".to_string()),
        cache_type: Some(CacheTier::Direct),
        ..Default::default()
    };
    let mut ctx = RequestContext::new(direct_only);
    let outcome = harness.plugin.pre_hook(&mut ctx, request).await.unwrap();
    assert!(matches!(outcome, PreHookOutcome::Forward(_)));
}

#[tokio::test]
async fn test_embedding_outage_degrades_to_direct_only() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;
    harness.client.set_failing(true);

    let request = chat_request("resilient request", 0.0, 10);
    let returned = harness
        .run_miss(
            RequestOptions::with_cache_key("k1"),
            request.clone(),
            response_body("resp", "still works"),
        )
        .await;
    assert_eq!(returned.id, "resp");

    // The entry still serves the direct tier.
    let mut ctx = RequestContext::new(RequestOptions::with_cache_key("k1"));
    let outcome = harness.plugin.pre_hook(&mut ctx, request).await.unwrap();
    assert!(matches!(outcome, PreHookOutcome::Cached(_)));
}

#[tokio::test]
async fn test_exclude_system_prompt_ignores_differing_personas() {
    let harness = spawn_test_plugin(TestPluginConfig {
        exclude_system_prompt: true,
        ..Default::default()
    })
    .await;

    harness
        .run_miss(
            RequestOptions::with_cache_key("k1"),
            chat_request("what is rust?", 0.0, 10).with_system("You are terse"),
            response_body("resp", "a language"),
        )
        .await;

    let different_persona =
        chat_request("what is rust?", 0.0, 10).with_system("You are verbose and friendly");
    let mut ctx = RequestContext::new(RequestOptions::with_cache_key("k1"));
    let outcome = harness
        .plugin
        .pre_hook(&mut ctx, different_persona)
        .await
        .unwrap();
    assert!(
        matches!(outcome, PreHookOutcome::Cached(ShortCircuit::Response(_))),
        "system prompts must not partition the cache when excluded"
    );
}

#[tokio::test]
async fn test_host_end_of_stream_indicator_triggers_commit() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;

    let mut ctx = RequestContext::new(RequestOptions::with_cache_key("k1"));
    harness
        .plugin
        .pre_hook(&mut ctx, stream_request("unframed stream", 0.0))
        .await
        .unwrap();

    harness
        .plugin
        .post_hook(&ctx, Ok(chunk(0, "a", None)))
        .await
        .unwrap();

    // Provider framing carries no finish reason; the host flags the end.
    ctx.mark_stream_complete();
    harness
        .plugin
        .post_hook(&ctx, Ok(chunk(1, "b", None)))
        .await
        .unwrap();

    harness.plugin.settle_writes().await;
    assert_eq!(harness.store.entry_count(NAMESPACE), Some(1));
}

#[tokio::test]
async fn test_clear_by_cache_key_scopes_deletes() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;

    harness
        .run_miss(
            RequestOptions::with_cache_key("tenant-a"),
            chat_request("a's prompt", 0.0, 10),
            response_body("resp-a", "a"),
        )
        .await;
    harness
        .run_miss(
            RequestOptions::with_cache_key("tenant-b"),
            chat_request("b's prompt", 0.0, 10),
            response_body("resp-b", "b"),
        )
        .await;
    assert_eq!(harness.store.entry_count(NAMESPACE), Some(2));

    harness
        .plugin
        .clear_by_cache_key("tenant-a")
        .await
        .expect("invalidation succeeds");
    assert_eq!(harness.store.entry_count(NAMESPACE), Some(1));
}

#[tokio::test]
async fn test_clear_by_request_id_deletes_one_entry() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;

    let mut ctx = RequestContext::new(RequestOptions::with_cache_key("k1"));
    harness
        .plugin
        .pre_hook(&mut ctx, chat_request("prompt", 0.0, 10))
        .await
        .unwrap();
    harness
        .plugin
        .post_hook(&ctx, Ok(response_body("resp", "answer")))
        .await
        .unwrap();
    harness.plugin.settle_writes().await;

    let request_id = ctx.request_id().expect("caching engaged");
    harness
        .plugin
        .clear_by_request_id(request_id)
        .await
        .expect("invalidation succeeds");
    assert_eq!(harness.store.entry_count(NAMESPACE), Some(0));
}

#[tokio::test]
async fn test_cleanup_drains_and_preserves_entries_by_default() {
    let harness = spawn_test_plugin(TestPluginConfig::default()).await;

    harness
        .run_miss(
            RequestOptions::with_cache_key("k1"),
            chat_request("persistent", 0.0, 10),
            response_body("resp", "kept"),
        )
        .await;

    harness.plugin.cleanup().await.expect("cleanup succeeds");
    assert_eq!(
        harness.store.entry_count(NAMESPACE),
        Some(1),
        "entries survive shutdown unless cleanup_on_shutdown is set"
    );
}
