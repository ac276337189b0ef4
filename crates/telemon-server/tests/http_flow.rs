mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{
    build_test_context, build_test_context_on, build_test_context_with, get, post,
    post_with_headers, send, UnreachableStorage,
};
use std::sync::Arc;
use telemon_agent::envelope::Envelope;
use telemon_common::crypto;
use telemon_common::types::Metric;
use telemon_server::durability::DurabilityMode;
use telemon_server::envelope::{EnvelopeSettings, SubnetFilter};
use telemon_server::middleware::MAX_BODY_BYTES;
use telemon_storage::SnapshotFile;

fn keyed(key: &str) -> EnvelopeSettings {
    EnvelopeSettings {
        key: Some(key.as_bytes().to_vec()),
        ..EnvelopeSettings::default()
    }
}

fn subnet(cidr: &str) -> EnvelopeSettings {
    EnvelopeSettings {
        subnet: SubnetFilter::new(Some(cidr)),
        ..EnvelopeSettings::default()
    }
}

#[tokio::test]
async fn gauge_path_update_then_read() -> Result<()> {
    let ctx = build_test_context()?;
    let reply = post(&ctx.app, "/update/gauge/temp/1.5", Body::empty()).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = get(&ctx.app, "/value/gauge/temp").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), "1.5");
    Ok(())
}

#[tokio::test]
async fn counter_path_updates_accumulate() -> Result<()> {
    let ctx = build_test_context()?;
    post(&ctx.app, "/update/counter/hits/3", Body::empty()).await;
    let reply = post(&ctx.app, "/update/counter/hits/4", Body::empty()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), "7");

    assert_eq!(get(&ctx.app, "/value/counter/hits").await.text(), "7");
    Ok(())
}

#[tokio::test]
async fn kind_switch_discards_previous_gauge() -> Result<()> {
    let ctx = build_test_context()?;
    post(&ctx.app, "/update/gauge/x/1.1", Body::empty()).await;
    post(&ctx.app, "/update/counter/x/2", Body::empty()).await;

    assert_eq!(get(&ctx.app, "/value/counter/x").await.text(), "2");
    assert_eq!(get(&ctx.app, "/value/gauge/x").await.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn bulk_counters_sum_in_order() -> Result<()> {
    let ctx = build_test_context()?;
    let body = r#"[{"id":"c","kind":"counter","counter_value":1},{"id":"c","kind":"counter","counter_value":2}]"#;
    let reply = post(&ctx.app, "/updates/", body).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()[0]["counter_value"], 3);

    assert_eq!(ctx.state.service.get("c").await?, Metric::counter("c", 3));
    Ok(())
}

#[tokio::test]
async fn malformed_path_updates_are_rejected() -> Result<()> {
    let ctx = build_test_context()?;

    let reply = post(&ctx.app, "/update/gauge//1.1", Body::empty()).await;
    assert!(
        matches!(reply.status, StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST),
        "unexpected status {}",
        reply.status
    );
    assert_eq!(
        post(&ctx.app, "/update/histogram/x/1", Body::empty()).await.status,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        post(&ctx.app, "/update/counter/x/1.5", Body::empty()).await.status,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        post(&ctx.app, "/update/gauge/x/abc", Body::empty()).await.status,
        StatusCode::BAD_REQUEST
    );

    assert!(ctx.state.service.get_all().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn non_finite_gauges_are_rejected() -> Result<()> {
    let ctx = build_test_context_with(EnvelopeSettings::default(), Some(DurabilityMode::Synchronous))?;
    post(&ctx.app, "/update/gauge/x/1.5", Body::empty()).await;

    for raw in ["NaN", "inf", "-infinity"] {
        let reply = post(&ctx.app, &format!("/update/gauge/x/{raw}"), Body::empty()).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST, "{raw}");
    }

    // The snapshot still restores and the index still renders.
    let snapshot = ctx.temp_dir.path().join("metrics-db.json");
    let restored = SnapshotFile::new(snapshot).read().await?.unwrap_or_default();
    assert_eq!(restored.get("x"), Some(&Metric::gauge("x", 1.5)));
    assert_eq!(get(&ctx.app, "/").await.status, StatusCode::OK);
    assert_eq!(get(&ctx.app, "/value/gauge/x").await.text(), "1.5");
    Ok(())
}

#[tokio::test]
async fn json_update_and_value_lookup() -> Result<()> {
    let ctx = build_test_context()?;
    let reply = post(
        &ctx.app,
        "/update/",
        r#"{"id":"Alloc","kind":"gauge","gauge_value":42}"#,
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let stored = reply.json();
    assert_eq!(stored["id"], "Alloc");
    assert_eq!(stored["gauge_value"], 42.0);
    assert!(stored.get("counter_value").is_none());

    let reply = post(&ctx.app, "/value/", r#"{"id":"Alloc","kind":"gauge"}"#).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["gauge_value"], 42.0);

    let reply = post(&ctx.app, "/value/", r#"{"id":"Alloc","kind":"counter"}"#).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = post(&ctx.app, "/value/", r#"{"id":"nope","kind":"gauge"}"#).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn bad_json_reports_error_with_trace_id() -> Result<()> {
    let ctx = build_test_context()?;
    let reply = post(&ctx.app, "/update/", "{not json").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let body = reply.json();
    assert_eq!(body["err_code"], 1001);
    let trace_id = reply.header("x-trace-id").expect("trace id header");
    assert_eq!(trace_id.len(), 16);
    assert_eq!(body["trace_id"], trace_id);

    let reply = post(
        &ctx.app,
        "/update/",
        r#"{"id":"a","kind":"counter","gauge_value":1.0}"#,
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn index_lists_metrics_sorted() -> Result<()> {
    let ctx = build_test_context()?;
    for uri in [
        "/update/gauge/zeta/1",
        "/update/counter/alpha/2",
        "/update/gauge/mid/3.5",
    ] {
        post(&ctx.app, uri, Body::empty()).await;
    }

    let reply = get(&ctx.app, "/").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("text/html")));
    let html = reply.text();
    let alpha = html.find("alpha").unwrap();
    let mid = html.find("mid").unwrap();
    let zeta = html.find("zeta").unwrap();
    assert!(alpha < mid && mid < zeta);
    Ok(())
}

#[tokio::test]
async fn ping_answers_pong() -> Result<()> {
    let ctx = build_test_context()?;
    let reply = get(&ctx.app, "/ping").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), "pong");
    Ok(())
}

#[tokio::test]
async fn ping_reports_unreachable_storage() -> Result<()> {
    let ctx = build_test_context_on(Arc::new(UnreachableStorage), EnvelopeSettings::default(), None)?;
    let reply = get(&ctx.app, "/ping").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);

    let body = reply.json();
    assert_eq!(body["err_code"], 1503);
    assert_eq!(body["trace_id"], reply.header("x-trace-id").expect("trace id header"));
    Ok(())
}

#[tokio::test]
async fn mac_mismatch_is_rejected_before_the_handler() -> Result<()> {
    let ctx = build_test_context_with(keyed("k"), None)?;
    let body = r#"{"id":"temp","kind":"gauge","gauge_value":1.0}"#;
    let wrong = crypto::sign(body.as_bytes(), b"other")?;

    let reply = post_with_headers(&ctx.app, "/update/", &[("HashSHA256", wrong.as_str())], body).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = post(&ctx.app, "/update/", body).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST, "missing header");

    assert!(ctx.state.service.get_all().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn oversized_body_is_rejected_not_emptied() -> Result<()> {
    let ctx = build_test_context_with(keyed("k"), None)?;
    let body = vec![b'a'; MAX_BODY_BYTES + 1];

    let reply = post(&ctx.app, "/update/gauge/x/1", body).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["err_code"], 1001);
    assert!(reply.header("x-trace-id").is_some());

    assert!(ctx.state.service.get_all().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn valid_mac_is_accepted_and_response_is_signed() -> Result<()> {
    let ctx = build_test_context_with(keyed("k"), None)?;
    let body = r#"{"id":"temp","kind":"gauge","gauge_value":1.0}"#;
    let tag = crypto::sign(body.as_bytes(), b"k")?;

    let reply = post_with_headers(&ctx.app, "/update/", &[("HashSHA256", tag.as_str())], body).await;
    assert_eq!(reply.status, StatusCode::OK);

    let response_tag = reply.header("HashSHA256").expect("signed response");
    crypto::verify(&reply.body, b"k", response_tag)?;

    // Bodyless requests carry nothing to sign.
    assert_eq!(get(&ctx.app, "/value/gauge/temp").await.text(), "1");
    Ok(())
}

#[tokio::test]
async fn subnet_filter_admits_only_members() -> Result<()> {
    let ctx = build_test_context_with(subnet("10.0.0.0/8"), None)?;

    let inside = post_with_headers(
        &ctx.app,
        "/update/gauge/a/1",
        &[("X-Real-IP", "10.20.30.40")],
        Body::empty(),
    )
    .await;
    assert_eq!(inside.status, StatusCode::OK);

    let outside = post_with_headers(
        &ctx.app,
        "/update/gauge/b/1",
        &[("X-Real-IP", "192.168.0.1")],
        Body::empty(),
    )
    .await;
    assert_eq!(outside.status, StatusCode::FORBIDDEN);
    assert_eq!(outside.json()["err_code"], 1006);

    let missing = post(&ctx.app, "/update/gauge/c/1", Body::empty()).await;
    assert_eq!(missing.status, StatusCode::FORBIDDEN);

    let names: Vec<String> = ctx
        .state
        .service
        .get_all()
        .await?
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, ["a"]);
    Ok(())
}

#[tokio::test]
async fn unparsable_subnet_is_internal_error() -> Result<()> {
    let ctx = build_test_context_with(subnet("10.0.0.0/64"), None)?;
    let reply = post_with_headers(
        &ctx.app,
        "/update/gauge/a/1",
        &[("X-Real-IP", "10.0.0.1")],
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}

#[tokio::test]
async fn gzip_in_both_directions() -> Result<()> {
    let ctx = build_test_context()?;
    let body = br#"[{"id":"g","kind":"gauge","gauge_value":2.5}]"#;

    let req = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header("Content-Type", "application/json")
        .header("Content-Encoding", "gzip")
        .header("Accept-Encoding", "gzip")
        .body(Body::from(crypto::gzip(body)?))?;
    let reply = send(&ctx.app, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-encoding"), Some("gzip"));

    let plain = crypto::gunzip(&reply.body)?;
    let stored: serde_json::Value = serde_json::from_slice(&plain)?;
    assert_eq!(stored[0]["gauge_value"], 2.5);
    Ok(())
}

#[tokio::test]
async fn sealed_agent_payload_is_opened() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (private, private_path, _) = common::write_key_pair(dir.path())?;
    let settings = EnvelopeSettings::new(None, Some("k"), Some(private_path.as_path()))?;
    let ctx = build_test_context_with(settings, None)?;

    // Long enough to span several RSA blocks.
    let metrics: Vec<serde_json::Value> = (0..20)
        .map(|i| serde_json::json!({"id": format!("m{i}"), "kind": "counter", "counter_value": i}))
        .collect();
    let body = serde_json::to_vec(&metrics)?;
    let sealed = Envelope::new(Some("k"), Some(private.to_public_key())).seal(&body)?;
    let tag = sealed.hash.clone().expect("signed");

    let reply = post_with_headers(
        &ctx.app,
        "/updates/",
        &[
            ("Content-Type", "application/json"),
            ("Content-Encoding", "gzip"),
            ("HashSHA256", tag.as_str()),
        ],
        sealed.body,
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.text());
    assert_eq!(ctx.state.service.get("m19").await?, Metric::counter("m19", 19));
    Ok(())
}

#[tokio::test]
async fn encrypted_body_must_be_base64() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (_, private_path, _) = common::write_key_pair(dir.path())?;
    let settings = EnvelopeSettings::new(None, None, Some(private_path.as_path()))?;
    let ctx = build_test_context_with(settings, None)?;

    let reply = post(&ctx.app, "/update/", "%%% not base64 %%%").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    // Valid base64 that is not ciphertext for this key.
    let reply = post(&ctx.app, "/update/", "AAAA").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}

#[tokio::test]
async fn synchronous_durability_writes_snapshot_per_request() -> Result<()> {
    let ctx = build_test_context_with(EnvelopeSettings::default(), Some(DurabilityMode::Synchronous))?;
    post(&ctx.app, "/update/counter/PollCount/5", Body::empty()).await;

    let path = ctx.temp_dir.path().join("metrics-db.json");
    let snapshot: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    assert_eq!(snapshot["records"]["PollCount"]["counter_value"], 5);
    assert_eq!(snapshot["records"]["PollCount"]["kind"], "counter");
    Ok(())
}
