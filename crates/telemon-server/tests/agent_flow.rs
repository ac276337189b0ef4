//! Agent transports against a live server on loopback.

mod common;

use anyhow::{anyhow, Result};
use common::build_test_context_with;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use telemon_agent::envelope::Envelope;
use telemon_agent::reporter::Reporter;
use telemon_agent::sampler::Sampler;
use telemon_agent::table::{MetricTable, POLL_COUNT, RANDOM_VALUE};
use telemon_agent::transport::{GrpcTransport, HttpTransport, Transport};
use telemon_common::types::{Metric, MetricValue};
use telemon_server::envelope::EnvelopeSettings;
use telemon_server::state::AppState;
use telemon_server::{app, grpc};
use tokio_util::sync::CancellationToken;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server as TonicServer;

async fn spawn_http(state: AppState) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let router = app::build_http_app(state, Duration::from_secs(5));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}

async fn spawn_grpc(state: AppState) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let incoming = TcpIncoming::from_listener(listener, true, None).map_err(|e| anyhow!(e))?;
    let service = grpc::server(&state);
    tokio::spawn(async move {
        let _ = TonicServer::builder()
            .add_service(service)
            .serve_with_incoming(incoming)
            .await;
    });
    Ok(addr)
}

fn agent_ip() -> Option<IpAddr> {
    "10.1.2.3".parse().ok()
}

#[tokio::test]
async fn http_reports_pass_the_full_envelope() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (private, private_path, _) = common::write_key_pair(dir.path())?;
    let settings =
        EnvelopeSettings::new(Some("10.0.0.0/8"), Some("k"), Some(private_path.as_path()))?;
    let ctx = build_test_context_with(settings, None)?;
    let addr = spawn_http(ctx.state.clone()).await?;

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
        &format!("http://{addr}"),
        Envelope::new(Some("k"), Some(private.to_public_key())),
        agent_ip(),
    )?);

    let table = Arc::new(MetricTable::new());
    table.set_gauge("Alloc", 1024.0);
    table.inc_counter(POLL_COUNT, 3);

    let bulk = Reporter::new(table.clone(), transport.clone(), 1, true);
    let summary = bulk.report().await;
    assert_eq!(summary.failed, 0);
    assert_eq!(table.get(POLL_COUNT), Some(MetricValue::Counter(0)));

    table.inc_counter(POLL_COUNT, 2);
    let single = Reporter::new(table.clone(), transport, 2, false);
    let summary = single.report().await;
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.sent, 2);

    let service = &ctx.state.service;
    assert_eq!(service.get("Alloc").await?, Metric::gauge("Alloc", 1024.0));
    assert_eq!(service.get(POLL_COUNT).await?, Metric::counter(POLL_COUNT, 5));
    Ok(())
}

#[tokio::test]
async fn http_reports_from_outside_the_subnet_fail() -> Result<()> {
    let settings = EnvelopeSettings::new(Some("192.168.0.0/16"), None, None)?;
    let ctx = build_test_context_with(settings, None)?;
    let addr = spawn_http(ctx.state.clone()).await?;

    let transport = HttpTransport::new(&format!("http://{addr}"), Envelope::default(), agent_ip())?;
    let err = transport
        .send_one(&Metric::gauge("temp", 1.0))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("403"), "{err}");
    assert!(ctx.state.service.get_all().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn grpc_reports_are_signed_and_stored() -> Result<()> {
    let settings = EnvelopeSettings::new(Some("10.0.0.0/8"), Some("k"), None)?;
    let ctx = build_test_context_with(settings, None)?;
    let addr = spawn_grpc(ctx.state.clone()).await?;

    let transport = GrpcTransport::new(
        &format!("http://{addr}"),
        Envelope::new(Some("k"), None),
        agent_ip(),
    )?;
    transport
        .send_batch(&[Metric::counter("c", 1), Metric::counter("c", 2)])
        .await?;
    transport.send_one(&Metric::gauge("temp", 36.6)).await?;

    assert_eq!(ctx.state.service.get("c").await?, Metric::counter("c", 3));
    assert_eq!(ctx.state.service.get("temp").await?, Metric::gauge("temp", 36.6));

    let wrong_key = GrpcTransport::new(
        &format!("http://{addr}"),
        Envelope::new(Some("other"), None),
        agent_ip(),
    )?;
    assert!(wrong_key.send_one(&Metric::gauge("temp", 0.0)).await.is_err());
    assert_eq!(ctx.state.service.get("temp").await?, Metric::gauge("temp", 36.6));
    Ok(())
}

#[tokio::test]
async fn agent_loop_ships_every_poll_to_the_server() -> Result<()> {
    let ctx = build_test_context_with(EnvelopeSettings::default(), None)?;
    let addr = spawn_http(ctx.state.clone()).await?;

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
        &format!("http://{addr}"),
        Envelope::default(),
        None,
    )?);
    let table = Arc::new(MetricTable::new());
    let sampler = Sampler::new(Vec::new(), table.clone());
    let reporter = Reporter::new(table.clone(), transport, 1, true);

    let token = CancellationToken::new();
    let handle = tokio::spawn(telemon_agent::run(
        sampler,
        reporter,
        Duration::from_millis(10),
        Duration::from_millis(50),
        token.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();
    handle.await?;

    // Everything sampled has been shipped and accumulated server-side.
    assert_eq!(table.get(POLL_COUNT), Some(MetricValue::Counter(0)));
    let polls = ctx
        .state
        .service
        .get(POLL_COUNT)
        .await?
        .counter_value()
        .unwrap_or_default();
    assert!(polls >= 2, "only {polls} polls reached the server");

    let random = ctx.state.service.get(RANDOM_VALUE).await?.gauge_value();
    assert!(random.is_some_and(|v| (1.0..=50.0).contains(&v)));
    Ok(())
}
