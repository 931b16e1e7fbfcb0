use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use voxlink_observe::{
    MetricEvent, MetricKind, Metrics, MetricsReporter, MetricsSink, SttMetrics, TtsMetrics,
};

/// Accepts WebSocket clients on `listener` and forwards every text frame.
fn spawn_monitor(listener: TcpListener) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Text(text) = msg {
                        let value: Value =
                            serde_json::from_str(text.as_str()).expect("record should be JSON");
                        let _ = tx.send(value);
                    }
                }
            });
        }
    });
    rx
}

/// Like [`spawn_monitor`], but the first client is sent a Close frame right
/// after its first record. Returns the number of accepted handshakes too.
fn spawn_closing_monitor(
    listener: TcpListener,
) -> (mpsc::UnboundedReceiver<Value>, Arc<AtomicUsize>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            let Ok(mut ws) = accept_async(stream).await else {
                continue;
            };
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
            tokio::spawn(async move {
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Text(text) = msg {
                        let _ = tx.send(serde_json::from_str::<Value>(text.as_str()).unwrap());
                        if first {
                            let _ = ws.send(Message::Close(None)).await;
                            return;
                        }
                    }
                }
            });
        }
    });
    (rx, accepted)
}

/// Reserves a local port that nothing is listening on.
async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn tts_event(characters_count: usize) -> MetricEvent {
    MetricEvent::new(Metrics::Tts(TtsMetrics {
        provider: "kokoro-tts".to_string(),
        request_id: String::new(),
        ttfb: 0.05,
        duration: 0.4,
        audio_duration: 0.0,
        characters_count,
        streamed: false,
    }))
}

async fn next_record(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a metric record")
        .expect("monitor channel closed")
}

#[tokio::test]
async fn test_send_delivers_envelope() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut records = spawn_monitor(listener);

    let sink = MetricsSink::new("session-42", format!("ws://{}/ws", addr));
    sink.send(&tts_event(5)).await;

    let record = next_record(&mut records).await;
    assert_eq!(record["metric_type"], "tts");
    assert_eq!(record["session_id"], "session-42");
    assert_eq!(record["data"]["characters_count"], 5);
    assert_eq!(record["data"]["real_time_factor"], 0.0);
    assert!(record["timestamp"].as_str().unwrap().ends_with('Z'));
    assert!(sink.is_connected().await);

    sink.disconnect().await;
    assert!(!sink.is_connected().await);
    sink.disconnect().await;
}

#[tokio::test]
async fn test_unreachable_sink_drops_event_then_recovers() {
    let addr = unused_addr().await;
    let sink = MetricsSink::new("session-c", format!("ws://{}/ws", addr))
        .with_timeouts(Duration::from_secs(2), Duration::from_secs(2));

    // Nothing is listening: the send must return quietly and drop the event.
    sink.send(&tts_event(1)).await;
    assert!(!sink.is_connected().await);

    // The endpoint comes up; the next send reconnects and delivers only itself.
    let listener = TcpListener::bind(addr).await.unwrap();
    let mut records = spawn_monitor(listener);

    sink.send(&tts_event(2)).await;
    assert!(sink.is_connected().await);

    let record = next_record(&mut records).await;
    assert_eq!(record["data"]["characters_count"], 2);

    let extra = tokio::time::timeout(Duration::from_millis(200), records.recv()).await;
    assert!(extra.is_err(), "the dropped event must not be replayed");

    sink.disconnect().await;
}

#[tokio::test]
async fn test_explicit_connect_reports_failure() {
    let addr = unused_addr().await;
    let sink = MetricsSink::new("session-x", format!("ws://{}/ws", addr));
    assert!(sink.connect().await.is_err());
    assert!(!sink.is_connected().await);
}

#[tokio::test]
async fn test_send_metric_with_raw_payload() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut records = spawn_monitor(listener);

    let sink = MetricsSink::new("session-raw", format!("ws://{}/ws", addr));
    sink.connect().await.expect("monitor should accept");
    sink.send_metric(MetricKind::Llm, serde_json::json!({"prompt_tokens": 7}))
        .await;

    let record = next_record(&mut records).await;
    assert_eq!(record["metric_type"], "llm");
    assert_eq!(record["data"]["prompt_tokens"], 7);
    sink.disconnect().await;
}

#[tokio::test]
async fn test_reporter_forwards_hook_events_and_flushes_on_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut records = spawn_monitor(listener);

    let reporter = MetricsReporter::spawn(MetricsSink::new(
        "session-r",
        format!("ws://{}/ws", addr),
    ));
    reporter.start().await;
    assert!(reporter.sink().is_connected().await);

    let hook = reporter.hook();
    hook(tts_event(3));
    hook(MetricEvent::new(Metrics::Stt(SttMetrics {
        provider: "dashscope".to_string(),
        duration: 0.2,
        audio_duration: 1.0,
        ..Default::default()
    })));

    reporter.shutdown().await;

    let first = next_record(&mut records).await;
    let second = next_record(&mut records).await;
    assert_eq!(first["metric_type"], "tts");
    assert_eq!(second["metric_type"], "stt");
    assert_eq!(second["session_id"], "session-r");

    // Hooks outliving the reporter are harmless.
    hook(tts_event(4));
}

#[tokio::test]
async fn test_reporter_survives_unreachable_monitor() {
    let addr = unused_addr().await;
    let reporter = MetricsReporter::spawn(
        MetricsSink::new("session-down", format!("ws://{}/ws", addr))
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(1)),
    );
    reporter.start().await;

    let hook = reporter.hook();
    hook(tts_event(1));

    tokio::time::timeout(Duration::from_secs(10), reporter.shutdown())
        .await
        .expect("shutdown should not hang on an unreachable monitor");
}

#[tokio::test]
async fn test_server_close_disconnects_and_next_send_reconnects_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (mut records, accepted) = spawn_closing_monitor(listener);

    let sink = MetricsSink::new("session-closed", format!("ws://{}/ws", addr));
    sink.send(&tts_event(1)).await;
    assert_eq!(next_record(&mut records).await["data"]["characters_count"], 1);

    // The monitor hangs up after the first record; the sink must notice on its own.
    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.is_connected().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sink should observe the close frame");

    sink.send(&tts_event(2)).await;
    assert!(sink.is_connected().await);
    assert_eq!(next_record(&mut records).await["data"]["characters_count"], 2);

    sink.send(&tts_event(3)).await;
    assert_eq!(next_record(&mut records).await["data"]["characters_count"], 3);
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    let extra = tokio::time::timeout(Duration::from_millis(200), records.recv()).await;
    assert!(extra.is_err(), "no record may be replayed after reconnecting");

    sink.disconnect().await;
    assert!(!sink.is_connected().await);
}
