//! Synthesis adapters against a mock HTTP backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use voxlink_observe::{MetricEvent, Metrics, MetricsHook, TtsMetrics};
use voxlink_types::ResponseFormat;
use voxlink_voice::wav::{encode_pcm16, CANONICAL_HEADER_LEN};
use voxlink_voice::{
    create_synthesizer, IndexTts, KokoroTts, OptionsUpdate, SpeechApiTts, SynthesisAdapter,
    SynthesisBackend, SynthesisConfig, SynthesisRequest, VoiceError,
};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A mono 32-bit float WAVE container.
fn float_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 4) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&3u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 4).to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

fn recording_hook() -> (MetricsHook, Arc<Mutex<Vec<MetricEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let hook: MetricsHook = Arc::new(move |event| sink.lock().unwrap().push(event));
    (hook, events)
}

fn tts_metrics(events: &Arc<Mutex<Vec<MetricEvent>>>) -> Vec<TtsMetrics> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match &event.metrics {
            Metrics::Tts(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

fn kokoro_config(server: &MockServer) -> SynthesisConfig {
    SynthesisConfig::new(SynthesisBackend::Kokoro).with_base_url(server.uri())
}

#[tokio::test]
async fn test_kokoro_transcodes_float_wav() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("text", "hello world"))
        .and(query_param("speed", "1.0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(float_wav(&vec![0.5; 2_400], 24_000))
                .insert_header("x-request-id", "req-kokoro"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (hook, events) = recording_hook();
    let tts = KokoroTts::new(&kokoro_config(&server))
        .unwrap()
        .with_metrics(hook);

    let audio = tts.synthesize("hello world".into()).await.unwrap();
    assert_eq!(audio.mime_type(), "audio/wav");
    assert_eq!(audio.sample_rate(), 24_000);
    assert_eq!(audio.channels(), 1);
    assert_eq!(audio.info.request_id, "req-kokoro");
    assert_eq!(audio.len(), CANONICAL_HEADER_LEN + 2_400 * 2);
    assert_eq!(&audio.data[20..22], &1u16.to_le_bytes());
    assert_eq!(&audio.data[34..36], &16u16.to_le_bytes());

    let metrics = tts_metrics(&events);
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].provider, "kokoro-tts");
    assert_eq!(metrics[0].request_id, "req-kokoro");
    assert_eq!(metrics[0].characters_count, 11);
    assert!(!metrics[0].streamed);
    assert!((metrics[0].audio_duration - 0.1).abs() < 1e-9);
    assert!(metrics[0].ttfb <= metrics[0].duration);
}

#[tokio::test]
async fn test_status_error_carries_code_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let (hook, events) = recording_hook();
    let tts = KokoroTts::new(&kokoro_config(&server))
        .unwrap()
        .with_metrics(hook);

    match tts.synthesize("hello".into()).await {
        Err(VoiceError::Status { code, body }) => {
            assert_eq!(code, 500);
            assert_eq!(body, "rate limited");
        }
        other => panic!("expected Status error, got {:?}", other),
    }
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_in_flight_call_keeps_its_options_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(encode_pcm16(&[0; 16], 24_000, 1).unwrap())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let tts: Arc<dyn SynthesisAdapter> = Arc::new(
        KokoroTts::new(&kokoro_config(&server).with_voice("alice.wav")).unwrap(),
    );

    let in_flight = {
        let tts = Arc::clone(&tts);
        tokio::spawn(async move { tts.synthesize("first".into()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    tts.update_options(OptionsUpdate::default().voice("bob.wav"));
    in_flight.await.unwrap().unwrap();

    tts.synthesize("second".into()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let speaker = |i: usize| {
        requests[i]
            .url
            .query_pairs()
            .find(|(k, _)| k == "speaker")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    };
    assert_eq!(requests.len(), 2);
    assert_eq!(speaker(0), "alice.wav");
    assert_eq!(speaker(1), "bob.wav");
}

#[tokio::test]
async fn test_per_call_overrides_do_not_persist() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(encode_pcm16(&[0; 4], 24_000, 1).unwrap()))
        .mount(&server)
        .await;

    let tts = KokoroTts::new(&kokoro_config(&server)).unwrap();
    let request =
        SynthesisRequest::new("hi").with_overrides(OptionsUpdate::default().speed(1.5));
    tts.synthesize(request).await.unwrap();
    assert_eq!(tts.options().speed, 1.0);

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0]
        .url
        .query_pairs()
        .any(|(k, v)| k == "speed" && v == "1.5"));
}

#[tokio::test]
async fn test_indextts_forwards_chunks_in_order() {
    let body = encode_pcm16(&(0..4_800).map(|i| i as i16).collect::<Vec<_>>(), 24_000, 1).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("speaker", "narrator.pt"))
        .and(query_param("volume", "1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let (hook, events) = recording_hook();
    let config = SynthesisConfig::new(SynthesisBackend::IndexTts)
        .with_base_url(server.uri())
        .with_voice("narrator.pt");
    let tts = IndexTts::new(&config).unwrap().with_metrics(hook);

    let (tx, mut rx) = mpsc::channel::<Bytes>(64);
    let info = tts
        .synthesize_chunked("streamed text".into(), tx)
        .await
        .unwrap();
    assert_eq!(info.sample_rate, 24_000);
    assert_eq!(info.channels, 1);
    assert_eq!(info.mime_type, "audio/wav");

    let mut received = Vec::new();
    while let Some(chunk) = rx.recv().await {
        assert!(!chunk.is_empty());
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, body);

    let metrics = tts_metrics(&events);
    assert_eq!(metrics.len(), 1);
    assert!(metrics[0].streamed);
    assert_eq!(metrics[0].provider, "local-indextts");
    assert!((metrics[0].audio_duration - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn test_buffered_adapter_pushes_single_chunk() {
    let body = encode_pcm16(&[1, 2, 3], 24_000, 1).unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let tts = KokoroTts::new(&kokoro_config(&server)).unwrap();
    let (tx, mut rx) = mpsc::channel::<Bytes>(4);
    tts.synthesize_chunked("one".into(), tx).await.unwrap();

    let chunk = rx.recv().await.expect("one chunk");
    assert_eq!(chunk.as_ref(), body.as_slice());
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_speech_api_posts_json_and_tags_mime() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/speech"))
        .and(body_json(serde_json::json!({
            "model": "tts-1",
            "input": "hello",
            "voice": "default",
            "response_format": "mp3",
            "speed": 1.0
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3-fake-mp3".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let config = SynthesisConfig::new(SynthesisBackend::SpeechApi).with_base_url(server.uri());
    let tts = SpeechApiTts::new(&config).unwrap();
    let request = SynthesisRequest::new("hello")
        .with_overrides(OptionsUpdate::default().response_format(ResponseFormat::Mp3));

    let audio = tts.synthesize(request).await.unwrap();
    assert_eq!(audio.mime_type(), "audio/mp3");
    assert_eq!(audio.data.as_ref(), b"ID3-fake-mp3");
    assert_eq!(audio.info.request_id, "");
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(encode_pcm16(&[0; 4], 24_000, 1).unwrap())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut config = kokoro_config(&server);
    config.timeout_seconds = Some(0.2);
    config.transport.write_timeout_secs = 0.1;
    let tts = KokoroTts::new(&config).unwrap();

    let err = tts.synthesize("slow".into()).await.unwrap_err();
    assert!(err.is_timeout(), "expected Timeout, got {:?}", err);
}

#[tokio::test]
async fn test_exhausted_pool_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(encode_pcm16(&[0; 4], 24_000, 1).unwrap())
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let mut config = kokoro_config(&server);
    config.transport.max_connections = 1;
    config.transport.pool_timeout_secs = 0.1;
    let tts: Arc<dyn SynthesisAdapter> = Arc::new(KokoroTts::new(&config).unwrap());

    let first = {
        let tts = Arc::clone(&tts);
        tokio::spawn(async move { tts.synthesize("first".into()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    match tts.synthesize("second".into()).await {
        Err(VoiceError::Timeout(msg)) => assert!(msg.contains("connection slot")),
        other => panic!("expected pool Timeout, got {:?}", other),
    }
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unreachable_backend_is_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = SynthesisConfig::new(SynthesisBackend::IndexTts)
        .with_base_url(format!("http://{}", addr));
    let tts = IndexTts::new(&config).unwrap();

    match tts.synthesize("hello".into()).await {
        Err(VoiceError::Connection(_)) => {}
        other => panic!("expected Connection error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_text_is_rejected_before_io() {
    let server = MockServer::start().await;
    let tts = KokoroTts::new(&kokoro_config(&server)).unwrap();

    for text in [String::new(), "   ".to_string(), "x".repeat(64 * 1024 + 1)] {
        match tts.synthesize(text.into()).await {
            Err(VoiceError::InvalidRequest(_)) => {}
            other => panic!("expected InvalidRequest, got {:?}", other),
        }
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_closed_adapter_rejects_calls() {
    let server = MockServer::start().await;
    let config = SynthesisConfig::new(SynthesisBackend::SpeechApi).with_base_url(server.uri());
    let tts = create_synthesizer(&config, None).unwrap();
    assert_eq!(tts.provider(), "speech-api");

    tts.prewarm();
    tts.close().await;
    tts.close().await;

    match tts.synthesize("late".into()).await {
        Err(VoiceError::Connection(msg)) => assert!(msg.contains("closed")),
        other => panic!("expected Connection error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_prewarm_hits_health_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = SynthesisConfig::new(SynthesisBackend::SpeechApi).with_base_url(server.uri());
    let tts = SpeechApiTts::new(&config).unwrap();
    tts.prewarm();

    for _ in 0..50 {
        if !server.received_requests().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tts.close().await;
    server.verify().await;
}
