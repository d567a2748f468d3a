mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use common::{eventually, test_config, FakeAudio, FakeHost, Sequence};
use stash_engine::action::Action;
use stash_engine::core::Engine;
use stash_engine::host::{NoAudio, NowPlaying, Severity};
use stash_engine::overlay::RowState;
use stash_proto::job::JobContext;
use stash_proto::protocol::CollectionType;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn playing(name: &str) -> Option<NowPlaying> {
    Some(NowPlaying {
        name: name.to_string(),
        uri: None,
        context_uri: None,
    })
}

async fn saving_backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/capture-track"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "saved" })))
        .mount(&server)
        .await;
    server
}

async fn uploads(server: &MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/capture-track")
        .map(|r: &Request| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn switching_items_flushes_each_recording() {
    let backend = saving_backend().await;
    let host = Arc::new(FakeHost::default());
    *host.playing.lock().unwrap() = playing("Song A");
    let audio = Arc::new(FakeAudio::default());
    let engine = Engine::new(
        test_config(&backend.uri(), "http://127.0.0.1:9"),
        host.clone(),
        host.clone(),
        audio.clone(),
    );
    let _tasks = engine.spawn_background();

    engine.start_capture(Some("/captures".to_string())).await;
    assert_eq!(audio.starts(), 1);
    assert_eq!(engine.capture_session().await.current_item.as_deref(), Some("Song A"));
    assert!(audio.feed(b"aaaa"));
    assert!(audio.feed(b"aaaa"));

    // A → B: A is uploaded, B starts recording.
    engine.now_playing_changed(playing("Song B")).await;
    assert!(
        eventually(|| {
            let audio = audio.clone();
            async move { audio.starts() == 2 }
        })
        .await
    );
    assert!(
        eventually(|| {
            let engine = engine.clone();
            async move { engine.capture_session().await.captured_count == 1 }
        })
        .await
    );
    // Too short to keep.
    assert!(audio.feed(b"b"));

    // B → C: B is dropped below the size threshold.
    engine.now_playing_changed(playing("Song C")).await;
    assert!(
        eventually(|| {
            let audio = audio.clone();
            async move { audio.starts() == 3 }
        })
        .await
    );
    assert!(audio.feed(b"cccccc"));

    let captured = engine.stop_capture().await;
    assert_eq!(captured, 2);
    assert!(host.has_notice("2 tracks saved"));
    assert!(!engine.capture_active().await);

    let sent = uploads(&backend).await;
    let names: Vec<&str> = sent.iter().map(|u| u["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Song A", "Song C"]);
    assert_eq!(sent[0]["path"], "/captures");
    assert_eq!(sent[0]["mime_type"], "audio/webm;codecs=opus");
    let data = base64::engine::general_purpose::STANDARD
        .decode(sent[0]["data"].as_str().unwrap())
        .unwrap();
    assert_eq!(data, b"aaaaaaaa");
}

#[tokio::test]
async fn capture_waits_for_playback_when_idle() {
    let backend = saving_backend().await;
    let host = Arc::new(FakeHost::default());
    let audio = Arc::new(FakeAudio::default());
    let engine = Engine::new(
        test_config(&backend.uri(), "http://127.0.0.1:9"),
        host.clone(),
        host.clone(),
        audio.clone(),
    );
    let _tasks = engine.spawn_background();

    engine.start_capture(None).await;
    assert!(engine.capture_active().await);
    assert_eq!(audio.starts(), 0);

    engine.now_playing_changed(playing("Late")).await;
    assert!(
        eventually(|| {
            let audio = audio.clone();
            async move { audio.starts() == 1 }
        })
        .await
    );

    // Same item reported again: no new recording.
    engine.now_playing_changed(playing("Late")).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(audio.starts(), 1);

    assert!(audio.feed(&[7u8; 16]));
    assert_eq!(engine.stop_capture().await, 1);
}

#[tokio::test]
async fn refused_upload_is_not_counted() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/capture-track"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "status": "error", "error": "disk full" })),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let host = Arc::new(FakeHost::default());
    *host.playing.lock().unwrap() = playing("Song A");
    let audio = Arc::new(FakeAudio::default());
    let engine = Engine::new(
        test_config(&backend.uri(), "http://127.0.0.1:9"),
        host.clone(),
        host.clone(),
        audio.clone(),
    );

    engine.start_capture(Some("/c".to_string())).await;
    assert!(audio.feed(b"long enough"));
    assert_eq!(engine.stop_capture().await, 0);
}

#[tokio::test]
async fn capture_without_audio_source_stays_armed() {
    let host = Arc::new(FakeHost::default());
    *host.playing.lock().unwrap() = playing("Song A");
    let engine = Engine::new(
        test_config("http://127.0.0.1:9", "http://127.0.0.1:9"),
        host.clone(),
        host.clone(),
        Arc::new(NoAudio),
    );
    let _tasks = engine.spawn_background();

    engine.start_capture(None).await;
    assert!(engine.capture_active().await);
    assert_eq!(engine.capture_session().await.current_item, None);
    assert!(!host.has_notice("capture unavailable"));
    assert!(host
        .notices()
        .iter()
        .all(|(_, severity)| *severity != Severity::Error));

    // Later items are tried again and skipped the same way.
    engine.now_playing_changed(playing("Song B")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.capture_active().await);
    assert_eq!(engine.capture_session().await.current_item, None);
    assert_eq!(engine.stop_capture().await, 0);
}

#[tokio::test]
async fn shortcut_stops_an_active_capture() {
    let backend = saving_backend().await;
    let host = Arc::new(FakeHost::default());
    *host.playing.lock().unwrap() = playing("Song A");
    let audio = Arc::new(FakeAudio::default());
    let engine = Engine::new(
        test_config(&backend.uri(), "http://127.0.0.1:9"),
        host.clone(),
        host.clone(),
        audio.clone(),
    );

    engine.dispatch(Action::StartCapture { path: None }).await;
    assert!(engine.capture_active().await);
    assert!(audio.feed(b"abcdef"));

    engine.dispatch(Action::Shortcut).await;
    assert!(!engine.capture_active().await);
    assert_eq!(uploads(&backend).await.len(), 1);
    assert!(host.last_modal().is_none());
}

#[tokio::test]
async fn slow_upload_does_not_hold_up_rendering() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/capture-track"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "status": "saved" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({ "status": "started", "download_id": 7, "total": 10 }),
        ))
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/progress/7"))
        .respond_with(Sequence::new(vec![serde_json::json!({
            "status": "downloading", "done": 3, "total": 10, "percent": 30
        })]))
        .mount(&backend)
        .await;

    let album = JobContext::new(CollectionType::Album, "a1");
    let host = FakeHost::showing(album.clone(), 4);
    *host.playing.lock().unwrap() = playing("Song A");
    let audio = Arc::new(FakeAudio::default());
    let engine = Engine::new(
        test_config(&backend.uri(), "http://127.0.0.1:9"),
        host.clone(),
        host.clone(),
        audio.clone(),
    );
    let _tasks = engine.spawn_background();

    engine.start_capture(Some("/captures".to_string())).await;
    assert!(audio.feed(b"aaaaaaaa"));
    engine.now_playing_changed(playing("Song B")).await;
    assert!(
        eventually(|| {
            let audio = audio.clone();
            async move { audio.starts() == 2 }
        })
        .await
    );

    // Song A is now uploading for the next few seconds.
    engine
        .start(album, "https://open.spotify.com/album/a1", "320", None)
        .await
        .unwrap();
    let deadline = Instant::now() + Duration::from_millis(1500);
    loop {
        let states = host.row_states();
        if states[..3].iter().all(|s| *s == Some(RowState::Complete)) {
            break;
        }
        assert!(Instant::now() < deadline, "rows stuck at {:?}", states);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let asked = Instant::now();
    assert!(engine.capture_active().await);
    assert!(asked.elapsed() < Duration::from_millis(200));
    assert_eq!(engine.capture_session().await.captured_count, 0);
}
