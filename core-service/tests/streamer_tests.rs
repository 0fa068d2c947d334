//! End-to-end tests of the `AudioStreamer` facade with desktop bridges, a
//! mocked player and an in-process origin.

use async_trait::async_trait;
use axum::{http::header, routing::get, Router};
use bridge_desktop::{DesktopAudioFocus, ReqwestHttpClient, TokioFileSystem};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::player::{MediaPlayer, MediaPlayerFactory, PlayerListener, PlayerState};
use bytes::Bytes;
use core_runtime::events::{CacheEvent, PlaybackEvent};
use core_service::{AudioStreamer, CoreConfig, CoreError, CoreEvent};
use mockall::mock;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

mock! {
    Player {}

    #[async_trait]
    impl MediaPlayer for Player {
        async fn prepare(&self, source_url: &str) -> BridgeResult<()>;
        async fn set_play_when_ready(&self, play_when_ready: bool) -> BridgeResult<()>;
        async fn play_when_ready(&self) -> BridgeResult<bool>;
        async fn stop(&self) -> BridgeResult<()>;
        async fn seek_to(&self, position_ms: u64) -> BridgeResult<()>;
        async fn current_position_ms(&self) -> BridgeResult<u64>;
        async fn duration_ms(&self) -> BridgeResult<Option<u64>>;
        async fn release(&self) -> BridgeResult<()>;
    }
}

/// Creates permissive mock players and records what they were asked.
#[derive(Default)]
struct RecordingFactory {
    prepared: Arc<Mutex<Vec<String>>>,
    seeks: Arc<Mutex<Vec<u64>>>,
    listeners: Mutex<Vec<Arc<dyn PlayerListener>>>,
}

impl RecordingFactory {
    fn last_prepared(&self) -> String {
        self.prepared.lock().unwrap().last().cloned().unwrap()
    }

    fn last_listener(&self) -> Arc<dyn PlayerListener> {
        self.listeners.lock().unwrap().last().cloned().unwrap()
    }
}

impl MediaPlayerFactory for RecordingFactory {
    fn create_player(&self, listener: Arc<dyn PlayerListener>) -> BridgeResult<Arc<dyn MediaPlayer>> {
        self.listeners.lock().unwrap().push(listener);

        let mut player = MockPlayer::new();
        let prepared = self.prepared.clone();
        player.expect_prepare().returning(move |url| {
            prepared.lock().unwrap().push(url.to_string());
            Ok(())
        });
        let seeks = self.seeks.clone();
        player.expect_seek_to().returning(move |ms| {
            seeks.lock().unwrap().push(ms);
            Ok(())
        });
        player.expect_set_play_when_ready().returning(|_| Ok(()));
        player.expect_play_when_ready().returning(|| Ok(true));
        player.expect_stop().returning(|| Ok(()));
        player.expect_release().returning(|| Ok(()));
        player.expect_current_position_ms().returning(|| Ok(61_500));
        player.expect_duration_ms().returning(|| Ok(None));

        Ok(Arc::new(player))
    }
}

async fn start_origin(data: Bytes) -> SocketAddr {
    let len = data.len().to_string();
    let app = Router::new().route(
        "/track.mp3",
        get(move || {
            let data = data.clone();
            async move { data }
        })
        .head(move || {
            let len = len.clone();
            async move { [(header::CONTENT_LENGTH, len)] }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn streamer(dir: &TempDir, factory: Arc<RecordingFactory>) -> AudioStreamer {
    let config = CoreConfig::builder()
        .http_client(Arc::new(ReqwestHttpClient::with_client(local_client())))
        .file_system(Arc::new(TokioFileSystem::with_cache_directory(
            dir.path().to_path_buf(),
        )))
        .audio_focus(Arc::new(DesktopAudioFocus::new()))
        .player_factory(factory)
        .build()
        .unwrap();
    AudioStreamer::new(config).await.unwrap()
}

#[tokio::test]
async fn test_fresh_streamer_reports_defaults() {
    let dir = TempDir::new().unwrap();
    let streamer = streamer(&dir, Arc::new(RecordingFactory::default())).await;

    assert_eq!(streamer.cache_size().unwrap(), "0 B");
    assert_eq!(streamer.status(), "STOPPED");
    assert_eq!(streamer.current_time().await.unwrap(), 0.0);
    assert_eq!(streamer.duration().await.unwrap(), 0.0);
    assert!(dir.path().join("audio-cache").is_dir());

    streamer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_streamed_bytes_count_toward_cache_size_until_cleared() {
    let data = Bytes::from(vec![7u8; 10_000]);
    let origin = start_origin(data.clone()).await;
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(RecordingFactory::default());
    let streamer = streamer(&dir, factory.clone()).await;
    let mut events = streamer.subscribe();

    streamer
        .set_url(&format!("http://{}/track.mp3", origin))
        .await
        .unwrap();

    // Read through the proxy the way the player would.
    let local_url = factory.last_prepared();
    let body = local_client()
        .get(&local_url)
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body, data);
    assert_eq!(streamer.cache_size().unwrap(), "10.0 kB");

    streamer.clear_cache().await.unwrap();
    assert_eq!(streamer.cache_size().unwrap(), "0 B");

    let cleared = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let CoreEvent::Cache(CacheEvent::Cleared {
                entries_removed,
                failed_keys,
            }) = events.recv().await.unwrap()
            {
                return (entries_removed, failed_keys);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(cleared, (1, Vec::new()));

    streamer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_player_callbacks_surface_as_status() {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(RecordingFactory::default());
    let streamer = streamer(&dir, factory.clone()).await;
    let mut events = streamer.subscribe();

    streamer.set_url("https://cdn.example.com/a.mp3").await.unwrap();
    streamer.play().await.unwrap();
    factory
        .last_listener()
        .on_state_changed(true, PlayerState::Ready);

    let statuses = tokio::time::timeout(Duration::from_secs(2), async {
        let mut seen = Vec::new();
        while seen.len() < 2 {
            if let CoreEvent::Playback(PlaybackEvent::StatusChanged { status }) =
                events.recv().await.unwrap()
            {
                seen.push(status);
            }
        }
        seen
    })
    .await
    .unwrap();
    assert_eq!(statuses, vec!["STOPPED", "PLAYING"]);
    assert_eq!(streamer.status(), "PLAYING");

    streamer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_seek_and_time_conversions() {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(RecordingFactory::default());
    let streamer = streamer(&dir, factory.clone()).await;

    streamer.set_url("https://cdn.example.com/a.mp3").await.unwrap();
    streamer.seek_to_time(90.5).await.unwrap();
    assert_eq!(*factory.seeks.lock().unwrap(), vec![90_500]);
    assert_eq!(streamer.current_time().await.unwrap(), 61.5);
    // Unknown duration reads as zero.
    assert_eq!(streamer.duration().await.unwrap(), 0.0);

    streamer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_url_is_an_error() {
    let dir = TempDir::new().unwrap();
    let streamer = streamer(&dir, Arc::new(RecordingFactory::default())).await;

    let result = streamer.set_url("").await;
    assert!(matches!(result, Err(CoreError::Playback(_))));
    assert_eq!(streamer.status(), "STOPPED");

    streamer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_persists_index() {
    let data = Bytes::from(vec![1u8; 4_000]);
    let origin = start_origin(data).await;
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(RecordingFactory::default());
    let streamer = streamer(&dir, factory.clone()).await;

    streamer
        .set_url(&format!("http://{}/track.mp3", origin))
        .await
        .unwrap();
    local_client()
        .get(factory.last_prepared())
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    streamer.shutdown().await.unwrap();

    assert!(dir.path().join("audio-cache").join("index.json").is_file());

    // A new streamer over the same directory sees the cached bytes.
    let reopened = streamer_with_root(&dir).await;
    assert_eq!(reopened.cache_size().unwrap(), "4.0 kB");
    reopened.shutdown().await.unwrap();
}

async fn streamer_with_root(dir: &TempDir) -> AudioStreamer {
    let config = CoreConfig::builder()
        .cache_root(dir.path())
        .http_client(Arc::new(ReqwestHttpClient::with_client(local_client())))
        .file_system(Arc::new(TokioFileSystem::new()))
        .audio_focus(Arc::new(DesktopAudioFocus::new()))
        .player_factory(Arc::new(RecordingFactory::default()))
        .build()
        .unwrap();
    AudioStreamer::new(config).await.unwrap()
}
