//! Recognition stream tests against an in-process WebSocket server

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use voicery::asr::{decode_frame, MessageType, Recognizer};
use voicery::audio::AudioBuffer;
use voicery::Config;

const POS_SEQUENCE: u8 = 0b0001;
const IS_LAST: u8 = 0b0010;

/// Build a gzip+JSON hypothesis frame the way the upstream service does
fn hypothesis_frame(text: &str, is_last: bool) -> Vec<u8> {
    let json = serde_json::json!({"result": {"text": text}});
    let body = voicery::asr::frame::gzip_compress(json.to_string().as_bytes()).unwrap();
    let mut frame_flags = 0u8;
    if is_last {
        frame_flags |= IS_LAST;
    }
    let mut frame = vec![
        0b0001_0001,
        (0b1001 << 4) | frame_flags,
        0b0001_0001,
        0x00,
    ];
    frame.extend_from_slice(&u32::try_from(body.len()).unwrap().to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

/// Build a server acknowledgement frame carrying the acked sequence
fn ack_frame(acked: i32) -> Vec<u8> {
    let mut frame = vec![0b0001_0001, 0b1011_0000, 0b0000_0000, 0x00];
    frame.extend_from_slice(&acked.to_be_bytes());
    frame
}

fn test_config(ws_url: String) -> Config {
    Config {
        asr_ws_url: ws_url,
        api_key: Some("test-key".to_string()),
        config_ack_timeout: Duration::from_secs(2),
        partial_read_timeout: Duration::from_millis(200),
        drain_budget: Duration::from_secs(1),
        ..Config::default()
    }
}

/// 300 ms of silence at the protocol rate: exactly one upload segment
fn one_segment_buffer() -> AudioBuffer {
    AudioBuffer::from_interleaved(vec![0.0; 4800], 16000, 1).unwrap()
}

#[tokio::test]
async fn cumulative_hypotheses_overwrite() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();

        // Configuration frame first, carrying sequence 1
        let config_msg = ws.next().await.unwrap().unwrap();
        let config = decode_frame(&config_msg.into_data()).unwrap();
        assert_eq!(config.message_type, MessageType::FullClientRequest);
        assert_eq!(config.sequence, Some(1));
        ws.send(Message::Binary(ack_frame(1).into())).await.unwrap();

        // One audio frame, then two cumulative hypotheses
        let audio_msg = ws.next().await.unwrap().unwrap();
        let audio = decode_frame(&audio_msg.into_data()).unwrap();
        assert_eq!(audio.message_type, MessageType::AudioOnlyRequest);
        assert_eq!(audio.sequence, Some(2));
        ws.send(Message::Binary(hypothesis_frame("你好", false).into()))
            .await
            .unwrap();
        ws.send(Message::Binary(hypothesis_frame("你好世界", true).into()))
            .await
            .unwrap();
    });

    let recognizer = Recognizer::new(&test_config(format!("ws://{addr}"))).without_cache();
    let result = recognizer.transcribe(one_segment_buffer()).await;

    assert!(result.is_usable(), "failure: {:?}", result.meta.failure);
    assert_eq!(result.text, "你好世界");
    assert_eq!(result.meta.segments, 1);
    assert!(!result.meta.cache_hit);
}

#[tokio::test]
async fn config_timeout_fails_before_audio() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (saw_audio_tx, saw_audio_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();

        // Swallow the configuration frame and never acknowledge it
        let _ = ws.next().await;

        // The client should hang up without uploading any audio
        let mut saw_audio = false;
        while let Ok(Some(Ok(msg))) =
            tokio::time::timeout(Duration::from_secs(1), ws.next()).await
        {
            if msg.is_binary() {
                saw_audio = true;
            }
        }
        let _ = saw_audio_tx.send(saw_audio);
    });

    let mut config = test_config(format!("ws://{addr}"));
    config.config_ack_timeout = Duration::from_millis(200);
    let recognizer = Recognizer::new(&config).without_cache();
    let result = recognizer.transcribe(one_segment_buffer()).await;

    assert!(!result.is_usable());
    assert_eq!(result.meta.failure.as_deref(), Some("config timeout"));
    assert!(result.text.is_empty());
    assert!(!saw_audio_rx.await.unwrap(), "audio frame sent after config timeout");
}

#[tokio::test]
async fn second_transcription_served_from_cache() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();
        let _ = ws.next().await;
        ws.send(Message::Binary(ack_frame(1).into())).await.unwrap();
        let _ = ws.next().await;
        ws.send(Message::Binary(hypothesis_frame("缓存命中", true).into()))
            .await
            .unwrap();
        // Single connection only: a second transcription must not reconnect
    });

    let cache_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(format!("ws://{addr}"));
    config.cache_asr_dir = cache_dir.path().to_path_buf();
    let recognizer = Recognizer::new(&config);

    let first = recognizer.transcribe(one_segment_buffer()).await;
    assert_eq!(first.text, "缓存命中");
    assert!(!first.meta.cache_hit);

    let second = recognizer.transcribe(one_segment_buffer()).await;
    assert_eq!(second.text, "缓存命中");
    assert!(second.meta.cache_hit, "failure: {:?}", second.meta.failure);
}
