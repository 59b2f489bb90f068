// Integration tests for the HTTP API
//
// These tests drive the axum router in-process with `oneshot`, backed by
// the scripted engine.

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use loqa_transcribe::engine::tokenizer::END_OF_TEXT;
use loqa_transcribe::engine::{ScriptedEngine, ScriptedReply, WhisperVocabulary};
use loqa_transcribe::{
    create_router, AppState, LoadMonitor, LoadSample, TranscriptionHandler, TranscriptionSettings,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "loqa-test-boundary";
const HI: u32 = 300;

fn wav(seconds: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 22_050,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for i in 0..seconds * 22_050 {
            writer.write_sample(((i % 64) as i16 - 32) * 50)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

fn multipart(fields: &[(&str, &str)], file: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some(file) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"audio.wav\"\r\nContent-Type: audio/wav\r\n\r\n",
                BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(file);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn transcription_request(body: Vec<u8>, request_id: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/audio/transcriptions")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(id) = request_id {
        builder = builder.header("x-request-id", id);
    }
    Ok(builder.body(Body::from(body))?)
}

fn app() -> (Router, Arc<ScriptedEngine>, LoadMonitor) {
    app_replying(ScriptedReply::from_ids([
        HI,
        WhisperVocabulary::timestamp_id(1.0),
        END_OF_TEXT,
    ]))
}

fn app_replying(reply: ScriptedReply) -> (Router, Arc<ScriptedEngine>, LoadMonitor) {
    let vocab = WhisperVocabulary::new().with_text_tokens([(HI, " Hi")]);
    let engine = Arc::new(ScriptedEngine::new(Arc::new(vocab), 448).with_default_reply(reply));
    let monitor = LoadMonitor::new();
    let handler = TranscriptionHandler::new(engine.clone(), TranscriptionSettings::default());
    let state = AppState::new(Arc::new(handler), monitor.clone());

    (create_router(state), engine, monitor)
}

/// Poll `condition` until it holds, failing after a few seconds
async fn wait_until(condition: impl Fn() -> bool) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

async fn body_json(response: axum::response::Response) -> Result<serde_json::Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let (app, _, _) = app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"OK");
    Ok(())
}

#[tokio::test]
async fn test_json_transcription_uses_request_id() -> Result<()> {
    let (app, engine, _) = app();
    let body = multipart(&[("model", "whisper"), ("language", "en")], Some(&wav(35)?));

    let response = app
        .oneshot(transcription_request(body, Some("abc"))?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-request-id").map(|v| v.as_bytes()),
        Some(&b"abc"[..])
    );
    let json = body_json(response).await?;
    assert_eq!(json["text"], "Hi Hi");

    let mut submitted = engine.submitted();
    submitted.sort();
    assert_eq!(submitted, vec!["abc-0", "abc-1"]);
    Ok(())
}

#[tokio::test]
async fn test_missing_request_id_is_generated() -> Result<()> {
    let (app, engine, _) = app();
    let body = multipart(&[], Some(&wav(1)?));

    let response = app.oneshot(transcription_request(body, None)?).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default();
    assert!(!id.is_empty());
    assert_eq!(engine.submitted(), vec![format!("{}-0", id)]);
    Ok(())
}

#[tokio::test]
async fn test_verbose_json_response() -> Result<()> {
    let (app, _, _) = app();
    let body = multipart(
        &[("response_format", "verbose_json"), ("temperature", "0.3")],
        Some(&wav(2)?),
    );

    let response = app.oneshot(transcription_request(body, None)?).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await?;
    assert_eq!(json["language"], "en");
    assert!(json["word"].is_null());
    assert_eq!(json["segments"][0]["id"], 0);
    assert_eq!(json["segments"][0]["end"], 1.0);
    assert!(json["segments"][0]["no_speech_prob"].is_null());
    assert!((json["segments"][0]["temperature"].as_f64().unwrap_or_default() - 0.3).abs() < 1e-6);
    assert!((json["duration"].as_f64().unwrap_or_default() - 2.0).abs() < 1e-3);
    Ok(())
}

#[tokio::test]
async fn test_text_response_is_plain() -> Result<()> {
    let (app, _, _) = app();
    let body = multipart(&[("response_format", "text")], Some(&wav(1)?));

    let response = app.oneshot(transcription_request(body, None)?).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"Hi");
    Ok(())
}

#[tokio::test]
async fn test_invalid_language_is_rejected() -> Result<()> {
    let (app, engine, _) = app();
    let body = multipart(&[("language", "xx")], Some(&wav(1)?));

    let response = app.oneshot(transcription_request(body, None)?).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await?;
    assert!(json["error"].as_str().unwrap_or_default().contains("xx"));
    assert!(engine.submitted().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_subtitle_formats_are_not_implemented() -> Result<()> {
    let (app, _, _) = app();
    let body = multipart(&[("response_format", "srt")], Some(&wav(1)?));

    let response = app.oneshot(transcription_request(body, None)?).await?;

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    Ok(())
}

#[tokio::test]
async fn test_unknown_field_is_rejected() -> Result<()> {
    let (app, _, _) = app();
    let body = multipart(&[("stream", "true")], Some(&wav(1)?));

    let response = app.oneshot(transcription_request(body, None)?).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_missing_audio_is_no_content() -> Result<()> {
    let (app, engine, _) = app();
    let body = multipart(&[("language", "de")], None);

    let response = app.oneshot(transcription_request(body, None)?).await?;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(engine.submitted().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_client_disconnect_cancels_sub_requests() -> Result<()> {
    let (app, engine, _) = app_replying(ScriptedReply::from_ids([HI]).hanging());
    let body = multipart(&[], Some(&wav(35)?));

    let client = tokio::spawn(app.oneshot(transcription_request(body, Some("dc"))?));
    wait_until(|| engine.submitted().len() == 2).await?;

    // Dropping the in-progress request is what axum does on disconnect.
    client.abort();
    wait_until(|| engine.cancelled().len() == 2).await?;

    let mut cancelled = engine.cancelled();
    cancelled.sort();
    assert_eq!(cancelled, vec!["dc-0", "dc-1"]);
    assert!(client.await.is_err_and(|e| e.is_cancelled()));
    Ok(())
}

#[tokio::test]
async fn test_state_stream_starts_with_current_sample() -> Result<()> {
    let (app, _, monitor) = app();
    monitor.publish(LoadSample {
        in_flight: 3,
        in_queue: 1,
        max_in_flight: 8,
    });

    let response = app
        .oneshot(Request::builder().uri("/state").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let mut frames = response.into_body().into_data_stream();
    let first = match frames.next().await {
        Some(frame) => frame?,
        None => anyhow::bail!("state stream ended immediately"),
    };
    let text = String::from_utf8(first.to_vec())?;

    assert!(text.contains("event: engine_state_event"));
    assert!(text.contains("\"in_flight\":3"));
    assert!(text.contains("\"in_queue\":1"));
    Ok(())
}
