// Integration tests for concurrent window submission and cancellation
//
// These tests run the orchestrator against the scripted engine, which can
// finish, fail, or hang individual windows.

use anyhow::Result;
use loqa_transcribe::audio::{AudioWindow, ChunkConfig};
use loqa_transcribe::engine::tokenizer::END_OF_TEXT;
use loqa_transcribe::engine::{ScriptedEngine, ScriptedReply, WhisperVocabulary};
use loqa_transcribe::transcribe::{sampling_params, Language, PromptBuilder, RequestOrchestrator};
use loqa_transcribe::TranscribeError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn windows(count: usize) -> Vec<AudioWindow> {
    ChunkConfig::new(1, 16).chunk(&vec![0.25; count * 16])
}

fn prompts() -> Result<PromptBuilder> {
    Ok(PromptBuilder::new(&WhisperVocabulary::new(), Language::english())?)
}

fn engine() -> ScriptedEngine {
    ScriptedEngine::new(Arc::new(WhisperVocabulary::new()), 448)
}

#[tokio::test]
async fn test_outputs_follow_window_order() -> Result<()> {
    // Longer scripts take more polls, so window 0 finishes last.
    let engine = Arc::new(
        engine()
            .with_reply(0, ScriptedReply::from_ids([1, 2, 3, 4, 5, 6, END_OF_TEXT]))
            .with_reply(1, ScriptedReply::from_ids([7, 8, 9, END_OF_TEXT]))
            .with_reply(2, ScriptedReply::from_ids([END_OF_TEXT])),
    );
    let orchestrator = RequestOrchestrator::new(engine.clone());
    let params = sampling_params(448, 0.0, false, 100);

    let outputs = orchestrator
        .transcribe("req", &windows(3), &prompts()?, &params, &CancellationToken::new())
        .await?;

    let indices: Vec<usize> = outputs.iter().map(|o| o.window_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(outputs[0].token_ids, vec![1, 2, 3, 4, 5, 6, END_OF_TEXT]);
    assert_eq!(outputs[1].token_ids, vec![7, 8, 9, END_OF_TEXT]);
    assert_eq!(outputs[2].token_ids, vec![END_OF_TEXT]);
    assert!(outputs.iter().all(|o| o.logprobs.is_none()));

    let mut submitted = engine.submitted();
    submitted.sort();
    assert_eq!(submitted, vec!["req-0", "req-1", "req-2"]);
    assert!(engine.cancelled().is_empty());
    assert_eq!(engine.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn test_logprobs_requested_for_verbose() -> Result<()> {
    let engine = Arc::new(engine().with_reply(0, ScriptedReply::new([(5, -0.25), (END_OF_TEXT, -0.5)])));
    let orchestrator = RequestOrchestrator::new(engine.clone());
    let params = sampling_params(448, 0.0, true, 100);

    let outputs = orchestrator
        .transcribe("req", &windows(1), &prompts()?, &params, &CancellationToken::new())
        .await?;

    let logprobs = outputs[0].logprobs.clone().unwrap_or_default();
    assert_eq!(logprobs.len(), 2);
    assert_eq!(logprobs[1][0].logprob, -0.5);
    Ok(())
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_windows() -> Result<()> {
    let engine = Arc::new(
        engine()
            .with_reply(0, ScriptedReply::from_ids([END_OF_TEXT]))
            .with_reply(1, ScriptedReply::from_ids([1, 2]).hanging())
            .with_reply(2, ScriptedReply::from_ids([3]).hanging()),
    );
    let orchestrator = RequestOrchestrator::new(engine.clone());
    let cancel = CancellationToken::new();

    let task = {
        let cancel = cancel.clone();
        let prompts = prompts()?;
        tokio::spawn(async move {
            let params = sampling_params(448, 0.0, false, 100);
            orchestrator
                .transcribe("p", &windows(3), &prompts, &params, &cancel)
                .await
        })
    };

    engine.wait_for_finished(1).await;
    cancel.cancel();

    let result = task.await?;
    assert!(matches!(result, Err(TranscribeError::Cancelled(ref id)) if id == "p"));

    let mut cancelled = engine.cancelled();
    cancelled.sort();
    assert_eq!(cancelled, vec!["p-1", "p-2"]);
    Ok(())
}

#[tokio::test]
async fn test_failure_cancels_remaining_windows() -> Result<()> {
    let engine = Arc::new(
        engine()
            .with_reply(0, ScriptedReply::from_ids([1]).hanging())
            .with_reply(1, ScriptedReply::from_ids([2]).failing("decoder crashed"))
            .with_reply(2, ScriptedReply::from_ids([3]).hanging()),
    );
    let orchestrator = RequestOrchestrator::new(engine.clone());
    let params = sampling_params(448, 0.0, false, 100);

    let result = orchestrator
        .transcribe("job", &windows(3), &prompts()?, &params, &CancellationToken::new())
        .await;

    match result {
        Err(TranscribeError::Engine(message)) => assert!(message.contains("decoder crashed")),
        other => panic!("expected engine error, got {:?}", other.map(|o| o.len())),
    }

    let mut cancelled = engine.cancelled();
    cancelled.sort();
    assert_eq!(cancelled, vec!["job-0", "job-2"]);
    Ok(())
}

#[tokio::test]
async fn test_timeout_cancels_everything() -> Result<()> {
    let engine = Arc::new(engine().with_default_reply(ScriptedReply::from_ids([1]).hanging()));
    let orchestrator =
        RequestOrchestrator::new(engine.clone()).with_timeout(Some(Duration::from_millis(50)));
    let params = sampling_params(448, 0.0, false, 100);

    let result = orchestrator
        .transcribe("slow", &windows(2), &prompts()?, &params, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(TranscribeError::Timeout(_))));
    assert_eq!(engine.cancelled().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_before_start_schedules_nothing() -> Result<()> {
    let engine = Arc::new(engine());
    let orchestrator = RequestOrchestrator::new(engine.clone());
    let params = sampling_params(448, 0.0, false, 100);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator
        .transcribe("gone", &windows(2), &prompts()?, &params, &cancel)
        .await;

    assert!(matches!(result, Err(TranscribeError::Cancelled(_))));
    assert!(engine.submitted().is_empty());
    // Nothing reached the engine, so there is nothing to cancel.
    assert!(engine.cancelled().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_only_accepted_windows_are_cancelled() -> Result<()> {
    // Window 0 fails on its first poll, possibly before the other windows
    // reach the engine. Cancellation must stay within what was accepted.
    let engine = Arc::new(
        engine()
            .with_reply(0, ScriptedReply::from_ids(Vec::<u32>::new()).failing("rejected"))
            .with_default_reply(ScriptedReply::from_ids([1]).hanging()),
    );
    let orchestrator = RequestOrchestrator::new(engine.clone());
    let params = sampling_params(448, 0.0, false, 100);

    let result = orchestrator
        .transcribe("part", &windows(3), &prompts()?, &params, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(TranscribeError::Engine(_))));
    let submitted = engine.submitted();
    let cancelled = engine.cancelled();
    assert!(cancelled.iter().all(|id| submitted.contains(id)));
    assert!(!cancelled.contains(&"part-0".to_string()));
    Ok(())
}
