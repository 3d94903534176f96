//! End-to-end request flows through `RelayClient` against a scripted transport.

mod common;

use ai_relay_rust::config::RelayConfig;
use ai_relay_rust::error::ReferenceErrorKind;
use ai_relay_rust::resilience::ManualClock;
use ai_relay_rust::types::message::{ContentPart, MessageContent};
use ai_relay_rust::{
    ChatCompletionChunk, CompletionRequest, CompletionResponse, Error, Message, MessageRole,
    RelayClient,
};
use common::{hello_world_frames, image_frame, settle, text_frame, ScriptedTransport, SessionScript};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn config() -> RelayConfig {
    RelayConfig::new("https://vendor.test")
}

fn client(transport: &Arc<ScriptedTransport>, clock: &Arc<ManualClock>, config: RelayConfig) -> RelayClient {
    RelayClient::builder()
        .config(config)
        .transport(transport.clone())
        .clock(clock.clone())
        .env_overrides(false)
        .build()
        .unwrap()
}

fn hello(model: &str) -> CompletionRequest {
    CompletionRequest::new(model, vec![Message::user("hello")]).with_credentials(vec!["tok".into()])
}

fn aggregate(response: CompletionResponse) -> ai_relay_rust::ChatCompletion {
    match response {
        CompletionResponse::Aggregate(c) => c,
        other => panic!("expected aggregate, got {:?}", other),
    }
}

async fn collect_frames(response: CompletionResponse) -> Vec<String> {
    match response {
        CompletionResponse::Stream(body) => {
            body.map(|f| String::from_utf8(f.unwrap().to_vec()).unwrap())
                .collect()
                .await
        }
        other => panic!("expected stream, got {:?}", other),
    }
}

fn parse_chunks(frames: &[String]) -> Vec<ChatCompletionChunk> {
    frames
        .iter()
        .filter(|f| !f.contains("[DONE]"))
        .map(|f| serde_json::from_str(f.trim_start_matches("data: ").trim()).unwrap())
        .collect()
}

#[tokio::test]
async fn aggregate_request_returns_full_text_and_cleans_up() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    transport.push_session(SessionScript::Body(hello_world_frames()));
    let cfg = config();
    let delete_path = cfg.endpoints.delete_session.clone();
    let client = client(&transport, &clock, cfg);

    let completion = aggregate(client.complete(hello("chat")).await.unwrap());
    assert_eq!(completion.content(), "Hello, world!");
    assert_eq!(completion.id, "sess1-msg1");
    assert_eq!(completion.model, "chat");
    assert_eq!(completion.object, "chat.completion");

    settle().await;
    assert_eq!(transport.opens(), 1);
    assert_eq!(transport.closes(), 1);
    let deletes = transport.posts_to(&delete_path);
    assert_eq!(deletes, vec![json!({"sessionId": "sess1"})]);

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent[0]["contents"][0]["content"], "hello");
    assert_eq!(sent[0]["sessionId"], "");
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn transient_failures_are_retried_with_fixed_backoff() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    transport.push_session(SessionScript::OpenFails);
    transport.push_session(SessionScript::SendFails);
    transport.push_session(SessionScript::Body(hello_world_frames()));
    let client = client(&transport, &clock, config());

    let completion = aggregate(client.complete(hello("chat")).await.unwrap());
    assert_eq!(completion.content(), "Hello, world!");
    assert_eq!(transport.opens(), 3);
    settle().await;
    // the failed session and the successful one; the refused open never had one
    assert_eq!(transport.closes(), 2);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);

    // the same payload is resent unchanged
    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
}

#[tokio::test]
async fn exhausted_attempts_surface_the_last_transport_error() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    let mut cfg = config();
    cfg.retry.max_attempts = 2;
    let delete_path = cfg.endpoints.delete_session.clone();
    transport.push_session(SessionScript::SendFails);
    transport.push_session(SessionScript::SendFails);
    let client = client(&transport, &clock, cfg);

    let err = client.complete(hello("chat")).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    settle().await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(transport.closes(), 2);
    assert_eq!(clock.sleeps().len(), 1);
    assert!(transport.posts_to(&delete_path).is_empty());
}

#[tokio::test]
async fn mid_stream_failure_redoes_the_whole_aggregate_attempt() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    transport.push_session(SessionScript::BodyThenError(vec![text_frame("generating", "Hel")]));
    transport.push_session(SessionScript::Body(hello_world_frames()));
    let client = client(&transport, &clock, config());

    let completion = aggregate(client.complete(hello("chat")).await.unwrap());
    assert_eq!(completion.content(), "Hello, world!");
    assert_eq!(transport.opens(), 2);
}

#[tokio::test]
async fn business_faults_are_not_retried() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    let fault = format!(
        "data: {}\n\n",
        json!({"errorCode": "NotLogin", "errorMsg": "credential expired"})
    );
    transport.push_session(SessionScript::Body(vec![fault]));
    let client = client(&transport, &clock, config());

    let err = client.complete(hello("chat")).await.unwrap_err();
    match err {
        Error::UpstreamBusiness { code, message } => {
            assert_eq!(code.as_deref(), Some("NotLogin"));
            assert_eq!(message, "credential expired");
        }
        other => panic!("unexpected error {:?}", other),
    }
    settle().await;
    assert_eq!(transport.opens(), 1);
    assert_eq!(transport.closes(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn streaming_request_emits_chunks_then_done_and_cleans_up() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    transport.push_session(SessionScript::Body(hello_world_frames()));
    let cfg = config();
    let delete_path = cfg.endpoints.delete_session.clone();
    let client = client(&transport, &clock, cfg);

    let response = client.complete(hello("chat").streaming()).await.unwrap();
    let frames = collect_frames(response).await;
    assert_eq!(frames.last().map(String::as_str), Some("data: [DONE]\n\n"));

    let chunks = parse_chunks(&frames);
    assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
    let text: String = chunks.iter().map(|c| c.delta_content()).collect();
    assert_eq!(text, "Hello, world!");
    assert_eq!(chunks.last().and_then(|c| c.finish_reason()), Some("stop"));

    settle().await;
    assert_eq!(transport.closes(), 1);
    assert_eq!(transport.posts_to(&delete_path).len(), 1);
}

#[tokio::test]
async fn streaming_retry_covers_only_the_request_headers() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    transport.push_session(SessionScript::SendFails);
    transport.push_session(SessionScript::BodyThenError(vec![text_frame("generating", "partial")]));
    let cfg = config();
    let delete_path = cfg.endpoints.delete_session.clone();
    let client = client(&transport, &clock, cfg);

    let response = client.complete(hello("chat").streaming()).await.unwrap();
    let frames = collect_frames(response).await;
    assert_eq!(frames.iter().filter(|f| f.contains("[DONE]")).count(), 1);
    assert_eq!(frames.last().map(String::as_str), Some("data: [DONE]\n\n"));

    settle().await;
    // the committed stream failed mid-body; it is not retried and not cleaned up
    assert_eq!(transport.opens(), 2);
    assert_eq!(transport.closes(), 2);
    assert!(transport.posts_to(&delete_path).is_empty());
}

#[tokio::test]
async fn dropped_stream_closes_session_while_vendor_is_silent() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    transport.push_session(SessionScript::BodyThenStall(vec![image_frame(
        "generating",
        "drawing ![](https://x/1.png?s=",
    )]));
    let cfg = config();
    let delete_path = cfg.endpoints.delete_session.clone();
    let client = client(&transport, &clock, cfg);

    let response = client.complete(hello("chat-image").streaming()).await.unwrap();
    let mut body = match response {
        CompletionResponse::Stream(body) => body,
        other => panic!("expected stream, got {:?}", other),
    };
    let role_open = body.next().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&role_open).contains("\"role\":\"assistant\""));
    drop(body);

    settle().await;
    assert_eq!(transport.closes(), 1);
    assert_eq!(
        transport.posts_to(&delete_path),
        vec![json!({"sessionId": "sess1"})]
    );
}

#[tokio::test]
async fn unknown_model_falls_back_to_chat_and_echoes_requested_name() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    transport.push_session(SessionScript::Body(hello_world_frames()));
    let client = client(&transport, &clock, config());

    let completion = aggregate(client.complete(hello("gpt-4o")).await.unwrap());
    assert_eq!(completion.model, "gpt-4o");
    assert_eq!(transport.sent.lock().unwrap()[0]["model"], "chat");
}

#[tokio::test]
async fn continued_conversation_sends_last_user_text_only() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    transport.push_session(SessionScript::Body(hello_world_frames()));
    let client = client(&transport, &clock, config());

    let request = CompletionRequest::new(
        "chat",
        vec![Message::user("first"), Message::assistant("answer"), Message::user("second")],
    )
    .with_conversation("sess9-msg4")
    .with_credentials(vec!["tok".into()]);
    client.complete(request).await.unwrap();

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent[0]["sessionId"], "sess9");
    assert_eq!(sent[0]["parentMsgId"], "msg4");
    assert_eq!(sent[0]["contents"][0]["content"], "second");
}

#[tokio::test]
async fn missing_credentials_fail_validation_before_any_session() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    let client = client(&transport, &clock, config());

    let request = CompletionRequest::new("chat", vec![Message::user("hello")]);
    assert!(matches!(
        client.complete(request).await,
        Err(Error::Validation { .. })
    ));
    assert_eq!(transport.opens(), 0);
}

fn with_file(url: &str) -> CompletionRequest {
    let message = Message::with_content(
        MessageRole::User,
        MessageContent::parts(vec![ContentPart::text("summarize"), ContentPart::file(url)]),
    );
    CompletionRequest::new("chat", vec![message]).with_credentials(vec!["tok".into()])
}

#[tokio::test]
async fn documents_are_uploaded_and_scanned_before_the_session_opens() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    let cfg = config();
    transport.add_remote_file("https://files.test/report.pdf", "application/pdf", b"%PDF-1.4", Some(8));
    transport.push_reply(
        &cfg.endpoints.file_upload,
        Some(json!({"fileId": "f1", "url": "https://vendor.test/files/f1"})),
    );
    transport.push_reply(&cfg.endpoints.file_status, Some(json!({"status": "pending"})));
    transport.push_reply(&cfg.endpoints.file_status, Some(json!({"status": "success"})));
    transport.push_session(SessionScript::Body(hello_world_frames()));
    let client = client(&transport, &clock, cfg);

    aggregate(client.complete(with_file("https://files.test/report.pdf")).await.unwrap());

    assert_eq!(transport.uploads.lock().unwrap()[0], ("report.pdf".to_string(), 8));
    let sent = transport.sent.lock().unwrap();
    let file = &sent[0]["contents"][1];
    assert_eq!(file["contentType"], "file");
    assert_eq!(file["content"], "https://vendor.test/files/f1");
    assert_eq!(file["ext"]["fileId"], "f1");
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(500), Duration::from_secs(1)]
    );
}

#[tokio::test]
async fn reference_failures_abort_before_any_session() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    let mut cfg = config();
    cfg.files.max_file_size = 4;
    transport.add_remote_file("https://files.test/big.pdf", "application/pdf", b"0123456789", Some(10));
    let client = client(&transport, &clock, cfg);

    let err = client
        .complete(with_file("https://files.test/big.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Reference { kind: ReferenceErrorKind::Oversize, .. }));

    let err = client
        .complete(with_file("https://files.test/missing.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Reference { kind: ReferenceErrorKind::Unreachable, .. }));

    assert_eq!(transport.opens(), 0);
    assert!(transport.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_scan_is_a_reference_failure() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    let cfg = config();
    transport.add_remote_file("https://files.test/a.pdf", "application/pdf", b"x", None);
    transport.push_reply(&cfg.endpoints.file_upload, Some(json!({"fileId": "f2", "url": "u"})));
    transport.push_reply(
        &cfg.endpoints.file_status,
        Some(json!({"status": "failed", "reason": "unsafe content"})),
    );
    let client = client(&transport, &clock, cfg);

    let err = client.complete(with_file("https://files.test/a.pdf")).await.unwrap_err();
    match err {
        Error::Reference { kind, message, .. } => {
            assert_eq!(kind, ReferenceErrorKind::ScanFailed);
            assert!(message.contains("unsafe content"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(transport.opens(), 0);
}

#[tokio::test]
async fn video_variant_completes_through_a_generation_job() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    let cfg = config();
    transport.push_reply(&cfg.endpoints.generation_submit, Some(json!({"taskId": "t1"})));
    for _ in 0..3 {
        transport.push_reply(&cfg.endpoints.generation_status, Some(json!({"status": "pending"})));
    }
    transport.push_reply(
        &cfg.endpoints.generation_status,
        Some(json!({"status": "complete", "result": {"url": "https://x/a.mp4?tok=1"}})),
    );
    let submit_path = cfg.endpoints.generation_submit.clone();
    let client = client(&transport, &clock, cfg);

    let request = CompletionRequest::new("video", vec![Message::user("a cat surfing")])
        .with_credentials(vec!["tok".into()]);
    let completion = aggregate(client.complete(request).await.unwrap());
    assert_eq!(completion.content(), "https://x/a.mp4");
    assert_eq!(completion.id, "t1");
    assert_eq!(clock.elapsed(), Duration::from_secs(10 + 3 * 5));
    assert_eq!(transport.opens(), 0);
    assert_eq!(
        transport.posts_to(&submit_path),
        vec![json!({"prompt": "a cat surfing", "model": "video"})]
    );
}

#[tokio::test]
async fn streamed_video_answer_is_a_single_content_chunk() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    let cfg = config();
    transport.push_reply(&cfg.endpoints.generation_submit, Some(json!({"taskId": "t2"})));
    transport.push_reply(
        &cfg.endpoints.generation_status,
        Some(json!({"status": "complete", "result": {"url": "https://x/b.mp4"}})),
    );
    let client = client(&transport, &clock, cfg);

    let request = CompletionRequest::new("video", vec![Message::user("waves")])
        .with_credentials(vec!["tok".into()])
        .streaming();
    let frames = collect_frames(client.complete(request).await.unwrap()).await;
    assert_eq!(frames.len(), 4);
    let chunks = parse_chunks(&frames);
    assert_eq!(chunks[1].delta_content(), "https://x/b.mp4");
    assert_eq!(chunks[2].finish_reason(), Some("stop"));
}

#[tokio::test]
async fn generation_without_asset_is_a_hard_failure() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(ManualClock::new());
    let cfg = config();
    transport.push_reply(&cfg.endpoints.generation_submit, Some(json!({"taskId": "t3"})));
    transport.push_reply(&cfg.endpoints.generation_status, Some(json!({"status": "complete"})));
    let client = client(&transport, &clock, cfg);

    let request = CompletionRequest::new("video", vec![Message::user("x")]).with_credentials(vec!["tok".into()]);
    assert!(matches!(
        client.complete(request).await,
        Err(Error::UpstreamBusiness { .. })
    ));
}
