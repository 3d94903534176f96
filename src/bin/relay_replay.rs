//! relay-replay: 离线重放厂商 SSE 抓包，输出聚合结果或转译后的 chunk 流
//!
//! Usage:
//!   relay-replay <capture-file> [--stream] [--model <name>] [--config <yaml>] [--image-streaming]
//!
//! Reads a captured vendor event-stream body and runs it through the transcoder. Prints
//! the aggregate completion JSON, or with `--stream` the SSE frames a caller would see.

use ai_relay_rust::pipeline::{decode_frames, Notices, TranscodeStatus, Transcoder};
use ai_relay_rust::{BoxStream, RelayConfig};
use anyhow::{bail, Context};
use bytes::Bytes;
use futures::StreamExt;
use std::io::Write;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Capture bodies are replayed in chunks of this size so the parser sees split frames.
const REPLAY_CHUNK: usize = 4096;

struct Args {
    capture: String,
    stream: bool,
    model: String,
    config: Option<String>,
    image_streaming: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut capture = None;
    let mut stream = false;
    let mut model = "chat".to_string();
    let mut config = None;
    let mut image_streaming = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stream" => stream = true,
            "--image-streaming" => image_streaming = true,
            "--model" => model = args.next().context("--model needs a value")?,
            "--config" => config = Some(args.next().context("--config needs a value")?),
            "help" | "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown option {other}"),
            other => capture = Some(other.to_string()),
        }
    }

    Ok(Args {
        capture: capture.context("missing capture file")?,
        stream,
        model,
        config,
        image_streaming,
    })
}

fn print_usage() {
    println!(
        r#"relay-replay: replay a captured vendor event stream

USAGE:
    relay-replay <capture-file> [OPTIONS]

OPTIONS:
    --stream              Print translated SSE frames instead of the aggregate JSON
    --model <name>        Model name echoed in the output (default: chat)
    --config <yaml>       Relay configuration providing notices
    --image-streaming     Emit generated-image content while it is generating

ENVIRONMENT:
    RUST_LOG              Log filter (default: warn)"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args().map_err(|e| {
        print_usage();
        e
    })?;

    let notices = match &args.config {
        Some(path) => RelayConfig::from_yaml_str(
            &std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
        )?
        .notices,
        None => Notices::default(),
    };

    let raw = std::fs::read(&args.capture).with_context(|| format!("reading {}", args.capture))?;
    let chunks: Vec<ai_relay_rust::Result<Bytes>> = raw
        .chunks(REPLAY_CHUNK)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let body: BoxStream<'static, Bytes> = Box::pin(futures::stream::iter(chunks));

    let transcoder =
        Transcoder::new(args.model.clone(), notices).with_image_streaming(args.image_streaming);

    if !args.stream {
        let (completion, outcome) = transcoder.aggregate(decode_frames(body)).await?;
        println!("{}", serde_json::to_string_pretty(&completion)?);
        if outcome.status != TranscodeStatus::Completed {
            eprintln!("warning: capture ended with status {:?}", outcome.status);
        }
        return Ok(());
    }

    let (mut sse, done) = transcoder.spawn_stream(decode_frames(body), 64, Duration::from_secs(30));
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    while let Some(frame) = sse.next().await {
        out.write_all(&frame?)?;
    }
    out.flush()?;

    let outcome = done.await.context("transcoder task ended without an outcome")?;
    if outcome.status != TranscodeStatus::Completed {
        eprintln!("warning: capture ended with status {:?}", outcome.status);
    }
    Ok(())
}
