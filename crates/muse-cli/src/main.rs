use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use muse_contracts::events::EventWriter;
use muse_contracts::requests::{ApiResponse, GenerationRequest};
use muse_engine::{handle_image_request, handle_video_request};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "muse", version, about = "Muse generation job runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit an image generation job and wait for the result URL.
    Image(GenerateArgs),
    /// Submit a video generation job and wait for the result URL.
    Video(GenerateArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "")]
    model: String,
    #[arg(long)]
    aspect_ratio: Option<String>,
    #[arg(long)]
    style: Option<String>,
    /// Reference asset: an http(s) URL or an inline data URI.
    #[arg(long)]
    reference_image: Option<String>,
    /// Clip length for video jobs, e.g. "5" or "8s".
    #[arg(long)]
    duration: Option<String>,
    #[arg(long)]
    remove_watermark: bool,
    /// Use the short smoke-test polling budget.
    #[arg(long)]
    test: bool,
    #[arg(long, default_value = "muse-events.jsonl")]
    events: PathBuf,
}

impl GenerateArgs {
    fn into_request(self) -> (GenerationRequest, PathBuf) {
        let events = self.events;
        let request = GenerationRequest {
            prompt: self.prompt,
            model: self.model,
            aspect_ratio: self.aspect_ratio,
            style: self.style,
            reference_image: self.reference_image,
            duration: self.duration,
            remove_watermark: self.remove_watermark,
            is_test: self.test,
        };
        (request, events)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("muse error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let response = match cli.command {
        Command::Image(args) => {
            let (request, events) = args.into_request();
            handle_image_request(&request, &writer(events))
        }
        Command::Video(args) => {
            let (request, events) = args.into_request();
            handle_video_request(&request, &writer(events))
        }
    };
    print_response(&response)
}

fn writer(events: PathBuf) -> EventWriter {
    EventWriter::new(events, format!("req-{}", Uuid::new_v4()))
}

fn print_response(response: &ApiResponse) -> Result<i32> {
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    Ok(if response.is_success() { 0 } else { 1 })
}
