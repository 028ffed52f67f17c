//! Interactive sample: drive a live session from stdin.
//!
//! Requires `GEMINI_API_KEY`. Build with `--features capture` for real
//! screen capture.

use anyhow::{Context, Result};
use gemini_live::protocol::FunctionDeclaration;
use gemini_live::{
    create_session, CaptureTarget, FunctionCall, LiveCallbacks, LiveConfig, LiveError, LiveStatus,
    ResponseModality, SessionHandle,
};
use serde_json::json;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Prints model output to the terminal.
struct ConsoleCallbacks;

impl LiveCallbacks for ConsoleCallbacks {
    fn on_connected(&self) {
        println!("\n[APP] Connected.");
    }

    fn on_disconnected(&self) {
        println!("\n[APP] Disconnected.");
    }

    fn on_text_received(&self, text: &str) {
        println!("\n[GEMINI] {}", text);
    }

    fn on_audio_started(&self) {
        println!("\n[APP] Audio input ON.");
    }

    fn on_audio_stopped(&self) {
        println!("\n[APP] Audio input OFF.");
    }

    fn on_ai_speaking_started(&self) {
        println!("\n[APP] Gemini is speaking...");
    }

    fn on_ai_speaking_stopped(&self) {
        println!("\n[APP] Gemini finished speaking.");
    }

    fn on_screen_capture_started(&self) {
        println!("\n[APP] Screen capture ON.");
    }

    fn on_screen_capture_stopped(&self) {
        println!("\n[APP] Screen capture OFF.");
    }

    fn on_error(&self, message: &str, _cause: Option<&LiveError>) {
        error!("{}", message);
    }

    fn on_status_update(&self, status: &LiveStatus) {
        print!("{} > ", status);
        let _ = std::io::stdout().flush();
    }

    fn on_function_calls(&self, calls: &[FunctionCall]) {
        for call in calls {
            println!("\n[TOOL] {}({})", call.name, call.args.clone().unwrap_or_default());
        }
    }
}

fn sample_config() -> Result<LiveConfig> {
    let mut config = LiveConfig::from_env().context("GEMINI_API_KEY must be set")?;
    config.response_modality = ResponseModality::Text;
    config.google_search = true;
    config.function_declarations = vec![FunctionDeclaration {
        name: "save_contact".to_string(),
        description: "Saves a contact with a name and a phone number".to_string(),
        behavior: None,
        parameters: Some(json!({
            "type": "OBJECT",
            "properties": {
                "name": {"type": "STRING"},
                "phone": {"type": "STRING"}
            },
            "required": ["name", "phone"]
        })),
    }];
    Ok(config)
}

fn print_help() {
    println!("\nAvailable Commands:");
    println!("  connect, c, 1          - Connect to Gemini Live service");
    println!("  disconnect, 0          - Disconnect from the service");
    println!("  start_audio, 2         - Signal start of audio input (send chunks yourself)");
    println!("  stop_audio, 3          - Signal stop of audio input");
    println!("  send_audio_chunk       - Send one chunk of silence");
    println!("  start_screen, 4        - Start sending screen images");
    println!("  stop_screen, 5         - Stop sending screen images");
    println!("  set_res WxH|full, 6    - Set screen capture resolution");
    println!("  send_text <msg>, 7     - Send a text message to Gemini");
    println!("  status, 8              - Show detailed client status");
    println!("  help, h                - Show this help message");
    println!("  quit, exit, q          - Disconnect and exit");
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = sample_config()?;
    config.validate()?;
    info!("Using model {} at {}", config.model, config.redacted_url());

    let runtime = Handle::current();
    let mut session: Option<SessionHandle> = None;
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim();
        let client = session.as_ref().map(|s| s.client().clone());

        match command.to_lowercase().as_str() {
            "" => {}
            "help" | "h" => print_help(),
            "quit" | "exit" | "q" => break,
            "connect" | "c" | "1" => {
                if client.as_ref().is_some_and(|c| c.is_connected()) {
                    println!("Already connected.");
                } else {
                    if let Some(old) = session.take() {
                        old.cancel();
                    }
                    session = Some(create_session(&runtime, config.clone(), ConsoleCallbacks)?);
                }
            }
            "disconnect" | "0" => match session.take() {
                Some(handle) => {
                    handle.client().disconnect().await.ok();
                    if let Err(e) = handle.join().await {
                        warn!("Session ended with error: {}", e);
                    }
                }
                None => println!("Not connected."),
            },
            cmd => {
                let Some(client) = client else {
                    println!("Not connected. Use 'connect' first.");
                    continue;
                };
                match cmd {
                    "start_audio" | "2" => client.start_audio_input(),
                    "stop_audio" | "3" => client.stop_audio_input(),
                    "send_audio_chunk" => {
                        // 100 ms of 16 kHz 16-bit silence.
                        if let Err(e) = client.send_audio_chunk(&[0u8; 3200]).await {
                            println!("Could not send audio: {}", e);
                        }
                    }
                    "start_screen" | "4" => {
                        if !client.start_screen_capture() {
                            println!("Screen capture did not start.");
                        }
                    }
                    "stop_screen" | "5" => client.stop_screen_capture(),
                    "set_res" | "6" => match arg.parse::<CaptureTarget>() {
                        Ok(target) => client.set_screen_capture_resolution(target),
                        Err(e) => println!("{}", e),
                    },
                    "send_text" | "7" => {
                        client.send_text_message(arg).await.ok();
                    }
                    "status" | "8" => {
                        let status = client.status();
                        println!("{:#?}", status);
                        println!("Phase: {:?}", client.phase());
                    }
                    other => println!("Unknown command '{}'. Type 'help'.", other),
                }
            }
        }
    }

    if let Some(handle) = session.take() {
        handle.client().shutdown().await;
        handle.cancel();
        if let Err(e) = handle.join().await {
            warn!("Session ended with error: {}", e);
        }
    }
    info!("Application finished");
    Ok(())
}
