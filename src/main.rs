use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use voice_duplex::{
    audio_capture::CpalMicrophone,
    audio_sink::CpalSinkFactory,
    config::{load_config, EngineConfig},
    controller::{TurnController, TurnState},
    llm::{ChatClient, ConversationContext, ConversationWindow},
    platform::AudioPlatform,
    stt::RecognitionSession,
    tts::{ElevenLabsTTS, SynthesisPlayer},
};

#[derive(Parser, Debug)]
#[command(name = "voice-duplex")]
#[command(about = "Full-duplex voice conversation with barge-in")]
#[command(long_about = "
Talk to a language model hands-free. Speech is streamed to the recognizer,
replies are spoken back, and talking over a reply interrupts it.

Type commands on stdin: start, stop, toggle, retry, clear, quit.

EXAMPLES:
  # Auto-detect the platform profile
  voice-duplex

  # Raspberry Pi with a ReSpeaker array, longer echo grace
  voice-duplex --platform raspberry-pi --input-device \"ReSpeaker 4 Mic Array\" --grace-ms 2000
")]
struct Args {
    /// Echo-handling profile (defaults to the build target)
    #[arg(long, value_enum)]
    platform: Option<AudioPlatform>,

    /// Input device name for audio capture
    #[arg(long)]
    input_device: Option<String>,

    /// Input channel to capture from (0-based index)
    #[arg(long, default_value = "0")]
    input_channel: u32,

    /// Output device name for audio playback
    #[arg(long)]
    output_device: Option<String>,

    /// Conversation entries kept in the window
    #[arg(long, default_value = "20")]
    max_messages: usize,

    /// Leading entries never trimmed from the window
    #[arg(long, default_value = "2")]
    anchor_messages: usize,

    /// Override the post-playback grace window in milliseconds
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Disable barge-in even on platforms that support it
    #[arg(long)]
    no_barge_in: bool,

    /// Chat completion model
    #[arg(long)]
    model: Option<String>,

    /// Synthesis voice id
    #[arg(long)]
    voice: Option<String>,

    /// Start listening immediately
    #[arg(long)]
    autostart: bool,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let platform = self.platform.unwrap_or_else(AudioPlatform::detect);
        let mut config = EngineConfig::for_platform(platform);

        config.capture.device_name = self.input_device.clone();
        config.capture.channel = self.input_channel;
        config.output.device_name = self.output_device.clone();
        config.max_messages = self.max_messages;
        config.anchor_messages = self.anchor_messages;
        if let Some(grace) = self.grace_ms {
            config.stt.echo.grace_window = Duration::from_millis(grace);
        }
        if self.no_barge_in {
            config.stt.echo.barge_in_enabled = false;
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(voice) = &self.voice {
            config.tts.voice_id = voice.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = args.engine_config();
    log::info!(
        "🚀 Initializing voice-duplex ({:?}, barge-in {})",
        config.platform,
        if config.stt.echo.barge_in_enabled { "on" } else { "off" }
    );

    let api_config = load_config().context("Failed to load API keys")?;

    let microphone = Arc::new(CpalMicrophone::new(config.capture.clone()));
    let (session, events) = RecognitionSession::new(
        config.stt.clone(),
        api_config.deepgram_key().to_string(),
        microphone,
    );
    log::info!("🎤 Speech session initialized");

    let chat = ChatClient::new(api_config.groq_key().to_string(), config.llm.clone())
        .context("Failed to create chat client")?;
    let conversation = ConversationContext::new(
        chat,
        ConversationWindow::new(config.max_messages, config.anchor_messages),
    );
    log::info!("🤖 Conversation initialized");

    let tts = ElevenLabsTTS::new(api_config.elevenlabs_key().to_string(), config.tts.clone())
        .context("Failed to create synthesis client")?;
    let player = SynthesisPlayer::new(
        Arc::new(tts),
        Arc::new(CpalSinkFactory::new(config.output.clone())),
        config.player.clone(),
    );
    log::info!("🔊 Player initialized");

    let (mut controller, handle) = TurnController::new(
        Arc::new(session),
        events,
        Box::new(conversation),
        Arc::new(player),
    );
    controller.on_toast(Arc::new(|message: &str, is_error: bool| {
        if is_error {
            println!("⚠️  {}", message);
        } else {
            println!("✅ {}", message);
        }
    }));
    let controller_task = tokio::spawn(controller.run());

    let mut view = handle.subscribe();
    let printer = tokio::spawn(async move {
        let mut last = TurnState::Idle;
        while view.changed().await.is_ok() {
            let state = view.borrow_and_update().clone();
            if state.turn_state != last {
                println!("[{}] {}", state.turn_state, state.status_text);
                match state.turn_state {
                    TurnState::Thinking => println!("✨ You: \"{}\"", state.transcript),
                    TurnState::Speaking => println!("🗣️  Reply: {}", state.last_response),
                    TurnState::Error => {
                        if let Some(hint) = state.error_info.as_ref().and_then(|i| i.hint.as_ref()) {
                            println!("   {} (type 'retry')", hint);
                        }
                    }
                    _ => {}
                }
                last = state.turn_state;
            }
        }
    });

    println!("🎧 Commands: start, stop, toggle, retry, clear, quit");
    if args.autostart {
        handle.start();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "start" => handle.start(),
                    "stop" => handle.stop(),
                    "toggle" | "" => handle.toggle(),
                    "retry" => handle.retry(),
                    "clear" => handle.clear_history(),
                    "quit" | "exit" => break,
                    other => println!("Unknown command '{}'", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    handle.shutdown();
    controller_task
        .await
        .context("Controller task failed")?;
    printer.abort();
    println!("\n👋 Goodbye!");
    Ok(())
}
