use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use voicery::asr::Recognizer;
use voicery::audio::AudioBuffer;
use voicery::llm::ChatClient;
use voicery::pipeline::TurnEvent;
use voicery::role::{self, RoleConfig};
use voicery::session::SessionState;
use voicery::tts::SpeechSynthesizer;
use voicery::{Config, TurnPipeline};

/// Voicery - Real-time voice conversation gateway
#[derive(Parser)]
#[command(name = "voicery", version, about)]
struct Cli {
    /// Role name to converse as (from the roles directory)
    #[arg(short, long, env = "VOICERY_ROLE")]
    role: Option<String>,

    /// Directory of role JSON files
    #[arg(long, env = "VOICERY_ROLES_DIR", default_value = "roles")]
    roles_dir: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive text conversation
    Chat,
    /// One voice turn from a WAV recording
    Voice {
        /// Path to the recording
        wav: PathBuf,
        /// Emit reply and audio per sentence instead of once per turn
        #[arg(long)]
        stream: bool,
    },
    /// List available synthesis voices
    Voices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voicery=info",
        1 => "info,voicery=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env();
    let role = load_role(&cli)?;
    tracing::info!(role = %role.name, model = %config.llm_model, "starting voicery");

    match cli.command {
        Command::Chat => chat(config, role).await,
        Command::Voice { wav, stream } => voice(config, role, &wav, stream).await,
        Command::Voices => voices(&config).await,
    }
}

fn load_role(cli: &Cli) -> anyhow::Result<RoleConfig> {
    let roles = role::load_all(&cli.roles_dir)?;
    let Some(name) = &cli.role else {
        return Ok(RoleConfig::default());
    };
    roles
        .get(name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("unknown role {name:?} in {}", cli.roles_dir.display()))
}

async fn chat(config: Config, role: RoleConfig) -> anyhow::Result<()> {
    let llm = Arc::new(ChatClient::new(&config)?);
    let pipeline = TurnPipeline::new(config, role, llm);
    let mut state = SessionState::new();

    println!("voicery chat — empty line or Ctrl-D to quit");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let user_text = line.trim();
        if user_text.is_empty() {
            break;
        }
        if user_text == "/reset" {
            state.reset();
            println!("(session reset)");
            continue;
        }

        let outcome = pipeline.respond_text(&mut state, user_text).await?;
        match outcome.display_tag {
            Some(tag) => println!("[{tag}] {}", outcome.reply_text),
            None => println!("{}", outcome.reply_text),
        }
    }
    Ok(())
}

async fn voice(config: Config, role: RoleConfig, wav: &Path, stream: bool) -> anyhow::Result<()> {
    let buffer = AudioBuffer::from_wav_file(wav)?;
    let llm = Arc::new(ChatClient::new(&config)?);
    let recognizer = Recognizer::new(&config);
    let synthesizer = SpeechSynthesizer::new(&config)?;
    let pipeline = TurnPipeline::new(config, role, llm).with_speech(recognizer, synthesizer);

    if stream {
        let state = Arc::new(Mutex::new(SessionState::new()));
        let mut events = pipeline.voice_sentence_stream(state, buffer)?;
        while let Some(event) = events.recv().await {
            match event {
                TurnEvent::Status(status) => println!("… {status}"),
                TurnEvent::Recognized { text, units } => {
                    println!("已识别：{text}（分{units}句处理）");
                }
                TurnEvent::Unit {
                    index,
                    total,
                    reply_text,
                    audio_path,
                    ..
                } => {
                    println!("[{index}/{total}] {reply_text}");
                    if let Some(path) = audio_path {
                        println!("    audio: {}", path.display());
                    }
                }
                TurnEvent::Done => break,
            }
        }
        return Ok(());
    }

    let mut state = SessionState::new();
    let outcome = pipeline.respond_voice(&mut state, buffer, None, None).await?;
    if let Some(recognized) = &outcome.recognized {
        println!("已识别：{recognized}");
    }
    match outcome.display_tag {
        Some(tag) => println!("[{tag}] {}", outcome.reply_text),
        None => println!("{}", outcome.reply_text),
    }
    if let Some(path) = outcome.audio_path {
        println!("audio: {}", path.display());
    }
    Ok(())
}

async fn voices(config: &Config) -> anyhow::Result<()> {
    let synthesizer = SpeechSynthesizer::new(config)?;
    let voices = synthesizer.list_voices().await?;
    if voices.is_empty() {
        println!("no voices published");
        return Ok(());
    }
    for voice in voices {
        match voice.category {
            Some(category) => {
                println!("{:<32} {} ({category})", voice.voice_type, voice.voice_name);
            }
            None => println!("{:<32} {}", voice.voice_type, voice.voice_name),
        }
    }
    Ok(())
}
