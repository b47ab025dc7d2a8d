//! ai - send text, image and speech prompts to interchangeable LLM backends

mod commands;
mod prompt;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llm_client::{
    BackendConfig, Config, HttpConfig, LlmProvider, LoadedImage, ProviderKind,
    get_provider,
};
use log::debug;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "ai",
    about = "Send prompts to LLM backends",
    long_about = "Sends text, image and speech prompts to a configured LLM backend (OpenAI, Ollama or Google) and prints or saves the result"
)]
#[command(version)]
struct Args {
    /// Backend name to use from config (overrides default_backend)
    #[arg(short, long, global = true)]
    backend: Option<String>,

    /// Log HTTP traffic and debug output
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer a text prompt
    Text {
        /// System prompt
        #[arg(long)]
        sys: String,

        /// Multi-shot input: first line is a separator between alternating user/assistant turns
        #[arg(long)]
        multi: Option<String>,

        /// Ask for a JSON object reply
        #[arg(long)]
        json: bool,

        /// Wait for the whole reply even if the backend can stream
        #[arg(long)]
        no_stream: bool,

        /// Prompt text, or - to read from stdin
        prompt: String,
    },
    /// Ask a question about an image
    Img {
        /// Question to ask
        #[arg(long)]
        prompt: String,

        /// Path to a .jpg, .jpeg or .png file
        #[arg(long)]
        image: PathBuf,
    },
    /// Synthesize speech to an audio file
    Tts {
        /// Output file
        #[arg(short, long, default_value = "out.mp3")]
        out: PathBuf,

        /// Text to speak, or - to read from stdin
        text: String,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// List configured backends
    List,
    /// Print the configuration file path
    Path,
    /// Set the default backend
    SetDefault {
        /// Name of the backend to use as default
        backend: String,
    },
    /// Add or replace a backend
    AddBackend {
        /// Backend name
        name: String,
        /// Implementation (openai, ollama, google)
        #[arg(long)]
        mode: String,
        /// Base URL override
        #[arg(long)]
        url: Option<String>,
        /// Model identifier
        #[arg(long)]
        model: Option<String>,
    },
}

/// Handle config subcommands
fn handle_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load()?;
            let path = Config::config_path()?;
            println!("Config file: {}", path.display());
            println!();
            print!("{}", config.to_toml()?);
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let mut names: Vec<&String> = config.backend.keys().collect();
            names.sort();
            println!("Available backends:");
            for name in names {
                let backend = &config.backend[name];
                let default_marker = if config.default_backend.as_ref() == Some(name) {
                    " (default)"
                } else {
                    ""
                };
                println!(
                    "  {} - {} / {}{}",
                    name,
                    backend.mode,
                    backend.model.as_deref().unwrap_or("default model"),
                    default_marker
                );
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
        ConfigAction::SetDefault { backend } => {
            let mut config = Config::load()?;
            // Verify backend exists
            config.get_backend(backend)?;
            config.default_backend = Some(backend.clone());
            config.save()?;
            println!("Default backend set to: {}", backend);
        }
        ConfigAction::AddBackend {
            name,
            mode,
            url,
            model,
        } => {
            ProviderKind::from_mode(mode)?;
            let mut config = Config::load()?;
            config.backend.insert(
                name.clone(),
                BackendConfig {
                    mode: mode.clone(),
                    url: url.clone(),
                    model: model.clone(),
                    api_key: None,
                },
            );
            config.save()?;
            println!("Added backend: {}", name);
        }
    }
    Ok(())
}

/// Build the provider for the requested or default backend
fn load_provider(requested: Option<&str>, verbose: bool) -> Result<Box<dyn LlmProvider>> {
    let config = Config::load().context("Failed to load configuration")?;
    let (name, backend) = config.resolve_backend(requested)?;

    let http = HttpConfig::default().traced(verbose);
    let provider = get_provider(name, backend, &http)
        .with_context(|| format!("Failed to initialize backend '{}'", name))?;

    debug!(
        "Using backend {} ({}, model: {})",
        name,
        provider.name(),
        backend.model.as_deref().unwrap_or("default")
    );
    Ok(provider)
}

fn run(args: Args) -> Result<()> {
    let backend = args.backend.as_deref();

    match args.command {
        Commands::Config { action } => handle_config_command(&action),
        Commands::Text {
            sys,
            multi,
            json,
            no_stream,
            prompt,
        } => {
            let text = prompt::arg_or_stdin(&prompt, io::stdin())?;
            let request = prompt::text_request(sys, multi.as_deref(), text, json)?;
            let provider = load_provider(backend, args.verbose)?;
            commands::run_text(provider.as_ref(), &request, !no_stream, &mut io::stdout())
        }
        Commands::Img { prompt, image } => {
            let image = LoadedImage::load(&image)
                .with_context(|| format!("Failed to load image {}", image.display()))?;
            let provider = load_provider(backend, args.verbose)?;
            commands::run_image(provider.as_ref(), image, &prompt, &mut io::stdout())
        }
        Commands::Tts { out, text } => {
            let text = prompt::arg_or_stdin(&text, io::stdin())?;
            let provider = load_provider(backend, args.verbose)?;
            commands::run_speech(provider.as_ref(), &text, &out)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        "warn,ai=debug,llm_client=debug"
    } else {
        "warn,ai=info,llm_client=info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
