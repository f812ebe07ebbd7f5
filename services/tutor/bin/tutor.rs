//! Main Entrypoint for the Tutor Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Loading prompt overrides.
//! 3. Wiring the session controller and quiz engine to real devices and endpoints.
//! 4. Running the interactive line loop until `/quit` or Ctrl+C.

use anyhow::Context;
use clap::Parser;
use std::{collections::HashMap, fs, path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tutor_core::{
    Quiz, QuizEngine, Session, SessionController, SessionDeps,
    llm_client::OpenAICompatibleClient,
    prompts::{DEFAULT_TUTOR_PROMPT, Prompts},
    rtc::RtcPeerFactory,
    signaling::HttpSignalingClient,
};
use tutor_service::{
    audio::{CpalMicrophone, CpalSpeaker},
    cli::Args,
    config::Config,
    console::{Command, ConsoleObserver, format_quiz},
};

/// Listens for the `Ctrl+C` signal to shut down the loop.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

fn resolve_system_prompt(
    prompt_file: Option<&PathBuf>,
    prompts: &HashMap<String, String>,
) -> anyhow::Result<String> {
    if let Some(path) = prompt_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
        return Ok(text.trim_end().to_string());
    }
    Ok(prompts
        .get("system_prompt")
        .map(|s| s.trim_end().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_TUTOR_PROMPT.to_string()))
}

/// Mutable state of the line loop.
struct Repl {
    config: Config,
    system_prompt: String,
    topic: String,
    controller: SessionController,
    quiz_engine: QuizEngine,
    quiz: Quiz,
}

impl Repl {
    /// Handles one command. Returns `false` when the loop should end.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Start => {
                let session = Session::new(self.system_prompt.clone(), self.topic.clone());
                if let Err(e) = self
                    .controller
                    .start(self.config.api_key_or_empty(), session)
                    .await
                {
                    println!("Could not start the session: {}", e);
                }
            }
            Command::Stop => self.controller.stop().await,
            Command::Topic(topic) => {
                println!("Topic set to: {}", topic);
                self.topic = topic;
            }
            Command::Quiz => {
                match self
                    .quiz_engine
                    .generate_quiz(self.config.api_key_or_empty(), &self.system_prompt, &self.topic)
                    .await
                {
                    Ok(quiz) => self.quiz = quiz,
                    Err(e) => println!("Could not generate a quiz: {}", e),
                }
            }
            Command::Answer { index, text } => {
                if self.quiz.set_answer(index, text) {
                    print!("{}", format_quiz(&self.quiz));
                } else {
                    println!("There is no question {}.", index + 1);
                }
            }
            Command::Grade => {
                if self.quiz.is_empty() {
                    println!("Generate a quiz with /quiz first.");
                    return true;
                }
                match self
                    .quiz_engine
                    .grade_quiz(
                        self.config.api_key_or_empty(),
                        &self.system_prompt,
                        &self.topic,
                        &self.quiz,
                    )
                    .await
                {
                    Ok(feedback) => self.quiz.record_result(feedback),
                    Err(e) => println!("Could not grade the quiz: {}", e),
                }
            }
            Command::Say(text) => self.controller.send_user_message(&text).await,
            Command::Invalid(usage) => println!("Usage: {}", usage),
            Command::Quit => return false,
        }
        true
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env()
        .context("Failed to load configuration")?
        .with_api_key(args.api_key.clone());

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    if config.require_api_key().is_err() {
        warn!("No API key configured; /start, /quiz and /grade will be refused");
    }

    // --- 3. Load Prompts ---
    let prompt_overrides = match &config.prompts_path {
        Some(path) => load_prompts(path)
            .with_context(|| format!("Failed to load prompts from {}", path.display()))?,
        None => HashMap::new(),
    };
    let system_prompt = resolve_system_prompt(args.prompt_file.as_ref(), &prompt_overrides)?;
    let prompts = Prompts::from_map(&prompt_overrides);

    // --- 4. Wire the Core ---
    let observer = Arc::new(ConsoleObserver::stdout());
    let controller = SessionController::new(SessionDeps {
        signaling: Arc::new(HttpSignalingClient::new(HttpSignalingClient::endpoint_for(
            &config.realtime_url,
            &config.realtime_model,
        ))),
        peers: Arc::new(RtcPeerFactory::new()),
        media: Arc::new(CpalMicrophone::default()),
        playback: Arc::new(CpalSpeaker::default()),
        observer: observer.clone(),
    });
    let quiz_engine = QuizEngine::new(
        Arc::new(OpenAICompatibleClient::new(
            config.completions_url.clone(),
            config.chat_model.clone(),
        )),
        prompts,
    )
    .with_observer(observer);

    info!(
        realtime_model = %config.realtime_model,
        chat_model = %config.chat_model,
        "Tutor configured. Type /start to begin."
    );

    let mut repl = Repl {
        config,
        system_prompt,
        topic: args.topic,
        controller,
        quiz_engine,
        quiz: Quiz::default(),
    };

    // --- 5. Run the Line Loop ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };
                let Some(command) = Command::parse(&line) else {
                    continue;
                };
                if !repl.handle(command).await {
                    break;
                }
            }
        }
    }

    repl.controller.stop().await;
    info!("Tutor has shut down.");
    Ok(())
}
