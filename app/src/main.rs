//! Terminal shell for Her OS. Typed lines go to the assistant; replies are
//! "spoken" on stdout.

mod commands;
mod console;
mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use her_os_core::cohost::CoHost;
use her_os_core::config::load_config;
use her_os_core::db::{init_db, DbPool, SqliteKeyValue};
use her_os_core::game;
use her_os_core::kv::KeyValueStore;
use her_os_core::llm::LlmClient;
use her_os_core::logging::{log_event, EventLogger};
use her_os_core::memory::ConversationStore;
use her_os_core::orchestrator::{InteractionState, Mode, Orchestrator, OrchestratorParts, UiEvent};
use her_os_core::persona::{PersonaId, StaticPersonas};
use her_os_core::speech::NoCapture;
use her_os_core::transcript::DirectorySink;
use log::{warn, LevelFilter};
use rand::rngs::ThreadRng;
use tokio::io::{AsyncBufReadExt, BufReader};

use commands::Command;
use console::ConsoleVoice;
use settings::CredentialStore;

fn workspace_dir() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("com", "HerOS", "HerOS") {
        proj.data_dir().to_path_buf()
    } else {
        std::env::temp_dir().join("HerOS")
    }
}

fn audit(pool: &DbPool, level: &str, code: &str, message: &str, explain: Option<&str>) {
    match pool.get() {
        Ok(conn) => {
            if let Err(err) = log_event(&conn, level, Some(code), "app", message, explain, None) {
                warn!("failed to write event log: {err}");
            }
        }
        Err(err) => warn!("event log unavailable: {err}"),
    }
}

struct Shell {
    orchestrator: Orchestrator,
    credentials: CredentialStore,
    pool: DbPool,
    exports: PathBuf,
    cohost: CoHost,
    rng: ThreadRng,
}

impl Shell {
    fn handle(&mut self, command: Command) {
        match command {
            Command::Say(text) => {
                if !self.orchestrator.dispatch(UiEvent::SubmitText(text))
                    && self.orchestrator.current_state() != InteractionState::Idle
                {
                    println!("(still busy with the last message)");
                }
            }
            Command::Listen => {
                self.orchestrator.dispatch(UiEvent::ToggleCapture);
            }
            Command::Persona => {
                self.orchestrator.dispatch(UiEvent::TogglePersona);
                println!("now talking with {}", self.orchestrator.persona());
            }
            Command::Mode(mode) => {
                self.orchestrator.dispatch(UiEvent::SwitchMode(mode));
                match mode {
                    Mode::Home => println!("home"),
                    Mode::CoHost => println!(
                        "co-host mode, current topic: {} (use /topic for another)",
                        self.cohost.current_topic()
                    ),
                    Mode::Game => println!("game mode, choose with /play rock|paper|scissors"),
                }
            }
            Command::Topic => {
                self.enter(Mode::CoHost);
                let topic = self.cohost.shuffle(&mut self.rng);
                println!("topic: {topic}");
                self.orchestrator.dispatch(UiEvent::ChangeTopic(topic.to_string()));
            }
            Command::Play(choice) => {
                self.enter(Mode::Game);
                let round = game::play(choice, &mut self.rng);
                println!(
                    "you: {}  {}: {}  {}",
                    round.player,
                    self.orchestrator.persona(),
                    round.ai,
                    round.outcome.announcement()
                );
            }
            Command::Key(key) => self.save_key(&key),
            Command::Export => self.export(),
            Command::Clear => match self.orchestrator.clear_history() {
                Ok(()) => println!("conversation cleared"),
                Err(err) => {
                    warn!("{}: {err}", err.code());
                    audit(&self.pool, "error", err.code(), &err.to_string(), Some(err.explain()));
                }
            },
            Command::Help => println!("{}", commands::HELP),
            Command::Quit => {}
        }
    }

    fn enter(&self, mode: Mode) {
        if self.orchestrator.mode() != mode {
            self.orchestrator.dispatch(UiEvent::SwitchMode(mode));
        }
    }

    fn save_key(&self, key: &str) {
        if let Err(err) = self.credentials.save(key) {
            warn!("failed to store credential: {err:#}");
            audit(&self.pool, "error", "CFG-2001", "credential could not be stored", None);
            return;
        }
        let key = key.trim();
        let value = (!key.is_empty()).then(|| key.to_string());
        let cleared = value.is_none();
        self.orchestrator.dispatch(UiEvent::SetCredential(value));
        audit(&self.pool, "info", "CFG-0001", "credential updated", None);
        println!("{}", if cleared { "API key cleared" } else { "API key saved" });
    }

    fn export(&self) {
        match self
            .orchestrator
            .export_transcript(&DirectorySink::new(&self.exports))
        {
            Ok(filename) => println!("saved {}", self.exports.join(filename).display()),
            Err(err) => {
                warn!("{}: {err}", err.code());
                audit(&self.pool, "error", err.code(), &err.to_string(), Some(err.explain()));
                println!("export failed: {err}");
            }
        }
    }
}

fn watch_orchestrator(orchestrator: &Orchestrator) {
    let mut states = orchestrator.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            match state {
                InteractionState::Listening => println!("(listening...)"),
                InteractionState::Processing => println!("(thinking...)"),
                _ => {}
            }
        }
    });

    let mut notices = orchestrator.notices();
    tokio::spawn(async move {
        while notices.changed().await.is_ok() {
            let notice = notices.borrow_and_update().clone();
            if let Some(notice) = notice {
                eprintln!("! {}", notice.message);
            }
        }
    });
}

fn open(dir: &Path) -> Result<(DbPool, Arc<dyn KeyValueStore>)> {
    let pool = init_db(dir.to_path_buf()).context("failed to init db")?;
    let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValue::new(pool.clone()));
    Ok((pool, kv))
}

#[tokio::main]
async fn main() -> Result<()> {
    let dir = workspace_dir();
    let (pool, kv) = open(&dir)?;
    if let Err(err) = EventLogger::install(pool.clone(), LevelFilter::Info) {
        eprintln!("event logging disabled: {err}");
    }

    let config = load_config(kv.as_ref());
    let credentials = CredentialStore::new(kv.clone());
    let credential = credentials.load().unwrap_or_else(|err| {
        warn!("ignoring stored credential: {err:#}");
        None
    });
    let llm = LlmClient::new(&config.llm).context("failed to construct HTTP client")?;

    let orchestrator = Orchestrator::new(OrchestratorParts {
        config: config.interaction.clone(),
        store: ConversationStore::new(kv.clone(), config.memory.capacity),
        llm: Arc::new(llm),
        capture: Arc::new(NoCapture),
        synthesis: Arc::new(ConsoleVoice),
        personas: Arc::new(StaticPersonas::default()),
        persona: PersonaId::new("wendy"),
        credential,
    });
    audit(&pool, "info", "APP-0001", "session started", None);
    watch_orchestrator(&orchestrator);

    println!("Her OS. Type to talk, /help for commands.");
    if !orchestrator.has_credential() {
        println!("No API key yet. Set one with /key <key> or {}.", settings::CREDENTIAL_ENV);
    }

    let mut shell = Shell {
        orchestrator: orchestrator.clone(),
        credentials,
        pool: pool.clone(),
        exports: dir.join("exports"),
        cohost: CoHost::new(),
        rng: rand::thread_rng(),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match commands::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => shell.handle(command),
            Ok(None) => {}
            Err(message) => println!("{message}"),
        }
    }

    orchestrator.dispatch(UiEvent::Teardown);
    audit(&pool, "info", "APP-0002", "session ended", None);
    Ok(())
}
