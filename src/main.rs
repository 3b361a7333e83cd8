use anyhow::Result;
use serde::Deserialize;
use teloxide::{
    dispatching::UpdateFilterExt, prelude::*, update_listeners::polling_default,
    utils::command::BotCommands,
};
use tokio::{fs::File, io::AsyncReadExt, sync::OnceCell};

use crate::cache::Cached;
use crate::wiki::WikiClient;

pub mod cache;
pub mod error;
pub mod question;
pub mod quiz;
pub mod utils;
pub mod wiki;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub token: String,
    pub api: Option<String>,
    pub redis: Option<String>,
    pub topics: Vec<String>,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
}

fn default_rounds() -> u32 {
    5
}

fn default_difficulty() -> u8 {
    3
}

const MIN_ROUNDS: u32 = 3;
const MAX_ROUNDS: u32 = 20;

impl Config {
    fn validate(mut self) -> Result<Self> {
        if self.topics.is_empty() {
            anyhow::bail!("config needs at least one topic");
        }
        let rounds = self.rounds.clamp(MIN_ROUNDS, MAX_ROUNDS);
        if rounds != self.rounds {
            log::warn!("rounds {} out of range, using {}", self.rounds, rounds);
            self.rounds = rounds;
        }
        let difficulty = self.difficulty.clamp(1, 5);
        if difficulty != self.difficulty {
            log::warn!(
                "difficulty {} out of range, using {}",
                self.difficulty,
                difficulty
            );
            self.difficulty = difficulty;
        }
        Ok(self)
    }
}

pub static CONFIG: OnceCell<Config> = OnceCell::const_new();

static WIKI: OnceCell<Cached<WikiClient>> = OnceCell::const_new();

pub fn wiki_client() -> &'static Cached<WikiClient> {
    WIKI.get().expect("wiki client not initialised")
}

static REDIS: OnceCell<Option<redis::Client>> = OnceCell::const_new();

pub fn redis() -> Option<&'static redis::Client> {
    REDIS.get().and_then(|client| client.as_ref())
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    log::info!("Starting trivia bot...");

    let mut f = File::open("config.yaml").await?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).await?;

    let config = serde_yaml::from_slice::<Config>(&buf)?.validate()?;

    let bot = Bot::new(config.token.clone());

    let redis_client = match config.redis.as_deref() {
        Some(url) => match redis::Client::open(url) {
            Ok(client) => Some(client),
            Err(err) => {
                log::warn!("redis unavailable, caching disabled: {}", err);
                None
            }
        },
        None => None,
    };

    let endpoint = config
        .api
        .clone()
        .unwrap_or_else(|| wiki::DEFAULT_ENDPOINT.to_string());
    let wiki = Cached::new(WikiClient::new(endpoint)?, redis_client.clone());

    CONFIG.set(config)?;
    WIKI.set(wiki)?;
    REDIS.set(redis_client)?;

    let handler = dptree::entry()
        .branch(
            Update::filter_message().branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(command_handle),
            ),
        )
        .branch(Update::filter_callback_query().endpoint(quiz::callback));

    let listener = polling_default(bot.clone()).await;

    Dispatcher::builder(bot, handler)
        .default_handler(|upd| async move {
            log::trace!("Unhandled update: {:?}", upd);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(listener, error::UpdateErrorHandler::new())
        .await;

    Ok(())
}

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "A bot that quizzes you on Wikipedia articles:"
)]
enum Command {
    #[command(description = "show this help text")]
    Help,
    #[command(description = "start a new quiz")]
    Quiz,
    #[command(description = "show your last quiz result")]
    Score,
    #[command(description = "cancel the current quiz")]
    Cancel,
}

async fn command_handle(bot: Bot, message: Message, command: Command) -> Result<()> {
    match command {
        Command::Help => {
            bot.send_message(message.chat.id, Command::descriptions().to_string())
                .await?;
        }
        Command::Quiz => {
            if quiz::is_running(message.chat.id).await {
                bot.send_message(
                    message.chat.id,
                    "A quiz is already running here. Finish it or /cancel first.",
                )
                .await?;
                return Ok(());
            }
            let config = CONFIG.get().unwrap();
            bot.send_message(message.chat.id, "Pick a topic:")
                .reply_markup(utils::topics_keyboard(&config.topics))
                .await?;
        }
        Command::Score => {
            let text = match quiz::last_score(message.chat.id).await {
                Some(line) => format!("Last quiz result: {}", line),
                None => "No finished quiz on record. Start one with /quiz!".to_string(),
            };
            bot.send_message(message.chat.id, text).await?;
        }
        Command::Cancel => {
            quiz::cancel(bot, message.chat.id).await?;
        }
    };

    Ok(())
}
