use std::collections::{btree_map, BTreeMap};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use htmlescape::encode_minimal;
use rand::prelude::*;
use redis::AsyncCommands;
use teloxide::{
    payloads::{AnswerCallbackQuerySetters, EditMessageTextSetters, SendMessageSetters},
    prelude::*,
    types::{CallbackQuery, ChatId, MessageId, ParseMode},
};
use tokio::{sync::Mutex, time::sleep};

use crate::question::{self, Question};
use crate::wiki::WikiSource;
use crate::{utils, CONFIG};

pub const MAX_BUILD_ATTEMPTS: u32 = 5;
const QUESTION_TIMEOUT_SECS: u64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct Session {
    pub topic: String,
    pub difficulty: u8,
    pub rounds: u32,
    pub round: u32,
    pub score: u32,
    pub asked: Vec<String>,
    pub current: Option<Pending>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Pending {
    pub question: Question,
    pub correct_idx: usize,
    pub message_id: MessageId,
}

impl Session {
    pub fn new(topic: String, rounds: u32, difficulty: u8) -> Self {
        Self {
            topic,
            difficulty,
            rounds,
            round: 0,
            score: 0,
            asked: Vec::new(),
            current: None,
            started_at: Utc::now(),
        }
    }

    pub fn record(&mut self, correct: bool) {
        if correct {
            self.score += 1;
        }
        self.round += 1;
        self.current = None;
    }

    pub fn finished(&self) -> bool {
        self.round >= self.rounds
    }
}

// chat id as key; one quiz per chat
static SESSIONS: Mutex<BTreeMap<ChatId, Session>> = Mutex::const_new(BTreeMap::new());

pub async fn is_running(chat_id: ChatId) -> bool {
    SESSIONS.lock().await.contains_key(&chat_id)
}

/// Builds a question whose correct answer has not been used this session.
/// Both a failed build and a duplicate answer consume one of the capped
/// attempts; exhaustion means the round cannot be filled.
pub async fn unique_question<S, R>(
    wiki: &S,
    rng: &mut R,
    topic: &str,
    difficulty: u8,
    asked: &[String],
) -> Option<Question>
where
    S: WikiSource,
    R: Rng,
{
    for _ in 0..MAX_BUILD_ATTEMPTS {
        if let Some(question) = question::build(wiki, rng, topic, difficulty).await {
            if !asked.contains(&question.correct) {
                return Some(question);
            }
            log::debug!("duplicate answer {:?}, rebuilding", question.correct);
        }
    }
    None
}

pub async fn begin(bot: Bot, chat_id: ChatId, topic: String) -> Result<()> {
    {
        let config = CONFIG.get().unwrap();
        let mut sessions = SESSIONS.lock().await;
        if sessions.contains_key(&chat_id) {
            return Ok(());
        }
        sessions.insert(
            chat_id,
            Session::new(topic, config.rounds, config.difficulty),
        );
    }
    ask(bot, chat_id).await
}

async fn ask(bot: Bot, chat_id: ChatId) -> Result<()> {
    let (topic, difficulty, asked, round, rounds, score) = {
        let sessions = SESSIONS.lock().await;
        let Some(s) = sessions.get(&chat_id) else {
            return Ok(());
        };
        (
            s.topic.clone(),
            s.difficulty,
            s.asked.clone(),
            s.round,
            s.rounds,
            s.score,
        )
    };

    let mut rng = StdRng::from_os_rng();
    let question =
        unique_question(crate::wiki_client(), &mut rng, &topic, difficulty, &asked).await;
    let Some(question) = question else {
        SESSIONS.lock().await.remove(&chat_id);
        bot.send_message(
            chat_id,
            format!(
                "😕 Couldn't fetch a fresh question about <b>{}</b>. \
                 The quiz ends here — final score <b>{}/{}</b>.",
                encode_minimal(&topic),
                score,
                rounds
            ),
        )
        .parse_mode(ParseMode::Html)
        .await?;
        return Ok(());
    };

    let correct_idx = question
        .options
        .iter()
        .position(|o| *o == question.correct)
        .expect("correct answer missing from options");

    let msg = bot
        .send_message(
            chat_id,
            format!(
                "<b>Question {}/{}</b>\n\n{}",
                round + 1,
                rounds,
                encode_minimal(&question.prompt)
            ),
        )
        .parse_mode(ParseMode::Html)
        .reply_markup(utils::options_keyboard(&question.options))
        .await?;

    {
        let mut sessions = SESSIONS.lock().await;
        match sessions.get_mut(&chat_id) {
            Some(s) => {
                s.current = Some(Pending {
                    question,
                    correct_idx,
                    message_id: msg.id,
                });
            }
            None => {
                // cancelled while the question was being fetched
                bot.delete_message(chat_id, msg.id).await.ok();
                return Ok(());
            }
        }
    }

    tokio::spawn(expire(bot, chat_id, msg.id));

    Ok(())
}

async fn expire(bot: Bot, chat_id: ChatId, message_id: MessageId) {
    sleep(Duration::from_secs(QUESTION_TIMEOUT_SECS)).await;

    let expired = {
        let mut sessions = SESSIONS.lock().await;
        match sessions.entry(chat_id) {
            btree_map::Entry::Occupied(entry)
                if entry
                    .get()
                    .current
                    .as_ref()
                    .is_some_and(|p| p.message_id == message_id) =>
            {
                Some(entry.remove())
            }
            _ => None,
        }
    };

    if let Some(s) = expired {
        bot.edit_message_reply_markup(chat_id, message_id).await.ok();
        bot.send_message(
            chat_id,
            format!(
                "⏰ Time's up! The quiz has ended — final score <b>{}/{}</b>.",
                s.score, s.rounds
            ),
        )
        .parse_mode(ParseMode::Html)
        .await
        .ok();
    }
}

pub async fn cancel(bot: Bot, chat_id: ChatId) -> Result<()> {
    let removed = SESSIONS.lock().await.remove(&chat_id);
    match removed {
        Some(s) => {
            if let Some(p) = &s.current {
                bot.edit_message_reply_markup(chat_id, p.message_id).await.ok();
            }
            bot.send_message(
                chat_id,
                format!("Quiz cancelled. Score so far: {}/{}.", s.score, s.rounds),
            )
            .await?;
        }
        None => {
            bot.send_message(chat_id, "No quiz is running here. Start one with /quiz!")
                .await?;
        }
    }
    Ok(())
}

#[derive(Debug)]
struct Answered {
    correct: bool,
    correct_title: String,
    prompt: String,
    round_no: u32,
    rounds: u32,
    score: u32,
    finished: bool,
    topic: String,
    started_at: DateTime<Utc>,
}

pub async fn callback(bot: Bot, q: CallbackQuery) -> Result<()> {
    let (Some(data), Some(origin)) = (q.data.clone(), q.regular_message().cloned()) else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };
    let chat_id = origin.chat.id;

    if let Some(rest) = data.strip_prefix("topic-") {
        let topic = rest
            .parse::<usize>()
            .ok()
            .and_then(|idx| CONFIG.get().unwrap().topics.get(idx))
            .cloned();
        let Some(topic) = topic else {
            bot.answer_callback_query(q.id)
                .text("Unknown topic.")
                .show_alert(true)
                .await?;
            return Ok(());
        };
        if is_running(chat_id).await {
            bot.answer_callback_query(q.id)
                .text("A quiz is already running in this chat.")
                .show_alert(true)
                .await?;
            return Ok(());
        }
        bot.answer_callback_query(q.id).await?;
        bot.edit_message_text(
            chat_id,
            origin.id,
            format!(
                "🎯 Topic: <b>{}</b>\nFetching the first question…",
                encode_minimal(&topic)
            ),
        )
        .parse_mode(ParseMode::Html)
        .await?;
        return begin(bot, chat_id, topic).await;
    }

    if data == "skip" {
        let mut skipped = false;
        {
            let mut sessions = SESSIONS.lock().await;
            if let Some(s) = sessions.get_mut(&chat_id) {
                if let Some(p) = s.current.take() {
                    if p.message_id == origin.id {
                        s.asked.push(p.question.correct);
                        skipped = true;
                    } else {
                        s.current = Some(p);
                    }
                }
            }
        }
        if !skipped {
            bot.answer_callback_query(q.id)
                .text("This question has expired.")
                .await?;
            return Ok(());
        }
        bot.answer_callback_query(q.id).text("Skipped ⏭").await?;
        bot.edit_message_reply_markup(chat_id, origin.id).await?;
        return ask(bot, chat_id).await;
    }

    let Ok(choice) = data.parse::<usize>() else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let mut answered = None;
    {
        let mut sessions = SESSIONS.lock().await;
        if let btree_map::Entry::Occupied(mut entry) = sessions.entry(chat_id) {
            let s = entry.get_mut();
            if let Some(p) = s.current.take() {
                if p.message_id == origin.id {
                    let correct = choice == p.correct_idx;
                    let round_no = s.round + 1;
                    s.asked.push(p.question.correct.clone());
                    s.record(correct);
                    answered = Some(Answered {
                        correct,
                        correct_title: p.question.correct,
                        prompt: p.question.prompt,
                        round_no,
                        rounds: s.rounds,
                        score: s.score,
                        finished: s.finished(),
                        topic: s.topic.clone(),
                        started_at: s.started_at,
                    });
                    if s.finished() {
                        entry.remove();
                    }
                } else {
                    s.current = Some(p);
                }
            }
        }
    }

    let Some(a) = answered else {
        bot.answer_callback_query(q.id)
            .text("This question has expired.")
            .await?;
        return Ok(());
    };

    if a.correct {
        bot.answer_callback_query(q.id).text("Correct! 🎉").await?;
    } else {
        bot.answer_callback_query(q.id)
            .text(format!("Wrong — it was {}.", a.correct_title))
            .show_alert(true)
            .await?;
    }

    let verdict_line = if a.correct {
        format!(
            "✅ <b>Correct!</b> The answer was {}.",
            encode_minimal(&a.correct_title)
        )
    } else {
        format!(
            "❌ The correct answer was <b>{}</b>.",
            encode_minimal(&a.correct_title)
        )
    };
    bot.edit_message_text(
        chat_id,
        origin.id,
        format!(
            "<b>Question {}/{}</b>\n\n{}\n\n{}",
            a.round_no,
            a.rounds,
            encode_minimal(&a.prompt),
            verdict_line
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;

    if a.finished {
        let elapsed = Utc::now() - a.started_at;
        bot.send_message(
            chat_id,
            format!(
                "🎉 <b>Quiz completed!</b>\nYou scored <b>{}/{}</b> on {} in {} min {} s.\n{}",
                a.score,
                a.rounds,
                encode_minimal(&a.topic),
                elapsed.num_minutes(),
                elapsed.num_seconds() % 60,
                utils::verdict(a.score, a.rounds)
            ),
        )
        .parse_mode(ParseMode::Html)
        .await?;
        store_score(chat_id, format!("{}/{} ({})", a.score, a.rounds, a.topic)).await;
    } else {
        ask(bot, chat_id).await?;
    }

    Ok(())
}

fn score_key(chat_id: ChatId) -> String {
    format!("trivia_bot_last_score/{}", chat_id)
}

async fn store_score(chat_id: ChatId, line: String) {
    let Some(client) = crate::redis() else {
        return;
    };
    let res: redis::RedisResult<()> = async {
        let mut con = client.get_multiplexed_async_connection().await?;
        con.set(score_key(chat_id), line).await
    }
    .await;
    if let Err(err) = res {
        log::warn!("failed to record score for {}: {}", chat_id, err);
    }
}

pub async fn last_score(chat_id: ChatId) -> Option<String> {
    let client = crate::redis()?;
    let res: redis::RedisResult<Option<String>> = async {
        let mut con = client.get_multiplexed_async_connection().await?;
        con.get(score_key(chat_id)).await
    }
    .await;
    match res {
        Ok(line) => line,
        Err(err) => {
            log::warn!("failed to read score for {}: {}", chat_id, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wiki::testing::MockWiki;
    use crate::wiki::SummaryOutcome;

    const SUMMARY: &str = "Photosynthesis is a process used by plants to convert light.";

    #[tokio::test]
    async fn gives_up_after_capped_rebuild_attempts() {
        // Every attempt rebuilds the same already-used answer.
        let mut wiki = MockWiki::default().with_summary(
            "Photosynthesis",
            SummaryOutcome::Text(SUMMARY.to_string()),
        );
        wiki.search_default = Some(vec!["Photosynthesis".to_string()]);
        wiki.random_titles = vec![
            "Banana".to_string(),
            "Treaty of Ghent".to_string(),
            "Haiku".to_string(),
        ];
        let asked = vec!["Photosynthesis".to_string()];

        let mut rng = StdRng::seed_from_u64(17);
        let result = unique_question(&wiki, &mut rng, "Science", 3, &asked).await;

        assert_eq!(result, None);
        // two searches per attempt: one for the article, one for decoys
        assert_eq!(wiki.search_calls(), MAX_BUILD_ATTEMPTS * 2);
    }

    #[tokio::test]
    async fn rebuilds_past_a_duplicate_answer() {
        let mut wiki = MockWiki::default()
            .with_summary(
                "Photosynthesis",
                SummaryOutcome::Text(SUMMARY.to_string()),
            )
            .with_summary(
                "Chlorophyll",
                SummaryOutcome::Text("Chlorophyll is a green pigment.".to_string()),
            );
        // First attempt resolves to the already-used answer, the second to a
        // fresh one; decoys come from random titles both times.
        wiki.queue_search(&["Photosynthesis"]);
        wiki.queue_search(&[]);
        wiki.queue_search(&["Chlorophyll"]);
        wiki.queue_search(&[]);
        wiki.random_titles = vec![
            "Banana".to_string(),
            "Treaty of Ghent".to_string(),
            "Haiku".to_string(),
        ];
        let asked = vec!["Photosynthesis".to_string()];

        let mut rng = StdRng::seed_from_u64(19);
        let question = unique_question(&wiki, &mut rng, "Science", 3, &asked)
            .await
            .unwrap();

        assert_eq!(question.correct, "Chlorophyll");
    }

    #[test]
    fn session_scoring_and_completion() {
        let mut s = Session::new("Science".to_string(), 3, 3);
        assert!(!s.finished());

        s.record(true);
        s.record(false);
        assert_eq!(s.score, 1);
        assert_eq!(s.round, 2);
        assert!(!s.finished());

        s.record(true);
        assert_eq!(s.score, 2);
        assert!(s.finished());
    }
}
