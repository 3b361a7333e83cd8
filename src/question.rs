use std::collections::HashSet;

use rand::prelude::*;

use crate::wiki::{SummaryOutcome, WikiSource};

pub const OPTION_COUNT: usize = 4;
const DECOY_COUNT: usize = 3;

const ARTICLE_SEARCH_LIMIT: u32 = 50;
const DECOY_SEARCH_LIMIT: u32 = 10;
const RANDOM_DECOYS: u32 = 5;
const FALLBACK_RANDOM_DECOYS: u32 = 8;
const TOPUP_BATCH: u32 = 5;
const MAX_TOPUPS: u32 = 3;
const DISAMBIG_TRIES: usize = 5;

// Titles this short are junk or too ambiguous to quiz on.
const MIN_TITLE_CHARS: usize = 5;
const DISAMBIG_MARKER: &str = "(disambiguation)";

const PROMPT: &str = "What Wikipedia article is this summary from?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct: String,
}

pub fn is_disambiguation(title: &str) -> bool {
    title.contains(DISAMBIG_MARKER)
}

fn usable_title(title: &str) -> bool {
    !is_disambiguation(title) && title.chars().count() > MIN_TITLE_CHARS
}

fn sentences_for(difficulty: u8) -> u8 {
    match difficulty {
        0..=2 => 4,
        3 => 3,
        _ => 2,
    }
}

/// Picks a random article matching `topic` and returns its title and summary.
///
/// Retrieval failures of any kind come back as `None`; a disambiguation hit is
/// recovered by trying a handful of the alternatives it lists.
pub async fn fetch_article<S, R>(
    wiki: &S,
    rng: &mut R,
    topic: &str,
    sentences: u8,
) -> Option<(String, String)>
where
    S: WikiSource,
    R: Rng,
{
    let titles = match wiki.search(topic, ARTICLE_SEARCH_LIMIT).await {
        Ok(titles) => titles,
        Err(err) => {
            log::warn!("article search for {:?} failed: {}", topic, err);
            return None;
        }
    };
    let candidates: Vec<String> = titles.into_iter().filter(|t| usable_title(t)).collect();
    let title = candidates.choose(rng)?.clone();

    match wiki.summary(&title, sentences).await {
        Ok(SummaryOutcome::Text(summary)) => Some((title, summary)),
        Ok(SummaryOutcome::Disambiguation(alternatives)) => {
            let picks: Vec<String> = alternatives
                .choose_multiple(rng, DISAMBIG_TRIES)
                .cloned()
                .collect();
            for alternative in picks {
                if let Ok(SummaryOutcome::Text(summary)) =
                    wiki.summary(&alternative, sentences).await
                {
                    return Some((alternative, summary));
                }
            }
            None
        }
        Ok(SummaryOutcome::Missing) => None,
        Err(err) => {
            log::warn!("summary for {:?} failed: {}", title, err);
            None
        }
    }
}

/// Builds one multiple-choice question for `topic`: a random article summary
/// as the prompt, its title as the correct option, three decoy titles drawn
/// from related search results and uniformly random articles.
pub async fn build<S, R>(wiki: &S, rng: &mut R, topic: &str, difficulty: u8) -> Option<Question>
where
    S: WikiSource,
    R: Rng,
{
    let sentences = sentences_for(difficulty);
    let (correct, summary) = fetch_article(wiki, rng, topic, sentences).await?;

    let related = async {
        let mut titles = wiki.search(topic, DECOY_SEARCH_LIMIT).await?;
        titles.retain(|t| *t != correct && !is_disambiguation(t));
        titles.extend(wiki.random(RANDOM_DECOYS).await?);
        anyhow::Ok(titles)
    }
    .await;
    let mut pool = match related {
        Ok(titles) => titles,
        Err(err) => {
            // Partial results are discarded for a larger purely random sample.
            log::warn!(
                "decoy search for {:?} failed, falling back to random titles: {}",
                topic,
                err
            );
            wiki.random(FALLBACK_RANDOM_DECOYS).await.ok()?
        }
    };

    let mut seen = HashSet::new();
    pool.retain(|t| *t != correct && seen.insert(t.clone()));

    let mut topups = 0;
    while pool.len() < DECOY_COUNT && topups < MAX_TOPUPS {
        topups += 1;
        let Ok(extra) = wiki.random(TOPUP_BATCH).await else {
            break;
        };
        for title in extra {
            if title != correct && seen.insert(title.clone()) {
                pool.push(title);
            }
        }
    }
    if pool.len() < DECOY_COUNT {
        // A near-empty corpus for this topic; a short options list would be
        // worse than no question.
        return None;
    }

    let mut options: Vec<String> = pool.choose_multiple(rng, DECOY_COUNT).cloned().collect();
    options.push(correct.clone());
    options.shuffle(rng);

    Some(Question {
        prompt: format!("{}\n\n{}", PROMPT, summary),
        options,
        correct,
    })
}
