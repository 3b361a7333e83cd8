use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// One row per answer option (callback data is the option index), plus a skip
/// row.
pub fn options_keyboard(options: &[String]) -> InlineKeyboardMarkup {
    let keyboard = InlineKeyboardMarkup::new(
        options
            .iter()
            .enumerate()
            .map(|(idx, text)| vec![InlineKeyboardButton::callback(text.clone(), idx.to_string())]),
    );
    keyboard.append_row(vec![InlineKeyboardButton::callback("Skip ⏭", "skip")])
}

pub fn topics_keyboard(topics: &[String]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(topics.iter().enumerate().map(|(idx, topic)| {
        vec![InlineKeyboardButton::callback(
            topic.clone(),
            format!("topic-{}", idx),
        )]
    }))
}

pub fn verdict(score: u32, total: u32) -> &'static str {
    if score == total {
        "You're a Trivia Master! 🏆"
    } else if score * 10 >= total * 7 {
        "Great job! Keep it up! 👍"
    } else {
        "Good effort — practice makes perfect! 😊"
    }
}
