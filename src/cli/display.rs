use crate::catalog::content::{ChallengeContent, Phrase, QuizContent};
use crate::ledger::model::ActivityLogEntry;

pub fn render_content(content: &ChallengeContent) -> String {
    match content {
        ChallengeContent::Fortune(fortune) => fortune.text.trim().to_string(),
        ChallengeContent::Economics(economics) => {
            format!("[{}]\n{}", economics.term, economics.description)
        }
        ChallengeContent::Health(health) => {
            let steps = health
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| {
                    let image = step
                        .image_url
                        .as_deref()
                        .filter(|url| !url.starts_with("data:"))
                        .map(|url| format!("\n   image: {url}"))
                        .unwrap_or_default();
                    format!("{}. {}{image}", index + 1, step.description)
                })
                .collect::<Vec<_>>()
                .join("\n");

            format!("[{}]\n{steps}", health.title)
        }
        ChallengeContent::Quiz(quiz) => {
            let options = quiz
                .options
                .iter()
                .enumerate()
                .map(|(index, option)| format!("  {}) {option}", index + 1))
                .collect::<Vec<_>>()
                .join("\n");

            format!("Q. {}\n{options}", quiz.question)
        }
        ChallengeContent::Conversation(conversation) => format!(
            "English\n{}\n\n日本語\n{}",
            render_phrase(&conversation.english),
            render_phrase(&conversation.japanese)
        ),
    }
}

fn render_phrase(phrase: &Phrase) -> String {
    let pronunciation = phrase
        .pronunciation
        .as_deref()
        .map(|value| format!(" [{value}]"))
        .unwrap_or_default();

    format!(
        "  {}{pronunciation}\n  → {}\n  ({})",
        phrase.phrase, phrase.translation, phrase.context
    )
}

/// Resolves an answer given as an option number or as the option text.
pub fn resolve_quiz_answer<'a>(quiz: &'a QuizContent, answer: &'a str) -> &'a str {
    answer
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|number| number.checked_sub(1))
        .and_then(|index| quiz.options.get(index))
        .map(String::as_str)
        .unwrap_or(answer)
}

pub fn render_entry(entry: &ActivityLogEntry) -> String {
    format!(
        "{} | {} | {}",
        entry.date.format("%Y-%m-%d"),
        entry.category_name,
        entry.content.headline()
    )
}
