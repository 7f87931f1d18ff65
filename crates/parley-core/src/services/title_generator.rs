use tracing::debug;

use crate::error::ParleyResult;
use crate::providers::ProviderClient;

const TITLE_SYSTEM_PROMPT: &str = "You create short titles for conversation threads. \
    Reply with a title of 2-5 words that describes the user's request. \
    Output ONLY the title, no quotes, no explanation.";

/// Prefix that marks threads created for scheduled tasks.
pub const SCHEDULED_PREFIX: &str = "Scheduled_";

fn truncate_text(text: &str, max_len: usize) -> String {
    text.chars().take(max_len).collect()
}

/// First line, without quotes, bounded length; never empty.
pub(crate) fn clean_title(raw_title: &str, fallback: &str) -> String {
    let cleaned = raw_title
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    if cleaned.is_empty() {
        fallback.to_string()
    } else if cleaned.chars().count() > 100 {
        format!("{}...", truncate_text(&cleaned, 97))
    } else {
        cleaned
    }
}

/// Ask the provider for a title describing `user_text`.
///
/// Scheduled threads get the [`SCHEDULED_PREFIX`]. Uniqueness is left to
/// the thread store.
pub async fn generate_title(
    client: &dyn ProviderClient,
    model: &str,
    current_name: &str,
    user_text: &str,
    scheduled: bool,
) -> ParleyResult<String> {
    let prompt = format!("{current_name} {}", truncate_text(user_text, 500));
    debug!(model = %model, "Calling provider for thread title");

    let response = client.complete(model, TITLE_SYSTEM_PROMPT, &prompt).await?;
    let title = clean_title(&response, current_name);
    debug!(title = %title, "Title cleaned");

    Ok(if scheduled {
        format!("{SCHEDULED_PREFIX}{title}")
    } else {
        title
    })
}
