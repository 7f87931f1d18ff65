use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use parley_core::EventBus;
use parley_core::models::{AppEvent, Conversation, ConversationMessage, MessageContent, ViewEvent};
use parley_core::services::SubscriptionId;

/// Prints view notifications to the terminal in arrival order.
pub struct Presenter {
    /// Whether a streamed reply is still open on the current line.
    streaming: Mutex<bool>,
    show_transcripts: bool,
}

impl Presenter {
    /// Subscribe a presenter to every view notification on `bus`.
    pub fn attach(bus: &EventBus, show_transcripts: bool) -> SubscriptionId {
        let presenter = Arc::new(Self {
            streaming: Mutex::new(false),
            show_transcripts,
        });
        bus.subscribe_all(move |event| {
            if let AppEvent::View(view) = event {
                presenter.present(view);
            }
        })
    }

    fn present(&self, event: &ViewEvent) {
        let mut streaming = self.streaming.lock();
        let mut stdout = std::io::stdout().lock();

        if let ViewEvent::StreamChunk {
            assistant,
            text,
            is_first_chunk,
            ..
        } = event
        {
            if *is_first_chunk {
                let _ = write!(stdout, "\n{assistant}: ");
            }
            let _ = write!(stdout, "{text}");
            let _ = stdout.flush();
            *streaming = true;
            return;
        }

        if matches!(event, ViewEvent::ConversationRefreshed { .. }) && !self.show_transcripts {
            return;
        }
        let Some(line) = render(event) else {
            return;
        };
        if *streaming {
            let _ = writeln!(stdout);
            *streaming = false;
        }
        if matches!(event, ViewEvent::Error { .. }) {
            eprintln!("{line}");
        } else {
            let _ = writeln!(stdout, "{line}");
        }
    }
}

/// One terminal line (or block) for a view notification. Stream chunks are
/// written inline by the presenter and render to nothing here.
pub fn render(event: &ViewEvent) -> Option<String> {
    match event {
        ViewEvent::UserMessage { text, .. } => Some(format!("you: {text}")),
        ViewEvent::StreamChunk { .. } => None,
        ViewEvent::MessageAppended { message, .. } => Some(render_message(message)),
        ViewEvent::ConversationRefreshed { conversation } => Some(render_conversation(conversation)),
        ViewEvent::AttachmentsUpdated {
            thread,
            attachments,
        } if !attachments.is_empty() => {
            let names: Vec<String> = attachments.iter().map(|a| a.file_name()).collect();
            Some(format!("[{thread}] attachments: {}", names.join(", ")))
        }
        ViewEvent::AttachmentsUpdated { .. } => None,
        ViewEvent::ThreadCreated { name, scheduled } => Some(if *scheduled {
            format!("[thread] created scheduled thread '{name}'")
        } else {
            format!("[thread] created '{name}'")
        }),
        ViewEvent::ThreadRenamed { old_name, new_name } => {
            Some(format!("[thread] '{old_name}' renamed to '{new_name}'"))
        }
        ViewEvent::ThreadDeleted { name } => Some(format!("[thread] deleted '{name}'")),
        ViewEvent::ProcessingStarted {
            assistant,
            scheduled,
        } => Some(if *scheduled {
            format!("[{assistant}] running scheduled task...")
        } else {
            format!("[{assistant}] thinking...")
        }),
        ViewEvent::ProcessingStopped { assistant, .. } => Some(format!("[{assistant}] done")),
        ViewEvent::Connected { assistant, thread } => {
            Some(format!("[{assistant}] connected to '{thread}'"))
        }
        ViewEvent::Disconnected { assistant } => Some(format!("[{assistant}] disconnected")),
        ViewEvent::Error { message } => Some(format!("error: {message}")),
    }
}

pub fn render_message(message: &ConversationMessage) -> String {
    let parts: Vec<String> = message
        .content
        .iter()
        .map(|content| match content {
            MessageContent::Text { text } => text.clone(),
            MessageContent::File { file_name, .. } => format!("<file {file_name}>"),
            MessageContent::Image { file_name, .. } => format!("<image {file_name}>"),
            MessageContent::FunctionCall { name, output, .. } => {
                format!("<{name} -> {output}>")
            }
        })
        .collect();
    format!("{}: {}", message.sender, parts.join("\n"))
}

pub fn render_conversation(conversation: &Conversation) -> String {
    let mut out = format!("── {} ──", conversation.thread);
    for message in &conversation.messages {
        out.push('\n');
        out.push_str(&render_message(message));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::models::MessageRole;

    #[test]
    fn test_render_thread_events() {
        assert_eq!(
            render(&ViewEvent::ThreadRenamed {
                old_name: "New Thread".to_string(),
                new_name: "Weather".to_string(),
            })
            .as_deref(),
            Some("[thread] 'New Thread' renamed to 'Weather'")
        );
        assert!(render(&ViewEvent::StreamChunk {
            assistant: "Helper".to_string(),
            thread: "t".to_string(),
            text: "hi".to_string(),
            is_first_chunk: true,
        })
        .is_none());
        assert!(render(&ViewEvent::AttachmentsUpdated {
            thread: "t".to_string(),
            attachments: Vec::new(),
        })
        .is_none());
    }

    #[test]
    fn test_render_conversation() {
        let conversation = Conversation::new(
            "Weather",
            vec![
                ConversationMessage::text(MessageRole::User, "user", "Is it sunny?"),
                ConversationMessage::text(MessageRole::Assistant, "Helper", "Yes."),
            ],
        );
        assert_eq!(
            render_conversation(&conversation),
            "── Weather ──\nuser: Is it sunny?\nHelper: Yes."
        );
    }
}
