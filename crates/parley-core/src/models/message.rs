use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::providers::{AnnotationKind, RemoteContent, RemoteMessage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    File { file_id: String, file_name: String },
    Image { file_id: String, file_name: String },
    FunctionCall { name: String, arguments: String, output: String },
}

/// A message as shown in the conversation view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender: String,
    pub role: MessageRole,
    pub content: Vec<MessageContent>,
}

impl ConversationMessage {
    pub fn text(role: MessageRole, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: None,
            sender: sender.into(),
            role,
            content: vec![MessageContent::Text { text: text.into() }],
        }
    }

    /// Build from a provider message.
    ///
    /// Annotations are replaced by ` [i]` footnote markers and listed at the
    /// end of the text. File-path annotations also become file contents.
    /// `file_names` maps file ids to display names; unknown ids fall back to
    /// the id itself.
    pub fn from_remote(
        remote: &RemoteMessage,
        role: MessageRole,
        sender: impl Into<String>,
        file_names: &HashMap<String, String>,
    ) -> Self {
        let name_of = |file_id: &str| {
            file_names
                .get(file_id)
                .cloned()
                .unwrap_or_else(|| file_id.to_string())
        };

        let mut content = Vec::new();
        for part in &remote.content {
            match part {
                RemoteContent::Text { value, annotations } => {
                    let mut text = value.clone();
                    let mut citations = Vec::new();
                    let mut files = Vec::new();
                    for (index, annotation) in annotations.iter().enumerate() {
                        if !annotation.text.is_empty() {
                            text = text.replace(&annotation.text, &format!(" [{index}]"));
                        }
                        match &annotation.kind {
                            AnnotationKind::FileCitation { file_id } => {
                                citations.push(format!("[{index}] {}", name_of(file_id)));
                            }
                            AnnotationKind::FilePath { file_id } => {
                                let file_name = annotation_file_name(&annotation.text)
                                    .unwrap_or_else(|| name_of(file_id));
                                citations.push(format!("[{index}] {file_name}"));
                                files.push(MessageContent::File {
                                    file_id: file_id.clone(),
                                    file_name,
                                });
                            }
                        }
                    }
                    if !citations.is_empty() {
                        text.push_str("\n\n");
                        text.push_str(&citations.join("\n"));
                    }
                    content.push(MessageContent::Text { text });
                    content.extend(files);
                }
                RemoteContent::ImageFile { file_id } => {
                    let file_name = format!("{}.png", name_of(file_id));
                    content.push(MessageContent::Image {
                        file_id: file_id.clone(),
                        file_name,
                    });
                }
            }
        }

        Self {
            id: Some(remote.id.clone()),
            sender: sender.into(),
            role,
            content,
        }
    }

    /// All text parts joined with blank lines, if there are any.
    pub fn text_content(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|c| match c {
                MessageContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// File and image parts as `(file_id, file_name)`.
    pub fn file_refs(&self) -> Vec<(&str, &str)> {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::File { file_id, file_name }
                | MessageContent::Image { file_id, file_name } => {
                    Some((file_id.as_str(), file_name.as_str()))
                }
                _ => None,
            })
            .collect()
    }
}

/// `sandbox:/mnt/data/report.csv` -> `report.csv`
fn annotation_file_name(annotation_text: &str) -> Option<String> {
    let (_, name) = annotation_text.trim().rsplit_once('/')?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Ordered transcript of a thread, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub thread: String,
    pub messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new(thread: impl Into<String>, messages: Vec<ConversationMessage>) -> Self {
        Self {
            thread: thread.into(),
            messages,
        }
    }

    /// Latest text written by `sender`.
    pub fn last_text_message(&self, sender: &str) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.sender == sender)
            .find_map(|m| m.text_content())
    }

    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == MessageRole::User)
            .find_map(|m| m.text_content())
    }

    pub fn contains_file_id(&self, file_id: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.file_refs().iter().any(|(id, _)| *id == file_id))
    }

    pub fn text_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.text_content().is_some())
            .count()
    }
}
