use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::models::{ConversationMessage, MessageRole};
use crate::providers::ProviderClient;

/// Save the files produced by assistant messages into `output_folder`.
///
/// Best effort: failures are logged and skipped, and files that already
/// exist locally are not downloaded again. Returns the paths written.
pub async fn download_artifacts(
    client: &dyn ProviderClient,
    messages: &[ConversationMessage],
    output_folder: &Path,
) -> Vec<PathBuf> {
    let mut written = Vec::new();

    let refs = messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .flat_map(|m| m.file_refs());

    for (file_id, file_name) in refs {
        let target = output_folder.join(sanitize_file_name(file_name));
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!(path = %target.display(), "Artifact already downloaded");
            continue;
        }

        let bytes = match client.download_file(file_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "Failed to download artifact");
                continue;
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(output_folder).await {
            warn!(path = %output_folder.display(), error = %e, "Failed to create output folder");
            break;
        }
        match tokio::fs::write(&target, bytes).await {
            Ok(()) => {
                info!(file_id = %file_id, path = %target.display(), "Saved artifact");
                written.push(target);
            }
            Err(e) => warn!(path = %target.display(), error = %e, "Failed to save artifact"),
        }
    }

    written
}

/// Keep only the last path component of a provider-supplied name.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        "artifact".to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageContent;
    use crate::test_helpers::{ProviderCall, ScriptedProvider};
    use tempfile::TempDir;

    fn message_with_file(role: MessageRole, file_id: &str, file_name: &str) -> ConversationMessage {
        ConversationMessage {
            id: None,
            sender: "Helper".to_string(),
            role,
            content: vec![MessageContent::File {
                file_id: file_id.to_string(),
                file_name: file_name.to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_downloads_assistant_files_once() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::new();
        provider.add_file("file_a", "chart.png", b"png-bytes");

        let messages = vec![
            message_with_file(MessageRole::Assistant, "file_a", "chart.png"),
            message_with_file(MessageRole::User, "file_user", "input.csv"),
        ];

        let written = download_artifacts(&provider, &messages, dir.path()).await;
        assert_eq!(written, vec![dir.path().join("chart.png")]);
        assert_eq!(std::fs::read(dir.path().join("chart.png")).unwrap(), b"png-bytes");

        let again = download_artifacts(&provider, &messages, dir.path()).await;
        assert!(again.is_empty());
        assert_eq!(
            provider.count_calls(|c| matches!(c, ProviderCall::DownloadFile(_))),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_remote_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::new();
        let messages = vec![message_with_file(MessageRole::Assistant, "gone", "x.txt")];

        assert!(download_artifacts(&provider, &messages, dir.path()).await.is_empty());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("report.csv"), "report.csv");
        assert_eq!(sanitize_file_name(".."), "artifact");
    }
}
