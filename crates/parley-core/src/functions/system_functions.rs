//! Built-in functions available to every assistant.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::{Function, FunctionDefinition, FunctionError, parse_arguments};

pub fn all() -> Vec<Arc<dyn Function>> {
    vec![
        Arc::new(FetchCurrentDateTime),
        Arc::new(FetchDetailedFilesInfo),
        Arc::new(ListFilesFromDirectory),
        Arc::new(CopyFilesByExtension),
        Arc::new(CopySpecificFile),
        Arc::new(CreateFileWithContent),
        Arc::new(RetrieveFileContent),
        Arc::new(GetContentFromMatchingFiles),
        Arc::new(FindFoldersByName::default()),
        Arc::new(RetrieveDirectoryStructure::default()),
        Arc::new(FindFilesByName),
        Arc::new(FindFilesByExtension),
    ]
}

const FOLDER_NAME_THRESHOLD: u32 = 80;
const FILE_NAME_THRESHOLD: u32 = 75;

async fn require_directory(directory: &str) -> Result<(), FunctionError> {
    match tokio::fs::metadata(directory).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        _ => Err(FunctionError::Execution(format!(
            "Directory '{directory}' was not found"
        ))),
    }
}

fn extension_matches(file_name: &str, extension: &str) -> bool {
    file_name.to_lowercase().ends_with(&extension.to_lowercase())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[derive(Clone, Copy, PartialEq)]
enum EntryKind {
    File,
    Directory,
}

/// Every file or directory below `directory`, sorted. Entries inside or
/// named like hidden folders are dropped when `skip_hidden` is set.
async fn walk(
    directory: &Path,
    kind: EntryKind,
    skip_hidden: bool,
) -> Result<Vec<PathBuf>, FunctionError> {
    let root = directory.to_path_buf();
    let pattern = format!(
        "{}/**/*",
        glob::Pattern::escape(root.to_string_lossy().trim_end_matches('/'))
    );
    debug!(pattern = %pattern, "Walking directory");

    tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>, FunctionError> {
        let entries =
            glob::glob(&pattern).map_err(|e| FunctionError::InvalidArguments(e.to_string()))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = ?e, "Glob entry error");
                    None
                }
            })
            .filter(|path| !skip_hidden || !is_hidden(path.strip_prefix(&root).unwrap_or(path)))
            .filter(|path| match kind {
                EntryKind::File => path.is_file(),
                EntryKind::Directory => path.is_dir(),
            })
            .collect();
        paths.sort();
        Ok(paths)
    })
    .await
    .map_err(|e| FunctionError::Execution(e.to_string()))?
}

fn is_hidden(relative: &Path) -> bool {
    relative.components().any(|component| {
        matches!(component, Component::Normal(name) if name.to_string_lossy().starts_with('.'))
    })
}

/// Similarity of two names in percent (0-100), case-insensitive, from the
/// length of their longest common subsequence.
fn similarity(a: &str, b: &str) -> u32 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }

    let mut row = vec![0usize; b.len() + 1];
    for ca in &a {
        let mut diagonal = 0;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal + 1
            } else {
                above.max(row[j])
            };
            diagonal = above;
        }
    }
    ((200 * row[b.len()]) as f64 / total as f64).round() as u32
}

/// A name matches a search term when it contains it or is close enough to it.
fn name_matches(name: &str, term: &str, threshold: u32) -> bool {
    name.to_lowercase().contains(&term.to_lowercase()) || similarity(name, term) >= threshold
}

fn require_term(term: &str) -> Result<(), FunctionError> {
    if term.trim().is_empty() {
        return Err(FunctionError::InvalidArguments(
            "search term must not be empty".to_string(),
        ));
    }
    Ok(())
}

// ─── fetch_current_datetime ───

pub struct FetchCurrentDateTime;

#[async_trait]
impl Function for FetchCurrentDateTime {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "fetch_current_datetime".to_string(),
            description: "Get the current local date and time.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _arguments: Value) -> Result<String, FunctionError> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        Ok(json!({"current_time": now}).to_string())
    }
}

// ─── list_files_from_directory ───

#[derive(Deserialize)]
struct ListFilesArgs {
    directory: String,
    file_extension: String,
}

pub struct ListFilesFromDirectory;

#[async_trait]
impl Function for ListFilesFromDirectory {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "list_files_from_directory".to_string(),
            description: "List the files with a given extension in a directory. \
                          The search is not recursive."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "directory": {"type": "string", "description": "Directory to list"},
                    "file_extension": {"type": "string", "description": "Extension to match, e.g. '.txt'"}
                },
                "required": ["directory", "file_extension"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: ListFilesArgs = parse_arguments(arguments)?;
        require_directory(&args.directory).await?;

        let mut entries = tokio::fs::read_dir(&args.directory).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(&args.file_extension) {
                files.push(name);
            }
        }
        files.sort();

        Ok(json!({"file_list": files, "file_extension": args.file_extension}).to_string())
    }
}

// ─── retrieve_file_content_from_directory ───

#[derive(Deserialize)]
struct RetrieveFileArgs {
    input_directory: String,
    filename: String,
}

pub struct RetrieveFileContent;

#[async_trait]
impl Function for RetrieveFileContent {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "retrieve_file_content_from_directory".to_string(),
            description: "Read the text content of a file in a directory.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "input_directory": {"type": "string", "description": "Directory containing the file"},
                    "filename": {"type": "string", "description": "Name of the file to read"}
                },
                "required": ["input_directory", "filename"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: RetrieveFileArgs = parse_arguments(arguments)?;
        require_directory(&args.input_directory).await?;

        let path = Path::new(&args.input_directory).join(&args.filename);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                FunctionError::Execution(format!("File '{}' was not found", args.filename))
            }
            _ => FunctionError::from(e),
        })?;

        let mut result = Map::new();
        result.insert(args.filename, Value::String(content));
        Ok(Value::Object(result).to_string())
    }
}

// ─── create_file_with_specified_content ───

#[derive(Deserialize)]
struct CreateFileArgs {
    file_name: String,
    output_directory: String,
    content: String,
    #[serde(default)]
    file_extension: Option<String>,
}

pub struct CreateFileWithContent;

#[async_trait]
impl Function for CreateFileWithContent {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "create_file_with_specified_content".to_string(),
            description: "Create a file with the given content in a directory, \
                          creating the directory if needed."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_name": {"type": "string", "description": "Name of the file to create"},
                    "output_directory": {"type": "string", "description": "Directory to create the file in"},
                    "content": {"type": "string", "description": "Content to write"},
                    "file_extension": {"type": "string", "description": "Optional extension, e.g. '.md'"}
                },
                "required": ["file_name", "output_directory", "content"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: CreateFileArgs = parse_arguments(arguments)?;

        let mut file_name = args.file_name;
        if let Some(extension) = args.file_extension.filter(|e| !e.is_empty()) {
            let extension = if extension.starts_with('.') {
                extension
            } else {
                format!(".{extension}")
            };
            if !file_name.ends_with(&extension) {
                file_name.push_str(&extension);
            }
        }

        let directory = PathBuf::from(&args.output_directory);
        tokio::fs::create_dir_all(&directory).await?;
        let path = directory.join(&file_name);
        tokio::fs::write(&path, &args.content).await?;
        info!(path = %path.display(), bytes = args.content.len(), "Created file");

        let mut result = Map::new();
        result.insert(file_name, Value::String(args.content));
        Ok(Value::Object(result).to_string())
    }
}

// ─── fetch_detailed_files_info_in_directory ───

#[derive(Deserialize)]
struct DirectoryArgs {
    directory: String,
}

pub struct FetchDetailedFilesInfo;

#[async_trait]
impl Function for FetchDetailedFilesInfo {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "fetch_detailed_files_info_in_directory".to_string(),
            description: "Describe every file below a directory: name, path, size, \
                          type and last modification time."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "directory": {"type": "string", "description": "Directory to describe"}
                },
                "required": ["directory"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: DirectoryArgs = parse_arguments(arguments)?;
        require_directory(&args.directory).await?;

        let mut files = Vec::new();
        for path in walk(Path::new(&args.directory), EntryKind::File, false).await? {
            let meta = tokio::fs::metadata(&path).await?;
            let last_updated = meta
                .modified()
                .map(|time| DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            files.push(json!({
                "filename": file_name_of(&path),
                "filepath": path.to_string_lossy(),
                "size_bytes": meta.len(),
                "file_type": path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default(),
                "last_updated": last_updated,
            }));
        }
        Ok(Value::Array(files).to_string())
    }
}

// ─── copy_multiple_files_by_extension ───

#[derive(Deserialize)]
struct CopyByExtensionArgs {
    input_directory: String,
    output_directory: String,
    file_extension: String,
}

pub struct CopyFilesByExtension;

#[async_trait]
impl Function for CopyFilesByExtension {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "copy_multiple_files_by_extension".to_string(),
            description: "Copy the files with a given extension from one directory to another. \
                          Subdirectories are not copied."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "input_directory": {"type": "string", "description": "Directory to copy from"},
                    "output_directory": {"type": "string", "description": "Directory to copy to"},
                    "file_extension": {"type": "string", "description": "Extension to match, e.g. '.txt'"}
                },
                "required": ["input_directory", "output_directory", "file_extension"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: CopyByExtensionArgs = parse_arguments(arguments)?;
        require_directory(&args.input_directory).await?;

        let output = PathBuf::from(&args.output_directory);
        tokio::fs::create_dir_all(&output).await?;

        let mut entries = tokio::fs::read_dir(&args.input_directory).await?;
        let mut copied = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(&args.file_extension) || !entry.file_type().await?.is_file() {
                continue;
            }
            tokio::fs::copy(entry.path(), output.join(&name)).await?;
            copied.push(name);
        }
        copied.sort();
        info!(files = copied.len(), to = %output.display(), "Copied files");

        Ok(json!({"copied_files": copied}).to_string())
    }
}

// ─── copy_specific_file_to_directory ───

#[derive(Deserialize)]
struct CopyFileArgs {
    input_directory: String,
    output_directory: String,
    file_name: String,
}

pub struct CopySpecificFile;

#[async_trait]
impl Function for CopySpecificFile {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "copy_specific_file_to_directory".to_string(),
            description: "Copy one file from a directory to another directory.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "input_directory": {"type": "string", "description": "Directory containing the file"},
                    "output_directory": {"type": "string", "description": "Directory to copy to"},
                    "file_name": {"type": "string", "description": "Name of the file to copy"}
                },
                "required": ["input_directory", "output_directory", "file_name"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: CopyFileArgs = parse_arguments(arguments)?;
        require_directory(&args.input_directory).await?;

        let output = PathBuf::from(&args.output_directory);
        tokio::fs::create_dir_all(&output).await?;
        let source = Path::new(&args.input_directory).join(&args.file_name);
        tokio::fs::copy(&source, output.join(&args.file_name))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    FunctionError::Execution(format!("File '{}' was not found", args.file_name))
                }
                _ => FunctionError::from(e),
            })?;
        info!(file = %args.file_name, to = %output.display(), "Copied file");

        Ok(json!({"copied_file": args.file_name}).to_string())
    }
}

// ─── get_content_from_matching_files ───

#[derive(Deserialize)]
struct MatchingContentArgs {
    input_directory: String,
    file_extension: String,
}

pub struct GetContentFromMatchingFiles;

#[async_trait]
impl Function for GetContentFromMatchingFiles {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "get_content_from_matching_files".to_string(),
            description: "Read every file with a given extension below a directory, \
                          keyed by file name."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "input_directory": {"type": "string", "description": "Directory to search"},
                    "file_extension": {"type": "string", "description": "Extension to match, e.g. '.md'"}
                },
                "required": ["input_directory", "file_extension"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: MatchingContentArgs = parse_arguments(arguments)?;
        require_directory(&args.input_directory).await?;

        let mut contents = Map::new();
        for path in walk(Path::new(&args.input_directory), EntryKind::File, false).await? {
            let name = file_name_of(&path);
            if !name.ends_with(&args.file_extension) {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    contents.insert(name, Value::String(content));
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable file"),
            }
        }
        Ok(Value::Object(contents).to_string())
    }
}

// ─── find_all_folders_by_name_from_current_directory ───

#[derive(Deserialize)]
struct FolderNameArgs {
    folder_name: String,
}

/// Searches below `root`, or the process's working directory when unset.
#[derive(Default)]
pub struct FindFoldersByName {
    root: Option<PathBuf>,
}

impl FindFoldersByName {
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

#[async_trait]
impl Function for FindFoldersByName {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "find_all_folders_by_name_from_current_directory".to_string(),
            description: "Find folders below the current directory whose name contains \
                          or closely resembles a search term."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "folder_name": {"type": "string", "description": "Folder name to look for"}
                },
                "required": ["folder_name"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: FolderNameArgs = parse_arguments(arguments)?;
        require_term(&args.folder_name)?;
        let root = match &self.root {
            Some(root) => root.clone(),
            None => std::env::current_dir()?,
        };

        let folders: Vec<String> = walk(&root, EntryKind::Directory, false)
            .await?
            .into_iter()
            .filter(|path| name_matches(&file_name_of(path), &args.folder_name, FOLDER_NAME_THRESHOLD))
            .map(|path| path.to_string_lossy().to_string())
            .collect();
        if folders.is_empty() {
            return Err(FunctionError::Execution(format!(
                "No folders matching '{}' were found",
                args.folder_name
            )));
        }
        Ok(json!(folders).to_string())
    }
}

// ─── retrieve_current_directory_structure_subfolders ───

/// Lists below `root`, or the process's working directory when unset.
#[derive(Default)]
pub struct RetrieveDirectoryStructure {
    root: Option<PathBuf>,
}

impl RetrieveDirectoryStructure {
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

#[async_trait]
impl Function for RetrieveDirectoryStructure {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "retrieve_current_directory_structure_subfolders".to_string(),
            description: "Map every non-hidden subfolder of the current directory \
                          from its path to its name."
                .to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _arguments: Value) -> Result<String, FunctionError> {
        let root = self.root.clone().unwrap_or_else(|| PathBuf::from("."));

        let mut structure = Map::new();
        for path in walk(&root, EntryKind::Directory, true).await? {
            let relative = path.strip_prefix(&root).unwrap_or(&path);
            structure.insert(
                root.join(relative).to_string_lossy().to_string(),
                Value::String(file_name_of(&path)),
            );
        }
        Ok(json!({"directory_structure": structure}).to_string())
    }
}

// ─── find_files_by_name_in_directory ───

#[derive(Deserialize)]
struct FileNameArgs {
    directory: String,
    file_name_contains: String,
}

pub struct FindFilesByName;

#[async_trait]
impl Function for FindFilesByName {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "find_files_by_name_in_directory".to_string(),
            description: "Recursively find files below a directory whose name contains \
                          or closely resembles a search term."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "directory": {"type": "string", "description": "Directory to search"},
                    "file_name_contains": {"type": "string", "description": "File name to look for"}
                },
                "required": ["directory", "file_name_contains"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: FileNameArgs = parse_arguments(arguments)?;
        require_term(&args.file_name_contains)?;
        require_directory(&args.directory).await?;

        let files: Vec<String> = walk(Path::new(&args.directory), EntryKind::File, false)
            .await?
            .into_iter()
            .filter(|path| {
                name_matches(&file_name_of(path), &args.file_name_contains, FILE_NAME_THRESHOLD)
            })
            .map(|path| path.to_string_lossy().to_string())
            .collect();
        if files.is_empty() {
            return Err(FunctionError::Execution(format!(
                "No files matching '{}' were found",
                args.file_name_contains
            )));
        }
        Ok(json!(files).to_string())
    }
}

// ─── find_files_by_extension_in_directory ───

#[derive(Deserialize)]
struct FindFilesArgs {
    directory: String,
    file_extension: String,
}

pub struct FindFilesByExtension;

#[async_trait]
impl Function for FindFilesByExtension {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "find_files_by_extension_in_directory".to_string(),
            description: "Recursively find files with a given extension (case-insensitive) \
                          below a directory."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "directory": {"type": "string", "description": "Directory to search"},
                    "file_extension": {"type": "string", "description": "Extension to match, e.g. '.csv'"}
                },
                "required": ["directory", "file_extension"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        let args: FindFilesArgs = parse_arguments(arguments)?;
        require_directory(&args.directory).await?;

        let matches: Vec<String> = walk(Path::new(&args.directory), EntryKind::File, false)
            .await?
            .into_iter()
            .filter(|path| extension_matches(&file_name_of(path), &args.file_extension))
            .map(|path| path.to_string_lossy().to_string())
            .collect();

        Ok(json!({"file_extension": args.file_extension, "matching_files": matches}).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir_arg(dir: &TempDir) -> String {
        dir.path().to_string_lossy().to_string()
    }

    #[test]
    fn test_similarity() {
        assert_eq!(similarity("Report", "report"), 100);
        assert_eq!(similarity("", ""), 100);
        assert_eq!(similarity("abc", "xyz"), 0);
        assert!(similarity("reprot.txt", "report.txt") >= FILE_NAME_THRESHOLD);
        assert!(similarity("notes.md", "budget.xlsx") < FILE_NAME_THRESHOLD);
    }

    #[tokio::test]
    async fn test_fetch_current_datetime_format() {
        let output = FetchCurrentDateTime.call(json!({})).await.unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        let time = value["current_time"].as_str().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[tokio::test]
    async fn test_list_files_is_not_recursive() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.csv"), "b").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), "c").unwrap();

        let output = ListFilesFromDirectory
            .call(json!({"directory": dir_arg(&dir), "file_extension": ".txt"}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["file_list"], json!(["a.txt"]));
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let result = ListFilesFromDirectory
            .call(json!({"directory": "/definitely/not/here", "file_extension": ".txt"}))
            .await;
        assert!(matches!(result, Err(FunctionError::Execution(_))));
    }

    #[tokio::test]
    async fn test_missing_arguments_are_invalid() {
        let result = ListFilesFromDirectory.call(json!({"directory": "/tmp"})).await;
        assert!(matches!(result, Err(FunctionError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn test_create_then_retrieve_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested");

        let created = CreateFileWithContent
            .call(json!({
                "file_name": "notes",
                "output_directory": out.to_string_lossy(),
                "content": "hello",
                "file_extension": "md"
            }))
            .await
            .unwrap();
        assert_eq!(created, r#"{"notes.md":"hello"}"#);

        let retrieved = RetrieveFileContent
            .call(json!({"input_directory": out.to_string_lossy(), "filename": "notes.md"}))
            .await
            .unwrap();
        assert_eq!(retrieved, r#"{"notes.md":"hello"}"#);
    }

    #[tokio::test]
    async fn test_retrieve_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = RetrieveFileContent
            .call(json!({"input_directory": dir_arg(&dir), "filename": "nope.txt"}))
            .await;
        match result {
            Err(FunctionError::Execution(message)) => assert!(message.contains("nope.txt")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_find_files_is_recursive_and_case_insensitive() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("x/y")).unwrap();
        std::fs::write(dir.path().join("top.CSV"), "").unwrap();
        std::fs::write(dir.path().join("x/y/deep.csv"), "").unwrap();
        std::fs::write(dir.path().join("x/other.txt"), "").unwrap();

        let output = FindFilesByExtension
            .call(json!({"directory": dir_arg(&dir), "file_extension": ".csv"}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        let files = value["matching_files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.as_str().unwrap().ends_with("deep.csv")));
    }

    #[tokio::test]
    async fn test_detailed_files_info_walks_subfolders() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "abc").unwrap();
        std::fs::write(dir.path().join("sub/b.json"), "{}").unwrap();

        let output = FetchDetailedFilesInfo
            .call(json!({"directory": dir_arg(&dir)}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        let files = value.as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["filename"], "a.txt");
        assert_eq!(files[0]["size_bytes"], 3);
        assert_eq!(files[0]["file_type"], "txt");
        assert_eq!(files[1]["file_type"], "json");
        assert!(
            chrono::NaiveDateTime::parse_from_str(
                files[1]["last_updated"].as_str().unwrap(),
                "%Y-%m-%d %H:%M:%S"
            )
            .is_ok()
        );
    }

    #[tokio::test]
    async fn test_copy_files_by_extension() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(input.path().join("a.txt"), "a").unwrap();
        std::fs::write(input.path().join("b.txt"), "b").unwrap();
        std::fs::write(input.path().join("c.csv"), "c").unwrap();
        let target = output.path().join("copies");

        let result = CopyFilesByExtension
            .call(json!({
                "input_directory": dir_arg(&input),
                "output_directory": target.to_string_lossy(),
                "file_extension": ".txt"
            }))
            .await
            .unwrap();
        assert_eq!(result, r#"{"copied_files":["a.txt","b.txt"]}"#);
        assert_eq!(std::fs::read_to_string(target.join("b.txt")).unwrap(), "b");
        assert!(!target.join("c.csv").exists());
    }

    #[tokio::test]
    async fn test_copy_specific_file() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(input.path().join("plan.md"), "# Plan").unwrap();

        let result = CopySpecificFile
            .call(json!({
                "input_directory": dir_arg(&input),
                "output_directory": dir_arg(&output),
                "file_name": "plan.md"
            }))
            .await
            .unwrap();
        assert_eq!(result, r#"{"copied_file":"plan.md"}"#);
        assert_eq!(
            std::fs::read_to_string(output.path().join("plan.md")).unwrap(),
            "# Plan"
        );

        let missing = CopySpecificFile
            .call(json!({
                "input_directory": dir_arg(&input),
                "output_directory": dir_arg(&output),
                "file_name": "gone.md"
            }))
            .await;
        match missing {
            Err(FunctionError::Execution(message)) => assert!(message.contains("gone.md")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_content_from_matching_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("readme.md"), "top").unwrap();
        std::fs::write(dir.path().join("docs/guide.md"), "deep").unwrap();
        std::fs::write(dir.path().join("docs/data.csv"), "1,2").unwrap();

        let output = GetContentFromMatchingFiles
            .call(json!({"input_directory": dir_arg(&dir), "file_extension": ".md"}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value, json!({"readme.md": "top", "guide.md": "deep"}));
    }

    #[tokio::test]
    async fn test_find_folders_by_name() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("projects/reports_2024")).unwrap();
        std::fs::create_dir_all(dir.path().join("projects/images")).unwrap();
        let function = FindFoldersByName::rooted_at(dir.path());

        let output = function.call(json!({"folder_name": "Reports"})).await.unwrap();
        let folders: Vec<String> = serde_json::from_str(&output).unwrap();
        assert_eq!(folders.len(), 1);
        assert!(folders[0].ends_with("reports_2024"));

        let none = function.call(json!({"folder_name": "videos"})).await;
        assert!(matches!(none, Err(FunctionError::Execution(_))));
    }

    #[tokio::test]
    async fn test_directory_structure_skips_hidden_folders() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/models")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();

        let output = RetrieveDirectoryStructure::rooted_at(dir.path())
            .call(json!({}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        let structure = value["directory_structure"].as_object().unwrap();
        let mut names: Vec<&str> = structure.values().map(|v| v.as_str().unwrap()).collect();
        names.sort();
        assert_eq!(names, vec!["models", "src"]);
        assert!(structure.keys().any(|k| k.ends_with("src/models")));
    }

    #[tokio::test]
    async fn test_find_files_by_name_tolerates_typos() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("q1")).unwrap();
        std::fs::write(dir.path().join("q1/report.txt"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let output = FindFilesByName
            .call(json!({"directory": dir_arg(&dir), "file_name_contains": "reprot.txt"}))
            .await
            .unwrap();
        let files: Vec<String> = serde_json::from_str(&output).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("report.txt"));

        let empty = FindFilesByName
            .call(json!({"directory": dir_arg(&dir), "file_name_contains": " "}))
            .await;
        assert!(matches!(empty, Err(FunctionError::InvalidArguments(_))));
    }
}
