use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    CodeInterpreter,
    FileSearch,
    Image,
}

/// A local file bound to a thread. `file_id` is set once uploaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_path: PathBuf,
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl Attachment {
    pub fn new(file_path: impl Into<PathBuf>, kind: AttachmentKind) -> Self {
        Self {
            file_path: file_path.into(),
            kind,
            file_id: None,
        }
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file_path.to_string_lossy().to_string())
    }

    pub fn is_image(&self) -> bool {
        self.kind == AttachmentKind::Image
    }

    /// Same remote file when both are uploaded, otherwise same local file and kind.
    pub fn refers_to_same_file(&self, other: &Attachment) -> bool {
        match (&self.file_id, &other.file_id) {
            (Some(a), Some(b)) => a == b,
            _ => self.kind == other.kind && self.file_path == other.file_path,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub name: String,
    pub remote_id: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,
}

impl ThreadRecord {
    pub fn new(name: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_id: remote_id.into(),
            attachments: Vec::new(),
            additional_instructions: None,
        }
    }
}

/// Name <-> remote id table with the current-thread marker.
///
/// Names are kept unique: a colliding name gets the smallest free ` N`
/// suffix starting at 1.
#[derive(Debug, Default)]
pub struct ThreadTable {
    threads: Vec<ThreadRecord>,
    current: Option<String>,
}

impl ThreadTable {
    pub fn from_records(threads: Vec<ThreadRecord>) -> Self {
        Self {
            threads,
            current: None,
        }
    }

    pub fn records(&self) -> &[ThreadRecord] {
        &self.threads
    }

    pub fn names(&self) -> Vec<String> {
        self.threads.iter().map(|t| t.name.clone()).collect()
    }

    pub fn unique_name(&self, desired: &str) -> String {
        self.unique_name_excluding(desired, None)
    }

    fn unique_name_excluding(&self, desired: &str, exclude_id: Option<&str>) -> String {
        let taken = |candidate: &str| {
            self.threads
                .iter()
                .filter(|t| Some(t.remote_id.as_str()) != exclude_id)
                .any(|t| t.name == candidate)
        };

        if !taken(desired) {
            return desired.to_string();
        }
        let mut i = 1;
        while taken(&format!("{desired} {i}")) {
            i += 1;
        }
        format!("{desired} {i}")
    }

    /// Add a thread and return the (possibly suffixed) name it was stored under.
    pub fn add(&mut self, remote_id: &str, desired_name: &str) -> String {
        let name = self.unique_name(desired_name);
        self.threads.push(ThreadRecord::new(name.clone(), remote_id));
        name
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<ThreadRecord> {
        let index = self.threads.iter().position(|t| t.name == name)?;
        let removed = self.threads.remove(index);
        if self.current.as_deref() == Some(removed.remote_id.as_str()) {
            self.current = None;
        }
        Some(removed)
    }

    /// Rename, keeping names unique. Returns the name actually assigned.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Option<String> {
        let remote_id = self.get(old_name)?.remote_id.clone();
        let unique = self.unique_name_excluding(new_name, Some(&remote_id));
        let record = self.threads.iter_mut().find(|t| t.remote_id == remote_id)?;
        record.name = unique.clone();
        Some(unique)
    }

    pub fn get(&self, name: &str) -> Option<&ThreadRecord> {
        self.threads.iter().find(|t| t.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ThreadRecord> {
        self.threads.iter_mut().find(|t| t.name == name)
    }

    pub fn id_by_name(&self, name: &str) -> Option<String> {
        self.get(name).map(|t| t.remote_id.clone())
    }

    pub fn name_by_id(&self, remote_id: &str) -> Option<String> {
        self.threads
            .iter()
            .find(|t| t.remote_id == remote_id)
            .map(|t| t.name.clone())
    }

    pub fn set_current(&mut self, name: &str) -> bool {
        match self.id_by_name(name) {
            Some(id) => {
                self.current = Some(id);
                true
            }
            None => false,
        }
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// Tracked by id, so renaming the current thread keeps it current.
    pub fn current_name(&self) -> Option<String> {
        self.current.as_deref().and_then(|id| self.name_by_id(id))
    }
}
