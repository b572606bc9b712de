use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub const TERRAFORM_EXTENSION: &str = ".tf";
pub const DEFAULT_FILE_NAME: &str = "main.tf";

/// Generated Terraform files keyed by file name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet {
    files: BTreeMap<String, String>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a file, returning the previous content.
    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>) -> Option<String> {
        self.files.insert(name.into(), content.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(name, content)| (name.as_str(), content.as_str()))
    }

    /// Checks every name is safe to write into a scratch directory.
    pub fn validate_names(&self) -> Result<(), DomainError> {
        self.names().try_for_each(validate_file_name)
    }

    /// Renders all files as one markdown-ish document for display.
    pub fn render(&self) -> String {
        self.iter()
            .map(|(name, content)| format!("# {name}\n{content}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl FromIterator<(String, String)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { files: iter.into_iter().collect() }
    }
}

impl From<BTreeMap<String, String>> for FileSet {
    fn from(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }
}

pub fn validate_file_name(name: &str) -> Result<(), DomainError> {
    let invalid = |reason: &str| DomainError::InvalidFileName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if !name.ends_with(TERRAFORM_EXTENSION) || name.len() == TERRAFORM_EXTENSION.len() {
        return Err(invalid("must be a `.tf` file"));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(invalid("must be a bare file name"));
    }
    if name.starts_with('.') {
        return Err(invalid("must not be hidden"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("must not contain control characters"));
    }
    Ok(())
}
