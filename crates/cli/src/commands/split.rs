use std::fs;
use std::path::Path;

use anyhow::Context;
use infrachat_core::domain::file_set::FileSet;
use infrachat_core::splitter::split_document;

use crate::commands::{CommandResult, EXIT_INPUT, EXIT_RUNTIME};

pub fn run(document: &Path, out: Option<&Path>) -> CommandResult {
    let text = match fs::read_to_string(document) {
        Ok(text) => text,
        Err(error) => {
            return CommandResult::failure(
                "split",
                "input",
                format!("could not read `{}`: {error}", document.display()),
                EXIT_INPUT,
            );
        }
    };

    if text.trim().is_empty() {
        return CommandResult::failure(
            "split",
            "input",
            format!("`{}` is empty", document.display()),
            EXIT_INPUT,
        );
    }

    let files = split_document(&text);
    if let Err(error) = files.validate_names() {
        return CommandResult::failure("split", "input", error.to_string(), EXIT_INPUT);
    }

    let Some(out) = out else {
        return CommandResult::success("split", files.render());
    };

    let written = write_files(out, &files);

    match written {
        Ok(names) => CommandResult::success(
            "split",
            format!("wrote {} file(s) to {}: {}", names.len(), out.display(), names.join(", ")),
        ),
        Err(error) => CommandResult::failure("split", "filesystem", format!("{error:#}"), EXIT_RUNTIME),
    }
}

fn write_files(out: &Path, files: &FileSet) -> anyhow::Result<Vec<String>> {
    fs::create_dir_all(out).with_context(|| format!("could not create `{}`", out.display()))?;
    let mut written = Vec::with_capacity(files.len());
    for (name, content) in files.iter() {
        let path = out.join(name);
        fs::write(&path, content).with_context(|| format!("could not write `{}`", path.display()))?;
        written.push(name.to_string());
    }
    Ok(written)
}
