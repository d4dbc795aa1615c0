use crate::layout::StudyLayout;
use std::{collections::BTreeMap, fs, io, path::Path};

/// last line of the injected head of a main file
pub const INITIAL_MARKER: &str = "#___END_INITIAL_INSTRUCTIONS___";
/// first line of the injected tail of a main file
pub const FINAL_MARKER: &str = "#___BEGIN_FINAL_INSTRUCTIONS___";

pub const CASENAME: &str = "__REPLACE_WITH_CASENAME__";
pub const STUDY_ROOT: &str = "__REPLACE_WITH_STUDY_ROOT__";
pub const TOUCH_DIR: &str = "__REPLACE_WITH_TOUCH_DIR__";
pub const CONFIG_FILE: &str = "__REPLACE_WITH_CONFIG_FILE__";

/// Placeholder to value pairs, applied in insertion order
#[derive(Clone, Debug, Default)]
pub struct Placeholders {
    pairs: Vec<(&'static str, String)>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// the placeholders every wrapped main file of `case` understands
    pub fn for_case(case: &str, layout: &StudyLayout, config_file: &str) -> Self {
        Self::new()
            .with(CASENAME, case)
            .with(STUDY_ROOT, layout.root().to_string_lossy())
            .with(TOUCH_DIR, layout.touch_folder().to_string_lossy())
            .with(CONFIG_FILE, config_file)
    }

    pub fn with(mut self, placeholder: &'static str, value: impl Into<String>) -> Self {
        self.pairs.push((placeholder, value.into()));
        self
    }

    pub fn fill(&self, text: &str) -> String {
        self.pairs
            .iter()
            .fold(text.to_owned(), |text, (placeholder, value)| {
                text.replace(placeholder, value)
            })
    }
}

/// the original body of a main file, without previously injected instructions
pub fn strip_injected(script: &str) -> &str {
    let body = match script.find(INITIAL_MARKER) {
        Some(start) => {
            let rest = &script[start + INITIAL_MARKER.len()..];
            rest.find('\n').map_or("", |newline| &rest[newline + 1..])
        }
        None => script,
    };

    let body = match body.find(FINAL_MARKER) {
        Some(end) => &body[..end],
        None => body,
    };

    body.trim_matches('\n')
}

/// `export` lines for the study environment, values single quoted
pub fn environment_exports(environment: &BTreeMap<String, String>) -> String {
    environment
        .iter()
        .map(|(key, value)| format!("export {key}='{}'\n", value.replace('\'', r"'\''")))
        .collect()
}

/// Surround `body` with the instruction blocks. The markers are added when the
/// blocks lack them, so the result can always be stripped again.
pub fn wrap(body: &str, initial: &str, final_instructions: &str, exports: &str) -> String {
    let head = initial
        .split(INITIAL_MARKER)
        .next()
        .unwrap_or_default()
        .trim_end();
    let tail = match final_instructions.split_once(FINAL_MARKER) {
        Some((_, tail)) => tail,
        None => final_instructions,
    }
    .trim_matches('\n');

    let mut wrapped = String::with_capacity(head.len() + body.len() + tail.len() + 80);

    if !head.is_empty() {
        wrapped.push_str(head);
        wrapped.push('\n');
    }
    wrapped.push_str(exports);
    wrapped.push_str(INITIAL_MARKER);
    wrapped.push('\n');
    wrapped.push_str(body);
    wrapped.push('\n');
    wrapped.push_str(FINAL_MARKER);
    wrapped.push('\n');
    if !tail.is_empty() {
        wrapped.push_str(tail);
        wrapped.push('\n');
    }

    wrapped
}

/// Rewrite a main file in place: strip old instructions, wrap it with the given
/// ones and substitute the placeholders.
pub fn prepare_main_file(
    path: &Path,
    initial: &str,
    final_instructions: &str,
    exports: &str,
    placeholders: &Placeholders,
) -> io::Result<()> {
    let script = fs::read_to_string(path)?;
    let wrapped = wrap(strip_injected(&script), initial, final_instructions, exports);

    fs::write(path, placeholders.fill(&wrapped))
}

#[cfg(test)]
mod script_test;
