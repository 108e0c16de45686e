//! Context items handed to the prompt builder.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::Candidate;

pub const INSTRUCTIONS: &str = "Use the above code to answer the following question. You should not \
reference any files outside of what is shown, unless they are commonly known files, like a \
.gitignore or package.json. Reference the filenames whenever possible. If there isn't enough \
information to answer the question, suggest where the user might look to learn more.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UriKind {
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextUri {
    #[serde(rename = "type")]
    pub kind: UriKind,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
    pub name: String,
    pub description: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<ContextUri>,
}

impl ContextItem {
    #[must_use]
    pub fn is_instructions(&self) -> bool {
        self.uri.is_none() && self.content == INSTRUCTIONS
    }
}

/// The leading item of every non-empty response.
#[must_use]
pub fn instructions_item() -> ContextItem {
    ContextItem {
        name: "Instructions".into(),
        description: "Instructions".into(),
        content: INSTRUCTIONS.into(),
        uri: None,
    }
}

/// Render one candidate as a fenced snippet named `basename (start-end)`.
#[must_use]
pub fn format_candidate(candidate: &Candidate) -> ContextItem {
    let chunk = &candidate.chunk;
    let basename = Path::new(&chunk.filepath)
        .file_name()
        .map_or_else(|| chunk.filepath.clone(), |n| n.to_string_lossy().into_owned());
    let name = format!("{basename} ({}-{})", chunk.start_line, chunk.end_line);
    ContextItem {
        content: format!("```{name}\n{}\n```", chunk.content),
        name,
        description: candidate.relative_path(),
        uri: Some(ContextUri {
            kind: UriKind::File,
            value: chunk.filepath.clone(),
        }),
    }
}

/// Stable sort by file path, then prepend the instructions item.
#[must_use]
pub fn format_results(mut candidates: Vec<Candidate>) -> Vec<ContextItem> {
    candidates.sort_by(|a, b| a.chunk.filepath.cmp(&b.chunk.filepath));
    std::iter::once(instructions_item())
        .chain(candidates.iter().map(format_candidate))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScoredChunk;
    use std::path::PathBuf;

    fn candidate(path: &str, start: usize, content: &str) -> Candidate {
        Candidate {
            chunk: ScoredChunk {
                id: format!("{path}:{start}"),
                filepath: path.into(),
                start_line: start,
                end_line: start + 49,
                content: content.into(),
                score: 0.5,
            },
            root: PathBuf::from("/repo"),
        }
    }

    #[test]
    fn snippet_format() {
        let item = format_candidate(&candidate("/repo/src/main.rs", 1, "fn main() {}"));
        assert_eq!(item.name, "main.rs (1-50)");
        assert_eq!(item.description, "src/main.rs");
        assert_eq!(item.content, "```main.rs (1-50)\nfn main() {}\n```");
        assert_eq!(item.uri.unwrap().value, "/repo/src/main.rs");
    }

    #[test]
    fn results_sorted_by_path_with_stable_ties() {
        let items = format_results(vec![
            candidate("/repo/b.rs", 51, "second b"),
            candidate("/repo/a.rs", 1, "a"),
            candidate("/repo/b.rs", 1, "first b"),
        ]);
        assert!(items[0].is_instructions());
        let names: Vec<_> = items[1..].iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["a.rs (1-50)", "b.rs (51-100)", "b.rs (1-50)"]);
    }

    #[test]
    fn empty_results_are_preamble_only() {
        let items = format_results(Vec::new());
        assert_eq!(items, vec![instructions_item()]);
    }

    #[test]
    fn uri_serializes_with_type_field() {
        let item = format_candidate(&candidate("/repo/x.py", 1, "x"));
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["uri"]["type"], "file");
        assert_eq!(json["uri"]["value"], "/repo/x.py");

        let pre = serde_json::to_value(instructions_item()).unwrap();
        assert!(pre.get("uri").is_none());
    }
}
