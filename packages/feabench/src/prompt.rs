//! Prompt text for the generation commands.

use indoc::indoc;

use crate::dataset::{Context, Document};

const MAX_READMES: usize = 2;
const MAX_README_CHARS: usize = 3_000;
const MAX_FILES: usize = 3;
const MAX_FILE_CHARS: usize = 2_000;

/// What the model is asked to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// An implementation plan for another engineer.
    Documenter,

    /// A patch written straight from the task description.
    Coder,

    /// A patch written from a documenter's plan.
    DocumentCoder,
}

const PATCH_FORMAT: &str = indoc! {"
    Respond with a unified diff that `git apply` accepts and nothing else.

    Format rules:
    1. Start the response with the first `diff --git` line.
    2. Do not wrap the diff in markdown code fences.
    3. Leave out `index <hash>..<hash>` lines.
    4. Every hunk header must match the line counts of its hunk.

    For example:
    diff --git a/pkg/module.py b/pkg/module.py
    --- a/pkg/module.py
    +++ b/pkg/module.py
    @@ -1,3 +1,4 @@
     existing line
    +new line
"};

impl Role {
    /// The system instruction sent with every prompt for this role.
    pub fn system_instruction(self) -> &'static str {
        match self {
            Role::Documenter => indoc! {"
                You are a senior software engineer writing an implementation plan for a
                feature in an existing codebase. Another engineer will implement the
                feature from your plan alone, without seeing the task description.

                Name the files to change, the functions and classes to add or modify with
                their signatures, and the behavior each must have, including edge cases.
                Follow the conventions of the existing code. Do not write a patch.
            "},
            Role::Coder => indoc! {"
                You are a senior software engineer implementing a feature in an existing
                codebase. Produce a complete patch: every change the feature needs, in the
                style of the surrounding code, syntactically valid.
            "},
            Role::DocumentCoder => indoc! {"
                You are a senior software engineer implementing a feature in an existing
                codebase. You are given an implementation plan written by another
                engineer. Produce a complete patch that implements the plan, in the style
                of the surrounding code, syntactically valid.
            "},
        }
    }
}

/// Prompt describing a task, for the documenter and the baseline coder.
pub fn task_prompt(context: &Context, role: Role) -> String {
    let mut out = String::from("# Problem Description\n\n");

    if !context.pull_request_text.trim().is_empty() {
        out.push_str(&format!("## Pull Request\n{}\n\n", context.pull_request_text.trim()));
    }
    if !context.issue_text.trim().is_empty() {
        out.push_str(&format!("## Issue\n{}\n\n", context.issue_text.trim()));
    }
    if context.pull_request_text.trim().is_empty() && context.issue_text.trim().is_empty() {
        let feature = [&context.natural_detailed, &context.natural_brief]
            .into_iter()
            .find(|text| !text.trim().is_empty());
        if let Some(feature) = feature {
            out.push_str(&format!("## Feature\n{}\n\n", feature.trim()));
        }
    }

    out.push_str("# Repository Information\n\n");
    excerpts(&mut out, "Repository Documentation", &context.readmes, MAX_READMES, MAX_README_CHARS);

    if !context.new_components.is_empty() {
        out.push_str("## New Components to Implement\n");
        for group in &context.new_components {
            out.push_str(&format!("### File: {}\n", group.file));
            for component in &group.components {
                out.push_str(&format!("**{}**: `{}`\n", capitalize(&component.kind), component.name));
                if !component.signature.is_empty() {
                    out.push_str(&format!("```python\n{}\n```\n", component.signature));
                }
                if !component.doc.is_empty() {
                    out.push_str(&format!("Description: {}\n", component.doc));
                }
                out.push('\n');
            }
        }
    }

    excerpts(&mut out, "Relevant Code Files", &context.files, MAX_FILES, MAX_FILE_CHARS);

    out.push_str("# Task\n");
    match role {
        Role::Documenter => out.push_str(
            "Write a clear, step-by-step document explaining how to implement the feature described above.\n",
        ),
        Role::Coder | Role::DocumentCoder => {
            out.push_str("Write a patch implementing the feature described above.\n\n");
            out.push_str(PATCH_FORMAT);
        }
    }
    out
}

/// Prompt for the document-driven coder: the plan followed by the format rules.
pub fn document_prompt(document: &str) -> String {
    format!(
        "# Implementation Plan\n\n{}\n\n# Task\nWrite a patch implementing the plan above.\n\n{PATCH_FORMAT}",
        document.trim()
    )
}

fn excerpts(out: &mut String, title: &str, documents: &[Document], limit: usize, chars: usize) {
    if documents.is_empty() {
        return;
    }
    out.push_str(&format!("## {title}\n"));
    for document in documents.iter().take(limit) {
        let file = if document.file.is_empty() { "unknown" } else { document.file.as_str() };
        out.push_str(&format!("### {file}\n```\n{}\n```\n\n", truncate(&document.content, chars)));
    }
}

/// At most `chars` characters of `text`, marked when cut.
fn truncate(text: &str, chars: usize) -> String {
    match text.char_indices().nth(chars) {
        Some((end, _)) => format!("{}\n... (truncated)", &text[..end]),
        None => text.to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::from("Component"),
    }
}
