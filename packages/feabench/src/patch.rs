//! Unified-diff patches: detection in model output and application to a
//! working copy.

use std::{
    fmt::{self, Display, Formatter},
    io::Write as _,
    sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};

use crate::{
    outcome::Failure,
    process::{Invocation, Output},
    repo::WorkingCopy,
};

/// Lines of `git apply` output kept in failure details.
const DETAIL_LINES: usize = 20;

static TEST_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)test.*\.py$").expect("valid regex"));

/// Which patch of a task is being applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchLabel {
    /// Adds or modifies tests only.
    TestPatch,

    /// Implements the feature.
    FixPatch,
}

derive_display_from_serialize!(PatchLabel);
derive_fromstr_from_deserialize!(PatchLabel);

/// Unified diff text, as accepted by `git apply`.
///
/// An empty patch is valid and applies as a no-op.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Patch(String);

impl Patch {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Whether the text contains a diff header anywhere.
    pub fn has_diff_header(&self) -> bool {
        has_diff_header(self.0.lines())
    }

    /// Paths on the `b/` side of every `diff --git` header.
    pub fn files(&self) -> Vec<String> {
        let mut files = Vec::new();
        for line in self.0.lines() {
            let Some(header) = line.strip_prefix("diff --git ") else {
                continue;
            };
            let Some((_, path)) = header.rsplit_once(" b/") else {
                continue;
            };
            if !files.iter().any(|f| f == path) {
                files.push(path.to_string());
            }
        }
        files
    }

    /// Python test files touched by this patch, in order of first appearance.
    ///
    /// A file counts as a test file when its `b/` path contains `test` (any
    /// case) and ends in `.py`.
    pub fn test_files(&self) -> Vec<String> {
        self.files()
            .into_iter()
            .filter(|path| TEST_FILE.is_match(path))
            .collect()
    }

    /// Apply this patch to the working copy's tree and index.
    ///
    /// The diff is written to a temporary file inside the working copy and
    /// applied with `git apply --index --reject --whitespace=nowarn`; hunks
    /// that do not apply are written to `.rej` files. Success is decided by
    /// the exit status of `git apply` alone.
    #[tracing::instrument(skip(self, copy), fields(repo = %copy.repo(), label = %label))]
    pub fn apply(&self, copy: &WorkingCopy, label: PatchLabel) -> Result<(), Failure> {
        if self.is_empty() {
            tracing::warn!("no {label} text, skipping apply");
            return Ok(());
        }

        let failed = |detail: String| Failure::ApplyFailed { label, detail };

        let mut file = tempfile::Builder::new()
            .prefix(&format!(".{label}-"))
            .suffix(".patch")
            .tempfile_in(copy.path())
            .map_err(|e| failed(format!("create patch file: {e}")))?;
        file.write_all(self.0.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| failed(format!("write patch file: {e}")))?;

        let name = file
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = Invocation::new("git", copy.path())
            .args(["apply", "--index", "--reject", "--whitespace=nowarn"])
            .arg(name)
            .timeout(copy.command_timeout())
            .run()
            .map_err(|e| failed(format!("{e:#}")))?;

        if output.success() {
            Ok(())
        } else {
            tracing::error!(output = %output.combined, "patch did not apply");
            Err(failed(describe(&output)))
        }
    }
}

impl Display for Patch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Patch {
    fn from(text: String) -> Self {
        Self(text)
    }
}

fn describe(output: &Output) -> String {
    format!("{}: {}", output.describe(), output.tail(DETAIL_LINES))
}

/// A line that starts a diff: `diff --git`, or a `--- ` line followed by `+++ `.
fn has_diff_header<'a>(lines: impl Iterator<Item = &'a str>) -> bool {
    let mut previous_minus = false;
    for line in lines {
        if line.starts_with("diff --git ") {
            return true;
        }
        if previous_minus && line.starts_with("+++ ") {
            return true;
        }
        previous_minus = line.starts_with("--- ");
    }
    false
}

/// Index of the first line that starts a diff header.
fn diff_start(lines: &[&str]) -> Option<usize> {
    lines.iter().enumerate().find_map(|(i, line)| {
        let starts = line.starts_with("diff --git ")
            || (line.starts_with("--- ") && lines.get(i + 1).is_some_and(|l| l.starts_with("+++ ")));
        starts.then_some(i)
    })
}

/// Extract a unified diff from a model response.
///
/// Accepts, in order of preference:
/// 1. A response that is a diff from its first non-blank line, kept as is
///    apart from trailing fences.
/// 2. The first fenced code block that contains a diff header.
/// 3. A diff preceded by prose, taken from its first header to the end.
///
/// Only a fence at the start of a line counts; diff body lines always begin
/// with a space, `+` or `-`, so fences quoted inside a hunk are kept.
///
/// Returns `None` when no diff header appears anywhere. The returned patch
/// always ends with a newline, which `git apply` requires.
pub fn extract_patch(response: &str) -> Option<Patch> {
    let lines = response.lines().collect::<Vec<_>>();
    let first = lines.iter().position(|l| !l.trim().is_empty())?;

    if diff_start(&lines[first..]) == Some(0) {
        let mut body = &lines[first..];
        while let Some((last, rest)) = body.split_last()
            && (last.trim().is_empty() || is_fence(last))
        {
            body = rest;
        }
        return Some(finish(body));
    }

    if let Some(patch) = fenced_blocks(&lines)
        .into_iter()
        .find_map(|block| diff_start(&block).map(|start| finish(&block[start..])))
    {
        return Some(patch);
    }

    let unfenced = lines
        .iter()
        .copied()
        .filter(|l| !is_fence(l))
        .collect::<Vec<_>>();
    diff_start(&unfenced).map(|start| finish(&unfenced[start..]))
}

fn is_fence(line: &str) -> bool {
    line.starts_with("```")
}

/// The lines of each fenced code block, in order.
fn fenced_blocks<'a>(lines: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut blocks = Vec::new();
    let mut current = None::<Vec<&str>>;
    for line in lines {
        if is_fence(line) {
            match current.take() {
                Some(block) => blocks.push(block),
                None => current = Some(Vec::new()),
            }
            continue;
        }
        if let Some(block) = current.as_mut() {
            block.push(*line);
        }
    }
    blocks.extend(current);
    blocks
}

fn finish(lines: &[&str]) -> Patch {
    let mut text = lines.join("\n");
    let trimmed = text.trim_end().len();
    text.truncate(trimmed);
    text.push('\n');
    Patch(text)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;

    const DIFF: &str = indoc! {"
        diff --git a/src/foo.py b/src/foo.py
        --- a/src/foo.py
        +++ b/src/foo.py
        @@ -1 +1,2 @@
         existing
        +added
    "};

    #[test]
    fn raw_diff_is_accepted() {
        let patch = extract_patch(DIFF).unwrap();
        pretty_assert_eq!(patch.as_str(), DIFF);
    }

    #[test]
    fn fenced_diff_is_extracted() {
        let response = format!("Here is the patch:\n\n```diff\n{DIFF}```\n\nLet me know!");
        let patch = extract_patch(&response).unwrap();
        pretty_assert_eq!(patch.as_str(), DIFF);
    }

    #[test]
    fn diff_header_followed_by_fence_is_cleaned() {
        let response = format!("{DIFF}```\n");
        let patch = extract_patch(&response).unwrap();
        pretty_assert_eq!(patch.as_str(), DIFF);
    }

    #[test]
    fn fences_inside_a_bare_diff_are_kept() {
        let diff = indoc! {"
            diff --git a/README.md b/README.md
            --- a/README.md
            +++ b/README.md
            @@ -1,3 +1,4 @@
             ```python
             import lib
             ```
            +More docs.
        "};
        pretty_assert_eq!(extract_patch(diff).unwrap().as_str(), diff);
        let response = format!("{diff}```\n\n");
        pretty_assert_eq!(extract_patch(&response).unwrap().as_str(), diff);
    }

    #[test]
    fn only_the_fenced_block_with_a_diff_is_taken() {
        let response = format!(
            "Usage first:\n```python\nimport foo\n```\n```diff\n{DIFF}```\nThen:\n```python\nprint('hi')\n```\n"
        );
        let patch = extract_patch(&response).unwrap();
        pretty_assert_eq!(patch.as_str(), DIFF);
    }

    #[test]
    fn prose_before_diff_is_dropped() {
        let response = format!("I changed foo.py as follows.\n{DIFF}");
        let patch = extract_patch(&response).unwrap();
        pretty_assert_eq!(patch.as_str(), DIFF);
    }

    #[test]
    fn minus_plus_header_without_diff_git() {
        let response = "--- a/x.py\n+++ b/x.py\n@@ -1 +1 @@\n-a\n+b";
        let patch = extract_patch(response).unwrap();
        pretty_assert_eq!(patch.as_str(), "--- a/x.py\n+++ b/x.py\n@@ -1 +1 @@\n-a\n+b\n");
    }

    #[test]
    fn no_header_is_rejected() {
        pretty_assert_eq!(extract_patch("I could not produce a patch."), None);
        pretty_assert_eq!(extract_patch("```python\ndef foo(): pass\n```"), None);
        pretty_assert_eq!(extract_patch(""), None);
        pretty_assert_eq!(extract_patch("--- just a rule line\nnot a diff"), None);
    }

    #[test]
    fn index_lines_are_optional() {
        let with_index = DIFF.replacen(
            "--- a/src/foo.py",
            "index 1234567..89abcde 100644\n--- a/src/foo.py",
            1,
        );
        assert!(Patch::new(with_index).has_diff_header());
        assert!(Patch::new(DIFF).has_diff_header());
    }

    #[test]
    fn test_files_from_diff_headers() {
        let patch = Patch::new(indoc! {"
            diff --git a/tests/test_foo.py b/tests/test_foo.py
            +x
            diff --git a/src/foo.py b/src/foo.py
            +y
            diff --git a/tests/Test_Bar.py b/tests/Test_Bar.py
            +z
            diff --git a/tests/test_foo.py b/tests/test_foo.py
            +w
            diff --git a/tests/data/test_input.json b/tests/data/test_input.json
        "});
        pretty_assert_eq!(
            patch.test_files(),
            vec!["tests/test_foo.py", "tests/Test_Bar.py"]
        );
        pretty_assert_eq!(
            patch.files(),
            vec![
                "tests/test_foo.py",
                "src/foo.py",
                "tests/Test_Bar.py",
                "tests/data/test_input.json"
            ]
        );
    }

    #[test]
    fn empty_patch() {
        assert!(Patch::default().is_empty());
        assert!(Patch::new("  \n").is_empty());
        assert!(!Patch::new(DIFF).is_empty());
    }

    #[test]
    fn label_text() {
        pretty_assert_eq!(PatchLabel::TestPatch.to_string(), "test_patch");
        pretty_assert_eq!(PatchLabel::FixPatch.to_string(), "fix_patch");
    }
}
