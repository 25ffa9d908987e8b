//! Applying patches to a real working copy.

use std::fs::read_to_string;

use feabench::{
    Failure,
    patch::{Patch, PatchLabel},
    repo::{RepoId, WorkingCopy},
};
use pretty_assertions::assert_eq as pretty_assert_eq;
use simple_test_case::test_case;
use xshell::{Shell, cmd};

use crate::{CONFLICTING_PATCH, FIX_PATCH, Fixture, TEST_PATCH};

fn working_copy(fixture: &Fixture) -> WorkingCopy {
    fixture.remote("org/lib");
    let repo = "org/lib".parse::<RepoId>().unwrap();
    fixture.registry().ensure_cloned(&repo).unwrap()
}

fn status(copy: &WorkingCopy) -> String {
    let sh = Shell::new().unwrap();
    sh.change_dir(copy.path());
    cmd!(sh, "git status --porcelain").read().unwrap()
}

#[test]
fn patches_apply_cumulatively() {
    let fixture = Fixture::new();
    let copy = working_copy(&fixture);

    Patch::new(TEST_PATCH)
        .apply(&copy, PatchLabel::TestPatch)
        .unwrap();
    Patch::new(FIX_PATCH)
        .apply(&copy, PatchLabel::FixPatch)
        .unwrap();

    pretty_assert_eq!(
        read_to_string(copy.path().join("src/foo.txt")).unwrap(),
        "foo\n"
    );
    assert!(copy.path().join("tests/test_foo.txt").is_file());
    // `--index` stages the change and the patch file is gone.
    pretty_assert_eq!(status(&copy), "A  src/foo.txt\nA  tests/test_foo.txt");
}

#[test_case(""; "empty")]
#[test_case("\n  \n"; "whitespace")]
#[test]
fn empty_patch_is_a_no_op(text: &str) {
    let fixture = Fixture::new();
    let copy = working_copy(&fixture);

    Patch::new(text).apply(&copy, PatchLabel::FixPatch).unwrap();
    pretty_assert_eq!(status(&copy), "");
}

#[test_case(CONFLICTING_PATCH; "conflicting")]
#[test_case("this is not a diff\n"; "garbage")]
#[test]
fn bad_patch_is_an_apply_failure(text: &str) {
    let fixture = Fixture::new();
    let copy = working_copy(&fixture);

    let failure = Patch::new(text)
        .apply(&copy, PatchLabel::FixPatch)
        .unwrap_err();
    match failure {
        Failure::ApplyFailed { label, detail } => {
            pretty_assert_eq!(label, PatchLabel::FixPatch);
            assert!(!detail.is_empty());
        }
        other => panic!("expected an apply failure, got {other:?}"),
    }
}
