pub mod index;
pub mod replay;
pub mod types;

pub use index::apply;
pub use replay::{LineKind, Replay};
pub use types::{DiffIndex, FileDiff};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("Malformed hunk header: {0}")]
    MalformedHunk(String),

    #[error("Diff context does not match old file at line {0}")]
    ContextMismatch(usize),

    #[error("Hunk starting at old line {0} overlaps the previous hunk")]
    OverlappingHunk(usize),

    #[error("Missing path in diff header: {0}")]
    MissingPath(String),
}

/// Split a multi-file unified diff into one [`FileDiff`] per `diff --git` section.
///
/// New files have `--- /dev/null`, deleted files have `+++ /dev/null`. The text
/// of each section is kept verbatim so it can be indexed and rendered on its own.
pub fn split_files(raw_diff: &str) -> Result<Vec<FileDiff>, DiffError> {
    if raw_diff.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut current: Option<FileDiff> = None;

    for line in raw_diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(done) = current.take() {
                files.push(finish(done));
            }
            let mut parts = rest.split_whitespace();
            let a_path = parts
                .next()
                .ok_or_else(|| DiffError::MissingPath(line.to_string()))?;
            let b_path = parts
                .next()
                .ok_or_else(|| DiffError::MissingPath(line.to_string()))?;
            let path = b_path
                .strip_prefix("b/")
                .or_else(|| a_path.strip_prefix("a/"))
                .unwrap_or(b_path)
                .to_string();
            current = Some(FileDiff {
                path,
                is_new: false,
                is_deleted: false,
                additions: 0,
                deletions: 0,
                text: String::new(),
            });
        }

        let Some(file) = current.as_mut() else {
            continue;
        };
        if let Some(path) = line.strip_prefix("--- ") {
            file.is_new |= path.trim() == "/dev/null";
        }
        if let Some(path) = line.strip_prefix("+++ ") {
            file.is_deleted |= path.trim() == "/dev/null";
        }
        file.text.push_str(line);
        file.text.push('\n');
    }

    if let Some(done) = current.take() {
        files.push(finish(done));
    }
    Ok(files)
}

fn finish(mut file: FileDiff) -> FileDiff {
    for line in Replay::new(&file.text) {
        match line.kind {
            LineKind::Added => file.additions += 1,
            LineKind::Removed => file.deletions += 1,
            _ => {}
        }
    }
    file
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DIFF: &str = r#"diff --git a/src/main.rs b/src/main.rs
index abc1234..def5678 100644
--- a/src/main.rs
+++ b/src/main.rs
@@ -1,3 +1,4 @@
 fn main() {
-    println!("old");
+    println!("new");
+    // Added a comment
 }
diff --git a/new_file.txt b/new_file.txt
new file mode 100644
index 0000000..e69de29
--- /dev/null
+++ b/new_file.txt
@@ -0,0 +1,2 @@
+hello
+world
diff --git a/old_file.txt b/old_file.txt
deleted file mode 100644
--- a/old_file.txt
+++ /dev/null
@@ -1,2 +0,0 @@
-hello
-world
"#;

    #[test]
    fn test_split_multi_file_diff() {
        let files = split_files(SAMPLE_DIFF).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.rs", "new_file.txt", "old_file.txt"]);
        assert_eq!((files[0].additions, files[0].deletions), (2, 1));
        assert!(files[1].is_new && !files[1].is_deleted);
        assert!(files[2].is_deleted && !files[2].is_new);
    }

    #[test]
    fn test_split_sections_index_independently() {
        let files = split_files(SAMPLE_DIFF).unwrap();
        assert!(files[0].text.starts_with("diff --git a/src/main.rs"));
        assert_eq!(
            DiffIndex::parse(&files[0].text).anchors.into_iter().collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(
            DiffIndex::parse(&files[1].text).anchors.into_iter().collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(!DiffIndex::parse(&files[2].text).has_anchors());
    }

    #[test]
    fn test_split_empty_diff() {
        assert!(split_files("").unwrap().is_empty());
        assert!(split_files("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_split_rejects_header_without_paths() {
        assert!(matches!(
            split_files("diff --git a/only\n"),
            Err(DiffError::MissingPath(_))
        ));
    }
}
