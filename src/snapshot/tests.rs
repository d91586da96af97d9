//! Tests for snapshot module.

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::protocol::parse_file_writes;
    use crate::snapshot::{build_snapshot, PlaceholderReason, SnapshotEntry, SnapshotOptions};
    use crate::workspace::PathSandbox;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: impl AsRef<[u8]>) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn paths(entries: &[SnapshotEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path()).collect()
    }

    #[test]
    fn test_snapshot_is_sorted_and_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "src/z.ts", "z");
        write(temp_dir.path(), "README.md", "# hi\n");
        write(temp_dir.path(), "src/a.ts", "a");
        write(temp_dir.path(), "package.json", "{}");

        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        let first = build_snapshot(&sandbox, &SnapshotOptions::default()).unwrap();
        let second = build_snapshot(&sandbox, &SnapshotOptions::default()).unwrap();

        assert_eq!(
            paths(first.entries()),
            vec!["README.md", "package.json", "src/a.ts", "src/z.ts"]
        );
        assert_eq!(first.as_str(), second.as_str());
        assert_eq!(first.digest(), second.digest());
    }

    #[test]
    fn test_snapshot_framing_parses_back() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "src/util.ts", "export const x = 1;\n");
        write(temp_dir.path(), "index.html", "<div class=\"a\">hi</div>");

        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        let snapshot = build_snapshot(&sandbox, &SnapshotOptions::default()).unwrap();
        let parsed = parse_file_writes(snapshot.as_str(), false);

        assert!(parsed.errors.is_empty());
        let bodies: Vec<(&str, &str)> = parsed
            .writes
            .iter()
            .map(|w| (w.path.as_str(), w.body.as_str()))
            .collect();
        assert_eq!(
            bodies,
            vec![
                ("index.html", "<div class=\"a\">hi</div>"),
                ("src/util.ts", "export const x = 1;"),
            ]
        );
    }

    #[test]
    fn test_default_excludes_prune_directories() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "node_modules/react/index.js", "x");
        write(temp_dir.path(), "packages/app/node_modules/lib/a.js", "x");
        write(temp_dir.path(), ".git/HEAD", "ref: refs/heads/main");
        write(temp_dir.path(), "dist/bundle.js", "x");
        write(temp_dir.path(), "src/main.ts", "main");
        write(temp_dir.path(), "src/.DS_Store", "junk");

        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        let snapshot = build_snapshot(&sandbox, &SnapshotOptions::default()).unwrap();

        // Pruned directories vanish; excluded files in visited dirs become placeholders.
        assert_eq!(paths(snapshot.entries()), vec!["src/.DS_Store", "src/main.ts"]);
        assert_eq!(
            snapshot.get("src/.DS_Store"),
            Some(&SnapshotEntry::Placeholder {
                path: "src/.DS_Store".to_string(),
                reason: PlaceholderReason::Excluded,
            })
        );
    }

    #[test]
    fn test_gitignore_per_directory() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), ".gitignore", "*.log\n");
        write(temp_dir.path(), "app.log", "noise");
        write(temp_dir.path(), "sub/.gitignore", "secret.txt\n");
        write(temp_dir.path(), "sub/secret.txt", "hidden");
        write(temp_dir.path(), "sub/visible.txt", "shown");
        write(temp_dir.path(), "secret.txt", "root copy is not ignored");

        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        let snapshot = build_snapshot(&sandbox, &SnapshotOptions::default()).unwrap();
        assert_eq!(
            paths(snapshot.entries()),
            vec![".gitignore", "secret.txt", "sub/.gitignore", "sub/visible.txt"]
        );

        let options = SnapshotOptions::default().respect_gitignore(false);
        let snapshot = build_snapshot(&sandbox, &options).unwrap();
        assert!(snapshot.get("app.log").is_some());
        assert!(snapshot.get("sub/secret.txt").is_some());
    }

    #[test]
    fn test_include_and_extension_filters() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "src/a.ts", "a");
        write(temp_dir.path(), "src/b.TSX", "b");
        write(temp_dir.path(), "src/c.css", "c");
        write(temp_dir.path(), "docs/d.ts", "d");

        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        let options = SnapshotOptions::default()
            .with_include(["src/**"])
            .with_extensions([".ts", "tsx"]);
        let snapshot = build_snapshot(&sandbox, &options).unwrap();

        assert_eq!(paths(snapshot.entries()), vec!["src/a.ts", "src/b.TSX"]);
    }

    #[test]
    fn test_large_and_binary_files_become_placeholders() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "big.txt", "x".repeat(64));
        write(temp_dir.path(), "logo.png", [0x89u8, 0x50, 0x4e, 0x47, 0xff, 0xfe]);
        write(temp_dir.path(), "small.txt", "ok");

        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        let options = SnapshotOptions::default().with_max_file_size(32);
        let snapshot = build_snapshot(&sandbox, &options).unwrap();

        assert_eq!(snapshot.file_count(), 1);
        assert_eq!(snapshot.placeholder_count(), 2);
        assert!(snapshot
            .as_str()
            .contains("<sg-file path=\"big.txt\" placeholder=\"too-large\"></sg-file>"));
        assert!(snapshot
            .as_str()
            .contains("<sg-file path=\"logo.png\" placeholder=\"binary\"></sg-file>"));
        assert!(!snapshot.as_str().contains(&"x".repeat(64)));

        let options = options.include_placeholders(false);
        let snapshot = build_snapshot(&sandbox, &options).unwrap();
        assert_eq!(paths(snapshot.entries()), vec!["small.txt"]);
    }

    #[test]
    fn test_budget_exceeded() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "a.txt", "0123456789");
        write(temp_dir.path(), "b.txt", "0123456789");

        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        let options = SnapshotOptions::default().with_max_total_size(15);
        let err = build_snapshot(&sandbox, &options).unwrap_err();

        assert!(matches!(
            err,
            Error::BudgetExceeded {
                limit: 15,
                actual: 20
            }
        ));
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        let options = SnapshotOptions::default().with_include(["src/[unclosed"]);

        let err = build_snapshot(&sandbox, &options).unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }
}
