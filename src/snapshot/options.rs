//! Snapshot configuration.

/// Default per-file inline limit (1 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Default exclude globs: dependency trees, VCS metadata, build output,
/// caches and OS clutter.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/.svn/**",
    "**/.hg/**",
    "**/dist/**",
    "**/build/**",
    "**/out/**",
    "**/target/**",
    "**/.next/**",
    "**/.cache/**",
    "**/.turbo/**",
    "**/coverage/**",
    "**/.DS_Store",
    "**/Thumbs.db",
];

#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Globs an entry must match. Empty means everything.
    pub include: Vec<String>,
    /// Globs that veto an entry. A glob ending in `/**` also prunes the directory.
    pub exclude: Vec<String>,
    /// Allowed extensions (without the dot, case-insensitive). `None` allows all.
    pub extensions: Option<Vec<String>>,
    pub max_file_size: u64,
    pub respect_gitignore: bool,
    pub include_placeholders: bool,
    /// Ceiling on the sum of inlined bodies.
    pub max_total_size: Option<u64>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            extensions: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            respect_gitignore: true,
            include_placeholders: true,
            max_total_size: None,
        }
    }
}

impl SnapshotOptions {
    pub fn with_include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Add exclude globs on top of the current set.
    pub fn with_extra_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_max_total_size(mut self, bytes: u64) -> Self {
        self.max_total_size = Some(bytes);
        self
    }

    pub fn respect_gitignore(mut self, respect: bool) -> Self {
        self.respect_gitignore = respect;
        self
    }

    pub fn include_placeholders(mut self, include: bool) -> Self {
        self.include_placeholders = include;
        self
    }
}
