mod args;
mod paths;

pub use args::{Cli, Commands, SnapshotArgs};
pub use paths::{format_size, resolve_existing_root, resolve_workspace_root};

use sgforge::SnapshotOptions;

impl SnapshotArgs {
    pub fn to_options(&self) -> SnapshotOptions {
        let mut options = SnapshotOptions::default()
            .with_extra_excludes(self.exclude.iter().cloned())
            .respect_gitignore(!self.no_gitignore)
            .include_placeholders(!self.no_placeholders);
        if !self.include.is_empty() {
            options = options.with_include(self.include.iter().cloned());
        }
        if !self.extensions.is_empty() {
            options = options.with_extensions(self.extensions.iter().cloned());
        }
        if let Some(max) = self.max_file_size {
            options = options.with_max_file_size(max);
        }
        if let Some(max) = self.max_total_size {
            options = options.with_max_total_size(max);
        }
        options
    }
}
