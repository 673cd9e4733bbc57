use std::fmt;
use std::path::{Path, PathBuf};

pub const DOCUMENT_ROOT_DIR: &str = "document";
pub const STATE_DIR: &str = "state";

/// Lifecycle position of a document, encoded as a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Pending,
    Current,
    Completed,
}

impl Stage {
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Current => "current",
            Stage::Completed => "completed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Whether `name` can be used as one path component below the data root.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && !Path::new(name).is_absolute()
}

/// Maps instance ids and stages onto the data root.
///
/// ```text
/// <root>/<instance>/document/state/{pending,current,completed}/<document id>
/// <root>/<instance>/document/<orchestration root>/<command id>/
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn document_root(&self, instance_id: &str) -> PathBuf {
        self.root.join(instance_id).join(DOCUMENT_ROOT_DIR)
    }

    pub fn state_dir(&self, instance_id: &str, stage: Stage) -> PathBuf {
        self.document_root(instance_id)
            .join(STATE_DIR)
            .join(stage.dir_name())
    }

    pub fn state_file(&self, document_id: &str, instance_id: &str, stage: Stage) -> PathBuf {
        debug_assert!(
            is_plain_name(document_id),
            "document id {document_id:?} is not a plain file name"
        );
        self.state_dir(instance_id, stage).join(document_id)
    }

    pub fn orchestration_dir(&self, instance_id: &str, orchestration_root: &str) -> PathBuf {
        self.document_root(instance_id).join(orchestration_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_file_follows_stage_directories() {
        let layout = StoreLayout::new("/var/lib/agent");
        assert_eq!(
            layout.state_file("c1", "i-1", Stage::Pending),
            PathBuf::from("/var/lib/agent/i-1/document/state/pending/c1")
        );
        assert_eq!(
            layout.orchestration_dir("i-1", "orchestration"),
            PathBuf::from("/var/lib/agent/i-1/document/orchestration")
        );
    }

    #[test]
    fn plain_names_stay_inside_their_directory() {
        assert!(is_plain_name("c1"));
        assert!(is_plain_name("0d6a3b7e-1f0c-4c57-9b1d-2f1a7a1b9c3e"));
        for name in ["", "a/b", "a\\b", "..", "../x", "x..y", "/tmp/x"] {
            assert!(!is_plain_name(name), "{name:?} accepted");
        }
    }

    #[test]
    #[should_panic(expected = "not a plain file name")]
    fn state_file_rejects_traversal() {
        StoreLayout::new("/var/lib/agent").state_file("../../x", "i-1", Stage::Pending);
    }
}
