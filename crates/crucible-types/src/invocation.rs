use std::path::PathBuf;

use uuid::Uuid;

/// The command dispatched to a worker for one pipeline component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInvocation {
    pub component_id: Uuid,
    pub working_dir: PathBuf,
    /// Encryption key for the component's encrypted scratch filesystem, if
    /// the deployment requires one. Serializes on the wire as the literal
    /// string `"NULL"` when absent — see `crucible-wire`.
    pub key_for_encfs: Option<String>,
    pub command: Vec<String>,
}

impl ComponentInvocation {
    pub fn new(working_dir: impl Into<PathBuf>, command: Vec<String>) -> Self {
        Self {
            component_id: Uuid::new_v4(),
            working_dir: working_dir.into(),
            key_for_encfs: None,
            command,
        }
    }

    pub fn with_encfs_key(mut self, key: impl Into<String>) -> Self {
        self.key_for_encfs = Some(key.into());
        self
    }
}
