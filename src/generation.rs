//! Index generations and their on-disk layout.
//!
//! Every build gets a fresh generation with a random UUID token and its own
//! directory, `<index_dir>/gen-<token>`. The active generation is recorded
//! in `<index_dir>/ACTIVE`, a one-line file naming its directory. The
//! pointer is replaced atomically (write `ACTIVE.tmp`, then rename), so
//! after a crash it names either the old or the new generation, never a
//! half-written one.
//!
//! ```text
//! index/
//! ├── ACTIVE            -> "gen-6f1c…"
//! ├── gen-6f1c…/index.sqlite   (ACTIVE)
//! └── gen-a93e…/               (BUILDING, or an orphan after a crash)
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory name prefix shared by all generation directories.
pub const GENERATION_PREFIX: &str = "gen-";
/// Name of the active-generation pointer file.
pub const ACTIVE_POINTER: &str = "ACTIVE";
/// Temporary file used while replacing the pointer.
pub const ACTIVE_POINTER_TMP: &str = "ACTIVE.tmp";

/// Lifecycle of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationState {
    Building,
    Ready,
    Active,
    Retired,
    Failed,
}

impl GenerationState {
    pub fn can_transition_to(self, next: GenerationState) -> bool {
        use GenerationState::*;
        matches!(
            (self, next),
            (Building, Ready) | (Building, Failed) | (Ready, Active) | (Ready, Failed) | (Active, Retired)
        )
    }
}

/// One generation: identity, location, and lifecycle state.
#[derive(Debug, Clone)]
pub struct Generation {
    id: String,
    path: PathBuf,
    state: GenerationState,
}

impl Generation {
    /// Start a new generation in BUILDING state under `layout`, with an id
    /// distinct from `avoid` (normally the active generation's id).
    pub fn begin(layout: &IndexLayout, avoid: Option<&str>) -> Self {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if Some(id.as_str()) != avoid {
                let path = layout.generation_path(&id);
                return Self {
                    id,
                    path,
                    state: GenerationState::Building,
                };
            }
        }
    }

    /// A generation found on disk at startup, already promoted.
    pub fn restored(layout: &IndexLayout, id: &str) -> Self {
        Self {
            id: id.to_string(),
            path: layout.generation_path(id),
            state: GenerationState::Active,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// Move to `next`. Illegal transitions are a programming error.
    pub fn transition(&mut self, next: GenerationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal generation transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(generation = %self.id, from = ?self.state, to = ?next, "generation state");
        self.state = next;
    }
}

/// Paths inside the index directory.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    root: PathBuf,
}

impl IndexLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generation_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}{}", GENERATION_PREFIX, id))
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.root.join(ACTIVE_POINTER)
    }

    pub fn pointer_tmp_path(&self) -> PathBuf {
        self.root.join(ACTIVE_POINTER_TMP)
    }

    /// Extract the generation id from a directory name like `gen-<id>`.
    pub fn parse_generation_name(name: &str) -> Option<&str> {
        name.strip_prefix(GENERATION_PREFIX).filter(|id| {
            !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
    }

    /// Read the active generation id, if a well-formed pointer exists.
    ///
    /// A pointer that cannot be read or decoded (not UTF-8, a directory,
    /// no permission) is logged and treated as absent.
    pub fn read_active(&self) -> Option<String> {
        let path = self.pointer_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "active pointer is unreadable; ignoring it");
                return None;
            }
        };
        let id = Self::parse_generation_name(content.trim()).map(str::to_string);
        if id.is_none() {
            warn!(path = %path.display(), "active pointer does not name a generation; ignoring it");
        }
        id
    }

    /// Whether anything, readable or not, occupies the pointer path.
    pub fn pointer_exists(&self) -> bool {
        std::fs::symlink_metadata(self.pointer_path()).is_ok()
    }

    /// Atomically point the active pointer at generation `id`.
    pub fn write_active(&self, id: &str) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;

        let tmp = self.pointer_tmp_path();
        {
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            writeln!(file, "{}{}", GENERATION_PREFIX, id)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, self.pointer_path())
            .with_context(|| format!("Failed to replace {}", self.pointer_path().display()))?;
        Ok(())
    }

    /// Remove the active pointer. Missing pointer is not an error; a
    /// directory squatting on the pointer path is removed too.
    pub fn clear_active(&self) -> Result<()> {
        let path = self.pointer_path();
        let result = match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&path),
            Ok(_) => std::fs::remove_file(&path),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| "Failed to remove active pointer"),
        }
    }
}

/// Remove a directory tree; a missing directory counts as removed.
pub fn remove_storage(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_transitions() {
        use GenerationState::*;
        assert!(Building.can_transition_to(Ready));
        assert!(Building.can_transition_to(Failed));
        assert!(Ready.can_transition_to(Active));
        assert!(Active.can_transition_to(Retired));
        assert!(!Building.can_transition_to(Active));
        assert!(!Retired.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Ready));
    }

    #[test]
    fn test_new_generation_ids_are_unique_and_avoid_active() {
        let layout = IndexLayout::new("/tmp/idx");
        let a = Generation::begin(&layout, None);
        let b = Generation::begin(&layout, Some(a.id()));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), GenerationState::Building);
        assert_eq!(a.path(), layout.generation_path(a.id()));
        assert!(a
            .path()
            .ends_with(format!("{}{}", GENERATION_PREFIX, a.id())));
    }

    #[test]
    fn test_parse_generation_name() {
        assert_eq!(IndexLayout::parse_generation_name("gen-abc123"), Some("abc123"));
        assert_eq!(IndexLayout::parse_generation_name("gen-"), None);
        assert_eq!(IndexLayout::parse_generation_name("gen-../etc"), None);
        assert_eq!(IndexLayout::parse_generation_name("ACTIVE"), None);
    }

    #[test]
    fn test_pointer_roundtrip_and_clear() {
        let tmp = TempDir::new().unwrap();
        let layout = IndexLayout::new(tmp.path().join("index"));

        assert_eq!(layout.read_active(), None);
        layout.write_active("abc").unwrap();
        assert_eq!(layout.read_active(), Some("abc".to_string()));
        assert!(!layout.pointer_tmp_path().exists());

        layout.write_active("def").unwrap();
        assert_eq!(layout.read_active(), Some("def".to_string()));

        layout.clear_active().unwrap();
        assert_eq!(layout.read_active(), None);
        assert!(!layout.pointer_exists());
        layout.clear_active().unwrap();
    }

    #[test]
    fn test_garbage_pointer_reads_as_none() {
        let tmp = TempDir::new().unwrap();
        let layout = IndexLayout::new(tmp.path());
        std::fs::write(layout.pointer_path(), "not a generation\n").unwrap();
        assert_eq!(layout.read_active(), None);
        assert!(layout.pointer_exists());
    }

    #[test]
    fn test_undecodable_pointer_reads_as_none_and_clears() {
        let tmp = TempDir::new().unwrap();
        let layout = IndexLayout::new(tmp.path());
        std::fs::write(layout.pointer_path(), [0xff, 0xfe, 0x00]).unwrap();
        assert_eq!(layout.read_active(), None);
        layout.clear_active().unwrap();
        assert!(!layout.pointer_exists());
    }

    #[test]
    fn test_directory_at_pointer_path_reads_as_none_and_clears() {
        let tmp = TempDir::new().unwrap();
        let layout = IndexLayout::new(tmp.path());
        std::fs::create_dir_all(layout.pointer_path().join("junk")).unwrap();
        assert_eq!(layout.read_active(), None);
        layout.clear_active().unwrap();
        assert!(!layout.pointer_exists());
        layout.write_active("abc").unwrap();
        assert_eq!(layout.read_active(), Some("abc".to_string()));
    }

    #[test]
    fn test_remove_storage_missing_is_ok() {
        let tmp = TempDir::new().unwrap();
        remove_storage(&tmp.path().join("gone")).unwrap();
    }
}
