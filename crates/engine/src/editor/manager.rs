//! `EditorManager`: the authoritative interface to one working tree
//! (spec §4.1). Apply-then-review: mutations land on disk immediately,
//! `Change` records are metadata describing what happened and whether it
//! has been reviewed yet.

use super::binary::looks_binary;
use super::change::{Change, ChangeStatus, Operation};
use super::diff::unified_diff;
use super::path_guard;
use crate::error::{EngineError, EngineResult};

use grep_regex::RegexMatcherBuilder;
use grep_searcher::sinks::Lossy;
use grep_searcher::Searcher;
use ignore::WalkBuilder;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub is_dir: bool,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub path: String,
    pub line_number: u64,
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResult {
    pub content: Vec<u8>,
    pub is_binary: bool,
}

/// Per-file write lock registry. Kept separate from `pending`/`history` so
/// readers never contend with the bookkeeping mutex.
#[derive(Default)]
struct LockTable {
    locks: SyncMutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    fn get(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub struct EditorManager {
    root: PathBuf,
    max_file_size_bytes: u64,
    locks: LockTable,
    pending: SyncMutex<HashMap<String, Change>>,
    history: SyncMutex<Vec<Change>>,
}

impl EditorManager {
    pub fn new(root: PathBuf, max_file_size_bytes: u64) -> Self {
        Self {
            root,
            max_file_size_bytes,
            locks: LockTable::default(),
            pending: SyncMutex::new(HashMap::new()),
            history: SyncMutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn read(&self, path: &str) -> EngineResult<ReadResult> {
        let resolved = path_guard::resolve(&self.root, path)?;
        let metadata = fs::metadata(&resolved)?;
        if metadata.is_dir() {
            return Err(EngineError::InvalidInput(format!("{path} is a directory")));
        }
        if metadata.len() > self.max_file_size_bytes {
            return Err(EngineError::TooLarge(format!(
                "{path} exceeds {} bytes",
                self.max_file_size_bytes
            )));
        }
        let content = fs::read(&resolved)?;
        let is_binary = looks_binary(&content);
        Ok(ReadResult {
            content: if is_binary { Vec::new() } else { content },
            is_binary,
        })
    }

    pub fn browse(&self, path: &str, include_hidden: bool) -> EngineResult<Vec<Entry>> {
        let resolved = path_guard::resolve(&self.root, path)?;
        if !resolved.is_dir() {
            return Err(EngineError::InvalidInput(format!("{path} is not a directory")));
        }
        let mut entries = Vec::new();
        for item in fs::read_dir(&resolved)? {
            let item = item?;
            let name = item.file_name().to_string_lossy().into_owned();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            let metadata = item.metadata()?;
            let modified_at = metadata
                .modified()
                .ok()
                .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            entries.push(Entry {
                name,
                is_dir: metadata.is_dir(),
                size: metadata.len(),
                modified_at,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub fn tree(&self, max_depth: usize, max_nodes: usize) -> EngineResult<TreeNode> {
        let mut budget = max_nodes;
        self.tree_recurse(&self.root, 0, max_depth, &mut budget)
    }

    fn tree_recurse(
        &self,
        dir: &Path,
        depth: usize,
        max_depth: usize,
        budget: &mut usize,
    ) -> EngineResult<TreeNode> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());
        let mut children = Vec::new();
        if depth < max_depth && *budget > 0 {
            let mut items: Vec<_> = fs::read_dir(dir)?.filter_map(Result::ok).collect();
            items.sort_by_key(|e| e.file_name());
            for item in items {
                if *budget == 0 {
                    break;
                }
                *budget -= 1;
                let path = item.path();
                if path.is_dir() {
                    children.push(self.tree_recurse(&path, depth + 1, max_depth, budget)?);
                } else {
                    children.push(TreeNode {
                        name: item.file_name().to_string_lossy().into_owned(),
                        is_dir: false,
                        children: Vec::new(),
                    });
                }
            }
        }
        Ok(TreeNode { name, is_dir: true, children })
    }

    pub fn search(
        &self,
        query: &str,
        path: Option<&str>,
        case_sensitive: bool,
        max_hits: usize,
    ) -> EngineResult<Vec<Hit>> {
        let root = match path {
            Some(p) => path_guard::resolve(&self.root, p)?,
            None => self.root.clone(),
        };
        let matcher = RegexMatcherBuilder::new()
            .case_insensitive(!case_sensitive)
            .build(query)
            .map_err(|e| EngineError::InvalidInput(format!("bad search pattern: {e}")))?;

        let mut hits = Vec::new();
        'walk: for result in WalkBuilder::new(&root)
            .hidden(false)
            .git_ignore(true)
            .standard_filters(true)
            .build()
        {
            let entry = match result {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let file_path = entry.path().to_owned();
            if fs::read(&file_path)
                .map(|bytes| looks_binary(&bytes))
                .unwrap_or(true)
            {
                continue;
            }
            let display_path = file_path
                .strip_prefix(&self.root)
                .unwrap_or(&file_path)
                .to_string_lossy()
                .into_owned();

            let mut local_hits = Vec::new();
            let search_result = Searcher::new().search_path(
                &matcher,
                &file_path,
                Lossy(|lnum, line| {
                    local_hits.push(Hit {
                        path: display_path.clone(),
                        line_number: lnum,
                        line: line.to_string(),
                    });
                    Ok(true)
                }),
            );
            if search_result.is_err() {
                continue;
            }
            for hit in local_hits {
                hits.push(hit);
                if hits.len() >= max_hits {
                    break 'walk;
                }
            }
        }
        Ok(hits)
    }

    pub async fn create_change(
        &self,
        file_path: &str,
        operation: Operation,
        new_content: Option<Vec<u8>>,
        old_path: Option<&str>,
        generate_diff: bool,
        agent: Option<String>,
        block: Option<String>,
    ) -> EngineResult<Change> {
        let resolved = path_guard::resolve(&self.root, file_path)?;
        let resolved_old = old_path.map(|p| path_guard::resolve(&self.root, p)).transpose()?;

        // Lock ordering: lexicographic over the two paths involved, so two
        // concurrent moves between the same pair of files can't deadlock.
        let mut lock_paths = vec![resolved.clone()];
        if let Some(old) = &resolved_old {
            lock_paths.push(old.clone());
        }
        lock_paths.sort();
        lock_paths.dedup();
        let locks: Vec<_> = lock_paths.iter().map(|p| self.locks.get(p)).collect();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }

        let old_content = match operation {
            Operation::Create => None,
            _ => fs::read(&resolved).ok(),
        };

        if operation == Operation::Create && resolved.exists() {
            return Err(EngineError::Conflict(format!("{file_path} already exists")));
        }

        let diff = if generate_diff {
            let old_text = old_content.as_deref().map(|b| String::from_utf8_lossy(b).into_owned());
            let new_text = new_content.as_deref().map(|b| String::from_utf8_lossy(b).into_owned());
            match (old_text, new_text) {
                (Some(o), Some(n)) => unified_diff(file_path, &o, &n),
                (None, Some(n)) => unified_diff(file_path, "", &n),
                (Some(o), None) => unified_diff(file_path, &o, ""),
                (None, None) => None,
            }
        } else {
            None
        };

        let change = Change {
            id: Uuid::new_v4().to_string(),
            file_path: PathBuf::from(file_path),
            operation,
            old_content,
            new_content,
            old_path: old_path.map(PathBuf::from),
            status: ChangeStatus::Pending,
            created_at: time::OffsetDateTime::now_utc().unix_timestamp(),
            diff,
            agent,
            block,
        };
        // Validate before touching disk: an `Update` against a path that
        // doesn't exist yet has no old_content and must be rejected here,
        // not after the write has already landed.
        change
            .validate_shape()
            .map_err(EngineError::InvalidInput)?;

        self.apply_to_disk(
            &resolved,
            operation,
            change.new_content.as_deref(),
            resolved_old.as_deref(),
        )?;

        self.pending.lock().insert(change.id.clone(), change.clone());
        drop(guards);
        Ok(change)
    }

    fn apply_to_disk(
        &self,
        target: &Path,
        operation: Operation,
        new_content: Option<&[u8]>,
        old_path: Option<&Path>,
    ) -> EngineResult<()> {
        match operation {
            Operation::Create | Operation::Update => {
                let content = new_content
                    .ok_or_else(|| EngineError::InvalidInput("missing new_content".to_string()))?;
                atomic_write(target, content)?;
            }
            Operation::Delete => {
                if target.exists() {
                    fs::remove_file(target)?;
                }
            }
            Operation::Move => {
                let source = old_path
                    .ok_or_else(|| EngineError::InvalidInput("missing old_path".to_string()))?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(source, target)?;
            }
        }
        Ok(())
    }

    pub fn approve(&self, change_id: &str) -> EngineResult<()> {
        let mut change = self.take_pending(change_id)?;
        change.status = ChangeStatus::Approved;
        self.history.lock().push(change);
        Ok(())
    }

    pub fn reject(&self, change_id: &str) -> EngineResult<()> {
        let mut change = self.take_pending(change_id)?;
        self.revert(&change)?;
        change.status = ChangeStatus::Rejected;
        self.history.lock().push(change);
        Ok(())
    }

    /// Produces a new compensating `Change` rather than rewriting history
    /// (spec §9 Open Question: single compensating change, not reconstructed
    /// intermediate history).
    pub fn rollback(&self, change_id: &str) -> EngineResult<Change> {
        let original = {
            let history = self.history.lock();
            history
                .iter()
                .find(|c| c.id == change_id && c.status == ChangeStatus::Approved)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("approved change {change_id}")))?
        };
        self.revert(&original)?;

        let compensating = Change {
            id: Uuid::new_v4().to_string(),
            file_path: original.file_path.clone(),
            operation: original.operation,
            old_content: original.new_content.clone(),
            new_content: original.old_content.clone(),
            old_path: original.old_path.clone(),
            status: ChangeStatus::Approved,
            created_at: time::OffsetDateTime::now_utc().unix_timestamp(),
            diff: None,
            agent: None,
            block: original.block.clone(),
        };
        self.history.lock().push(compensating.clone());
        Ok(compensating)
    }

    fn revert(&self, change: &Change) -> EngineResult<()> {
        let target = path_guard::resolve(&self.root, &change.file_path.to_string_lossy())?;
        match change.operation {
            Operation::Create => {
                if target.exists() {
                    fs::remove_file(&target)?;
                }
            }
            Operation::Delete => {
                if let Some(old) = &change.old_content {
                    atomic_write(&target, old)?;
                }
            }
            Operation::Update => {
                if let Some(old) = &change.old_content {
                    atomic_write(&target, old)?;
                }
            }
            Operation::Move => {
                if let Some(old_path) = &change.old_path {
                    let source = path_guard::resolve(&self.root, &old_path.to_string_lossy())?;
                    if target.exists() {
                        fs::rename(&target, &source)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn take_pending(&self, change_id: &str) -> EngineResult<Change> {
        self.pending
            .lock()
            .remove(change_id)
            .ok_or_else(|| EngineError::NotFound(format!("change {change_id}")))
    }

    pub fn list_changes(&self, status_filter: Option<ChangeStatus>) -> Vec<Change> {
        let mut all: Vec<Change> = self.pending.lock().values().cloned().collect();
        all.extend(self.history.lock().iter().cloned());
        all.sort_by_key(|c| c.created_at);
        match status_filter {
            Some(status) => all.into_iter().filter(|c| c.status == status).collect(),
            None => all,
        }
    }

    pub async fn create_directory(&self, path: &str) -> EngineResult<()> {
        let resolved = path_guard::resolve(&self.root, path)?;
        fs::create_dir_all(resolved)?;
        Ok(())
    }

    pub async fn move_path(
        &self,
        old: &str,
        new: &str,
        agent: Option<String>,
        block: Option<String>,
    ) -> EngineResult<Change> {
        self.create_change(new, Operation::Move, None, Some(old), false, agent, block)
            .await
    }

    pub async fn delete(
        &self,
        path: &str,
        agent: Option<String>,
        block: Option<String>,
    ) -> EngineResult<Change> {
        self.create_change(path, Operation::Delete, None, None, false, agent, block)
            .await
    }
}

fn atomic_write(target: &Path, content: &[u8]) -> EngineResult<()> {
    let parent = target
        .parent()
        .ok_or_else(|| EngineError::InvalidInput("path has no parent".to_string()))?;
    fs::create_dir_all(parent)?;
    let tmp_path = parent.join(format!(".{}.tmp-{}", file_stem(target), Uuid::new_v4()));
    {
        let mut tmp_file = fs::File::create(&tmp_path)?;
        tmp_file.write_all(content)?;
        tmp_file.sync_all()?;
    }
    fs::rename(&tmp_path, target)?;
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, EditorManager) {
        let tmp = TempDir::new().unwrap();
        let manager = EditorManager::new(tmp.path().to_path_buf(), 10 * 1024 * 1024);
        (tmp, manager)
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let (_tmp, manager) = manager();
        let change = manager
            .create_change("a.txt", Operation::Create, Some(b"hello".to_vec()), None, true, None, None)
            .await
            .unwrap();
        assert_eq!(change.status, ChangeStatus::Pending);
        let read = manager.read("a.txt").unwrap();
        assert_eq!(read.content, b"hello");
    }

    #[tokio::test]
    async fn create_over_existing_conflicts() {
        let (_tmp, manager) = manager();
        manager
            .create_change("a.txt", Operation::Create, Some(b"hello".to_vec()), None, false, None, None)
            .await
            .unwrap();
        let result = manager
            .create_change("a.txt", Operation::Create, Some(b"again".to_vec()), None, false, None, None)
            .await;
        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }

    #[tokio::test]
    async fn reject_reverts_to_old_content() {
        let (_tmp, manager) = manager();
        manager
            .create_change("a.txt", Operation::Create, Some(b"A".to_vec()), None, false, None, None)
            .await
            .unwrap();
        let change = manager
            .create_change("a.txt", Operation::Update, Some(b"B".to_vec()), None, false, None, None)
            .await
            .unwrap();
        manager.reject(&change.id).unwrap();
        let read = manager.read("a.txt").unwrap();
        assert_eq!(read.content, b"A");
    }

    #[tokio::test]
    async fn reject_in_reverse_order_scenario() {
        let (_tmp, manager) = manager();
        let c1 = manager
            .create_change("f.txt", Operation::Create, Some(b"A".to_vec()), None, false, None, None)
            .await
            .unwrap();
        let c2 = manager
            .create_change("f.txt", Operation::Update, Some(b"B".to_vec()), None, false, None, None)
            .await
            .unwrap();
        manager.reject(&c2.id).unwrap();
        assert_eq!(manager.read("f.txt").unwrap().content, b"A");
        manager.reject(&c1.id).unwrap();
        assert!(manager.read("f.txt").is_err());
    }

    #[tokio::test]
    async fn rollback_produces_compensating_change() {
        let (_tmp, manager) = manager();
        let change = manager
            .create_change("a.txt", Operation::Create, Some(b"A".to_vec()), None, false, None, None)
            .await
            .unwrap();
        manager.approve(&change.id).unwrap();
        let compensating = manager.rollback(&change.id).unwrap();
        assert_ne!(compensating.id, change.id);
        assert!(manager.read("a.txt").is_err());
    }

    #[tokio::test]
    async fn search_finds_substring() {
        let (_tmp, manager) = manager();
        manager
            .create_change(
                "main.rs",
                Operation::Create,
                Some(b"fn main() {}\n".to_vec()),
                None,
                false,
                None,
                None,
            )
            .await
            .unwrap();
        let hits = manager.search("fn main", None, true, 500).unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].path.contains("main.rs"));
    }

    #[tokio::test]
    async fn diff_skipped_when_not_requested() {
        let (_tmp, manager) = manager();
        let change = manager
            .create_change("a.txt", Operation::Create, Some(b"A".to_vec()), None, false, None, None)
            .await
            .unwrap();
        assert!(change.diff.is_none());
    }

    #[tokio::test]
    async fn list_changes_filters_by_status() {
        let (_tmp, manager) = manager();
        let change = manager
            .create_change("a.txt", Operation::Create, Some(b"A".to_vec()), None, false, None, None)
            .await
            .unwrap();
        manager.approve(&change.id).unwrap();
        let approved = manager.list_changes(Some(ChangeStatus::Approved));
        assert_eq!(approved.len(), 1);
        let pending = manager.list_changes(Some(ChangeStatus::Pending));
        assert!(pending.is_empty());
    }
}
