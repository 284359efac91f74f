//! Git tracker: stages and commits tracked-file changes at phase boundaries,
//! and answers the dirty-check used to refuse starting a run over unstaged
//! work. Untracked files never factor into either decision.

use anyhow::{Context, Result};
use git2::{Delta, DiffOptions, Repository, Signature, StatusOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: PathBuf,
    pub change_type: ChangeType,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub diff_content: String,
}

#[derive(Debug, Clone, Default)]
pub struct FileChangeSummary {
    pub files_added: Vec<PathBuf>,
    pub files_modified: Vec<PathBuf>,
    pub files_deleted: Vec<PathBuf>,
    pub total_lines_added: usize,
    pub total_lines_removed: usize,
}

impl FileChangeSummary {
    pub fn total_files(&self) -> usize {
        self.files_added.len() + self.files_modified.len() + self.files_deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_files() == 0
    }
}

pub struct GitTracker {
    repo: Repository,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("failed to open git repository")?;
        Ok(Self { repo })
    }

    fn get_head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo.head().ok().and_then(|head| head.peel_to_commit().ok())
    }

    pub fn head_sha(&self) -> Option<String> {
        self.get_head_commit().map(|c| c.id().to_string())
    }

    /// Paths with staged or working-tree changes against a tracked blob.
    /// Untracked files are excluded so they can never trigger a commit or a
    /// dirty-check refusal.
    pub fn tracked_changes(&self) -> Result<Vec<PathBuf>> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        let mut paths = Vec::new();
        for entry in statuses.iter() {
            let status = entry.status();
            let tracked = status.is_index_new()
                || status.is_index_modified()
                || status.is_index_deleted()
                || status.is_index_renamed()
                || status.is_index_typechange()
                || status.is_wt_modified()
                || status.is_wt_deleted()
                || status.is_wt_renamed()
                || status.is_wt_typechange();
            if tracked {
                if let Some(path) = entry.path() {
                    paths.push(PathBuf::from(path));
                }
            }
        }
        Ok(paths)
    }

    pub fn has_tracked_changes(&self) -> Result<bool> {
        Ok(!self.tracked_changes()?.is_empty())
    }

    /// Stage every tracked modification (never adds untracked files, mirroring
    /// `git add -u`) and commit with the phase-boundary message template.
    /// Returns `Ok(None)` without touching the index if there is nothing
    /// tracked to commit.
    pub fn commit_phase_boundary(
        &self,
        phase_id: &str,
        title: &str,
        icon: &str,
        worker_model: &str,
    ) -> Result<Option<String>> {
        if !self.has_tracked_changes()? {
            return Ok(None);
        }

        let mut index = self.repo.index()?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now("Debussy", "debussy@localhost")?;
        let message = format!(
            "Debussy: Phase {phase_id} - {title} {icon}\n\nCo-Authored-By: {worker_model} <noreply@anthropic.com>"
        );

        let commit_id = if let Some(parent) = self.get_head_commit() {
            self.repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?
        } else {
            self.repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[])?
        };

        Ok(Some(commit_id.to_string()))
    }

    /// Compute changes since a prior commit, for `debussy status`/`history`.
    pub fn compute_changes(&self, before_sha: &str) -> Result<FileChangeSummary> {
        let before_oid = git2::Oid::from_str(before_sha)?;
        let before_commit = self.repo.find_commit(before_oid)?;
        let before_tree = before_commit.tree()?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true);

        let diff = self.repo.diff_tree_to_workdir_with_index(Some(&before_tree), Some(&mut opts))?;

        let mut summary = FileChangeSummary::default();

        diff.foreach(
            &mut |delta, _progress| {
                if let Some(path) = delta.new_file().path() {
                    let path_buf = path.to_path_buf();
                    match delta.status() {
                        Delta::Added | Delta::Untracked => summary.files_added.push(path_buf),
                        Delta::Modified => summary.files_modified.push(path_buf),
                        Delta::Deleted => summary.files_deleted.push(path_buf),
                        _ => {}
                    }
                }
                true
            },
            None,
            None,
            Some(&mut |_delta, _hunk, line| {
                match line.origin() {
                    '+' => summary.total_lines_added += 1,
                    '-' => summary.total_lines_removed += 1,
                    _ => {}
                }
                true
            }),
        )?;

        Ok(summary)
    }

    pub fn get_full_diffs(&self, before_sha: &str) -> Result<Vec<FileDiff>> {
        let before_oid = git2::Oid::from_str(before_sha)?;
        let before_commit = self.repo.find_commit(before_oid)?;
        let before_tree = before_commit.tree()?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true);

        let diff = self.repo.diff_tree_to_workdir_with_index(Some(&before_tree), Some(&mut opts))?;

        let mut file_diffs = Vec::new();

        for delta_idx in 0..diff.deltas().len() {
            let Some(delta) = diff.get_delta(delta_idx) else {
                continue;
            };
            let Some(path) = delta.new_file().path() else {
                continue;
            };
            let path = path.to_path_buf();

            let change_type = match delta.status() {
                Delta::Added | Delta::Untracked => ChangeType::Added,
                Delta::Modified => ChangeType::Modified,
                Delta::Deleted => ChangeType::Deleted,
                Delta::Renamed => ChangeType::Renamed,
                _ => continue,
            };

            let mut lines_added = 0;
            let mut lines_removed = 0;
            let mut diff_content = String::new();

            if let Ok(Some(mut patch)) = git2::Patch::from_diff(&diff, delta_idx) {
                let mut buf = Vec::new();
                patch
                    .print(&mut |_delta, _hunk, line| {
                        match line.origin() {
                            '+' => lines_added += 1,
                            '-' => lines_removed += 1,
                            _ => {}
                        }
                        buf.extend_from_slice(line.content());
                        true
                    })
                    .ok();
                diff_content = String::from_utf8_lossy(&buf).to_string();
            }

            file_diffs.push(FileDiff {
                path,
                change_type,
                lines_added,
                lines_removed,
                diff_content,
            });
        }

        Ok(file_diffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> (GitTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let tracker = GitTracker::new(dir.path()).unwrap();
        (tracker, dir)
    }

    fn commit_file(dir: &Path, name: &str, content: &str, msg: &str) {
        let repo = Repository::open(dir).unwrap();
        let file_path = dir.join(name);
        fs::write(&file_path, content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        if let Ok(head) = repo.head() {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent]).unwrap();
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[]).unwrap();
        }
    }

    #[test]
    fn head_sha_unborn_then_populated() {
        let (tracker, dir) = setup_repo();
        assert!(tracker.head_sha().is_none());
        commit_file(dir.path(), "a.txt", "hello", "init");
        let sha = tracker.head_sha();
        assert!(sha.is_some());
        assert_eq!(sha.unwrap().len(), 40);
    }

    #[test]
    fn untracked_file_is_not_a_tracked_change() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "hello", "init");
        fs::write(dir.path().join("scratch.tmp"), "junk").unwrap();
        assert!(!tracker.has_tracked_changes().unwrap());
    }

    #[test]
    fn modified_tracked_file_is_dirty() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "hello", "init");
        fs::write(dir.path().join("a.txt"), "changed").unwrap();
        assert!(tracker.has_tracked_changes().unwrap());
    }

    #[test]
    fn commit_phase_boundary_noop_without_tracked_changes() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "hello", "init");
        fs::write(dir.path().join("untracked.tmp"), "junk").unwrap();
        let result = tracker.commit_phase_boundary("1", "Setup", "\u{2705}", "claude").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn commit_phase_boundary_commits_tracked_changes_only() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "hello", "init");
        fs::write(dir.path().join("a.txt"), "changed").unwrap();
        fs::write(dir.path().join("untracked.tmp"), "junk").unwrap();
        let sha = tracker
            .commit_phase_boundary("1", "Setup", "\u{2705}", "claude")
            .unwrap()
            .expect("tracked change should produce a commit");
        assert_eq!(sha.len(), 40);

        let head = tracker.get_head_commit().unwrap();
        assert!(head.message().unwrap().starts_with("Debussy: Phase 1 - Setup"));

        let status_after = tracker.repo.statuses(None).unwrap();
        let untracked_still_present = status_after
            .iter()
            .any(|e| e.path() == Some("untracked.tmp") && e.status().is_wt_new());
        assert!(untracked_still_present);
    }

    #[test]
    fn compute_changes_detects_added_file() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "existing.txt", "original", "init");
        let sha = tracker.head_sha().unwrap();
        fs::write(dir.path().join("new_file.rs"), "fn main() {}").unwrap();
        let summary = tracker.compute_changes(&sha).unwrap();
        assert!(summary.files_added.iter().any(|p| p.ends_with("new_file.rs")));
    }

    #[test]
    fn compute_changes_no_changes() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "stable.txt", "unchanged\n", "init");
        let sha = tracker.head_sha().unwrap();
        let summary = tracker.compute_changes(&sha).unwrap();
        assert!(summary.is_empty());
    }

    #[test]
    fn get_full_diffs_content() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "src.rs", "fn old() {}\n", "init");
        let sha = tracker.head_sha().unwrap();
        fs::write(dir.path().join("src.rs"), "fn new() {}\nfn extra() {}\n").unwrap();
        let diffs = tracker.get_full_diffs(&sha).unwrap();
        let diff = diffs.iter().find(|d| d.path.ends_with("src.rs")).unwrap();
        assert!(!diff.diff_content.is_empty());
    }
}
