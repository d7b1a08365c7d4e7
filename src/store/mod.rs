mod atomic;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, warn};

use crate::graph::Graph;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: malformed snapshot: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: inconsistent snapshot: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to serialize graph: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// A [`Graph`] shared between threads and snapshotted to one JSON file.
///
/// Mutations run under an exclusive lock for the whole closure passed to
/// [`Store::with_graph`]; nothing is written until [`Store::save`].
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    graph: RwLock<Graph>,
    save_lock: Mutex<()>,
}

impl Store {
    /// Loads the snapshot at `path`. A missing file yields an empty graph.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let graph = load_snapshot(&path)?;
        Ok(Self {
            path,
            graph: RwLock::new(graph),
            save_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Owned copy of the current graph; later mutations do not affect it.
    pub fn graph(&self) -> Graph {
        self.read_guard().clone()
    }

    /// Runs `f` with the read lock held for its whole duration.
    pub fn read<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        f(&self.read_guard())
    }

    pub fn with_graph<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        f(&mut self.write_guard())
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let _serialized = self.save_lock.lock().unwrap_or_else(|poisoned| {
            warn!("previous save panicked; continuing");
            poisoned.into_inner()
        });
        let (bytes, claims, evidence, edges) = {
            let graph = self.read_guard();
            let bytes = serde_json::to_vec_pretty(&*graph).map_err(StoreError::Serialize)?;
            (
                bytes,
                graph.claim_count(),
                graph.evidence_count(),
                graph.edge_count(),
            )
        };
        atomic::replace_file(&self.path, &bytes).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            path = %self.path.display(),
            claims, evidence, edges, "saved graph snapshot"
        );
        Ok(())
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Graph> {
        self.graph.read().unwrap_or_else(recover)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Graph> {
        self.graph.write().unwrap_or_else(recover)
    }
}

fn recover<G>(poisoned: PoisonError<G>) -> G {
    warn!("graph lock poisoned by a panicking caller; continuing with its state");
    poisoned.into_inner()
}

fn load_snapshot(path: &Path) -> Result<Graph, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no snapshot yet; starting empty");
            return Ok(Graph::new());
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let graph: Graph = serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(reason) = graph.find_inconsistency() {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason,
        });
    }
    debug!(
        path = %path.display(),
        claims = graph.claim_count(),
        evidence = graph.evidence_count(),
        edges = graph.edge_count(),
        "loaded graph snapshot"
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::{Store, StoreError};
    use std::fs;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("data.json")).expect("open");

        let graph = store.graph();
        assert_eq!(graph.claim_count(), 0);
        assert_eq!(graph.evidence_count(), 0);
        assert_eq!(graph.edge_count(), 0);
        assert!(!dir.path().join("data.json").exists());
    }

    #[test]
    fn save_and_reopen_preserves_every_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.json");
        let store = Store::open(&path).expect("open");

        let (claim, ev) = store.with_graph(|graph| {
            let claim = graph.add_claim("test claim");
            let ev = graph
                .add_evidence("/home/user/file.go", "1-10", "abc123")
                .expect("evidence");
            graph.link_evidence(&claim.id, &ev.id).expect("link");
            graph.link_evidence(&claim.id, &ev.id).expect("dup link");
            (claim, ev)
        });
        store.save().expect("save");

        let reopened = Store::open(&path).expect("reopen");
        let graph = reopened.graph();
        assert_eq!(graph, store.graph());
        assert_eq!(graph.claim_count(), 1);
        assert_eq!(graph.evidence_count(), 1);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.get_claim(&claim.id), Some(&claim));
        assert_eq!(graph.get_evidence(&ev.id), Some(&ev));
    }

    #[test]
    fn snapshot_uses_keyed_collections_and_edge_pairs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.json");
        let store = Store::open(&path).expect("open");
        let (claim_id, ev_id) = store.with_graph(|graph| {
            let claim = graph.add_claim("c");
            let ev = graph.add_evidence("/abs/a.rs", "1", "abc").expect("ev");
            graph.link_evidence(&claim.id, &ev.id).expect("link");
            (claim.id, ev.id)
        });
        store.save().expect("save");

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["claims"][&claim_id]["content"], "c");
        assert_eq!(raw["evidence"][&ev_id]["file_path"], "/abs/a.rs");
        assert_eq!(raw["evidence"][&ev_id]["line_ref"], "1");
        assert_eq!(raw["evidence"][&ev_id]["git_commit"], "abc");
        assert!(raw["evidence"][&ev_id].get("valid").is_none());
        assert_eq!(raw["edges"][0]["claim_id"], claim_id.as_str());
        assert_eq!(raw["edges"][0]["evidence_id"], ev_id.as_str());
    }

    #[test]
    fn save_creates_nested_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("subdir/nested/data.json");
        let store = Store::open(&path).expect("open");

        store.with_graph(|graph| {
            graph.add_claim("test");
        });
        store.save().expect("save");
        assert!(path.is_file());
    }

    #[test]
    fn malformed_snapshot_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.json");
        fs::write(&path, "{not json").expect("seed");

        let err = Store::open(&path).expect_err("malformed");
        assert!(matches!(err, StoreError::Parse { .. }), "got {err:?}");
    }

    #[test]
    fn snapshot_with_relative_evidence_path_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.json");
        fs::write(
            &path,
            r#"{"evidence":{"e1":{"id":"e1","file_path":"rel/a.rs","line_ref":"1","git_commit":"abc","created_at":"2026-01-01T00:00:00Z"}},"claims":{},"edges":[]}"#,
        )
        .expect("seed");

        let err = Store::open(&path).expect_err("corrupt");
        assert!(matches!(err, StoreError::Corrupt { .. }), "got {err:?}");
    }

    #[test]
    fn partial_snapshot_fills_missing_collections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.json");
        fs::write(
            &path,
            r#"{"claims":{"c1":{"id":"c1","content":"kept","created_at":"2026-01-01T00:00:00.123456789Z"}}}"#,
        )
        .expect("seed");

        let graph = Store::open(&path).expect("open").graph();
        assert_eq!(graph.claim_count(), 1);
        assert_eq!(graph.evidence_count(), 0);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.get_claim("c1").map(|c| c.content.as_str()), Some("kept"));
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("data.json")).expect("open");
        let before = store.graph();

        store.with_graph(|graph| {
            graph.add_claim("after");
        });

        assert_eq!(before.claim_count(), 0);
        assert_eq!(store.read(|graph| graph.claim_count()), 1);
    }

    #[test]
    fn concurrent_mutations_are_all_applied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open(dir.path().join("data.json")).expect("open"));

        let handles = (0..10)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.with_graph(|graph| {
                        let claim = graph.add_claim(&format!("concurrent claim {i}"));
                        let ev = graph
                            .add_evidence("/abs/file.rs", "1", "abc")
                            .expect("evidence");
                        graph.link_evidence(&claim.id, &ev.id).expect("link");
                    });
                    store.save().expect("save");
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("thread");
        }

        assert_eq!(store.read(|graph| graph.claim_count()), 10);
        let reopened = Store::open(store.path()).expect("reopen").graph();
        assert_eq!(reopened.claim_count(), 10);
        assert_eq!(reopened.evidence_count(), 10);
        assert_eq!(reopened.edge_count(), 10);
    }
}
