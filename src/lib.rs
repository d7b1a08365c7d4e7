pub mod config;
pub mod git;
pub mod graph;
pub mod query;
pub mod store;

pub use git::{ExecGitChecker, GitChecker, GitError};
pub use graph::{ClaimNode, Edge, EvidenceNode, Graph, GraphError, ValidationError};
pub use store::{Store, StoreError};
