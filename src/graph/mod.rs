mod node;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::git::{GitChecker, GitError};

pub use node::{ClaimNode, Edge, EvidenceNode};

/// Why `add_evidence` refused to create a node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("file path `{0}` must be absolute")]
    RelativePath(String),
    #[error("git commit is required")]
    EmptyCommit,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("claim `{0}` not found")]
    ClaimNotFound(String),
    #[error("evidence `{0}` not found")]
    EvidenceNotFound(String),
    #[error(transparent)]
    Git(#[from] GitError),
}

/// Claims, evidence and the edges between them.
///
/// Nodes are keyed by id; edges refer to nodes by id only and are kept in
/// insertion order. Locking and persistence live in [`crate::store`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    evidence: BTreeMap<String, EvidenceNode>,
    #[serde(default)]
    claims: BTreeMap<String, ClaimNode>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_evidence(
        &mut self,
        file_path: &str,
        line_ref: &str,
        git_commit: &str,
    ) -> Result<EvidenceNode, ValidationError> {
        validate_evidence(file_path, git_commit)?;
        let node = EvidenceNode {
            id: node::new_node_id(),
            file_path: file_path.to_string(),
            line_ref: line_ref.to_string(),
            git_commit: git_commit.to_string(),
            created_at: Utc::now(),
        };
        self.evidence.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    pub fn add_claim(&mut self, content: &str) -> ClaimNode {
        let node = ClaimNode {
            id: node::new_node_id(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.claims.insert(node.id.clone(), node.clone());
        node
    }

    /// Appends an edge even when an identical one already exists.
    pub fn link_evidence(&mut self, claim_id: &str, evidence_id: &str) -> Result<(), GraphError> {
        if !self.claims.contains_key(claim_id) {
            return Err(GraphError::ClaimNotFound(claim_id.to_string()));
        }
        if !self.evidence.contains_key(evidence_id) {
            return Err(GraphError::EvidenceNotFound(evidence_id.to_string()));
        }
        self.edges.push(Edge {
            claim_id: claim_id.to_string(),
            evidence_id: evidence_id.to_string(),
        });
        Ok(())
    }

    /// Evidence linked to `claim_id`, once per edge, in edge order.
    pub fn evidence_for_claim<'a>(
        &'a self,
        claim_id: &'a str,
    ) -> impl Iterator<Item = &'a EvidenceNode> + 'a {
        self.edges
            .iter()
            .filter(move |edge| edge.claim_id == claim_id)
            .filter_map(|edge| self.evidence.get(&edge.evidence_id))
    }

    /// Claims supported by `evidence_id`, once per edge, in edge order.
    pub fn claims_for_evidence<'a>(
        &'a self,
        evidence_id: &'a str,
    ) -> impl Iterator<Item = &'a ClaimNode> + 'a {
        self.edges
            .iter()
            .filter(move |edge| edge.evidence_id == evidence_id)
            .filter_map(|edge| self.claims.get(&edge.claim_id))
    }

    pub fn get_evidence(&self, id: &str) -> Option<&EvidenceNode> {
        self.evidence.get(id)
    }

    pub fn get_claim(&self, id: &str) -> Option<&ClaimNode> {
        self.claims.get(id)
    }

    /// Removes the claim and every edge pointing at it. Evidence is untouched.
    pub fn delete_claim(&mut self, id: &str) -> bool {
        if self.claims.remove(id).is_none() {
            return false;
        }
        self.edges.retain(|edge| edge.claim_id != id);
        true
    }

    /// Removes the evidence and every edge pointing at it. Claims are untouched.
    pub fn delete_evidence(&mut self, id: &str) -> bool {
        if self.evidence.remove(id).is_none() {
            return false;
        }
        self.edges.retain(|edge| edge.evidence_id != id);
        true
    }

    pub fn update_claim(&mut self, id: &str, content: &str) -> Option<ClaimNode> {
        let claim = self.claims.get_mut(id)?;
        claim.content = content.to_string();
        Some(claim.clone())
    }

    /// Case-insensitive substring match over claim content.
    pub fn search_claims(&self, query: &str) -> Vec<&ClaimNode> {
        let needle = query.to_lowercase();
        self.claims
            .values()
            .filter(|claim| claim.content.to_lowercase().contains(&needle))
            .collect()
    }

    /// `Ok(true)` while the evidence file is unchanged since its commit.
    ///
    /// The checker runs on every call; checker failures come back as
    /// [`GraphError::Git`].
    pub fn check_evidence<C>(&self, id: &str, checker: &C) -> Result<bool, GraphError>
    where
        C: GitChecker + ?Sized,
    {
        let evidence = self
            .evidence
            .get(id)
            .ok_or_else(|| GraphError::EvidenceNotFound(id.to_string()))?;
        let changed = checker
            .has_file_changed_since(&evidence.git_commit, Path::new(&evidence.file_path))?;
        Ok(!changed)
    }

    pub fn claims(&self) -> impl Iterator<Item = &ClaimNode> {
        self.claims.values()
    }

    pub fn evidence(&self) -> impl Iterator<Item = &EvidenceNode> {
        self.evidence.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    pub fn evidence_count(&self) -> usize {
        self.evidence.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// First stored record that a freshly built graph could never contain.
    pub(crate) fn find_inconsistency(&self) -> Option<String> {
        for (key, node) in &self.evidence {
            if key != &node.id {
                return Some(format!("evidence key `{key}` holds node `{}`", node.id));
            }
            if let Err(err) = validate_evidence(&node.file_path, &node.git_commit) {
                return Some(format!("evidence `{key}`: {err}"));
            }
        }
        for (key, node) in &self.claims {
            if key != &node.id {
                return Some(format!("claim key `{key}` holds node `{}`", node.id));
            }
        }
        None
    }
}

fn validate_evidence(file_path: &str, git_commit: &str) -> Result<(), ValidationError> {
    if !Path::new(file_path).is_absolute() {
        return Err(ValidationError::RelativePath(file_path.to_string()));
    }
    if git_commit.is_empty() {
        return Err(ValidationError::EmptyCommit);
    }
    Ok(())
}
