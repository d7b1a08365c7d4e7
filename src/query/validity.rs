//! Claim and evidence records annotated with freshly computed validity.
//!
//! Validity is never stored. Each lookup asks the [`GitChecker`] again, so
//! callers should pass a snapshot ([`crate::Store::graph`]) rather than hold
//! the store lock while `git` runs.

use serde::Serialize;

use crate::git::GitChecker;
use crate::graph::{ClaimNode, EvidenceNode, Graph};

/// An evidence node plus the outcome of checking it right now.
///
/// A failed check reports `valid: false` and carries the failure in
/// `check_error`, so an unverifiable link never reads as a verified one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceStatus {
    #[serde(flatten)]
    pub evidence: EvidenceNode,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimDetail {
    #[serde(flatten)]
    pub claim: ClaimNode,
    pub evidence: Vec<EvidenceStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceDetail {
    #[serde(flatten)]
    pub status: EvidenceStatus,
    /// Ids of claims this evidence supports, once per edge.
    pub claim_ids: Vec<String>,
}

pub fn claim_detail<C>(graph: &Graph, claim_id: &str, checker: &C) -> Option<ClaimDetail>
where
    C: GitChecker + ?Sized,
{
    let claim = graph.get_claim(claim_id)?.clone();
    let evidence = graph
        .evidence_for_claim(claim_id)
        .map(|node| status_of(graph, node, checker))
        .collect();
    Some(ClaimDetail { claim, evidence })
}

pub fn evidence_detail<C>(graph: &Graph, evidence_id: &str, checker: &C) -> Option<EvidenceDetail>
where
    C: GitChecker + ?Sized,
{
    let node = graph.get_evidence(evidence_id)?;
    let status = status_of(graph, node, checker);
    let claim_ids = graph
        .claims_for_evidence(evidence_id)
        .map(|claim| claim.id.clone())
        .collect();
    Some(EvidenceDetail { status, claim_ids })
}

fn status_of<C>(graph: &Graph, node: &EvidenceNode, checker: &C) -> EvidenceStatus
where
    C: GitChecker + ?Sized,
{
    let (valid, check_error) = match graph.check_evidence(&node.id, checker) {
        Ok(valid) => (valid, None),
        Err(err) => (false, Some(err.to_string())),
    };
    EvidenceStatus {
        evidence: node.clone(),
        valid,
        check_error,
    }
}
