pub mod validity;

pub use validity::{ClaimDetail, EvidenceDetail, EvidenceStatus, claim_detail, evidence_detail};
