//! Quality contracts between phases.
//!
//! A [`UniversalContract`] states what a provider phase owes a consumer
//! phase and how to check it. The [`ContractRegistry`] owns every contract's
//! lifecycle, keeps the dependency graph between contracts, runs
//! verification through named [`Validator`]s and mediates negotiation,
//! amendment and breach handling.

mod compat;
mod graph;
mod model;
mod negotiation;
mod registry;
mod remediation;
mod validators;
mod verification;

pub use compat::{check_compatibility, check_compatibility_with, ChangeKind, CompatibilityReport};
pub use model::{
    AcceptanceCriterion, Breach, BreachRecord, ContractPriority, ContractState, CriterionResult,
    RemediationSuggestion, SchemaVersion, UniversalContract, VerificationResult, Waiver,
};
pub use negotiation::{ContractAmendment, NegotiationKind, NegotiationRecord, NegotiationStatus};
pub use registry::{AmendmentOutcome, ContractRegistry, InputGate, LateBreachResolution};
pub use remediation::{RemediationCatalog, RemediationEntry};
pub use validators::{
    ArtifactExists, ArtifactIntegrity, ContentMatches, CriterionOutcome, ManualApproval, OutputField,
    ValidationContext, Validator, ValidatorRegistry,
};

/// The serialized contract document exchanged with other systems.
pub type ContractDocument = UniversalContract;
