//! Verification pass over a contract's acceptance criteria.

use super::validators::{ValidationContext, ValidatorRegistry};
use super::{CriterionResult, RemediationCatalog, VerificationResult};
use crate::observability::SpanTimer;
use std::time::Duration;
use tracing::{debug, warn};

/// Evaluates every criterion of `ctx.contract` in declaration order.
///
/// Each validator runs under `timeout`; a timeout counts as a failure. A
/// criterion naming an unknown validator is skipped when non-critical and
/// fails when critical. The aggregate passes only if every critical
/// criterion passes.
pub(crate) async fn run_verification(
    ctx: ValidationContext<'_>,
    validators: &ValidatorRegistry,
    catalog: &RemediationCatalog,
    timeout: Duration,
) -> VerificationResult {
    let contract = ctx.contract;
    let timer = SpanTimer::start("verification", contract.id.clone());
    let mut results = Vec::with_capacity(contract.acceptance_criteria.len());

    for criterion in &contract.acceptance_criteria {
        let Some(validator) = validators.get(&criterion.validator) else {
            warn!(
                contract_id = %contract.id,
                criterion_id = %criterion.id,
                validator = %criterion.validator,
                critical = criterion.critical,
                "Unknown validator"
            );
            results.push(CriterionResult {
                criterion_id: criterion.id.clone(),
                validator: criterion.validator.clone(),
                passed: !criterion.critical,
                score: 0.0,
                evidence: Vec::new(),
                message: format!("validator '{}' is not registered", criterion.validator),
                critical: criterion.critical,
                skipped: !criterion.critical,
            });
            continue;
        };

        let outcome = match tokio::time::timeout(timeout, validator.validate(criterion, &ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    contract_id = %contract.id,
                    criterion_id = %criterion.id,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Validator timed out"
                );
                super::CriterionOutcome::fail(format!("validator timed out after {timeout:?}"))
            }
        };

        debug!(
            contract_id = %contract.id,
            criterion_id = %criterion.id,
            passed = outcome.passed,
            "Criterion evaluated"
        );
        results.push(CriterionResult {
            criterion_id: criterion.id.clone(),
            validator: criterion.validator.clone(),
            passed: outcome.passed,
            score: outcome.score,
            evidence: outcome.evidence,
            message: outcome.message,
            critical: criterion.critical,
            skipped: false,
        });
    }

    let passed = results.iter().filter(|r| r.critical).all(|r| r.passed);
    let remediation = results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| catalog.suggest(r))
        .collect();

    VerificationResult {
        contract_id: contract.id.clone(),
        passed,
        results,
        remediation,
        verified_at: crate::utils::iso_timestamp(),
        duration_ms: timer.finish(),
    }
}
