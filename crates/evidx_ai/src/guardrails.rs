use evidx_core::domain::{CorrelationRequest, EvidenceBundle};
use evidx_core::error::{codes, AppError};

/// Refuse to prompt a reasoning model with nothing to reason about.
pub fn ensure_bundle_has_evidence(bundle: &EvidenceBundle) -> Result<(), AppError> {
    if bundle.values().all(|results| results.is_empty()) {
        return Err(AppError::new(
            codes::INSUFFICIENT_EVIDENCE,
            "Evidence bundle has no results in any modality",
        ));
    }
    Ok(())
}

pub fn ensure_correlation_has_evidence(req: &CorrelationRequest) -> Result<(), AppError> {
    for (modality, results) in [(req.modality_a, &req.results_a), (req.modality_b, &req.results_b)] {
        if results.is_empty() {
            return Err(AppError::new(
                codes::INSUFFICIENT_EVIDENCE,
                "Correlation requires evidence on both sides",
            )
            .with_details(format!("modality={modality}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bundles_are_rejected() {
        let mut bundle = EvidenceBundle::new();
        assert!(ensure_bundle_has_evidence(&bundle).is_err());
        bundle.insert(evidx_core::domain::Modality::Audio, Vec::new());
        let err = ensure_bundle_has_evidence(&bundle).unwrap_err();
        assert_eq!(err.code, codes::INSUFFICIENT_EVIDENCE);
    }
}
