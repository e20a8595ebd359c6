pub const FORENSIC_SYSTEM: &str =
    "You are a forensic detective specialized in analyzing multimodal evidence.";

pub const CROSS_MODAL_SYSTEM: &str =
    "You are an expert in forensic analysis of multimodal evidence.";

pub fn suspect_report_prompt(evidence_summary: &str) -> String {
    format!(
        r#"You are a forensic detective specialized in analyzing multimodal evidence for the Gotham City crime case.

COLLECTED EVIDENCE:
{evidence_summary}

Analyze the evidence above and provide:

1. IDENTIFIED PATTERNS:
- Connections between different kinds of evidence
- Relevant temporal or spatial patterns
- Distinguishing characteristics of the suspect

2. PROBABLE SUSPECT:
- Identity of the main suspect
- Confidence level in the identification (0-100%)
- Justification for the identification

3. NEXT STEPS:
- Recommendations for the investigation
- Additional evidence needed
- Areas that need further investigation

Write the report clearly and professionally."#
    )
}

/// `block_a` and `block_b` are formatted result blocks, each carrying its own modality header.
pub fn cross_modal_prompt(block_a: &str, block_b: &str) -> String {
    format!(
        r#"Analyze the relationship between the following evidence from different modalities:
{block_a}
{block_b}

Identify:
1. Direct connections between the pieces of evidence
2. Patterns suggesting the same suspect
3. Inconsistencies or contradictions
4. Correlation strength (0-100%)"#
    )
}
