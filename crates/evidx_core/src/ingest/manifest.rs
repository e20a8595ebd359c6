use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Metadata, Modality, RowWarning};
use crate::error::{codes, AppError};

pub const HEADER_PATH: &str = "path";
pub const HEADER_MODALITY: &str = "modality";
pub const HEADER_DESCRIPTION: &str = "description";
pub const HEADER_METADATA: &str = "metadata";

/// One accepted manifest row. `path` is returned exactly as written; resolution against the
/// manifest location is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub row: usize,
    pub path: String,
    pub modality: Modality,
    pub description: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestParse {
    pub entries: Vec<ManifestEntry>,
    pub skipped: usize,
    pub warnings: Vec<RowWarning>,
}

fn get<'a>(
    row: &'a csv::StringRecord,
    headers: &'a csv::StringRecord,
    header_name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(header_name))
        .and_then(|idx| row.get(idx))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Parse an evidence manifest (`path,modality,description[,metadata]`).
///
/// Missing required headers fail the whole manifest. Row-level problems skip the row and are
/// reported as warnings; rows are numbered from 1 (first data row).
pub fn parse_manifest(csv_text: &str) -> Result<ManifestParse, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| {
            AppError::new(codes::MANIFEST_INVALID, "Failed to read manifest headers")
                .with_details(e.to_string())
        })?
        .clone();

    for required in [HEADER_PATH, HEADER_MODALITY, HEADER_DESCRIPTION] {
        if !headers.iter().any(|h| h.trim().eq_ignore_ascii_case(required)) {
            return Err(
                AppError::new(codes::MANIFEST_INVALID, "Manifest is missing a required column")
                    .with_details(format!("column={required}")),
            );
        }
    }

    let mut entries = Vec::new();
    let mut warnings = Vec::new();
    let mut skipped = 0usize;

    for (idx, result) in rdr.records().enumerate() {
        let row_no = idx + 1;
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                warnings.push(
                    RowWarning::new(row_no, "MANIFEST_ROW_PARSE_FAILED", "Failed to parse manifest row")
                        .with_details(e.to_string()),
                );
                skipped += 1;
                continue;
            }
        };

        let Some(path) = get(&row, &headers, HEADER_PATH) else {
            warnings.push(RowWarning::new(row_no, "MANIFEST_MISSING_PATH", "Row missing path"));
            skipped += 1;
            continue;
        };

        let modality_raw = get(&row, &headers, HEADER_MODALITY).unwrap_or("");
        let modality = match modality_raw.parse::<Modality>() {
            Ok(m) => m,
            Err(e) => {
                warnings.push(
                    RowWarning::new(row_no, e.code, e.message)
                        .with_details(format!("modality={modality_raw}")),
                );
                skipped += 1;
                continue;
            }
        };

        let metadata = match get(&row, &headers, HEADER_METADATA) {
            None => Metadata::new(),
            Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(_) => {
                    warnings.push(
                        RowWarning::new(
                            row_no,
                            "MANIFEST_METADATA_INVALID",
                            "Row metadata must be a JSON object",
                        )
                        .with_details(format!("metadata={raw}")),
                    );
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    warnings.push(
                        RowWarning::new(
                            row_no,
                            "MANIFEST_METADATA_INVALID",
                            "Row metadata is not valid JSON",
                        )
                        .with_details(e.to_string()),
                    );
                    skipped += 1;
                    continue;
                }
            },
        };

        entries.push(ManifestEntry {
            row: row_no,
            path: path.to_string(),
            modality,
            description: get(&row, &headers, HEADER_DESCRIPTION)
                .unwrap_or("")
                .to_string(),
            metadata,
        });
    }

    for w in &warnings {
        warn!(row = w.row, code = %w.code, details = ?w.details, "skipped manifest row");
    }
    debug!(accepted = entries.len(), skipped, "manifest parsed");

    Ok(ManifestParse {
        entries,
        skipped,
        warnings,
    })
}
