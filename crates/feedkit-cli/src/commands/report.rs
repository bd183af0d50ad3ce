use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use feedkit_core::aggregate::{aggregate, NpsScale, NpsSource};
use feedkit_core::model::FinalRow;

use super::{load_config, print_report};
use crate::args::{ReportArgs, SummaryFormat};

/// A full result document, or just its rows.
#[derive(Deserialize)]
#[serde(untagged)]
enum ResultsFile {
    Document { rows: Vec<FinalRow> },
    Rows(Vec<FinalRow>),
}

impl ResultsFile {
    fn into_rows(self) -> Vec<FinalRow> {
        match self {
            ResultsFile::Document { rows } | ResultsFile::Rows(rows) => rows,
        }
    }
}

fn load_final_rows(path: &Path) -> Result<Vec<FinalRow>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: ResultsFile = serde_json::from_str(&content)
        .with_context(|| format!("{} does not contain result rows", path.display()))?;
    Ok(file.into_rows())
}

pub fn run(args: &ReportArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if args.shifted {
        config.report.nps_scale = NpsScale::Shifted;
    }
    if args.model_nps {
        config.report.nps_source = NpsSource::Model;
    }
    config.validate()?;

    let rows = load_final_rows(&args.results)?;
    let report = aggregate(&rows, &config.report_options());

    match args.format {
        SummaryFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        SummaryFormat::Table => print_report(&report),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedkit_core::model::PerCommentAnalysis;

    fn row(index: usize) -> FinalRow {
        FinalRow {
            index,
            original_text: "Muy caro".to_string(),
            rating: 3,
            analysis: PerCommentAnalysis::fallback(),
            is_duplicate: false,
            is_trivial: false,
            is_failed: true,
        }
    }

    #[test]
    fn test_reads_document_and_bare_rows() {
        let dir = tempfile::tempdir().unwrap();

        let doc = dir.path().join("doc.json");
        let body = serde_json::json!({ "metadata": {}, "rows": [row(0), row(1)] });
        std::fs::write(&doc, body.to_string()).unwrap();
        assert_eq!(load_final_rows(&doc).unwrap().len(), 2);

        let bare = dir.path().join("rows.json");
        std::fs::write(&bare, serde_json::to_string(&vec![row(0)]).unwrap()).unwrap();
        assert_eq!(load_final_rows(&bare).unwrap(), vec![row(0)]);
    }

    #[test]
    fn test_rejects_unrelated_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        std::fs::write(&path, r#"{"hello": "world"}"#).unwrap();
        assert!(load_final_rows(&path).is_err());
    }
}
