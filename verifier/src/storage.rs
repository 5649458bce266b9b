//! JSON Lines input and output.

use crate::error::VerifierResult;
use crate::prepare::{RequestPreparer, TestCase};
use crate::record::ResultRecord;
use crate::summary::Summary;
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

/// Read and prepare every line of a test suite. Blank lines are skipped
/// silently, malformed ones with an error log; line numbers stay stable.
pub async fn read_test_cases(path: &Path, preparer: &RequestPreparer) -> VerifierResult<Vec<TestCase>> {
    let text = tokio::fs::read_to_string(path).await?;
    let mut cases = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line_number = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        match preparer.parse_line(line_number, line) {
            Ok(case) => cases.push(case),
            Err(e) => error!(line = line_number, error = %e, "Skipping malformed test case"),
        }
    }

    info!(path = %path.display(), count = cases.len(), "Loaded test cases");
    Ok(cases)
}

/// Load a prior results file. Lines that do not parse are logged and dropped.
pub async fn read_results(path: &Path) -> VerifierResult<Vec<ResultRecord>> {
    let text = tokio::fs::read_to_string(path).await?;
    let mut records = Vec::new();

    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ResultRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(line = i + 1, error = %e, "Ignoring unreadable prior result"),
        }
    }

    Ok(records)
}

pub async fn write_results(path: &Path, records: &[ResultRecord]) -> VerifierResult<()> {
    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)?;
        buffer.push(b'\n');
    }
    write_file(path, &buffer).await
}

/// Pretty-printed with four-space indentation.
pub async fn write_summary(path: &Path, summary: &Summary) -> VerifierResult<()> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    summary.serialize(&mut serializer)?;
    buffer.push(b'\n');
    write_file(path, &buffer).await
}

async fn write_file(path: &Path, contents: &[u8]) -> VerifierResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    Ok(())
}
