//! Text rendering of run reports.
use std::fmt::Write;
use std::time::Duration;

use stagehand_core::stage_manager::{RunOutcome, StageRun};
use stagehand_core::Report;

const HEADERS: [&str; 5] = ["STAGE", "OUTCOME", "ATTEMPTS", "DURATION", "DETAIL"];

fn format_duration(duration: Duration) -> String {
    if duration < Duration::from_secs(1) {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

fn row(run: &StageRun) -> [String; 5] {
    let outcome = run
        .run_outcome()
        .map(|outcome| outcome.to_string())
        .unwrap_or_else(|| format!("{:?}", run.state));
    let detail = match (&run.failure, &run.outcome) {
        (Some(failure), _) => format!("{}: {}", failure.kind, failure.message),
        (None, Some(outcome)) => outcome.to_string(),
        (None, None) => String::new(),
    };
    [
        run.stage_id.clone(),
        outcome,
        run.attempts.to_string(),
        run.duration().map(format_duration).unwrap_or_else(|| "-".to_string()),
        detail,
    ]
}

/// One line per stage in declaration order, then a summary line
pub fn render_report(report: &Report) -> String {
    let rows: Vec<[String; 5]> = report.runs.iter().map(row).collect();
    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut line = |cells: &[&str]| {
        let mut text = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i + 1 == cells.len() {
                text.push_str(cell);
            } else {
                let _ = write!(text, "{:<width$}  ", cell, width = widths[i]);
            }
        }
        out.push_str(text.trim_end());
        out.push('\n');
    };
    line(&HEADERS);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        line(&cells);
    }

    let skipped = report.count(RunOutcome::Skipped);
    let _ = writeln!(
        out,
        "\n{} converged ({} skipped), {} failed in {}{}",
        report.converged_count(),
        skipped,
        report.failed_count(),
        format_duration(report.duration()),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    out
}
