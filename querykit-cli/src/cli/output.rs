// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Table formatting for CLI output

use crate::repository::{Issue, IssueLinkCount};
use crate::workload::{ContentionReport, TableLocksReport};
use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};

pub struct IssueFormatter;

impl IssueFormatter {
    pub fn format_issues(issues: &[Issue]) -> String {
        if issues.is_empty() {
            return format!("{}\n", "No issues found".yellow());
        }

        let mut table = header_table(&["id", "title", "created_at", "author", "links", "status"]);
        for issue in issues {
            table.add_row(vec![
                issue.id.to_string(),
                issue.title.clone(),
                issue.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                issue.author.clone().unwrap_or_else(|| "NULL".to_string()),
                issue.link_count.to_string(),
                issue.status.clone().unwrap_or_else(|| "NULL".to_string()),
            ]);
        }
        format!("{}\n", table)
    }

    pub fn format_link_counts(counts: &[IssueLinkCount]) -> String {
        let mut table = header_table(&["id", "link_count"]);
        for count in counts {
            table.add_row(vec![count.id.to_string(), count.link_count.to_string()]);
        }
        format!("{}\n", table)
    }
}

pub struct ContentionFormatter;

impl ContentionFormatter {
    pub fn format(report: &ContentionReport) -> String {
        let mut table = header_table(&["worker", "attempts", "result"]);
        for worker in &report.workers {
            let result = match &worker.result {
                Ok(val) => Cell::new(format!("wrote {}", val)).fg(Color::Green),
                Err(err) => Cell::new(err.to_string()).fg(Color::Red),
            };
            table.add_row(vec![
                Cell::new(worker.worker),
                Cell::new(worker.attempts),
                result,
            ]);
        }

        let mut output = format!("{}\n", table);
        output.push_str(&format!(
            "Workers succeeded: {}/{}\n",
            report.succeeded(),
            report.workers.len()
        ));
        output.push_str(&format!("Total attempts: {}\n", report.total_attempts()));
        let summary = format!("Final value: {}", report.final_value);
        if report.final_value == report.succeeded() as i64 {
            output.push_str(&format!("{}\n", summary.bold().green()));
        } else {
            output.push_str(&format!("{}\n", summary.bold().red()));
        }
        output
    }
}

pub struct TableLocksFormatter;

impl TableLocksFormatter {
    pub fn format(report: &TableLocksReport) -> String {
        let mut table = header_table(&["scan", "attempts", "outcomes", "result"]);
        for scan in &report.scans {
            let outcomes: Vec<&str> = scan.outcomes.iter().map(|o| o.as_str()).collect();
            let result = match &scan.result {
                Ok(total) => Cell::new(format!("{} rows, sum {}", total.row_count, total.total))
                    .fg(Color::Green),
                Err(err) => Cell::new(err.to_string()).fg(Color::Red),
            };
            table.add_row(vec![
                Cell::new(scan.scan),
                Cell::new(scan.attempts()),
                Cell::new(outcomes.join(" ")),
                result,
            ]);
        }

        let mut output = format!("{}\n", table);
        output.push_str(&format!(
            "Scans succeeded: {}/{}\n",
            report.succeeded(),
            report.scans.len()
        ));
        output.push_str(&format!("Scans lost to writers: {}\n", report.total_conflicts()));
        output.push_str(&format!("Single-row writes: {}\n", report.writes));
        output.push_str(&format!(
            "{}\n",
            format!(
                "Final table: {} rows, sum {}",
                report.final_total.row_count, report.final_total.total
            )
            .bold()
        ));
        output
    }
}

fn header_table(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    let header_cells: Vec<Cell> = columns
        .iter()
        .map(|col| Cell::new(col).fg(Color::Green))
        .collect();
    table.set_header(header_cells);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_table_locks_report_lists_outcomes() {
        use crate::workload::table_locks::{ScanReport, TableTotal};
        use crate::workload::AttemptOutcome;

        let total = TableTotal {
            row_count: 3,
            total: 300,
        };
        let report = TableLocksReport {
            scans: vec![ScanReport {
                scan: 1,
                outcomes: vec![AttemptOutcome::Conflict, AttemptOutcome::Committed],
                result: Ok(total),
            }],
            writes: 4,
            final_total: total,
        };
        let output = TableLocksFormatter::format(&report);
        assert!(output.contains("TLI OK"));
        assert!(output.contains("Scans lost to writers: 1"));
        assert!(output.contains("Single-row writes: 4"));
    }

    #[test]
    fn test_empty_issue_list() {
        assert!(IssueFormatter::format_issues(&[]).contains("No issues found"));
    }

    #[test]
    fn test_issue_table_shows_nulls() {
        let issue = Issue {
            id: 42,
            title: "Ticket 1".to_string(),
            created_at: Utc::now(),
            author: None,
            link_count: 0,
            status: None,
        };
        let output = IssueFormatter::format_issues(&[issue]);
        assert!(output.contains("Ticket 1"));
        assert!(output.contains("NULL"));
        assert!(output.contains("42"));
    }
}
