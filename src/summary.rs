//! End-of-run issue summary

use std::sync::atomic::{AtomicUsize, Ordering};

use colored::Colorize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Rows},
};

use crate::platform::Severity;

/// Running issue counts per severity. Updated from the issue event path,
/// rendered once after the run ends.
#[derive(Debug, Default)]
pub struct IssueTally {
    high: AtomicUsize,
    medium: AtomicUsize,
    low: AtomicUsize,
    information: AtomicUsize,
}

#[derive(Tabled)]
struct SeverityRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Issues")]
    issues: usize,
}

impl IssueTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, severity: Severity) {
        let counter = match severity {
            Severity::High => &self.high,
            Severity::Medium => &self.medium,
            Severity::Low => &self.low,
            Severity::Information => &self.information,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> usize {
        self.high.load(Ordering::Relaxed)
            + self.medium.load(Ordering::Relaxed)
            + self.low.load(Ordering::Relaxed)
            + self.information.load(Ordering::Relaxed)
    }

    /// Render the summary table.
    pub fn render(&self) -> String {
        if self.total() == 0 {
            return "No issues found.".to_string();
        }

        let rows = vec![
            SeverityRow {
                severity: colorize(Severity::High),
                issues: self.high.load(Ordering::Relaxed),
            },
            SeverityRow {
                severity: colorize(Severity::Medium),
                issues: self.medium.load(Ordering::Relaxed),
            },
            SeverityRow {
                severity: colorize(Severity::Low),
                issues: self.low.load(Ordering::Relaxed),
            },
            SeverityRow {
                severity: colorize(Severity::Information),
                issues: self.information.load(Ordering::Relaxed),
            },
        ];

        let mut table = Table::new(rows);
        table
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()));
        table.to_string()
    }
}

/// Severity name colored for the console.
pub fn colorize(severity: Severity) -> String {
    match severity {
        Severity::High => severity.to_string().red().bold().to_string(),
        Severity::Medium => severity.to_string().yellow().to_string(),
        Severity::Low => severity.to_string().cyan().to_string(),
        Severity::Information => severity.to_string().dimmed().to_string(),
    }
}
