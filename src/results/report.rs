//! Coverage report artifacts
//!
//! Renders an aggregated [`CoverageReport`] to HTML, JSON and CSV under the
//! build directory. Output is a function of the execution data and the report
//! only, so re-rendering the same run yields byte-identical files.

use std::fmt::{self, Write as _};
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::storage::ExecutionData;
use crate::config::ReportSettings;
use crate::coverage::{CoverageReport, FileCoverage};
use crate::models::{CounterCoverage, Ratio, DEFAULT_MINIMUM};

/// Lock file guarding the report outputs of a build directory
pub const LOCK_FILE: &str = ".coverage-report.lock";

const CSV_HEADER: [&str; 6] = [
    "module",
    "file",
    "line_missed",
    "line_covered",
    "branch_missed",
    "branch_covered",
];

/// Errors while writing report artifacts
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report output is locked by another writer ({0}); remove it if no report run is active")]
    Locked(PathBuf),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize JSON report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write CSV report {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Exclusive claim on a build directory's report outputs, released on drop
#[derive(Debug)]
pub struct ReportLock {
    path: PathBuf,
}

impl ReportLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let path = path.into();
        match Self::create(&path) {
            Err(ReportError::Locked(_)) if is_stale(&path) => {
                warn!("Removing stale report lock {}", path.display());
                fs::remove_file(&path).map_err(io_error(&path))?;
                Self::create(&path)
            }
            other => other,
        }
    }

    fn create(path: &Path) -> Result<Self, ReportError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| {
                if source.kind() == ErrorKind::AlreadyExists {
                    ReportError::Locked(path.to_path_buf())
                } else {
                    ReportError::Io {
                        path: path.to_path_buf(),
                        source,
                    }
                }
            })?;
        writeln!(file, "{}", std::process::id()).map_err(io_error(path))?;
        debug!("Acquired report lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

/// A lock is stale when the process recorded in it is gone. An empty lock
/// may still be getting its pid written and counts as held.
fn is_stale(path: &Path) -> bool {
    let Ok(content) = fs::read_to_string(path) else {
        return false;
    };
    let content = content.trim();
    if content.is_empty() {
        return false;
    }
    match content.parse::<u32>() {
        Ok(pid) => !process_alive(pid),
        Err(_) => true,
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a portable liveness check only unreadable pids are reclaimed.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for ReportLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release report lock {}: {}", self.path.display(), e);
        }
    }
}

/// Report generator
pub struct ReportGenerator {
    build_dir: PathBuf,
    settings: ReportSettings,
    highlight: Ratio,
}

impl ReportGenerator {
    /// Create a new report generator
    pub fn new(build_dir: impl Into<PathBuf>, settings: ReportSettings) -> Self {
        Self {
            build_dir: build_dir.into(),
            settings,
            highlight: DEFAULT_MINIMUM,
        }
    }

    /// Ratio below which rows are marked as low coverage
    pub fn with_highlight(mut self, highlight: Ratio) -> Self {
        self.highlight = highlight;
        self
    }

    fn resolve(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.build_dir.join(path)
        }
    }

    /// Write every enabled artifact and return the paths written
    pub fn generate(
        &self,
        data: &ExecutionData,
        report: &CoverageReport,
    ) -> Result<Vec<PathBuf>, ReportError> {
        fs::create_dir_all(&self.build_dir).map_err(io_error(&self.build_dir))?;
        let _lock = ReportLock::acquire(self.build_dir.join(LOCK_FILE))?;

        let mut written = Vec::new();
        if self.settings.html.enabled {
            let dir = self.resolve(self.settings.html_output());
            written.push(self.write_html(&dir, data, report)?);
        }
        if self.settings.json.enabled {
            let path = self.resolve(self.settings.json_output());
            self.write_json(&path, data, report)?;
            written.push(path);
        }
        if self.settings.csv.enabled {
            let path = self.resolve(self.settings.csv_output());
            self.write_csv(&path, report)?;
            written.push(path);
        }

        for path in &written {
            info!("Wrote coverage report {}", path.display());
        }
        Ok(written)
    }

    /// Write `index.html` plus one page per module; returns the index path
    pub fn write_html(
        &self,
        dir: &Path,
        data: &ExecutionData,
        report: &CoverageReport,
    ) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
        remove_module_pages(dir)?;

        let modules = report.modules();
        let index = dir.join("index.html");
        let mut html = String::new();
        // writing into a String cannot fail
        let _ = self.render_index(&mut html, data, report, &modules);
        fs::write(&index, html).map_err(io_error(&index))?;

        for (n, (module, coverage)) in modules.iter().enumerate() {
            let page = dir.join(module_page(n));
            let mut html = String::new();
            let _ = self.render_module(&mut html, data, report, module, coverage);
            fs::write(&page, html).map_err(io_error(&page))?;
        }

        Ok(index)
    }

    fn render_index(
        &self,
        out: &mut String,
        data: &ExecutionData,
        report: &CoverageReport,
        modules: &std::collections::BTreeMap<String, FileCoverage>,
    ) -> fmt::Result {
        let totals = report.totals();
        let summary = data.summary();

        write_header(out, "Coverage Report")?;
        writeln!(out, "        <h1>Coverage Report</h1>")?;
        writeln!(out, "        <h2>Summary</h2>")?;
        write_stat_card(out, &format!("{:.1}%", totals.lines.percent()), "Line Coverage")?;
        write_stat_card(out, &format!("{:.1}%", totals.branches.percent()), "Branch Coverage")?;
        write_stat_card(
            out,
            &format!("{}/{}", summary.passed, summary.total),
            "Tests Passed",
        )?;
        write_stat_card(out, &modules.len().to_string(), "Modules")?;

        writeln!(out, "        <h2>Modules</h2>")?;
        write_table_head(out, "Module")?;
        for (n, (module, coverage)) in modules.iter().enumerate() {
            let link = format!(r#"<a href="{}">{}</a>"#, module_page(n), escape(module));
            self.write_row(out, &link, coverage)?;
        }
        self.write_row(out, "<strong>Total</strong>", &totals)?;
        writeln!(out, "        </table>")?;

        writeln!(out, "        <h2>Tests</h2>")?;
        writeln!(out, "        <table>")?;
        writeln!(
            out,
            "            <tr><th>Test</th><th>Outcome</th><th>Duration</th><th>Message</th></tr>"
        )?;
        for record in &data.records {
            let class = if record.outcome.is_failure() { "fail" } else { "pass" };
            writeln!(
                out,
                r#"            <tr><td>{}</td><td class="{}">{}</td><td>{}ms</td><td>{}</td></tr>"#,
                escape(&record.test_id),
                class,
                record.outcome,
                record.duration_ms,
                escape(record.message.as_deref().unwrap_or(""))
            )?;
        }
        writeln!(out, "        </table>")?;

        write_footer(out, data)
    }

    fn render_module(
        &self,
        out: &mut String,
        data: &ExecutionData,
        report: &CoverageReport,
        module: &str,
        coverage: &FileCoverage,
    ) -> fmt::Result {
        let title = format!("Coverage Report - {}", escape(module));
        write_header(out, &title)?;
        writeln!(out, r#"        <p><a href="index.html">&larr; All modules</a></p>"#)?;
        writeln!(out, "        <h1>{}</h1>", escape(module))?;
        write_table_head(out, "File")?;
        for (file, file_coverage) in report.files_in(module) {
            self.write_row(out, &escape(file), file_coverage)?;
        }
        self.write_row(out, "<strong>Total</strong>", coverage)?;
        writeln!(out, "        </table>")?;
        write_footer(out, data)
    }

    fn write_row(&self, out: &mut String, label: &str, coverage: &FileCoverage) -> fmt::Result {
        writeln!(
            out,
            r#"            <tr>
                <td>{}</td>
                <td class="{}">{:.1}%</td>
                <td>{} / {}</td>
                <td class="{}">{}</td>
                <td>{} / {}</td>
            </tr>"#,
            label,
            self.class_for(&coverage.lines),
            coverage.lines.percent(),
            coverage.lines.missed(),
            coverage.lines.total,
            self.class_for(&coverage.branches),
            percent_cell(&coverage.branches),
            coverage.branches.missed(),
            coverage.branches.total,
        )
    }

    fn class_for(&self, counter: &CounterCoverage) -> &'static str {
        match counter.ratio() {
            None => "empty",
            Some(ratio) if ratio.meets(&self.highlight) => "pass",
            Some(_) => "fail",
        }
    }

    fn write_json(
        &self,
        path: &Path,
        data: &ExecutionData,
        report: &CoverageReport,
    ) -> Result<(), ReportError> {
        let summary = data.summary();
        let json = JsonReport {
            run_id: &data.run_id,
            generated_at: data.completed_at,
            tests: JsonTests {
                total: summary.total,
                passed: summary.passed,
                failed: summary.failed,
                errored: summary.errored,
                skipped: summary.skipped,
            },
            totals: report.totals(),
            modules: report.modules(),
            files: &report.files,
        };
        let content = serde_json::to_string_pretty(&json)?;
        ensure_parent(path)?;
        fs::write(path, content + "\n").map_err(io_error(path))
    }

    fn write_csv(&self, path: &Path, report: &CoverageReport) -> Result<(), ReportError> {
        ensure_parent(path)?;
        let csv_error = |source| ReportError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
        writer.write_record(CSV_HEADER).map_err(csv_error)?;
        for (file, coverage) in &report.files {
            writer
                .write_record([
                    crate::coverage::module_of(file),
                    file.clone(),
                    coverage.lines.missed().to_string(),
                    coverage.lines.covered.to_string(),
                    coverage.branches.missed().to_string(),
                    coverage.branches.covered.to_string(),
                ])
                .map_err(csv_error)?;
        }
        writer.flush().map_err(io_error(path))
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    run_id: &'a str,
    generated_at: DateTime<Utc>,
    tests: JsonTests,
    totals: FileCoverage,
    modules: std::collections::BTreeMap<String, FileCoverage>,
    files: &'a std::collections::BTreeMap<String, FileCoverage>,
}

#[derive(Serialize)]
struct JsonTests {
    total: usize,
    passed: usize,
    failed: usize,
    errored: usize,
    skipped: usize,
}

fn module_page(index: usize) -> String {
    format!("module-{index}.html")
}

fn remove_module_pages(dir: &Path) -> Result<(), ReportError> {
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("module-") && n.ends_with(".html"))
            .unwrap_or(false);
        if stale {
            fs::remove_file(&path).map_err(io_error(&path))?;
        }
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), ReportError> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent).map_err(io_error(parent)),
        None => Ok(()),
    }
}

fn percent_cell(counter: &CounterCoverage) -> String {
    if counter.total == 0 {
        "n/a".to_string()
    } else {
        format!("{:.1}%", counter.percent())
    }
}

fn write_header(out: &mut String, title: &str) -> fmt::Result {
    writeln!(
        out,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 40px; background: #f5f5f5; }}
        .container {{ max-width: 1200px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }}
        h1 {{ color: #333; border-bottom: 2px solid #007bff; padding-bottom: 10px; }}
        table {{ width: 100%; border-collapse: collapse; margin: 20px 0; }}
        th, td {{ padding: 10px; text-align: left; border-bottom: 1px solid #ddd; }}
        th {{ background: #007bff; color: white; }}
        .pass {{ color: #28a745; font-weight: bold; }}
        .fail {{ color: #dc3545; font-weight: bold; }}
        .empty {{ color: #999; }}
        .stat-card {{ display: inline-block; background: #f8f9fa; padding: 20px; margin: 10px; border-radius: 8px; min-width: 150px; text-align: center; }}
        .stat-value {{ font-size: 24px; font-weight: bold; color: #007bff; }}
        .stat-label {{ color: #666; font-size: 14px; }}
    </style>
</head>
<body>
    <div class="container">"#
    )
}

fn write_stat_card(out: &mut String, value: &str, label: &str) -> fmt::Result {
    writeln!(
        out,
        r#"        <div class="stat-card">
            <div class="stat-value">{value}</div>
            <div class="stat-label">{label}</div>
        </div>"#
    )
}

fn write_table_head(out: &mut String, first: &str) -> fmt::Result {
    writeln!(
        out,
        r#"        <table>
            <tr>
                <th>{first}</th>
                <th>Line Coverage</th>
                <th>Missed Lines</th>
                <th>Branch Coverage</th>
                <th>Missed Branches</th>
            </tr>"#
    )
}

fn write_footer(out: &mut String, data: &ExecutionData) -> fmt::Result {
    writeln!(
        out,
        r#"        <p class="stat-label">Run {} &middot; generated {}</p>
    </div>
</body>
</html>"#,
        escape(&data.run_id),
        format_datetime(&data.completed_at)
    )
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Escape text for HTML element and attribute content
fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
