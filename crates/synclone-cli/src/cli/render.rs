use super::*;
use synclone_core::progress::format_duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Writes tracker renders to stdout. On a terminal the compact bar is
/// redrawn in place; elsewhere every render is its own line.
pub(super) struct ProgressPrinter {
    mode: DisplayMode,
    interactive: bool,
    last_len: Cell<usize>,
}

impl ProgressPrinter {
    pub(super) fn new(mode: DisplayMode, interactive: bool) -> Self {
        Self {
            mode,
            interactive,
            last_len: Cell::new(0),
        }
    }

    pub(super) fn render(&self, tracker: &ProgressTracker) {
        let text = tracker.render_progress();
        if text.is_empty() {
            return;
        }
        let mut stdout = io::stdout().lock();
        if self.mode == DisplayMode::Compact && self.interactive {
            let _ = write!(stdout, "{}", self.overwrite_line(&text));
        } else {
            let _ = writeln!(stdout, "{text}");
        }
        let _ = stdout.flush();
    }

    pub(super) fn finish(&self) {
        if self.last_len.get() > 0 {
            println!();
            self.last_len.set(0);
        }
    }

    fn overwrite_line(&self, line: &str) -> String {
        let prev_len = self.last_len.get();
        let len = line.chars().count();
        self.last_len.set(len);
        if len < prev_len {
            format!("\r{line}{}", " ".repeat(prev_len - len))
        } else {
            format!("\r{line}")
        }
    }
}

pub(super) fn print_report(report: &SyncReport) {
    let resumed = if report.resumed { " (resumed)" } else { "" };
    println!(
        "{}/{}: {}{resumed}",
        report.provider, report.organization, report.status
    );
    println!(
        "  total {}, synced {}, failed {}, skipped {}, pending {}",
        report.total, report.success, report.failed, report.skipped, report.pending
    );
    let stats = &report.filter_stats;
    if stats.removed() > 0 {
        let removed: Vec<String> = FilterStage::ALL
            .iter()
            .filter(|stage| stats.removed_by(**stage) > 0)
            .map(|stage| format!("{stage}={}", stats.removed_by(*stage)))
            .collect();
        println!(
            "  filtered out {} of {} ({})",
            stats.removed(),
            stats.input,
            removed.join(", ")
        );
    }
    for failure in report.failures() {
        println!(
            "  failed {} after {} attempt(s): {}",
            failure.name, failure.attempts, failure.message
        );
    }
    let cancelled = report
        .outcomes
        .iter()
        .filter(|outcome| outcome.kind == OutcomeKind::Cancelled)
        .count();
    if cancelled > 0 {
        println!("  {cancelled} repositories left pending by cancellation");
    }
    println!(
        "  elapsed {}, peak parallel {}",
        format_duration(report.elapsed),
        report.peak_active
    );
    println!("  state file {}", report.state_file.display());
}

pub(super) fn checkpoint_line(checkpoint: &Checkpoint) -> String {
    format!(
        "{}/{}  {:<11}  {}/{} done ({:.1}%)  failed={}  pending={}  updated={}",
        checkpoint.provider,
        checkpoint.organization,
        checkpoint.status.as_str(),
        checkpoint.completed().len(),
        checkpoint.total_repositories(),
        checkpoint.progress_percent(),
        checkpoint.failed().len(),
        checkpoint.pending().len(),
        format_timestamp(checkpoint.last_updated)
    )
}

pub(super) fn print_checkpoint(checkpoint: &Checkpoint, path: &Path) {
    println!("{}", checkpoint_line(checkpoint));
    println!("  file      {}", path.display());
    println!("  target    {}", checkpoint.target_path.display());
    println!(
        "  strategy  {} (parallel {}, max retries {})",
        checkpoint.strategy, checkpoint.parallel, checkpoint.max_retries
    );
    println!("  started   {}", format_timestamp(checkpoint.start_time));
    if !checkpoint.failed().is_empty() {
        println!("  failed:");
        for failed in checkpoint.failed() {
            println!(
                "    {} [{}] attempts={} {}",
                failed.name, failed.operation, failed.attempts, failed.error
            );
        }
    }
    if !checkpoint.pending().is_empty() {
        println!("  pending: {}", checkpoint.pending().join(", "));
    }
}

pub(super) fn format_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string())
}
