//! Terminal output for filtered log lines
//!
//! Renders display lines with ANSI colors: the logcat priority letter picks
//! the line color and highlighted spans are shown in reverse video.

use droidtail_common::{DisplayLine, PerformanceSnapshot, SessionEvent, StopReason};
use std::io::{self, Write};

/// Color codes for different log levels
const COLOR_VERBOSE: &str = "\x1b[37m"; // White
const COLOR_DEBUG: &str = "\x1b[36m";   // Cyan
const COLOR_INFO: &str = "\x1b[32m";    // Green
const COLOR_WARN: &str = "\x1b[33m";    // Yellow
const COLOR_ERROR: &str = "\x1b[31m";   // Red
const COLOR_FATAL: &str = "\x1b[35m";   // Magenta
const COLOR_RESET: &str = "\x1b[0m";    // Reset
const HIGHLIGHT_ON: &str = "\x1b[7m";
const HIGHLIGHT_OFF: &str = "\x1b[27m";

/// Terminal UI configuration
#[derive(Debug, Clone)]
pub struct UiConfig {
    /// Whether to use colors in output
    pub use_colors: bool,
    /// Prefix each line with its position in the producer's output
    pub show_ordinals: bool,
    /// Maximum line length in characters before truncation
    pub max_line_length: Option<usize>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            use_colors: true,
            show_ordinals: false,
            max_line_length: None,
        }
    }
}

/// Priority letter of a `-v time` or `-v brief` logcat line, e.g. `E` in
/// `10-17 12:00:01.234 E/Netd( 312): ...`
pub fn priority_of(text: &str) -> Option<char> {
    text.split_whitespace().find_map(|token| {
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(level @ ('V' | 'D' | 'I' | 'W' | 'E' | 'F' | 'A')), Some('/')) => Some(level),
            _ => None,
        }
    })
}

fn color_for(priority: char) -> &'static str {
    match priority {
        'V' => COLOR_VERBOSE,
        'D' => COLOR_DEBUG,
        'I' => COLOR_INFO,
        'W' => COLOR_WARN,
        'E' => COLOR_ERROR,
        'F' | 'A' => COLOR_FATAL,
        _ => "",
    }
}

/// Renders lines and status output to stdout
#[derive(Debug, Default)]
pub struct TerminalUi {
    config: UiConfig,
    lines_printed: u64,
    lines_skipped: u64,
}

impl TerminalUi {
    pub fn new(config: UiConfig) -> Self {
        Self {
            config,
            lines_printed: 0,
            lines_skipped: 0,
        }
    }

    /// Format a display line, without a trailing newline
    pub fn render_line(&self, line: &DisplayLine) -> String {
        let mut output = String::new();

        if self.config.show_ordinals {
            output.push_str(&format!("{:>8} ", line.source_ordinal));
        }

        let color = if self.config.use_colors {
            color_for(priority_of(&line.text()).unwrap_or(' '))
        } else {
            ""
        };
        output.push_str(color);

        let mut budget = self.config.max_line_length.unwrap_or(usize::MAX);
        let mut truncated = false;
        for span in &line.spans {
            if budget == 0 {
                truncated |= !span.text.is_empty();
                break;
            }
            let count = span.text.chars().count();
            let text: String = if count > budget {
                truncated = true;
                span.text.chars().take(budget).collect()
            } else {
                span.text.clone()
            };
            budget = budget.saturating_sub(count);

            if span.highlighted && self.config.use_colors {
                output.push_str(HIGHLIGHT_ON);
                output.push_str(&text);
                output.push_str(HIGHLIGHT_OFF);
            } else {
                output.push_str(&text);
            }
        }

        if truncated {
            output.push_str("...");
        }
        if !color.is_empty() {
            output.push_str(COLOR_RESET);
        }
        output
    }

    /// Print a single log line
    pub fn print_line(&mut self, line: &DisplayLine) -> io::Result<()> {
        let rendered = self.render_line(line);
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", rendered)?;
        self.lines_printed += 1;
        Ok(())
    }

    /// Note lines the renderer fell too far behind to receive
    pub fn record_skipped(&mut self, count: u64) -> io::Result<()> {
        self.lines_skipped += count;
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "... {} lines skipped, renderer fell behind", count)
    }

    pub fn lines_printed(&self) -> u64 {
        self.lines_printed
    }

    pub fn lines_skipped(&self) -> u64 {
        self.lines_skipped
    }

    /// Print a one-line pipeline status to stderr
    pub fn print_status(&self, snapshot: &PerformanceSnapshot) -> io::Result<()> {
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "{}", format_status(snapshot))
    }

    pub fn print_event(&self, event: &SessionEvent) -> io::Result<()> {
        let message = match event {
            SessionEvent::Started { session_id } => format!("Session {} started", session_id),
            SessionEvent::Stopped { session_id, reason } => match reason {
                StopReason::Requested => format!("Session {} stopped", session_id),
                StopReason::ProducerExited => {
                    format!("Session {} ended: log producer exited", session_id)
                }
                StopReason::PipelineError => {
                    format!("Session {} aborted after a pipeline error", session_id)
                }
            },
            SessionEvent::Cleared => "Display cleared".to_string(),
            SessionEvent::Trimmed { .. } => return Ok(()),
        };
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "=== {} ===", message)
    }
}

/// Status line for a performance snapshot
pub fn format_status(snapshot: &PerformanceSnapshot) -> String {
    let mut status = format!(
        "[{:?}] queue={} batch={} interval={}ms buffer={} rate={:.1}/s mem~{}",
        snapshot.load_tier,
        snapshot.queue_depth,
        snapshot.batch_size,
        snapshot.interval_ms,
        snapshot.buffer_length,
        snapshot.processing_rate_per_sec,
        format_bytes(snapshot.approx_memory_bytes),
    );
    if snapshot.sampling {
        status.push_str(" sampling");
    }
    if snapshot.buffer.trim_failures > 0 {
        status.push_str(&format!(" trim-failures={}", snapshot.buffer.trim_failures));
    }
    status
}

fn format_bytes(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    let bytes = bytes as f64;
    if bytes >= KIB * KIB {
        format!("{:.1}MiB", bytes / (KIB * KIB))
    } else if bytes >= KIB {
        format!("{:.1}KiB", bytes / KIB)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidtail_common::Span;

    fn line(spans: Vec<Span>) -> DisplayLine {
        DisplayLine {
            spans,
            source_ordinal: 3,
        }
    }

    #[test]
    fn test_priority_of_logcat_formats() {
        assert_eq!(priority_of("10-17 12:00:01.234 E/Netd( 312): socket timeout"), Some('E'));
        assert_eq!(priority_of("W/ActivityManager(  512): slow"), Some('W'));
        assert_eq!(priority_of("--------- beginning of main"), None);
    }

    #[test]
    fn test_plain_rendering_without_colors() {
        let ui = TerminalUi::new(UiConfig {
            use_colors: false,
            ..Default::default()
        });
        let rendered = ui.render_line(&line(vec![
            Span::plain("E/Net: "),
            Span::highlighted("timeout"),
        ]));
        assert_eq!(rendered, "E/Net: timeout");
    }

    #[test]
    fn test_highlight_and_level_color() {
        let ui = TerminalUi::new(UiConfig::default());
        let rendered = ui.render_line(&line(vec![
            Span::plain("E/Net: "),
            Span::highlighted("timeout"),
        ]));
        assert_eq!(
            rendered,
            format!("{}E/Net: {}timeout{}{}", COLOR_ERROR, HIGHLIGHT_ON, HIGHLIGHT_OFF, COLOR_RESET)
        );
    }

    #[test]
    fn test_truncation_counts_characters() {
        let ui = TerminalUi::new(UiConfig {
            use_colors: false,
            show_ordinals: true,
            max_line_length: Some(4),
        });
        let rendered = ui.render_line(&line(vec![Span::plain("hé"), Span::highlighted("llo")]));
        assert_eq!(rendered, "       3 héll...");

        let exact = ui.render_line(&line(vec![Span::plain("abcd")]));
        assert_eq!(exact, "       3 abcd");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0MiB");
    }
}
