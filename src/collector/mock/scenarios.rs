//! Pre-built report streams for multi-snapshot tests.

use super::ReportFixture;

/// `HH:MM:SS` label `seconds` after 10:00:00.
pub fn timestamp_at(seconds: u32) -> String {
    let total = 10 * 3600 + seconds;
    format!(
        "{:02}:{:02}:{:02}",
        (total / 3600) % 24,
        (total / 60) % 60,
        total % 60
    )
}

/// Concatenates fixtures into one report, as `top -b` writes it to a file.
pub fn report_text(fixtures: &[ReportFixture]) -> String {
    let mut text = String::new();
    for fixture in fixtures {
        for line in fixture.lines() {
            text.push_str(&line);
            text.push('\n');
        }
    }
    text
}
