use anyhow::{Context, Result};
use regex::Regex;

/// Only the top of a page is searched for a heading.
pub(crate) const HEADING_SCAN_LINES: usize = 10;

const HEADING_PATTERNS: [&str; 3] = [
    r"^(?:SECTION|Chapter|CHAPTER|PART)\s+\d+[.:]\s*(.*?)$",
    r"^(?:SECTION|Chapter|CHAPTER|PART)\s+(.*?)$",
    r"^(\d+\.\s+[A-Z][A-Za-z\s]+)$",
];

/// Heuristic heading detector threaded through the page loop.
///
/// Patterns are tried in declaration order for each line, and lines are
/// scanned top to bottom, so the first pattern matching the first heading
/// line decides the section.
pub(crate) struct SectionDetector {
    patterns: Vec<Regex>,
}

impl SectionDetector {
    pub(crate) fn new() -> Result<Self> {
        let patterns = HEADING_PATTERNS
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("failed to compile heading regex {pattern}"))
            })
            .collect::<Result<Vec<Regex>>>()?;

        Ok(Self { patterns })
    }

    pub(crate) fn next_section(&self, page_text: &str, current_section: &str) -> String {
        self.find_heading(page_text)
            .unwrap_or(current_section)
            .to_string()
    }

    pub(crate) fn find_heading<'a>(&self, page_text: &'a str) -> Option<&'a str> {
        for line in page_text.split('\n').take(HEADING_SCAN_LINES) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            for pattern in &self.patterns {
                if let Some(title) = pattern.captures(line).and_then(|captures| captures.get(1)) {
                    return Some(title.as_str().trim());
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> SectionDetector {
        SectionDetector::new().expect("heading patterns should compile")
    }

    #[test]
    fn carries_previous_section_when_no_heading() {
        let detector = detector();
        let text = "Tomatoes like warm soil.\nWater deeply once a week.";
        assert_eq!(detector.next_section(text, "Soil Basics"), "Soil Basics");
        assert_eq!(detector.next_section("", "Soil Basics"), "Soil Basics");
    }

    #[test]
    fn numbered_chapter_heading_captures_title() {
        let detector = detector();
        let text = "\n  Chapter 3: Planning Your Garden  \nSome body text";
        assert_eq!(detector.next_section(text, "Introduction"), "Planning Your Garden");
    }

    #[test]
    fn first_pattern_wins_over_later_patterns_on_same_line() {
        let detector = detector();
        // Both the numbered and the bare keyword pattern match; the numbered
        // pattern comes first and strips the number.
        assert_eq!(
            detector.next_section("SECTION 2. Compost", "Introduction"),
            "Compost"
        );
        assert_eq!(
            detector.next_section("PART Two Harvest", "Introduction"),
            "Two Harvest"
        );
    }

    #[test]
    fn numbered_title_keeps_number_prefix() {
        let detector = detector();
        assert_eq!(
            detector.next_section("4. Seed Starting\nbody", "Introduction"),
            "4. Seed Starting"
        );
        // Lowercase title start does not qualify.
        assert_eq!(
            detector.next_section("4. seed starting", "Introduction"),
            "Introduction"
        );
    }

    #[test]
    fn first_matching_line_wins_top_to_bottom() {
        let detector = detector();
        let text = "intro line\nCHAPTER 1: Soil\nCHAPTER 2: Water";
        assert_eq!(detector.next_section(text, "Introduction"), "Soil");
    }

    #[test]
    fn headings_after_tenth_line_are_ignored() {
        let detector = detector();
        let mut lines = vec!["filler"; HEADING_SCAN_LINES];
        lines.push("Chapter 9: Too Late");
        assert_eq!(detector.next_section(&lines.join("\n"), "Pests"), "Pests");

        let mut lines = vec!["filler"; HEADING_SCAN_LINES - 1];
        lines.push("Chapter 9: Just In Time");
        assert_eq!(
            detector.next_section(&lines.join("\n"), "Pests"),
            "Just In Time"
        );
    }

    #[test]
    fn blank_lines_count_toward_scan_window() {
        let detector = detector();
        let text = format!("{}Chapter 1: Hidden", "\n".repeat(HEADING_SCAN_LINES));
        assert_eq!(detector.next_section(&text, "Introduction"), "Introduction");
    }
}
