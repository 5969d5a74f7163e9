use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Coarse position of a chunk inside a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Abstract,
    Introduction,
    RelatedWork,
    Methods,
    Results,
    Conclusion,
    References,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Abstract => "abstract",
            Section::Introduction => "introduction",
            Section::RelatedWork => "related_work",
            Section::Methods => "methods",
            Section::Results => "results",
            Section::Conclusion => "conclusion",
            Section::References => "references",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Leading "3.", "2.1", "IV." or "A " numbering in front of a heading.
static HEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:\d+(?:\.\d+)*|[ivxlc]+|[a-h])[.)]?\s+)").expect("valid heading regex")
});

// Order matters: "related work" must win over "work", "experimental results" over "method".
const HEADING_KEYWORDS: &[(&str, Section)] = &[
    ("abstract", Section::Abstract),
    ("introduction", Section::Introduction),
    ("related work", Section::RelatedWork),
    ("prior work", Section::RelatedWork),
    ("background", Section::RelatedWork),
    ("references", Section::References),
    ("bibliography", Section::References),
    ("experiments", Section::Results),
    ("experimental", Section::Results),
    ("results", Section::Results),
    ("evaluation", Section::Results),
    ("method", Section::Methods),
    ("approach", Section::Methods),
    ("preliminaries", Section::Methods),
    ("conclusion", Section::Conclusion),
    ("discussion", Section::Conclusion),
    ("future work", Section::Conclusion),
];

const HEADING_SCAN_LINES: usize = 5;
const HEADING_MAX_CHARS: usize = 60;

/// Classify a chunk from its text and position.
///
/// Explicit headings near the top of the chunk win; otherwise the position in
/// the chunk sequence decides (first chunk abstract, then 20% introduction,
/// 40% methods, 25% results, remainder conclusion).
pub fn detect_section(text: &str, index: usize, total: usize) -> Section {
    if let Some(section) = heading_section(text) {
        return section;
    }
    positional_section(index, total)
}

fn heading_section(text: &str) -> Option<Section> {
    for line in text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(HEADING_SCAN_LINES)
    {
        if line.chars().count() > HEADING_MAX_CHARS {
            continue;
        }
        let lowered = line.to_lowercase();
        let heading = HEADING_NUMBER.replace(&lowered, "");
        let heading = heading.trim_start_matches('#').trim();

        for (keyword, section) in HEADING_KEYWORDS {
            if heading.starts_with(keyword) {
                return Some(*section);
            }
        }
    }
    None
}

fn positional_section(index: usize, total: usize) -> Section {
    if index == 0 {
        return Section::Abstract;
    }
    let ratio = index as f64 / total.max(1) as f64;
    if ratio < 0.2 {
        Section::Introduction
    } else if ratio < 0.6 {
        Section::Methods
    } else if ratio < 0.85 {
        Section::Results
    } else {
        Section::Conclusion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_take_priority_over_position() {
        assert_eq!(
            detect_section("3. Method\nWe propose a renderer.", 9, 10),
            Section::Methods
        );
        assert_eq!(
            detect_section("2 Related Work\nPrior systems...", 0, 10),
            Section::RelatedWork
        );
        assert_eq!(
            detect_section("## Conclusion\nWe showed that", 2, 10),
            Section::Conclusion
        );
        assert_eq!(
            detect_section("References\n[1] Kerbl et al.", 3, 10),
            Section::References
        );
        assert_eq!(
            detect_section("IV. Experimental Results\nTable 1", 1, 10),
            Section::Results
        );
    }

    #[test]
    fn long_lines_are_not_headings() {
        let text = "In this paper we discuss the method of splatting Gaussians onto the screen with care.";
        assert_eq!(detect_section(text, 5, 10), Section::Methods);
        assert_eq!(detect_section(text, 0, 10), Section::Abstract);
    }

    #[test]
    fn positional_fallback_buckets() {
        let total = 20;
        assert_eq!(detect_section("plain", 0, total), Section::Abstract);
        assert_eq!(detect_section("plain", 3, total), Section::Introduction);
        assert_eq!(detect_section("plain", 4, total), Section::Methods);
        assert_eq!(detect_section("plain", 11, total), Section::Methods);
        assert_eq!(detect_section("plain", 12, total), Section::Results);
        assert_eq!(detect_section("plain", 16, total), Section::Results);
        assert_eq!(detect_section("plain", 17, total), Section::Conclusion);
        assert_eq!(detect_section("plain", 19, total), Section::Conclusion);
    }
}
