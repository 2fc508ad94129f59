//! Inclusion/exclusion filtering.

use listforge_fetch::FilterDownloader;
use listforge_rules::{FilterPattern, Rule};
use tracing::warn;

/// Compiled inclusion and exclusion pattern sets.
///
/// A rule is dropped when any exclusion matches it, or when inclusions are
/// non-empty and none matches it. Comments, blanks and directives are not
/// rules and always pass.
#[derive(Default)]
pub struct RuleFilters {
    exclusions: Vec<FilterPattern>,
    inclusions: Vec<FilterPattern>,
}

impl RuleFilters {
    /// Build the filter sets from inline pattern lists plus pattern source
    /// files. Each source line is one pattern; empty and comment lines are
    /// ignored. A source that cannot be loaded is logged and skipped so a
    /// missing exclusion file degrades rather than failing the compile.
    pub async fn load(
        downloader: &FilterDownloader,
        exclusions: &[String],
        exclusions_sources: &[String],
        inclusions: &[String],
        inclusions_sources: &[String],
    ) -> Self {
        Self {
            exclusions: load_patterns(downloader, exclusions, exclusions_sources).await,
            inclusions: load_patterns(downloader, inclusions, inclusions_sources).await,
        }
    }

    /// Build from inline patterns only.
    #[must_use]
    pub fn from_patterns(exclusions: &[String], inclusions: &[String]) -> Self {
        Self {
            exclusions: exclusions.iter().map(|p| FilterPattern::parse(p)).collect(),
            inclusions: inclusions.iter().map(|p| FilterPattern::parse(p)).collect(),
        }
    }

    /// True when no pattern is present on either side.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exclusions.is_empty() && self.inclusions.is_empty()
    }

    /// Apply the filters to a rule list.
    #[must_use]
    pub fn apply(&self, lines: Vec<String>) -> Vec<String> {
        if self.is_empty() {
            return lines;
        }
        lines
            .into_iter()
            .filter(|line| {
                if !Rule::parse(line).is_rule() {
                    return true;
                }
                if self.exclusions.iter().any(|p| p.matches(line)) {
                    return false;
                }
                if !self.inclusions.is_empty()
                    && !self.inclusions.iter().any(|p| p.matches(line))
                {
                    return false;
                }
                true
            })
            .collect()
    }
}

async fn load_patterns(
    downloader: &FilterDownloader,
    inline: &[String],
    sources: &[String],
) -> Vec<FilterPattern> {
    let mut patterns: Vec<FilterPattern> =
        inline.iter().map(|p| FilterPattern::parse(p)).collect();
    for source in sources {
        match downloader.download(source).await {
            Ok(download) => {
                patterns.extend(
                    download
                        .lines
                        .iter()
                        .filter(|line| {
                            !line.is_empty() && !line.starts_with('!') && !line.starts_with('#')
                        })
                        .map(|line| FilterPattern::parse(line)),
                );
            }
            Err(err) => {
                warn!(source = source.as_str(), %err, "pattern source skipped");
            }
        }
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(input: &[&str]) -> Vec<String> {
        input.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn exclusions_drop_matching_rules() {
        let filters = RuleFilters::from_patterns(&lines(&["tracker"]), &[]);
        let out = filters.apply(lines(&["||ads.example^", "||tracker.example^", "! c"]));
        assert_eq!(out, lines(&["||ads.example^", "! c"]));
    }

    #[test]
    fn inclusions_keep_only_matching_rules() {
        let filters = RuleFilters::from_patterns(&[], &lines(&["/^\\|\\|ads\\./"]));
        let out = filters.apply(lines(&["||ads.example^", "||other.example^", "! kept"]));
        assert_eq!(out, lines(&["||ads.example^", "! kept"]));
    }

    #[test]
    fn exclusions_win_over_inclusions() {
        let filters = RuleFilters::from_patterns(&lines(&["ads"]), &lines(&["ads"]));
        let out = filters.apply(lines(&["||ads.example^"]));
        assert!(out.is_empty());
    }

    #[test]
    fn wildcard_patterns() {
        let filters = RuleFilters::from_patterns(&lines(&["||*.example^"]), &[]);
        let out = filters.apply(lines(&["||sub.example^", "||example.org^"]));
        assert_eq!(out, lines(&["||example.org^"]));
    }

    #[tokio::test]
    async fn pattern_sources_load_and_skip_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exclusions.txt");
        std::fs::write(&path, "! comment\n# also comment\n\ntracker\n").unwrap();

        let downloader =
            FilterDownloader::new(listforge_fetch::DownloadOptions::default()).unwrap();
        let filters = RuleFilters::load(
            &downloader,
            &[],
            &[path.to_str().unwrap().to_string()],
            &[],
            &[],
        )
        .await;
        let out = filters.apply(lines(&["||tracker.example^", "||ads.example^"]));
        assert_eq!(out, lines(&["||ads.example^"]));
    }

    #[tokio::test]
    async fn missing_pattern_source_is_skipped() {
        let downloader =
            FilterDownloader::new(listforge_fetch::DownloadOptions::default()).unwrap();
        let filters = RuleFilters::load(
            &downloader,
            &lines(&["ads"]),
            &["/missing/exclusions.txt".to_string()],
            &[],
            &[],
        )
        .await;
        assert!(!filters.is_empty());
        let out = filters.apply(lines(&["||ads.example^", "||ok.example^"]));
        assert_eq!(out, lines(&["||ok.example^"]));
    }
}
