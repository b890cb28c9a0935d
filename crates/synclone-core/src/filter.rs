use crate::model::DiscoveredRepo;
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

/// User-facing selection criteria. Every set criterion must pass for a
/// repository to be synced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    pub include_topics: Vec<String>,
    pub exclude_topics: Vec<String>,
    pub language: Option<String>,
    pub min_stars: Option<u32>,
    pub max_stars: Option<u32>,
    /// Kilobytes.
    pub size_limit: Option<u64>,
    /// `YYYY-MM-DD`, inclusive.
    pub updated_after: Option<String>,
    /// `YYYY-MM-DD`, exclusive.
    pub updated_before: Option<String>,
    pub include_archived: bool,
    pub include_forks: bool,
    pub include_private: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FilterStage {
    Name,
    Topics,
    Language,
    Stars,
    Size,
    Date,
    Flags,
}

impl FilterStage {
    pub const ALL: [FilterStage; 7] = [
        FilterStage::Name,
        FilterStage::Topics,
        FilterStage::Language,
        FilterStage::Stars,
        FilterStage::Size,
        FilterStage::Date,
        FilterStage::Flags,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterStage::Name => "name",
            FilterStage::Topics => "topics",
            FilterStage::Language => "language",
            FilterStage::Stars => "stars",
            FilterStage::Size => "size",
            FilterStage::Date => "date",
            FilterStage::Flags => "flags",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub input: usize,
    pub kept: usize,
    removed: [usize; 7],
}

impl FilterStats {
    pub fn removed_by(&self, stage: FilterStage) -> usize {
        self.removed[stage.index()]
    }

    pub fn removed(&self) -> usize {
        self.input - self.kept
    }
}

/// Compiled form of [`FilterCriteria`].
#[derive(Clone, Debug, Default)]
pub struct RepoFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
    include_topics: Vec<String>,
    exclude_topics: Vec<String>,
    language: Option<String>,
    min_stars: Option<u32>,
    max_stars: Option<u32>,
    size_limit: Option<u64>,
    updated_after: Option<OffsetDateTime>,
    updated_before: Option<OffsetDateTime>,
    include_archived: bool,
    include_forks: bool,
    include_private: bool,
}

impl RepoFilter {
    pub fn compile(criteria: &FilterCriteria) -> anyhow::Result<Self> {
        let include = compile_pattern(criteria.include_pattern.as_deref(), "include")?;
        let exclude = compile_pattern(criteria.exclude_pattern.as_deref(), "exclude")?;
        if let (Some(min), Some(max)) = (criteria.min_stars, criteria.max_stars)
            && max > 0
            && min > max
        {
            anyhow::bail!("min stars {min} is greater than max stars {max}");
        }
        let updated_after = parse_day(criteria.updated_after.as_deref(), "updated-after")?;
        let updated_before = parse_day(criteria.updated_before.as_deref(), "updated-before")?;
        if let (Some(after), Some(before)) = (updated_after, updated_before)
            && after >= before
        {
            anyhow::bail!("updated-after must be earlier than updated-before");
        }

        Ok(Self {
            include,
            exclude,
            include_topics: lowercase_all(&criteria.include_topics),
            exclude_topics: lowercase_all(&criteria.exclude_topics),
            language: criteria
                .language
                .as_deref()
                .map(str::trim)
                .filter(|lang| !lang.is_empty())
                .map(str::to_string),
            min_stars: criteria.min_stars.filter(|stars| *stars > 0),
            max_stars: criteria.max_stars.filter(|stars| *stars > 0),
            size_limit: criteria.size_limit.filter(|size| *size > 0),
            updated_after,
            updated_before,
            include_archived: criteria.include_archived,
            include_forks: criteria.include_forks,
            include_private: criteria.include_private,
        })
    }

    /// Filter that keeps everything.
    pub fn allow_all() -> Self {
        Self {
            include_archived: true,
            include_forks: true,
            include_private: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, repo: &DiscoveredRepo) -> bool {
        self.rejected_by(repo).is_none()
    }

    /// First stage, in evaluation order, that rejects `repo`.
    pub fn rejected_by(&self, repo: &DiscoveredRepo) -> Option<FilterStage> {
        FilterStage::ALL
            .into_iter()
            .find(|stage| !self.passes(*stage, repo))
    }

    pub fn apply(&self, repos: Vec<DiscoveredRepo>) -> (Vec<DiscoveredRepo>, FilterStats) {
        let mut stats = FilterStats {
            input: repos.len(),
            ..FilterStats::default()
        };
        let kept: Vec<DiscoveredRepo> = repos
            .into_iter()
            .filter(|repo| match self.rejected_by(repo) {
                Some(stage) => {
                    stats.removed[stage.index()] += 1;
                    false
                }
                None => true,
            })
            .collect();
        stats.kept = kept.len();
        (kept, stats)
    }

    fn passes(&self, stage: FilterStage, repo: &DiscoveredRepo) -> bool {
        match stage {
            FilterStage::Name => {
                self.include
                    .as_ref()
                    .is_none_or(|re| re.is_match(&repo.name))
                    && !self.exclude.as_ref().is_some_and(|re| re.is_match(&repo.name))
            }
            FilterStage::Topics => {
                let has = |topic: &String| {
                    repo.topics
                        .iter()
                        .any(|candidate| candidate.eq_ignore_ascii_case(topic))
                };
                (self.include_topics.is_empty() || self.include_topics.iter().any(has))
                    && !self.exclude_topics.iter().any(has)
            }
            FilterStage::Language => self.language.as_ref().is_none_or(|wanted| {
                repo.language
                    .as_deref()
                    .is_some_and(|lang| lang.eq_ignore_ascii_case(wanted))
            }),
            FilterStage::Stars => {
                self.min_stars.is_none_or(|min| repo.star_count >= min)
                    && self.max_stars.is_none_or(|max| repo.star_count <= max)
            }
            FilterStage::Size => self.size_limit.is_none_or(|limit| repo.size <= limit),
            FilterStage::Date => {
                if self.updated_after.is_none() && self.updated_before.is_none() {
                    return true;
                }
                let Some(updated) = repo.updated_at else {
                    return false;
                };
                self.updated_after.is_none_or(|after| updated >= after)
                    && self.updated_before.is_none_or(|before| updated < before)
            }
            FilterStage::Flags => {
                (self.include_archived || !repo.is_archived)
                    && (self.include_forks || !repo.is_fork)
                    && (self.include_private || !repo.is_private)
            }
        }
    }
}

fn compile_pattern(pattern: Option<&str>, label: &str) -> anyhow::Result<Option<Regex>> {
    match pattern.filter(|pattern| !pattern.is_empty()) {
        Some(pattern) => Regex::new(pattern)
            .map(Some)
            .with_context(|| format!("invalid {label} pattern '{pattern}'")),
        None => Ok(None),
    }
}

fn parse_day(value: Option<&str>, label: &str) -> anyhow::Result<Option<OffsetDateTime>> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let date = Date::parse(value, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid {label} date '{value}' (expected YYYY-MM-DD)"))?;
    Ok(Some(date.with_time(Time::MIDNIGHT).assume_utc()))
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}
