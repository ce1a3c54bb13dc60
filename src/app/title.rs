use std::sync::LazyLock;

use regex::Regex;

/// `Show Name S01E02`, `Show.Name.s1e2`
static RE_SXXEXX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<title>.*?)[\s._-]*s(?P<season>\d{1,2})[\s._-]*e(?P<episode>\d{1,3})\b")
        .unwrap()
});

/// `Show Name 1x02`
static RE_NXNN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<title>.*?)[\s._-]*\b(?P<season>\d{1,2})x(?P<episode>\d{1,3})\b").unwrap()
});

/// `Show Name Season 1 Episode 2`
static RE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<title>.*?)[\s._-]*season[\s._-]*(?P<season>\d{1,2})[\s._-]*episode[\s._-]*(?P<episode>\d{1,3})\b",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEpisode {
    pub title: String,
    pub season: u32,
    pub episode: u32,
}

/// Best-effort season/episode extraction from a free-form show title.
pub fn parse_episode_title(raw: &str) -> Option<ParsedEpisode> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for pattern in [&*RE_SXXEXX, &*RE_NXNN, &*RE_WORDS] {
        let Some(caps) = pattern.captures(raw) else {
            continue;
        };
        let season = caps.name("season")?.as_str().parse::<u32>().ok()?;
        let episode = caps.name("episode")?.as_str().parse::<u32>().ok()?;
        let title = clean_title(caps.name("title").map_or("", |m| m.as_str()));
        if title.is_empty() {
            continue;
        }
        return Some(ParsedEpisode {
            title,
            season,
            episode,
        });
    }
    None
}

fn clean_title(raw: &str) -> String {
    raw.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['-', ' '])
        .to_string()
}
