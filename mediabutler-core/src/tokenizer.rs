//! Filename tokenization.
//!
//! Pure string processing: release names go in, series tokens plus episode
//! and quality markers come out. No I/O, deterministic, so classification is
//! reproducible for a given filename.

use once_cell::sync::Lazy;
use regex::Regex;

/// Tokens shorter than this are noise and dropped from series tokens.
pub const MIN_TOKEN_LENGTH: usize = 2;

/// Episode marker extracted from a filename. `season` is absent for
/// flat-numbered long-running series (`One.Piece.1089`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeMarker {
    pub season: Option<u32>,
    pub episode: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityInfo {
    pub resolution: Option<String>,
    pub codec: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedName {
    /// Lowercased candidate series tokens, stop-words removed.
    pub series_tokens: Vec<String>,
    pub episode: Option<EpisodeMarker>,
    pub quality: QualityInfo,
    /// Tag-stripped, separator-normalized base name (original case).
    pub normalized_base: String,
}

/// Episode patterns in order of preference; the first matching pattern wins
/// and within one pattern the leftmost occurrence wins.
static EPISODE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("s00e00", Regex::new(r"(?i)\bS(\d{1,2})\s*E(\d{1,3})\b").unwrap()),
        ("0x00", Regex::new(r"\b(\d{1,2})[xX](\d{1,3})\b").unwrap()),
        (
            "season_episode",
            Regex::new(r"(?i)\bSeason\s+(\d+)\s+Episode\s+(\d+)\b").unwrap(),
        ),
        // Bare episode number for long-running series without seasons.
        ("e00", Regex::new(r"(?i)\bE(\d{1,4})\b").unwrap()),
    ]
});

static LEADING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\[[^\]]*\]|\([^)]*\))\s*").unwrap());

static YEAR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(19|20)\d{2}$").unwrap());

static NUMERIC_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

static EXTENSION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[A-Za-z][A-Za-z0-9]{1,3}$").unwrap());

const RESOLUTION_TOKENS: &[&str] = &["1080p", "720p", "2160p", "4k"];
const SOURCE_TOKENS: &[&str] = &["hdtv", "bluray", "webrip", "web-dl", "web-dlmux"];
const CODEC_TOKENS: &[&str] = &["x264", "x265", "h264", "h265", "hevc", "avc"];
const AUDIO_TOKENS: &[&str] = &["aac", "ac3", "dts", "flac"];
const LANGUAGE_TOKENS: &[&str] = &["ita", "eng", "sub", "dub", "multi"];
const RELEASE_TOKENS: &[&str] = &["final", "repack", "proper", "extended", "remux"];

fn is_stop_token(token: &str) -> bool {
    let token = token.strip_prefix('-').unwrap_or(token);
    let lowered = token.to_lowercase();
    // "x264-GROUP" style tokens carry the release group after a hyphen.
    let head = lowered.split('-').next().unwrap_or(&lowered);
    for set in [
        RESOLUTION_TOKENS,
        SOURCE_TOKENS,
        CODEC_TOKENS,
        AUDIO_TOKENS,
        LANGUAGE_TOKENS,
        RELEASE_TOKENS,
    ] {
        if set.contains(&lowered.as_str()) || set.contains(&head) {
            return true;
        }
    }
    false
}

/// Tokenize with the default minimum token length.
pub fn tokenize(filename: &str) -> TokenizedName {
    tokenize_with(filename, MIN_TOKEN_LENGTH)
}

pub fn tokenize_with(filename: &str, min_token_length: usize) -> TokenizedName {
    let stem = strip_extension(filename);
    let stripped = strip_leading_tags(stem);
    let normalized_base = normalize_separators(stripped);

    let episode_match = find_episode_marker(&normalized_base);

    // Candidate tokens: everything before the episode marker; without a
    // marker, everything up to a trailing year or flat episode number.
    let (candidate, episode) = match episode_match {
        Some((start, marker)) => (normalized_base[..start].to_string(), Some(marker)),
        None => truncate_unmarked(&normalized_base),
    };

    let series_tokens = candidate
        .split_whitespace()
        .filter(|token| !is_stop_token(token))
        .map(str::to_lowercase)
        .filter(|token| token.len() >= min_token_length)
        .filter(|token| !NUMERIC_TOKEN.is_match(token))
        .collect();

    TokenizedName {
        series_tokens,
        episode,
        quality: extract_quality(&normalized_base),
        normalized_base,
    }
}

fn strip_extension(filename: &str) -> &str {
    match EXTENSION_SUFFIX.find(filename) {
        Some(found) if found.start() > 0 => &filename[..found.start()],
        _ => filename,
    }
}

fn strip_leading_tags(mut name: &str) -> &str {
    while let Some(found) = LEADING_TAG.find(name) {
        let rest = &name[found.end()..];
        if !rest.chars().any(|c| c.is_alphanumeric()) {
            break;
        }
        name = rest;
    }
    name
}

fn normalize_separators(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn find_episode_marker(normalized: &str) -> Option<(usize, EpisodeMarker)> {
    for (name, pattern) in EPISODE_PATTERNS.iter() {
        let Some(captures) = pattern.captures(normalized) else {
            continue;
        };
        let whole = captures.get(0)?;
        let marker = match *name {
            "e00" => EpisodeMarker {
                season: None,
                episode: captures[1].parse().ok()?,
            },
            _ => EpisodeMarker {
                season: Some(captures[1].parse().ok()?),
                episode: captures[2].parse().ok()?,
            },
        };
        return Some((whole.start(), marker));
    }
    None
}

/// Without an explicit marker, a trailing year bounds the title and a
/// trailing 2-4 digit number is read as a flat episode index.
fn truncate_unmarked(normalized: &str) -> (String, Option<EpisodeMarker>) {
    let tokens: Vec<&str> = normalized.split_whitespace().collect();

    if let Some(year_pos) = tokens.iter().position(|t| YEAR_TOKEN.is_match(t)) {
        // Keep only tokens before the year; a year token mid-name still
        // bounds the title ("Show 2005 1080p ...").
        if year_pos > 0 {
            return (tokens[..year_pos].join(" "), None);
        }
    }

    if let Some(last) = tokens.last() {
        if NUMERIC_TOKEN.is_match(last) && (2..=4).contains(&last.len()) && tokens.len() > 1 {
            // Episode indexes stop below the year range; anything at 2000
            // or above is a year or garbage, never a flat episode number.
            if let Some(episode) = last.parse::<u32>().ok().filter(|value| *value < 2000) {
                return (
                    tokens[..tokens.len() - 1].join(" "),
                    Some(EpisodeMarker {
                        season: None,
                        episode,
                    }),
                );
            }
        }
    }

    (normalized.to_string(), None)
}

fn extract_quality(normalized: &str) -> QualityInfo {
    let mut quality = QualityInfo::default();
    for raw in normalized.split_whitespace() {
        let token = raw.strip_prefix('-').unwrap_or(raw).to_lowercase();
        let head = token.split('-').next().unwrap_or(&token).to_string();
        if quality.resolution.is_none() && RESOLUTION_TOKENS.contains(&token.as_str()) {
            quality.resolution = Some(token.clone());
        }
        if quality.source.is_none() {
            if SOURCE_TOKENS.contains(&token.as_str()) {
                quality.source = Some(token.clone());
            } else if SOURCE_TOKENS.contains(&head.as_str()) {
                quality.source = Some(head.clone());
            }
        }
        if quality.codec.is_none() {
            if CODEC_TOKENS.contains(&token.as_str()) {
                quality.codec = Some(token.clone());
            } else if CODEC_TOKENS.contains(&head.as_str()) {
                quality.codec = Some(head);
            }
        }
    }
    quality
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_sxxexx_release() {
        let parsed = tokenize("The.Walking.Dead.S11E24.FINAL.ITA.ENG.1080p.mkv");
        assert_eq!(parsed.series_tokens, vec!["the", "walking", "dead"]);
        assert_eq!(
            parsed.episode,
            Some(EpisodeMarker {
                season: Some(11),
                episode: 24
            })
        );
        assert_eq!(parsed.quality.resolution.as_deref(), Some("1080p"));
    }

    #[test]
    fn parses_x_separator_and_spelled_out_forms() {
        let parsed = tokenize("Friends 3x07 HDTV x264.mkv");
        assert_eq!(parsed.series_tokens, vec!["friends"]);
        assert_eq!(
            parsed.episode,
            Some(EpisodeMarker {
                season: Some(3),
                episode: 7
            })
        );
        assert_eq!(parsed.quality.source.as_deref(), Some("hdtv"));
        assert_eq!(parsed.quality.codec.as_deref(), Some("x264"));

        let parsed = tokenize("Doctor Who Season 4 Episode 12.mp4");
        assert_eq!(parsed.series_tokens, vec!["doctor", "who"]);
        assert_eq!(
            parsed.episode,
            Some(EpisodeMarker {
                season: Some(4),
                episode: 12
            })
        );
    }

    #[test]
    fn sxxexx_wins_over_later_patterns() {
        // "2x05" also appears but the S-E pattern has priority.
        let parsed = tokenize("Show.S01E02.2x05.mkv");
        assert_eq!(
            parsed.episode,
            Some(EpisodeMarker {
                season: Some(1),
                episode: 2
            })
        );
    }

    #[test]
    fn strips_leading_group_tags() {
        let parsed = tokenize("[SubGroup] One Punch Man S02E03 [720p].mkv");
        assert_eq!(parsed.series_tokens, vec!["one", "punch", "man"]);
        assert_eq!(
            parsed.episode,
            Some(EpisodeMarker {
                season: Some(2),
                episode: 3
            })
        );
    }

    #[test]
    fn flat_numbered_series_reads_bare_trailing_number_as_episode() {
        let parsed = tokenize("One.Piece.1089.mkv");
        assert_eq!(parsed.series_tokens, vec!["one", "piece"]);
        assert_eq!(
            parsed.episode,
            Some(EpisodeMarker {
                season: None,
                episode: 1089
            })
        );
    }

    #[test]
    fn trailing_numbers_at_or_above_the_year_range_are_not_episodes() {
        // Not a 19xx/20xx year, but also not below the episode ceiling.
        let parsed = tokenize("Some.Show.2150.mkv");
        assert_eq!(parsed.series_tokens, vec!["some", "show"]);
        assert_eq!(parsed.episode, None);

        let parsed = tokenize("Some.Show.9999.mkv");
        assert_eq!(parsed.series_tokens, vec!["some", "show"]);
        assert_eq!(parsed.episode, None);

        // 19xx sits in the year band, so the year rule wins over the
        // episode heuristic.
        let parsed = tokenize("Some.Show.1999.mkv");
        assert_eq!(parsed.series_tokens, vec!["some", "show"]);
        assert_eq!(parsed.episode, None);
    }

    #[test]
    fn trailing_year_bounds_the_title() {
        let parsed = tokenize("The.Office.2005.1080p.BluRay.mkv");
        assert_eq!(parsed.series_tokens, vec!["the", "office"]);
        assert_eq!(parsed.episode, None);
        assert_eq!(parsed.quality.source.as_deref(), Some("bluray"));
    }

    #[test]
    fn stop_tokens_and_release_groups_are_dropped() {
        let parsed = tokenize("Severance.S02E01.REPACK.1080p.WEB-DL.x265-NTb.mkv");
        assert_eq!(parsed.series_tokens, vec!["severance"]);
        assert_eq!(parsed.quality.source.as_deref(), Some("web-dl"));
        assert_eq!(parsed.quality.codec.as_deref(), Some("x265"));
    }

    #[test]
    fn short_and_numeric_tokens_are_filtered() {
        let parsed = tokenize("A.24.Show.S01E01.mkv");
        // "a" is below the length floor, "24" is purely numeric.
        assert_eq!(parsed.series_tokens, vec!["show"]);
    }

    #[test]
    fn no_marker_no_year_keeps_all_tokens() {
        let parsed = tokenize("Planet Earth.mkv");
        assert_eq!(parsed.series_tokens, vec!["planet", "earth"]);
        assert_eq!(parsed.episode, None);
    }

    #[test]
    fn extension_is_only_stripped_when_it_looks_like_one() {
        // ".1089" is not an extension; ".mkv" is.
        assert_eq!(strip_extension("One.Piece.1089"), "One.Piece.1089");
        assert_eq!(strip_extension("ep.mkv"), "ep");
    }

    #[test]
    fn tokenization_is_deterministic() {
        let a = tokenize("Dark.S03E08.FINAL.ITA.1080p.WEB-DLMux.mkv");
        let b = tokenize("Dark.S03E08.FINAL.ITA.1080p.WEB-DLMux.mkv");
        assert_eq!(a, b);
    }
}
