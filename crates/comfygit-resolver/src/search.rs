use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use rustc_hash::FxHashSet;

use comfygit_models::ModelRepository;
use comfygit_registry::RegistryMirror;
use comfygit_types::{
    Confidence, NodeInstall, ScoredModelMatch, ScoredPackageMatch,
};
use comfygit_workflow::ModelPathConfig;

use crate::Error;

/// Candidates below this similarity are not worth showing.
const SCORE_THRESHOLD: f64 = 0.3;

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\w+").expect("word pattern compiles"))
}

/// difflib-style similarity ratio over characters, case folded by the
/// caller.
fn ratio(a: &str, b: &str) -> f64 {
    f64::from(similar::TextDiff::from_chars(a, b).ratio())
}

/// Heuristic package search for a node type.
///
/// Installed packages are always candidates (with a bonus); the full
/// registry joins when `include_registry`. Scores combine a base fuzzy
/// ratio, keyword overlap, and hint-pattern bonuses, capped at 1.0;
/// results below the threshold are dropped, the rest sorted descending
/// and truncated to `limit`.
pub fn search_packages(
    mirror: &RegistryMirror,
    node_type: &str,
    installed: &IndexMap<String, NodeInstall>,
    include_registry: bool,
    limit: usize,
) -> Vec<ScoredPackageMatch> {
    if node_type.is_empty() {
        return Vec::new();
    }
    let node_type_lower = node_type.to_lowercase();

    let mut candidate_ids: Vec<(&str, bool)> = Vec::new();
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for package_id in installed.keys() {
        if mirror.package(package_id).is_some() && seen.insert(package_id.as_str()) {
            candidate_ids.push((package_id.as_str(), true));
        }
    }
    if include_registry {
        for (package_id, _) in mirror.packages() {
            if seen.insert(package_id.as_str()) {
                candidate_ids.push((package_id.as_str(), false));
            }
        }
    }

    let mut scored: Vec<ScoredPackageMatch> = candidate_ids
        .into_iter()
        .filter_map(|(package_id, is_installed)| {
            let package = mirror.package(package_id)?;
            let score = match_score(
                node_type,
                &node_type_lower,
                package_id,
                package.display_name.as_deref(),
                is_installed,
            );
            (score > SCORE_THRESHOLD).then(|| ScoredPackageMatch {
                package_id: package_id.to_string(),
                package: Some(package.clone()),
                score,
                confidence: Confidence::from_score(score),
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    scored
}

fn match_score(
    node_type: &str,
    node_type_lower: &str,
    package_id: &str,
    display_name: Option<&str>,
    is_installed: bool,
) -> f64 {
    let package_id_lower = package_id.to_lowercase();

    // Base fuzzy score over the id, improved by the display name.
    let mut base = ratio(node_type_lower, &package_id_lower);
    if let Some(display_name) = display_name {
        base = base.max(ratio(node_type_lower, &display_name.to_lowercase()));
    }

    // Keyword overlap.
    let node_words: FxHashSet<String> = word_pattern()
        .find_iter(node_type_lower)
        .map(|word| word.as_str().to_string())
        .collect();
    let mut package_words: FxHashSet<String> = word_pattern()
        .find_iter(&package_id_lower)
        .map(|word| word.as_str().to_string())
        .collect();
    if let Some(display_name) = display_name {
        package_words.extend(
            word_pattern()
                .find_iter(&display_name.to_lowercase())
                .map(|word| word.as_str().to_string()),
        );
    }
    let overlap = node_words.intersection(&package_words).count() as f64
        / node_words.len().max(1) as f64;
    let keyword_bonus = overlap * 0.20;

    let hint_bonus = hint_pattern_bonus(node_type, node_type_lower, &package_id_lower);
    let installed_bonus = if is_installed { 0.10 } else { 0.0 };

    (base + keyword_bonus + hint_bonus + installed_bonus).min(1.0)
}

/// Node authors often encode the providing package in the display name:
/// `"Depth Anything (controlnet_aux)"`, `"Blend | WAS"`, `"Load - VHS"`.
/// Each recognized pattern contributes a bonus; the largest wins.
fn hint_pattern_bonus(node_type: &str, node_type_lower: &str, package_id_lower: &str) -> f64 {
    let mut bonus: f64 = 0.0;

    // "Node Name (hint)"
    if let Some(open) = node_type.rfind('(') {
        if let Some(close) = node_type[open..].find(')') {
            let hint = node_type[open + 1..open + close].trim().to_lowercase();
            if hint.len() >= 3 {
                if hint == package_id_lower {
                    bonus = bonus.max(0.70);
                } else if package_id_lower.contains(&hint) {
                    bonus = bonus.max(0.60);
                }
            }
        }
    }

    // "Node Name | Hint"
    let pipe_parts: Vec<&str> = node_type.split('|').collect();
    if pipe_parts.len() == 2 {
        let hint = pipe_parts[1].trim().to_lowercase();
        if !hint.is_empty() && package_id_lower.contains(&hint) {
            bonus = bonus.max(0.55);
        }
    }

    // "Node Name - Hint" or "Node: Hint"
    for separator in [" - ", ": "] {
        if let Some((_, tail)) = node_type.rsplit_once(separator) {
            let hint = tail.trim().to_lowercase();
            if hint.len() >= 3 && package_id_lower.contains(&hint) {
                bonus = bonus.max(0.50);
                break;
            }
        }
    }

    // Any long package fragment appearing in the node type.
    for fragment in package_id_lower.split(['-', '_']) {
        if fragment.len() > 4 && node_type_lower.contains(fragment) {
            bonus = bonus.max(0.40);
            break;
        }
    }

    bonus
}

/// Fuzzy model search: a cheap SQL prefilter (or category filter when the
/// node type maps to known directories), then difflib-style ranking over
/// filename and stem, with a substring boost.
pub fn search_models(
    repository: &ModelRepository,
    config: &ModelPathConfig,
    search_term: &str,
    node_type: Option<&str>,
    limit: usize,
) -> Result<Vec<ScoredModelMatch>, Error> {
    let directories = node_type
        .map(|node_type| config.directories_for_node(node_type))
        .unwrap_or(&[]);

    let candidates = if directories.is_empty() {
        repository.search(search_term)?
    } else {
        let mut candidates = Vec::new();
        for directory in directories {
            candidates.extend(repository.get_by_category(directory)?);
        }
        candidates
    };
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let search_lower = search_term.to_lowercase();
    let search_stem = stem(&search_lower).to_string();

    let mut scored: Vec<ScoredModelMatch> = candidates
        .into_iter()
        .filter_map(|model| {
            let filename_lower = model.filename.to_lowercase();
            let filename_stem = stem(&filename_lower);

            let mut score = ratio(&search_lower, &filename_lower)
                .max(ratio(&search_stem, filename_stem));
            if filename_lower.contains(&search_lower) {
                score = (score + 0.15).min(1.0);
            }

            (score > SCORE_THRESHOLD).then(|| ScoredModelMatch {
                confidence: Confidence::from_score(score),
                score,
                model,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    Ok(scored)
}

fn stem(filename: &str) -> &str {
    filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename)
}
