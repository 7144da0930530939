//! Name/title normalization and similarity — the single utility shared by
//! person dedup, change dedup, change detection, and discovery merge.
//!
//! Keeping all fuzzy-matching behavior in one place guarantees the same
//! record matches the same way at every pipeline stage.

use crate::types::{ChangeType, Confidence, TitleLevel};

/// Generational and credential suffixes stripped from person names.
const NAME_SUFFIXES: &[&str] = &[
    "jr", "sr", "ii", "iii", "iv", "phd", "md", "mba", "cpa", "cfa", "esq", "jd",
];

/// Legal-entity suffixes stripped from unit names.
const LEGAL_SUFFIXES: &[&str] = &[
    "inc",
    "incorporated",
    "corp",
    "corporation",
    "co",
    "company",
    "llc",
    "llp",
    "lp",
    "ltd",
    "limited",
    "plc",
    "sa",
    "ag",
    "gmbh",
    "nv",
    "group",
    "holdings",
];

/// Long-form titles canonicalized to their abbreviations, longest first so
/// "executive vice president" wins over "vice president".
const TITLE_ABBREVIATIONS: &[(&str, &str)] = &[
    ("chief executive officer", "ceo"),
    ("chief financial officer", "cfo"),
    ("chief operating officer", "coo"),
    ("chief technology officer", "cto"),
    ("chief information officer", "cio"),
    ("chief marketing officer", "cmo"),
    ("chief human resources officer", "chro"),
    ("executive vice president", "evp"),
    ("senior vice president", "svp"),
    ("vice president", "vp"),
];

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Lowercase, replace punctuation with spaces, collapse whitespace.
fn clean(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for c in s.chars() {
        let c = if c.is_alphanumeric() {
            c.to_ascii_lowercase()
        } else {
            ' '
        };
        if c == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Drop trailing tokens found in `suffixes`, repeatedly.
fn strip_trailing(tokens: &mut Vec<String>, suffixes: &[&str]) {
    while tokens.len() > 1 {
        let last = tokens.last().map(String::as_str).unwrap_or("");
        if suffixes.contains(&last) {
            tokens.pop();
        } else {
            break;
        }
    }
}

/// Normalize a person name for identity matching: lowercase, punctuation
/// stripped, whitespace collapsed, generational/credential suffixes removed.
pub fn normalize_person_name(name: &str) -> String {
    let mut tokens: Vec<String> = clean(name).split_whitespace().map(String::from).collect();
    strip_trailing(&mut tokens, NAME_SUFFIXES);
    tokens.join(" ")
}

/// Normalize a business-unit name for dedup keying: lowercase, punctuation
/// stripped, legal suffixes removed.
pub fn normalize_unit_name(name: &str) -> String {
    let mut tokens: Vec<String> = clean(name).split_whitespace().map(String::from).collect();
    strip_trailing(&mut tokens, LEGAL_SUFFIXES);
    tokens.join(" ")
}

/// Normalize a title for comparison: lowercase, punctuation stripped,
/// long-form C-suite and VP titles canonicalized to abbreviations.
pub fn normalize_title(title: &str) -> String {
    let mut t = clean(title);
    for (long, short) in TITLE_ABBREVIATIONS {
        if t.contains(long) {
            t = t.replace(long, short);
        }
    }
    t.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Fuzzy name similarity in [0, 1] over normalized names.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_person_name(a);
    let nb = normalize_person_name(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(&na, &nb)
}

// ---------------------------------------------------------------------------
// Title classification
// ---------------------------------------------------------------------------

fn tokens(title: &str) -> Vec<String> {
    normalize_title(title)
        .split_whitespace()
        .map(String::from)
        .collect()
}

fn has(tokens: &[String], word: &str) -> bool {
    tokens.iter().any(|t| t == word)
}

const C_SUITE_TOKENS: &[&str] = &["ceo", "cfo", "coo", "cto", "cio", "cmo", "chro"];

/// Derive the coarse [`TitleLevel`] from a free-text title.
pub fn title_level(title: &str) -> TitleLevel {
    let toks = tokens(title);
    if toks.is_empty() {
        return TitleLevel::Unknown;
    }
    if C_SUITE_TOKENS.iter().any(|c| has(&toks, c)) || has(&toks, "chief") {
        return TitleLevel::CSuite;
    }
    if has(&toks, "chairman") || has(&toks, "board") || has(&toks, "trustee") {
        return TitleLevel::Board;
    }
    if has(&toks, "president") {
        return TitleLevel::President;
    }
    if has(&toks, "evp") {
        return TitleLevel::Evp;
    }
    if has(&toks, "svp") {
        return TitleLevel::Svp;
    }
    if has(&toks, "vp") {
        return TitleLevel::Vp;
    }
    if has(&toks, "director") {
        return TitleLevel::Director;
    }
    if has(&toks, "manager") || has(&toks, "head") || has(&toks, "lead") {
        return TitleLevel::Manager;
    }
    TitleLevel::Individual
}

/// Deterministic title → management level (1 = CEO … 9 = unknown).
///
/// CEO-compound titles and chairman-without-"vice" resolve to 1; other
/// C-suite and president titles to 2; EVP 3; SVP 4; VP 5; director or
/// board 6; manager 7; everything else 9.
pub fn management_level(title: &str) -> u8 {
    let toks = tokens(title);
    if has(&toks, "ceo") {
        return 1;
    }
    if has(&toks, "chairman") && !has(&toks, "vice") {
        return 1;
    }
    if C_SUITE_TOKENS.iter().any(|c| has(&toks, c))
        || has(&toks, "chief")
        || has(&toks, "president")
    {
        return 2;
    }
    if has(&toks, "evp") {
        return 3;
    }
    if has(&toks, "svp") {
        return 4;
    }
    if has(&toks, "vp") {
        return 5;
    }
    if has(&toks, "director") || has(&toks, "board") || has(&toks, "chairman") {
        return 6;
    }
    if has(&toks, "manager") || has(&toks, "head") || has(&toks, "lead") {
        return 7;
    }
    9
}

/// Rank in the fixed seniority ladder used for promotion/demotion
/// classification: ceo > president > evp > svp > vp > director > manager.
/// Unrecognized titles rank lowest.
pub fn seniority_rank(title: &str) -> u8 {
    let toks = tokens(title);
    if has(&toks, "ceo") {
        7
    } else if has(&toks, "president") && !has(&toks, "vice") {
        6
    } else if has(&toks, "evp") {
        5
    } else if has(&toks, "svp") {
        4
    } else if has(&toks, "vp") {
        3
    } else if has(&toks, "director") {
        2
    } else if has(&toks, "manager") {
        1
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Significance scoring
// ---------------------------------------------------------------------------

/// Heuristic importance of a leadership change, clamped to 1..=10.
///
/// Base 5, +3 for C-suite, +2 for board, +2 per CEO-keyword title, +1 for
/// high confidence, -1 for a departure.
pub fn score_significance(
    change_type: ChangeType,
    old_title: Option<&str>,
    new_title: Option<&str>,
    is_c_suite: bool,
    is_board: bool,
    confidence: Confidence,
) -> u8 {
    let mut score: i32 = 5;
    if is_c_suite {
        score += 3;
    }
    if is_board {
        score += 2;
    }
    for title in [old_title, new_title].into_iter().flatten() {
        if has(&tokens(title), "ceo") {
            score += 2;
        }
    }
    if confidence == Confidence::High {
        score += 1;
    }
    if change_type == ChangeType::Departure {
        score -= 1;
    }
    score.clamp(1, 10) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_name_normalization() {
        assert_eq!(normalize_person_name("Dr. John A. Smith, Jr."), "dr john a smith");
        assert_eq!(normalize_person_name("  Mary   O'Brien  "), "mary o brien");
        assert_eq!(normalize_person_name("Robert Chen III"), "robert chen");
        assert_eq!(normalize_person_name("Jane Doe, PhD"), "jane doe");
    }

    #[test]
    fn unit_name_normalization() {
        assert_eq!(normalize_unit_name("Acme Robotics, Inc."), "acme robotics");
        assert_eq!(normalize_unit_name("Initech Holdings LLC"), "initech");
        assert_eq!(normalize_unit_name("Globex Corporation"), "globex");
        // A single suffix token is the whole name; keep it.
        assert_eq!(normalize_unit_name("Group"), "group");
    }

    #[test]
    fn title_normalization_expands_abbreviations() {
        assert_eq!(normalize_title("Chief Executive Officer"), "ceo");
        assert_eq!(normalize_title("Senior Vice President, Marketing"), "svp marketing");
        assert_eq!(normalize_title("V.P. of Engineering"), "v p of engineering");
        assert_eq!(normalize_title("Executive Vice President of Sales"), "evp of sales");
    }

    #[test]
    fn similarity_exact_and_fuzzy() {
        assert!(name_similarity("Alice Lee", "alice lee") > 0.999);
        assert!(name_similarity("Jonathan Smith", "Jonathon Smith") > 0.9);
        assert!(name_similarity("Alice Lee", "Robert Chen") < 0.7);
        assert_eq!(name_similarity("", "Alice Lee"), 0.0);
    }

    // Literal vectors for the management-level table.
    #[test]
    fn management_level_table() {
        assert_eq!(management_level("Chief Executive Officer"), 1);
        assert_eq!(management_level("Chairman and CEO"), 1);
        assert_eq!(management_level("Chairman"), 1);
        assert_eq!(management_level("Vice Chairman"), 6);
        assert_eq!(management_level("Chief Financial Officer"), 2);
        assert_eq!(management_level("President"), 2);
        assert_eq!(management_level("Executive Vice President of Sales"), 3);
        assert_eq!(management_level("Senior Vice President, Operations"), 4);
        assert_eq!(management_level("Vice President of Marketing"), 5);
        assert_eq!(management_level("Director of Engineering"), 6);
        assert_eq!(management_level("Regional Sales Manager"), 7);
        assert_eq!(management_level("Software Engineer"), 9);
    }

    #[test]
    fn title_level_classification() {
        assert_eq!(title_level("Chief Executive Officer"), TitleLevel::CSuite);
        assert_eq!(title_level("President"), TitleLevel::President);
        assert_eq!(title_level("Executive Vice President"), TitleLevel::Evp);
        assert_eq!(title_level("Senior Vice President"), TitleLevel::Svp);
        assert_eq!(title_level("VP, Product"), TitleLevel::Vp);
        assert_eq!(title_level("Director of Engineering"), TitleLevel::Director);
        assert_eq!(title_level("Engineering Manager"), TitleLevel::Manager);
        assert_eq!(title_level("Board Member"), TitleLevel::Board);
        assert_eq!(title_level("Chairman"), TitleLevel::Board);
        assert_eq!(title_level("Staff Engineer"), TitleLevel::Individual);
        assert_eq!(title_level(""), TitleLevel::Unknown);
    }

    #[test]
    fn seniority_ladder() {
        let ladder = [
            "CEO",
            "President",
            "Executive Vice President",
            "Senior Vice President",
            "Vice President",
            "Director",
            "Manager",
        ];
        let ranks: Vec<u8> = ladder.iter().map(|t| seniority_rank(t)).collect();
        for pair in ranks.windows(2) {
            assert!(pair[0] > pair[1], "ladder out of order: {ranks:?}");
        }
        // Unrecognized titles rank lowest.
        assert_eq!(seniority_rank("Principal Scientist"), 0);
    }

    #[test]
    fn vp_tokens_do_not_collide() {
        // "SVP" must not classify as VP via substring matching.
        assert_eq!(seniority_rank("SVP Sales"), 4);
        assert_eq!(seniority_rank("EVP Sales"), 5);
        assert_eq!(seniority_rank("VP Sales"), 3);
    }

    #[test]
    fn significance_scoring() {
        // C-suite hire with CEO keyword in the new title, high confidence:
        // 5 + 3 + 2 + 1 = 11, clamped to 10.
        assert_eq!(
            score_significance(
                ChangeType::Hire,
                None,
                Some("Chief Executive Officer"),
                true,
                false,
                Confidence::High,
            ),
            10
        );
        // Plain manager-level departure: 5 - 1 = 4.
        assert_eq!(
            score_significance(
                ChangeType::Departure,
                Some("Regional Sales Manager"),
                None,
                false,
                false,
                Confidence::Low,
            ),
            4
        );
        // Board appointment: 5 + 2 = 7.
        assert_eq!(
            score_significance(
                ChangeType::BoardAppointment,
                None,
                Some("Board Member"),
                false,
                true,
                Confidence::Medium,
            ),
            7
        );
    }
}
