//! Candidate validation and person-record construction shared by the
//! evidence sources.
//!
//! Validation failures are silent drops: a nav label or a marketing
//! sentence that fails the sanity checks is not an error, it is noise.

use orgscope_shared::matching::title_level;
use orgscope_shared::{Confidence, ExtractedPerson, TitleLevel};

/// Words that frequently show up in heading/link markup but never in a
/// real person's name.
const NON_NAME_WORDS: &[&str] = &[
    "team",
    "leadership",
    "management",
    "officers",
    "executives",
    "board",
    "directors",
    "about",
    "contact",
    "careers",
    "overview",
    "committee",
    "our",
    "meet",
    "company",
];

/// Basic sanity check for a person-name candidate.
pub fn validate_person_name(name: &str) -> bool {
    let name = name.trim();
    let words: Vec<&str> = name.split_whitespace().collect();
    if !(2..=5).contains(&words.len()) || name.len() > 60 {
        return false;
    }
    if name.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    if !name.chars().next().is_some_and(|c| c.is_uppercase()) {
        return false;
    }
    let lowered = name.to_lowercase();
    if NON_NAME_WORDS
        .iter()
        .any(|w| lowered.split_whitespace().any(|t| t == *w))
    {
        return false;
    }
    // Sentences are not names.
    !name.ends_with('.') && !name.contains('?') && !name.contains('!')
}

/// Basic sanity check for a title candidate.
pub fn validate_title(title: &str) -> bool {
    let title = title.trim();
    if title.is_empty() || title.len() > 120 {
        return false;
    }
    if title.split_whitespace().count() > 12 {
        return false;
    }
    title.chars().any(|c| c.is_alphabetic())
}

/// Whether a title names a board seat.
pub fn is_board_title(title: &str) -> bool {
    matches!(title_level(title), TitleLevel::Board)
}

/// Whether a title names an executive role.
pub fn is_executive_title(title: &str) -> bool {
    matches!(
        title_level(title),
        TitleLevel::CSuite | TitleLevel::President | TitleLevel::Evp | TitleLevel::Svp | TitleLevel::Vp
    )
}

/// Build a validated [`ExtractedPerson`], or `None` when the candidate
/// fails the sanity checks.
pub fn make_person(
    name: &str,
    title: &str,
    confidence: Confidence,
    source_url: Option<&str>,
    provenance: &str,
) -> Option<ExtractedPerson> {
    if !validate_person_name(name) || !validate_title(title) {
        return None;
    }
    let name = name.trim();
    let title = title.trim();
    Some(ExtractedPerson {
        full_name: name.to_string(),
        title: title.to_string(),
        title_level: title_level(title),
        department: None,
        bio: None,
        linkedin_url: None,
        email: None,
        photo_url: None,
        reports_to_name: None,
        is_board_member: is_board_title(title),
        is_executive: is_executive_title(title),
        confidence,
        source_url: source_url.map(String::from),
        provenance: Some(provenance.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plausible_names() {
        assert!(validate_person_name("Alice Lee"));
        assert!(validate_person_name("Mary Anne O'Connor"));
        assert!(validate_person_name("Jean-Paul Dubois"));
    }

    #[test]
    fn rejects_nav_and_noise() {
        assert!(!validate_person_name("Leadership Team"));
        assert!(!validate_person_name("Meet Our Executives"));
        assert!(!validate_person_name("Alice"));
        assert!(!validate_person_name("alice lee"));
        assert!(!validate_person_name("Agent 007"));
        assert!(!validate_person_name("We build robots."));
    }

    #[test]
    fn title_validation() {
        assert!(validate_title("Chief Executive Officer"));
        assert!(validate_title("SVP, Engineering"));
        assert!(!validate_title(""));
        assert!(!validate_title("1234"));
    }

    #[test]
    fn make_person_sets_flags() {
        let person = make_person(
            "Alice Lee",
            "Chief Executive Officer",
            Confidence::High,
            Some("https://acme.example/leadership"),
            "web",
        )
        .expect("valid person");
        assert!(person.is_executive);
        assert!(!person.is_board_member);
        assert_eq!(person.title_level, TitleLevel::CSuite);
        assert_eq!(person.provenance.as_deref(), Some("web"));

        let director = make_person("Bob Stone", "Chairman", Confidence::Medium, None, "filing")
            .expect("valid person");
        assert!(director.is_board_member);
    }

    #[test]
    fn make_person_drops_invalid_silently() {
        assert!(make_person("Leadership", "CEO", Confidence::High, None, "web").is_none());
        assert!(make_person("Alice Lee", "", Confidence::High, None, "web").is_none());
    }
}
