use once_cell::sync::Lazy;
use regex::Regex;

static TERM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-)?(?:([aAtTfF]):)?(.*)$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TermField {
    Name,
    AllFields,
    TagName,
    FolderName,
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
    positive: bool,
    field: TermField,
    text: String,
}

fn parse_term(raw: &str) -> Option<Term> {
    let caps = TERM_PATTERN.captures(raw)?;
    let positive = caps.get(1).is_none();
    let field = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(prefix) if prefix == "a" => TermField::AllFields,
        Some(prefix) if prefix == "t" => TermField::TagName,
        Some(prefix) if prefix == "f" => TermField::FolderName,
        _ => TermField::Name,
    };
    let text = caps.get(3).map(|m| m.as_str()).unwrap_or("").to_lowercase();
    if text.is_empty() {
        return None;
    }
    Some(Term {
        positive,
        field,
        text,
    })
}

/// What a query term is evaluated against: one entity plus its tag and
/// folder context. `folder_name` is only ever set for characters.
#[derive(Debug, Clone, Default)]
pub struct QuerySubject {
    pub name: String,
    pub all_fields: String,
    pub tag_names: Vec<String>,
    pub folder_name: Option<String>,
    pub is_character: bool,
}

/// Comma-separated OR groups of whitespace-separated AND terms. Parsing is
/// purely lexical; malformed or empty terms are dropped and no input string
/// is an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityQuery {
    groups: Vec<Vec<Term>>,
}

impl EntityQuery {
    pub fn parse(input: &str) -> Self {
        let groups = input
            .split(',')
            .map(|group| group.split_whitespace().filter_map(parse_term).collect::<Vec<_>>())
            .filter(|terms| !terms.is_empty())
            .collect();
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn matches(&self, subject: &QuerySubject) -> bool {
        if self.groups.is_empty() {
            return true;
        }

        let name = subject.name.to_lowercase();
        let all_fields = subject.all_fields.to_lowercase();
        let tag_names = subject
            .tag_names
            .iter()
            .map(|tag| tag.to_lowercase())
            .collect::<Vec<_>>();
        let folder_name = subject.folder_name.as_deref().map(str::to_lowercase);

        self.groups.iter().any(|group| {
            group.iter().all(|term| {
                let hit = match term.field {
                    TermField::Name => name.contains(&term.text),
                    TermField::AllFields => all_fields.contains(&term.text),
                    TermField::TagName => tag_names.iter().any(|tag| tag.contains(&term.text)),
                    TermField::FolderName => {
                        subject.is_character
                            && folder_name
                                .as_deref()
                                .is_some_and(|folder| folder.contains(&term.text))
                    }
                };
                hit == term.positive
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityQuery, QuerySubject};

    fn alice() -> QuerySubject {
        QuerySubject {
            name: "Alice".to_string(),
            all_fields: "Alice a cheerful detective".to_string(),
            tag_names: vec!["Comedy".to_string()],
            folder_name: None,
            is_character: true,
        }
    }

    #[test]
    fn plain_term_matches_name() {
        assert!(EntityQuery::parse("alice").matches(&alice()));
        assert!(!EntityQuery::parse("bob").matches(&alice()));
    }

    #[test]
    fn negated_term_inverts_the_match() {
        assert!(!EntityQuery::parse("-alice").matches(&alice()));
        assert!(EntityQuery::parse("-bob").matches(&alice()));
    }

    #[test]
    fn tag_prefix_quantifies_over_assigned_tags() {
        assert!(EntityQuery::parse("t:comedy").matches(&alice()));
        assert!(!EntityQuery::parse("-t:comedy").matches(&alice()));
        assert!(!EntityQuery::parse("t:drama").matches(&alice()));
    }

    #[test]
    fn comma_is_or_across_groups() {
        assert!(EntityQuery::parse("t:drama,t:comedy").matches(&alice()));
        assert!(!EntityQuery::parse("t:drama,t:horror").matches(&alice()));
    }

    #[test]
    fn whitespace_is_and_within_a_group() {
        assert!(!EntityQuery::parse("alice t:drama").matches(&alice()));
        assert!(EntityQuery::parse("alice t:comedy").matches(&alice()));
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(EntityQuery::parse("").matches(&alice()));
        assert!(EntityQuery::parse("   ").matches(&alice()));
    }

    #[test]
    fn all_fields_prefix_searches_the_card_text() {
        assert!(EntityQuery::parse("a:detective").matches(&alice()));
        assert!(!EntityQuery::parse("a:pirate").matches(&alice()));
    }

    #[test]
    fn folder_prefix_never_matches_groups() {
        let group = QuerySubject {
            name: "Book Club".to_string(),
            folder_name: Some("Fantasy".to_string()),
            is_character: false,
            ..QuerySubject::default()
        };
        assert!(!EntityQuery::parse("f:fantasy").matches(&group));

        let character = QuerySubject {
            name: "Alice".to_string(),
            folder_name: Some("Fantasy".to_string()),
            is_character: true,
            ..QuerySubject::default()
        };
        assert!(EntityQuery::parse("f:fantasy").matches(&character));
    }

    #[test]
    fn folder_prefix_is_false_without_an_assigned_folder() {
        assert!(!EntityQuery::parse("f:anything").matches(&alice()));
        assert!(EntityQuery::parse("-f:anything").matches(&alice()));
    }

    #[test]
    fn prefixes_are_case_insensitive() {
        assert!(EntityQuery::parse("T:Comedy").matches(&alice()));
        assert!(EntityQuery::parse("-T:Drama").matches(&alice()));
    }

    #[test]
    fn malformed_terms_are_dropped_not_errors() {
        // Bare minus and dangling prefixes carry no text, so they vanish;
        // the trailing comma leaves no empty OR group behind.
        let query = EntityQuery::parse("- t: alice,");
        assert!(query.matches(&alice()));

        assert!(EntityQuery::parse("-,t:,f:").is_empty());
    }
}
