//! Map a field's question to a profile value.
//!
//! The rules form an ordered table. The first rule whose predicate accepts
//! the question decides the result, even when that result is
//! [`MatchResult::NoValue`]; later rules are never consulted. More specific
//! questions therefore sit above the general "name" rule.

use crate::store::Profile;

use super::{Field, FieldKind, MatchResult};

/// One entry of the rule table.
pub struct Rule {
    /// Stable identifier used in logs and reports.
    pub name: &'static str,
    /// Receives the field kind and the lower-cased question text.
    pub applies: fn(FieldKind, &str) -> bool,
    pub resolve: fn(FieldKind, &Profile) -> MatchResult,
}

/// Rule table, in precedence order.
pub static RULES: &[Rule] = &[
    Rule {
        name: "individual-challenge-target",
        applies: |kind, q| {
            kind == FieldKind::Text
                && contains_any(
                    q,
                    &[
                        "challenging or battling individually",
                        "who would you like to challenge",
                        "who would you like to battle",
                    ],
                )
                && !contains_any(q, &["partner", "team"])
        },
        resolve: |_, profile| {
            let challenge_type = profile.challenge_type.trim().to_lowercase();
            if challenge_type == "challenge" || challenge_type == "battle" {
                MatchResult::Scalar(profile.challenge_target.clone())
            } else {
                MatchResult::Scalar(String::new())
            }
        },
    },
    Rule {
        name: "team-partner-name",
        applies: |kind, q| {
            kind == FieldKind::Text
                && (contains_any(q, &["partners name", "partner name", "partner's name"])
                    || (q.contains("team") && q.contains("list")))
        },
        resolve: |_, profile| {
            let challenge_type = profile.challenge_type.to_lowercase();
            if challenge_type.contains("team") || challenge_type.contains("doubles") {
                MatchResult::Scalar(profile.partner_name.clone())
            } else {
                MatchResult::Scalar(String::new())
            }
        },
    },
    Rule {
        name: "full-name",
        applies: |kind, q| {
            kind == FieldKind::Text
                && q.contains("name")
                && !contains_any(q, &["partner", "challenge", "battle", "team"])
        },
        resolve: |_, profile| MatchResult::Scalar(profile.full_name.clone()),
    },
    Rule {
        name: "practice-attendance",
        applies: |_, q| q.contains("attendance") && q.contains("practice"),
        resolve: |kind, profile| days_for(kind, &profile.practice_days),
    },
    Rule {
        name: "challenge-attendance",
        applies: |_, q| q.contains("challenge") && q.contains("attendance"),
        resolve: |kind, profile| days_for(kind, &profile.challenge_days),
    },
    Rule {
        name: "challenge-type",
        applies: |_, q| {
            (q.contains("would you like") && q.contains("challenge"))
                || (q.contains("challenge") && q.contains("battle") && q.contains("team"))
        },
        resolve: |kind, profile| {
            if kind == FieldKind::SingleChoice && !profile.challenge_type.trim().is_empty() {
                MatchResult::Scalar(profile.challenge_type.clone())
            } else {
                MatchResult::NoValue
            }
        },
    },
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Day sets only make sense for checkbox groups.
fn days_for(kind: FieldKind, days: &[String]) -> MatchResult {
    if kind != FieldKind::MultiChoice {
        return MatchResult::NoValue;
    }
    let mut unique: Vec<String> = Vec::with_capacity(days.len());
    for day in days {
        let day = day.trim();
        if !day.is_empty() && !unique.iter().any(|d| d.eq_ignore_ascii_case(day)) {
            unique.push(day.to_string());
        }
    }
    MatchResult::Set(unique)
}

/// The rule that decides `field`, if any.
pub fn deciding_rule(field: &Field) -> Option<&'static Rule> {
    let question = field.question_text.to_lowercase();
    RULES
        .iter()
        .find(|rule| (rule.applies)(field.kind, &question))
}

/// Value for `field` from `profile`. Pure: touches neither the document nor
/// the profile store.
pub fn match_field(field: &Field, profile: &Profile) -> MatchResult {
    match deciding_rule(field) {
        Some(rule) => {
            let result = (rule.resolve)(field.kind, profile);
            log::debug!(
                "rule {} decided {:?} for {:?}",
                rule.name,
                result,
                field.question_text
            );
            result
        }
        None => {
            log::debug!("no rule for {:?}", field.question_text);
            MatchResult::NoValue
        }
    }
}
