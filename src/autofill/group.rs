use crate::dom::{Dom, NodeId};

use super::question::resolve_group_question_text;
use super::{Field, FieldKind};

/// Cluster choice controls into one field per question.
///
/// Two controls share a field exactly when their resolved group question
/// text is identical, never by prefix. Fields are emitted in the order each
/// question was first seen; controls keep their input order.
pub async fn group<D: Dom>(dom: &D, controls: &[NodeId], kind: FieldKind) -> Vec<Field> {
    let mut fields: Vec<Field> = Vec::new();
    for &control in controls {
        let question = resolve_group_question_text(dom, control).await;
        match fields.iter_mut().find(|f| f.question_text == question) {
            Some(field) => field.controls.push(control),
            None => {
                log::debug!("{kind:?} group {}: {question}", fields.len());
                fields.push(Field {
                    kind,
                    question_text: question,
                    controls: vec![control],
                });
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::synthetic::{Element, SyntheticDom};

    fn checkbox_question(dom: &SyntheticDom, heading: &str, days: &[&str]) -> Vec<NodeId> {
        let item = dom.append(dom.body(), Element::new("div").attr("role", "listitem"));
        dom.append(item, Element::new("div").attr("role", "heading").text(heading));
        let list = dom.append(item, Element::new("div").attr("role", "list"));
        days.iter()
            .map(|day| {
                dom.append(
                    list,
                    Element::new("div").attr("role", "checkbox").attr("aria-label", day),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn shared_prefix_questions_stay_separate() {
        let dom = SyntheticDom::form_page();
        let practice = checkbox_question(&dom, "Attendance for practice *", &["Monday", "Tuesday"]);
        let challenge =
            checkbox_question(&dom, "Attendance for challenge matches *", &["Monday", "Friday"]);
        let all: Vec<NodeId> = practice.iter().chain(challenge.iter()).copied().collect();

        let fields = group(&dom, &all, FieldKind::MultiChoice).await;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].question_text, "Attendance for practice *");
        assert_eq!(fields[0].controls, practice);
        assert_eq!(fields[1].question_text, "Attendance for challenge matches *");
        assert_eq!(fields[1].controls, challenge);
    }

    #[tokio::test]
    async fn groups_partition_controls_without_empty_groups() {
        let dom = SyntheticDom::form_page();
        let a = checkbox_question(&dom, "First question *", &["Monday"]);
        let b = checkbox_question(&dom, "Second question *", &["Monday", "Sunday", "Friday"]);
        let all: Vec<NodeId> = a.iter().chain(b.iter()).copied().collect();

        let fields = group(&dom, &all, FieldKind::MultiChoice).await;
        let total: usize = fields.iter().map(|f| f.controls.len()).sum();
        assert_eq!(total, all.len());
        assert!(fields.iter().all(|f| !f.controls.is_empty()));
        for (i, left) in fields.iter().enumerate() {
            for right in &fields[i + 1..] {
                assert_ne!(left.question_text, right.question_text);
            }
        }
    }

    #[tokio::test]
    async fn no_controls_no_fields() {
        let dom = SyntheticDom::form_page();
        assert!(group(&dom, &[], FieldKind::SingleChoice).await.is_empty());
    }
}
