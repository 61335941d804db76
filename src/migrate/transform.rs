//! Pure conversion of source records and comments into destination payloads.

use std::collections::HashMap;

use crate::mapping::users::UserMappings;
use crate::model::column::ColumnAction;
use crate::model::destination::{NewCard, NewComment, NewStep};
use crate::model::source::{SourceComment, SourceRecord};

pub const MAX_TITLE_CHARS: usize = 255;
pub const OVERFLOW_DIVIDER: &str = "\n\n---\n\n";

/// Everything needed to recreate one record on the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedRecord {
    pub card: NewCard,
    pub action: ColumnAction,
    pub assignee_ids: Vec<String>,
    pub steps: Vec<NewStep>,
    /// Close as a follow-up call, after creation and placement.
    pub close: bool,
    pub warnings: Vec<String>,
}

/// `#<system>-id-<id>`, the line that identifies a migrated record.
pub fn marker(system: &str, source_id: &str) -> String {
    format!("#{system}-id-{source_id}")
}

/// Recover the source id from the last marker in `body`, if any.
pub fn extract_marker(body: &str, system: &str) -> Option<String> {
    let prefix = format!("#{system}-id-");
    let start = body.rfind(&prefix)? + prefix.len();
    let id: String = body[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Split at `max` characters; the tail is `None` when nothing overflows.
fn split_title(title: &str, max: usize) -> (String, Option<String>) {
    match title.char_indices().nth(max) {
        Some((cut, _)) => (title[..cut].to_string(), Some(title[cut..].to_string())),
        None => (title.to_string(), None),
    }
}

/// Build the destination body: overflow text first, then the original body,
/// then the marker on its own line.
pub fn build_body(overflow: Option<&str>, body: &str, marker_line: &str) -> String {
    let mut out = String::new();
    if let Some(overflow) = overflow {
        out.push_str(overflow);
        out.push_str(OVERFLOW_DIVIDER);
    }
    out.push_str(body);
    out.push_str("\n\n");
    out.push_str(marker_line);
    out
}

pub fn transform_record(
    record: &SourceRecord,
    system: &str,
    column_mappings: &HashMap<String, ColumnAction>,
    user_mappings: &UserMappings,
    step_assignees_supported: bool,
) -> TransformedRecord {
    let mut warnings = Vec::new();

    let (title, overflow) = split_title(&record.title, MAX_TITLE_CHARS);
    let body = build_body(overflow.as_deref(), &record.body, &marker(system, &record.id));

    let action = match column_mappings.get(&record.column_id) {
        Some(action) => action.clone(),
        None => {
            warnings.push(format!(
                "no column mapping for source column {}; card left in triage",
                record.column_id
            ));
            ColumnAction::KeepTriage
        }
    };

    let mut assignee_ids = Vec::new();
    for person in &record.assignees {
        match user_mappings.get(&person.id) {
            Some(mapping) => assignee_ids.push(mapping.destination_id.clone()),
            None => warnings.push(format!("assignee {} is not mapped", person.label())),
        }
    }

    let steps = record
        .checklist
        .iter()
        .map(|item| {
            let assignee_id = item.assignee.as_ref().and_then(|person| {
                if !step_assignees_supported {
                    warnings.push(format!(
                        "step \"{}\" assignee {} dropped: steps cannot be assigned",
                        item.body,
                        person.label()
                    ));
                    return None;
                }
                let mapped = user_mappings.get(&person.id).map(|m| m.destination_id.clone());
                if mapped.is_none() {
                    warnings.push(format!(
                        "step \"{}\" assignee {} is not mapped",
                        item.body,
                        person.label()
                    ));
                }
                mapped
            });
            NewStep {
                body: item.body.clone(),
                completed: item.completed,
                assignee_id,
            }
        })
        .collect();

    // A Done column already closes the card.
    let close = record.completed && action != ColumnAction::Close;

    TransformedRecord {
        card: NewCard { title, body },
        action,
        assignee_ids,
        steps,
        close,
        warnings,
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Mapped authors post as themselves; anyone else gets an attribution
/// paragraph ahead of the original HTML.
pub fn transform_comment(comment: &SourceComment, user_mappings: &UserMappings) -> NewComment {
    match user_mappings.get(&comment.author.id) {
        Some(mapping) => NewComment {
            body: comment.body.clone(),
            author_id: Some(mapping.destination_id.clone()),
        },
        None => NewComment {
            body: format!(
                "<p>Original comment by {} on {}</p>{}",
                escape_html(&comment.author.name),
                comment.created_at.format("%Y-%m-%d"),
                comment.body
            ),
            author_id: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::users::UserMapping;
    use crate::model::identity::Identity;
    use crate::model::source::ChecklistItem;
    use chrono::{TimeZone, Utc};

    fn record(title: &str, body: &str) -> SourceRecord {
        SourceRecord {
            id: "482".into(),
            title: title.into(),
            body: body.into(),
            completed: false,
            assignees: vec![],
            checklist: vec![],
            comment_count: 0,
            column_id: "c1".into(),
        }
    }

    fn columns() -> HashMap<String, ColumnAction> {
        HashMap::from([
            ("c1".to_string(), ColumnAction::PlaceInColumn("d1".into())),
            ("done".to_string(), ColumnAction::Close),
        ])
    }

    fn users() -> UserMappings {
        let ada = Identity::new("s-ada", "Ada", Some("ada@example.com"));
        HashMap::from([(
            "s-ada".to_string(),
            UserMapping::new(&ada, &Identity::new("d-ada", "Ada", None)),
        )])
    }

    #[test]
    fn short_title_is_kept_and_marker_appended() {
        let out = transform_record(&record("Fix login", "<p>Body</p>"), "basecamp", &columns(), &users(), false);
        assert_eq!(out.card.title, "Fix login");
        assert_eq!(out.card.body, "<p>Body</p>\n\n#basecamp-id-482");
        assert_eq!(out.action, ColumnAction::PlaceInColumn("d1".into()));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn long_title_overflows_into_body() {
        let title: String = (0..300).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let out = transform_record(&record(&title, "Original"), "source", &columns(), &users(), false);

        assert_eq!(out.card.title.chars().count(), 255);
        assert_eq!(out.card.title, title[..255]);
        let expected = format!("{}{OVERFLOW_DIVIDER}Original\n\n#source-id-482", &title[255..]);
        assert_eq!(out.card.body, expected);
        assert_eq!(title[255..].len(), 45);
    }

    #[test]
    fn overflow_split_respects_multibyte_chars() {
        let title = "é".repeat(256);
        let out = transform_record(&record(&title, ""), "basecamp", &columns(), &users(), false);
        assert_eq!(out.card.title.chars().count(), 255);
        assert!(out.card.body.starts_with("é\n\n---"));
    }

    #[test]
    fn marker_round_trips() {
        assert_eq!(extract_marker("Body\n\n#source-id-482", "source").as_deref(), Some("482"));
        assert_eq!(
            extract_marker("<div>x</div>\n\n#basecamp-id-9001</div>", "basecamp").as_deref(),
            Some("9001")
        );
        assert_eq!(extract_marker("no marker here", "basecamp"), None);
        assert_eq!(extract_marker("#basecamp-id-", "basecamp"), None);
        assert_eq!(extract_marker("#trello-id-5", "basecamp"), None);
    }

    #[test]
    fn last_marker_wins() {
        let body = "quoting #basecamp-id-1 in text\n\n#basecamp-id-2";
        assert_eq!(extract_marker(body, "basecamp").as_deref(), Some("2"));
    }

    #[test]
    fn unmapped_assignees_become_warnings() {
        let mut rec = record("t", "");
        rec.assignees = vec![
            Identity::new("s-ada", "Ada", None),
            Identity::new("s-bo", "Bo", Some("bo@example.com")),
        ];
        let out = transform_record(&rec, "basecamp", &columns(), &users(), false);
        assert_eq!(out.assignee_ids, ["d-ada"]);
        assert_eq!(out.warnings, ["assignee Bo <bo@example.com> is not mapped"]);
    }

    #[test]
    fn step_assignees_dropped_when_unsupported() {
        let mut rec = record("t", "");
        rec.checklist = vec![
            ChecklistItem {
                body: "Write".into(),
                completed: true,
                assignee: Some(Identity::new("s-ada", "Ada", None)),
            },
            ChecklistItem {
                body: "Ship".into(),
                completed: false,
                assignee: None,
            },
        ];

        let out = transform_record(&rec, "basecamp", &columns(), &users(), false);
        assert_eq!(
            out.steps,
            vec![
                NewStep { body: "Write".into(), completed: true, assignee_id: None },
                NewStep { body: "Ship".into(), completed: false, assignee_id: None },
            ]
        );
        assert_eq!(out.warnings.len(), 1);

        let out = transform_record(&rec, "basecamp", &columns(), &users(), true);
        assert_eq!(out.steps[0].assignee_id.as_deref(), Some("d-ada"));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn completion_is_a_follow_up_unless_column_closes() {
        let mut rec = record("t", "");
        rec.completed = true;
        assert!(transform_record(&rec, "basecamp", &columns(), &users(), false).close);

        rec.column_id = "done".into();
        let out = transform_record(&rec, "basecamp", &columns(), &users(), false);
        assert_eq!(out.action, ColumnAction::Close);
        assert!(!out.close);
    }

    #[test]
    fn missing_column_mapping_keeps_triage() {
        let mut rec = record("t", "");
        rec.column_id = "unknown".into();
        let out = transform_record(&rec, "basecamp", &columns(), &users(), false);
        assert_eq!(out.action, ColumnAction::KeepTriage);
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn comment_attribution() {
        let created_at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let mapped = SourceComment {
            id: "1".into(),
            body: "Looks good".into(),
            author: Identity::new("s-ada", "Ada", None),
            created_at,
        };
        let out = transform_comment(&mapped, &users());
        assert_eq!(out.body, "Looks good");
        assert_eq!(out.author_id.as_deref(), Some("d-ada"));

        let unmapped = SourceComment {
            author: Identity::new("s-bo", "Bo", None),
            ..mapped
        };
        let out = transform_comment(&unmapped, &users());
        assert_eq!(out.body, "<p>Original comment by Bo on 2024-03-09</p>Looks good");
        assert_eq!(out.author_id, None);

        let html = SourceComment {
            body: "<div>Ship it</div>".into(),
            author: Identity::new("s-x", "R&D <ops>", None),
            ..unmapped
        };
        assert_eq!(
            transform_comment(&html, &users()).body,
            "<p>Original comment by R&amp;D &lt;ops&gt; on 2024-03-09</p><div>Ship it</div>"
        );
    }
}
