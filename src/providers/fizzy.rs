use std::collections::HashSet;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::DestinationProvider;
use crate::config::FizzyConfig;
use crate::error::ApiResult;
use crate::model::destination::{
    DestinationBoard, DestinationColumn, DestinationRecord, NewCard, NewColumn, NewComment,
    NewStep,
};
use crate::model::identity::Identity;
use crate::transport::{HttpTransport, RetryPolicy};

/// The card listing only covers one index at a time; closed and postponed
/// cards are absent from the default one.
const CARD_INDEXES: [Option<&str>; 3] = [None, Some("closed"), Some("not_now")];

pub struct FizzyProvider {
    base: String,
    transport: HttpTransport,
}

impl FizzyProvider {
    pub fn new(config: &FizzyConfig, policy: RetryPolicy) -> Self {
        Self {
            base: format!(
                "{}/{}",
                config.base_url.trim_end_matches('/'),
                config.account
            ),
            transport: HttpTransport::new("Fizzy", config.token.clone(), config.requests_per_second)
                .with_policy(policy),
        }
    }

    fn card_url(&self, record_id: &str, suffix: &str) -> String {
        format!("{}/cards/{record_id}{suffix}.json", self.base)
    }

    /// Resources are created without a body; read them back from `Location`.
    async fn create<T: serde::de::DeserializeOwned>(&self, url: &str, body: &Value) -> ApiResult<T> {
        let location = self.transport.post_for_location(url, body).await?;
        let location = if location.ends_with(".json") {
            location
        } else {
            format!("{location}.json")
        };
        self.transport.get_json(&location).await
    }
}

#[derive(Deserialize)]
struct Board {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct Column {
    id: String,
    name: String,
    #[serde(default)]
    color: Option<Value>,
    position: Option<u32>,
}

#[derive(Deserialize)]
struct Card {
    number: u64,
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct User {
    id: String,
    name: String,
    email_address: Option<String>,
}

/// Colors come back either as a bare token or as `{ "name", "value" }`.
fn color_token(color: Option<Value>) -> Option<String> {
    match color? {
        Value::String(token) => Some(token),
        Value::Object(obj) => obj.get("value").and_then(|v| v.as_str()).map(String::from),
        _ => None,
    }
}

impl From<Column> for DestinationColumn {
    fn from(column: Column) -> Self {
        DestinationColumn {
            id: column.id,
            title: column.name,
            color: color_token(column.color),
            position: column.position,
        }
    }
}

impl From<Card> for DestinationRecord {
    fn from(card: Card) -> Self {
        DestinationRecord {
            id: card.number.to_string(),
            title: card.title.unwrap_or_default(),
            body: card.description.unwrap_or_default(),
            status: card.status,
        }
    }
}

#[async_trait]
impl DestinationProvider for FizzyProvider {
    fn name(&self) -> &str {
        "fizzy"
    }

    async fn board(&self, board_id: &str) -> ApiResult<DestinationBoard> {
        let board: Board = self
            .transport
            .get_json(&format!("{}/boards/{board_id}.json", self.base))
            .await?;
        Ok(DestinationBoard {
            id: board.id,
            name: board.name,
        })
    }

    async fn create_board(&self, name: &str) -> ApiResult<DestinationBoard> {
        let board: Board = self
            .create(
                &format!("{}/boards.json", self.base),
                &json!({ "board": { "name": name } }),
            )
            .await?;
        Ok(DestinationBoard {
            id: board.id,
            name: board.name,
        })
    }

    async fn columns(&self, board_id: &str) -> ApiResult<Vec<DestinationColumn>> {
        let url = format!("{}/boards/{board_id}/columns.json", self.base);
        let columns: Vec<Column> = self.transport.paginate(url).try_concat().await?;
        Ok(columns.into_iter().map(DestinationColumn::from).collect())
    }

    async fn create_column(&self, board_id: &str, column: &NewColumn) -> ApiResult<DestinationColumn> {
        let created: Column = self
            .create(
                &format!("{}/boards/{board_id}/columns.json", self.base),
                &json!({ "column": { "name": column.title, "color": column.color } }),
            )
            .await?;
        Ok(created.into())
    }

    async fn records(&self, board_id: &str) -> ApiResult<Vec<DestinationRecord>> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for index in CARD_INDEXES {
            let mut url = format!("{}/cards.json?board_ids[]={board_id}", self.base);
            if let Some(index) = index {
                url.push_str("&indexed_by=");
                url.push_str(index);
            }
            let cards: Vec<Card> = self.transport.paginate(url).try_concat().await?;
            records.extend(
                cards
                    .into_iter()
                    .filter(|card| seen.insert(card.number))
                    .map(DestinationRecord::from),
            );
        }
        Ok(records)
    }

    async fn create_record(&self, board_id: &str, card: &NewCard) -> ApiResult<DestinationRecord> {
        let created: Card = self
            .create(
                &format!("{}/boards/{board_id}/cards.json", self.base),
                &json!({ "card": { "title": card.title, "description": card.body } }),
            )
            .await?;
        Ok(created.into())
    }

    async fn update_record(&self, record_id: &str, card: &NewCard) -> ApiResult<()> {
        self.transport
            .put(
                &self.card_url(record_id, ""),
                &json!({ "card": { "title": card.title, "description": card.body } }),
            )
            .await
    }

    async fn place_in_column(&self, record_id: &str, column_id: &str) -> ApiResult<()> {
        self.transport
            .post(
                &self.card_url(record_id, "/triage"),
                Some(&json!({ "column_id": column_id })),
            )
            .await
    }

    async fn postpone(&self, record_id: &str) -> ApiResult<()> {
        self.transport
            .post(&self.card_url(record_id, "/not_now"), None)
            .await
    }

    async fn close(&self, record_id: &str) -> ApiResult<()> {
        self.transport
            .post(&self.card_url(record_id, "/closure"), None)
            .await
    }

    async fn assign(&self, record_id: &str, user_id: &str) -> ApiResult<()> {
        self.transport
            .post(
                &self.card_url(record_id, "/assignments"),
                Some(&json!({ "assignee_id": user_id })),
            )
            .await
    }

    async fn create_step(&self, record_id: &str, step: &NewStep) -> ApiResult<()> {
        self.transport
            .post(
                &self.card_url(record_id, "/steps"),
                Some(&json!({ "step": { "content": step.body, "completed": step.completed } })),
            )
            .await
    }

    async fn create_comment(&self, record_id: &str, comment: &NewComment) -> ApiResult<()> {
        let mut payload = json!({ "comment": { "body": comment.body } });
        if let Some(author) = &comment.author_id {
            payload["comment"]["creator_id"] = json!(author);
        }
        self.transport
            .post(&self.card_url(record_id, "/comments"), Some(&payload))
            .await
    }

    async fn users(&self) -> ApiResult<Vec<Identity>> {
        let url = format!("{}/users.json", self.base);
        let users: Vec<User> = self.transport.paginate(url).try_concat().await?;
        Ok(users
            .into_iter()
            .map(|u| Identity::new(u.id, u.name, u.email_address.as_deref()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::{self, Reply, StubServer};

    #[test]
    fn color_accepts_token_or_object() {
        assert_eq!(
            color_token(Some(json!("var(--color-card-3)"))).as_deref(),
            Some("var(--color-card-3)")
        );
        assert_eq!(
            color_token(Some(json!({ "name": "Lime", "value": "var(--color-card-4)" }))).as_deref(),
            Some("var(--color-card-4)")
        );
        assert_eq!(color_token(None), None);
        assert_eq!(color_token(Some(json!(7))), None);
    }

    #[test]
    fn card_number_is_the_record_handle() {
        let card: Card = serde_json::from_str(
            r#"{ "id": "03f5", "number": 42, "title": "Ship it",
                 "description": "Body\n\n#basecamp-id-482", "status": "published" }"#,
        )
        .unwrap();
        let record = DestinationRecord::from(card);
        assert_eq!(record.id, "42");
        assert!(record.body.ends_with("#basecamp-id-482"));
    }

    #[test]
    fn base_url_includes_account() {
        let provider = FizzyProvider::new(
            &FizzyConfig {
                base_url: "https://app.fizzy.do/".into(),
                account: "897362094".into(),
                token: "t".into(),
                requests_per_second: 10.0,
            },
            RetryPolicy::default(),
        );
        assert_eq!(
            provider.card_url("42", "/closure"),
            "https://app.fizzy.do/897362094/cards/42/closure.json"
        );
    }

    #[tokio::test]
    async fn records_merge_closed_and_postponed_indexes() {
        let server = StubServer::start(|seen| {
            let body = if seen.target.contains("indexed_by=closed") {
                r#"[{ "number": 2, "title": "Shipped", "description": "A\n\n#basecamp-id-20" }]"#
            } else if seen.target.contains("indexed_by=not_now") {
                r#"[{ "number": 3, "title": "Later", "description": "B\n\n#basecamp-id-30" },
                    { "number": 1, "title": "Open", "description": "C\n\n#basecamp-id-10" }]"#
            } else {
                r#"[{ "number": 1, "title": "Open", "description": "C\n\n#basecamp-id-10" }]"#
            };
            Reply::json(200, body)
        })
        .await;
        let provider = FizzyProvider {
            base: server.url("/897362094"),
            transport: stub::transport("t"),
        };

        let records = provider.records("b1").await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert!(records[1].body.ends_with("#basecamp-id-20"));

        let targets: Vec<String> = server.seen().into_iter().map(|s| s.target).collect();
        assert_eq!(targets.len(), 3);
        assert!(targets.iter().all(|t| t.starts_with("/897362094/cards.json?board_ids")));
        assert!(!targets[0].contains("indexed_by"));
        assert!(targets[1].ends_with("&indexed_by=closed"));
        assert!(targets[2].ends_with("&indexed_by=not_now"));
    }
}
