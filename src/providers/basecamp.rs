use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Deserialize;

use super::SourceProvider;
use crate::config::BasecampConfig;
use crate::error::{ApiError, ApiResult};
use crate::model::column::WorkflowType;
use crate::model::identity::Identity;
use crate::model::source::{
    ChecklistItem, SourceBoard, SourceColumn, SourceComment, SourceProject, SourceRecord,
};
use crate::transport::{HttpTransport, RetryPolicy, TokenRefresher};

const LAUNCHPAD_TOKEN_URL: &str = "https://launchpad.37signals.com/authorization/token";

pub struct BasecampProvider {
    base: String,
    transport: HttpTransport,
}

impl BasecampProvider {
    pub fn new(config: &BasecampConfig, policy: RetryPolicy) -> Self {
        let mut transport = HttpTransport::new(
            "Basecamp",
            config.access_token.clone(),
            config.requests_per_second,
        )
        .with_policy(policy);

        if let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            &config.refresh_token,
            &config.client_id,
            &config.client_secret,
        ) {
            transport = transport.with_refresher(Box::new(LaunchpadRefresher {
                refresh_token: refresh_token.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }));
        }

        Self {
            base: format!("https://3.basecampapi.com/{}", config.account_id),
            transport,
        }
    }
}

struct LaunchpadRefresher {
    refresh_token: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[async_trait]
impl TokenRefresher for LaunchpadRefresher {
    async fn refresh(&self, client: &reqwest::Client) -> ApiResult<String> {
        let response = client
            .post(LAUNCHPAD_TOKEN_URL)
            .query(&[
                ("type", "refresh"),
                ("refresh_token", self.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::status(status.as_u16(), body));
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

#[derive(Deserialize)]
struct Project {
    id: u64,
    name: String,
}

#[derive(Deserialize)]
struct CardTable {
    id: u64,
    title: String,
    #[serde(default)]
    lists: Vec<CardList>,
}

#[derive(Deserialize)]
struct CardList {
    id: u64,
    title: String,
    color: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    cards_count: u64,
}

#[derive(Deserialize)]
struct Person {
    id: u64,
    name: String,
    email_address: Option<String>,
}

#[derive(Deserialize)]
struct Step {
    title: String,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    assignees: Vec<Person>,
}

#[derive(Deserialize)]
struct Parent {
    id: u64,
}

#[derive(Deserialize)]
struct Card {
    id: u64,
    title: String,
    content: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    assignees: Vec<Person>,
    #[serde(default)]
    steps: Vec<Step>,
    #[serde(default)]
    comments_count: u64,
    parent: Option<Parent>,
}

#[derive(Deserialize)]
struct Comment {
    id: u64,
    content: String,
    created_at: DateTime<Utc>,
    creator: Person,
}

/// `Kanban::Column` carries no workflow meaning, so the title decides.
fn workflow_type_for(kind: Option<&str>) -> Option<WorkflowType> {
    match kind? {
        "Kanban::Triage" => Some(WorkflowType::Triage),
        "Kanban::NotNowColumn" => Some(WorkflowType::NotNow),
        "Kanban::DoneColumn" => Some(WorkflowType::Done),
        _ => None,
    }
}

impl From<Person> for Identity {
    fn from(person: Person) -> Self {
        Identity::new(person.id.to_string(), person.name, person.email_address.as_deref())
    }
}

impl Card {
    fn into_record(self, column_id: &str) -> SourceRecord {
        let column_id = self
            .parent
            .map(|p| p.id.to_string())
            .unwrap_or_else(|| column_id.to_string());
        SourceRecord {
            id: self.id.to_string(),
            title: self.title,
            body: self.content.unwrap_or_default(),
            completed: self.completed,
            assignees: self.assignees.into_iter().map(Identity::from).collect(),
            checklist: self
                .steps
                .into_iter()
                .map(|step| ChecklistItem {
                    body: step.title,
                    completed: step.completed,
                    assignee: step.assignees.into_iter().next().map(Identity::from),
                })
                .collect(),
            comment_count: self.comments_count,
            column_id,
        }
    }
}

#[async_trait]
impl SourceProvider for BasecampProvider {
    fn name(&self) -> &str {
        "basecamp"
    }

    async fn project(&self, project_id: &str) -> ApiResult<SourceProject> {
        let project: Project = self
            .transport
            .get_json(&format!("{}/projects/{project_id}.json", self.base))
            .await?;
        Ok(SourceProject {
            id: project.id.to_string(),
            name: project.name,
        })
    }

    async fn board(&self, project_id: &str, board_id: &str) -> ApiResult<SourceBoard> {
        let table: CardTable = self
            .transport
            .get_json(&format!(
                "{}/buckets/{project_id}/card_tables/{board_id}.json",
                self.base
            ))
            .await?;

        let columns = table
            .lists
            .into_iter()
            .map(|list| SourceColumn {
                id: list.id.to_string(),
                workflow_type: workflow_type_for(list.kind.as_deref()),
                title: list.title,
                color: list.color,
                record_count: list.cards_count,
            })
            .collect();

        Ok(SourceBoard {
            id: table.id.to_string(),
            title: table.title,
            columns,
        })
    }

    async fn records(&self, project_id: &str, column_id: &str) -> ApiResult<Vec<SourceRecord>> {
        let url = format!(
            "{}/buckets/{project_id}/card_tables/lists/{column_id}/cards.json",
            self.base
        );
        let cards: Vec<Card> = self.transport.paginate(url).try_concat().await?;
        Ok(cards
            .into_iter()
            .map(|card| card.into_record(column_id))
            .collect())
    }

    async fn record(&self, project_id: &str, record_id: &str) -> ApiResult<SourceRecord> {
        let card: Card = self
            .transport
            .get_json(&format!(
                "{}/buckets/{project_id}/card_tables/cards/{record_id}.json",
                self.base
            ))
            .await?;
        Ok(card.into_record(""))
    }

    async fn comments(&self, project_id: &str, record_id: &str) -> ApiResult<Vec<SourceComment>> {
        let url = format!(
            "{}/buckets/{project_id}/recordings/{record_id}/comments.json",
            self.base
        );
        let comments: Vec<Comment> = self.transport.paginate(url).try_concat().await?;
        Ok(comments
            .into_iter()
            .map(|c| SourceComment {
                id: c.id.to_string(),
                body: c.content,
                author: c.creator.into(),
                created_at: c.created_at,
            })
            .collect())
    }

    async fn people(&self, project_id: &str) -> ApiResult<Vec<Identity>> {
        let url = format!("{}/projects/{project_id}/people.json", self.base);
        let people: Vec<Person> = self.transport.paginate(url).try_concat().await?;
        Ok(people.into_iter().map(Identity::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_types_map_to_workflow() {
        assert_eq!(workflow_type_for(Some("Kanban::Triage")), Some(WorkflowType::Triage));
        assert_eq!(workflow_type_for(Some("Kanban::NotNowColumn")), Some(WorkflowType::NotNow));
        assert_eq!(workflow_type_for(Some("Kanban::DoneColumn")), Some(WorkflowType::Done));
        assert_eq!(workflow_type_for(Some("Kanban::Column")), None);
        assert_eq!(workflow_type_for(None), None);
    }

    #[test]
    fn card_json_becomes_record() {
        let card: Card = serde_json::from_str(
            r#"{
                "id": 482,
                "title": "Ship it",
                "content": "<div>Body</div>",
                "completed": true,
                "comments_count": 2,
                "parent": { "id": 77 },
                "assignees": [{ "id": 5, "name": "Ada", "email_address": "ADA@example.com" }],
                "steps": [
                    { "title": "Write", "completed": true, "assignees": [] },
                    { "title": "Review", "completed": false,
                      "assignees": [{ "id": 6, "name": "Bo", "email_address": null }] }
                ]
            }"#,
        )
        .unwrap();

        let record = card.into_record("fallback");
        assert_eq!(record.id, "482");
        assert_eq!(record.column_id, "77");
        assert!(record.completed);
        assert_eq!(record.comment_count, 2);
        assert_eq!(record.assignees[0].email.as_deref(), Some("ada@example.com"));
        assert_eq!(record.checklist.len(), 2);
        assert!(record.checklist[0].assignee.is_none());
        assert_eq!(record.checklist[1].assignee.as_ref().unwrap().id, "6");
    }

    #[test]
    fn card_without_parent_uses_listing_column() {
        let card: Card = serde_json::from_str(r#"{ "id": 1, "title": "t" }"#).unwrap();
        let record = card.into_record("33");
        assert_eq!(record.column_id, "33");
        assert_eq!(record.body, "");
    }
}
