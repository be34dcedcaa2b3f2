//! GraphQL-over-HTTP client for the hosted API.
//!
//! Operations follow the generated-resolver naming of the backend:
//! `listTasks(filter, limit, nextToken)`, `getTask(id)`, `createTask(input)`,
//! `updateTask(input, condition)`, `deleteTask(input)`.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Condition, ListQuery, Page, RecordKind, RemoteApi};
use crate::error::RemoteError;

static NON_NULLABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)cannot return null for non-nullable type:\s*'?(?P<scalar>[\w!\[\]]+)'?\s+within parent\s+'?(?P<parent>\w+)'?(?:\s*\((?P<path>[^)]*)\))?")
        .unwrap()
});

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    path: Vec<Value>,
}

#[derive(Clone)]
pub struct GraphQlClient {
    endpoint: String,
    token: String,
    http: Client,
}

impl GraphQlClient {
    pub fn new(endpoint: &str, token: &str) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    async fn execute(&self, document: &str, variables: Value) -> Result<GraphQlResponse, RemoteError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, &self.token)
            .header(CONTENT_TYPE, "application/json")
            .json(&json!({ "query": document, "variables": variables }))
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("GraphQL request failed: {}", e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RemoteError::Transport(format!("Failed to read response: {}", e)))?;

        // GraphQL errors arrive with 200, but some gateways use 400 with a body.
        match serde_json::from_str::<GraphQlResponse>(&text) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(RemoteError::Transport(format!(
                "GraphQL endpoint returned {}: {}",
                status, text
            ))),
            Err(e) => Err(RemoteError::Transport(format!(
                "Failed to parse GraphQL response: {}",
                e
            ))),
        }
    }

    /// Run a single-root-field operation and return that field's value.
    async fn run(
        &self,
        kind: RecordKind,
        field: &str,
        document: &str,
        variables: Value,
        tolerate_holes: bool,
    ) -> Result<Value, RemoteError> {
        let resp = self.execute(document, variables).await?;
        let data = resp
            .data
            .as_ref()
            .and_then(|d| d.get(field))
            .cloned()
            .unwrap_or(Value::Null);

        if let Some(first) = resp.errors.first() {
            let only_holes = tolerate_holes
                && !data.is_null()
                && resp.errors.iter().all(is_unauthorized);
            if only_holes {
                log::debug!(
                    "{}: {} inaccessible item(s) nulled by the server",
                    field,
                    resp.errors.len()
                );
            } else {
                let err = resp
                    .errors
                    .iter()
                    .map(|e| classify_error(kind, e))
                    .find(|e| matches!(e, RemoteError::SchemaMismatch { .. }))
                    .unwrap_or_else(|| classify_error(kind, first));
                return Err(err);
            }
        }
        Ok(data)
    }
}

fn plural(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::List => "Lists",
        RecordKind::Task => "Tasks",
        RecordKind::Profile => "UserProfiles",
    }
}

fn selection(fields: &[String]) -> String {
    fields.join(" ")
}

pub(crate) fn list_document(query: &ListQuery) -> (String, String) {
    let ty = query.kind.type_name();
    let field = format!("list{}", plural(query.kind));
    let doc = format!(
        "query List{plural}($filter: Model{ty}FilterInput, $limit: Int, $nextToken: String) {{ {field}(filter: $filter, limit: $limit, nextToken: $nextToken) {{ items {{ {sel} }} nextToken }} }}",
        plural = plural(query.kind),
        ty = ty,
        field = field,
        sel = selection(&query.fields),
    );
    (field, doc)
}

fn get_document(kind: RecordKind, fields: &[String]) -> (String, String) {
    let field = format!("get{}", kind.type_name());
    let doc = format!(
        "query Get{ty}($id: ID!) {{ {field}(id: $id) {{ {sel} }} }}",
        ty = kind.type_name(),
        field = field,
        sel = selection(fields),
    );
    (field, doc)
}

fn mutation_document(verb: &str, kind: RecordKind, with_condition: bool, sel: &str) -> (String, String) {
    let ty = kind.type_name();
    let field = format!("{}{}", verb, ty);
    let verb_cap = format!("{}{}", verb[..1].to_uppercase(), &verb[1..]);
    let doc = if with_condition {
        format!(
            "mutation {verb_cap}{ty}($input: {verb_cap}{ty}Input!, $condition: Model{ty}ConditionInput) {{ {field}(input: $input, condition: $condition) {{ {sel} }} }}"
        )
    } else {
        format!(
            "mutation {verb_cap}{ty}($input: {verb_cap}{ty}Input!) {{ {field}(input: $input) {{ {sel} }} }}"
        )
    };
    (field, doc)
}

/// Translate a predicate into the backend's condition/filter input shape.
pub(crate) fn condition_input(condition: &Condition) -> Value {
    match condition {
        Condition::Eq(field, v) => json!({ field: { "eq": v } }),
        Condition::Ne(field, v) => json!({ field: { "ne": v } }),
        Condition::Lt(field, v) => json!({ field: { "lt": v } }),
        Condition::Exists(field) => json!({ field: { "attributeExists": true } }),
        Condition::Missing(field) => json!({ field: { "attributeExists": false } }),
        Condition::And(all) => {
            json!({ "and": all.iter().map(condition_input).collect::<Vec<_>>() })
        }
    }
}

fn is_unauthorized(err: &GraphQlError) -> bool {
    err.error_type.as_deref() == Some("Unauthorized")
        || err.message.starts_with("Not Authorized")
}

/// The one place server error text is interpreted.
fn classify_error(kind: RecordKind, err: &GraphQlError) -> RemoteError {
    let error_type = err.error_type.as_deref().unwrap_or("");
    if error_type.contains("ConditionalCheckFailed") {
        return RemoteError::ConditionFailed { kind };
    }
    if let Some(caps) = NON_NULLABLE_RE.captures(&err.message) {
        let parent = caps
            .name("parent")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| kind.type_name().to_string());
        let from_message = caps
            .name("path")
            .and_then(|p| p.as_str().rsplit('/').next())
            .map(str::to_string);
        let from_path = err
            .path
            .iter()
            .rev()
            .find_map(Value::as_str)
            .map(str::to_string);
        if let Some(field) = from_path.or(from_message).filter(|f| !f.is_empty()) {
            return RemoteError::SchemaMismatch {
                type_name: parent,
                field,
            };
        }
    }
    RemoteError::Validation {
        message: err.message.clone(),
    }
}

fn parse_page(value: Value) -> Page<Value> {
    let mut obj = match value {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let items = match obj.remove("items") {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|v| if v.is_null() { None } else { Some(v) })
            .collect(),
        _ => Vec::new(),
    };
    let next_token = obj
        .remove("nextToken")
        .and_then(|t| t.as_str().map(str::to_string));
    Page { items, next_token }
}

#[async_trait]
impl RemoteApi for GraphQlClient {
    async fn list(&self, query: &ListQuery) -> Result<Page<Value>, RemoteError> {
        let (field, doc) = list_document(query);
        let variables = json!({
            "filter": query.filter.as_ref().map(condition_input),
            "limit": query.limit,
            "nextToken": query.next_token,
        });
        let data = self.run(query.kind, &field, &doc, variables, true).await?;
        Ok(parse_page(data))
    }

    async fn get(
        &self,
        kind: RecordKind,
        id: &str,
        fields: &[String],
    ) -> Result<Option<Value>, RemoteError> {
        let (field, doc) = get_document(kind, fields);
        let data = self.run(kind, &field, &doc, json!({ "id": id }), false).await?;
        Ok((!data.is_null()).then_some(data))
    }

    async fn create(&self, kind: RecordKind, input: Value) -> Result<Value, RemoteError> {
        let (field, doc) = mutation_document("create", kind, false, &kind.fields().join(" "));
        self.run(kind, &field, &doc, json!({ "input": input }), false)
            .await
    }

    async fn update(
        &self,
        kind: RecordKind,
        input: Value,
        condition: Option<&Condition>,
    ) -> Result<Value, RemoteError> {
        let (field, doc) = mutation_document("update", kind, true, &kind.fields().join(" "));
        let variables = json!({
            "input": input,
            "condition": condition.map(condition_input),
        });
        self.run(kind, &field, &doc, variables, false).await
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<Value, RemoteError> {
        let (field, doc) = mutation_document("delete", kind, false, "id");
        let data = self
            .run(kind, &field, &doc, json!({ "input": { "id": id } }), false)
            .await?;
        if data.is_null() {
            return Err(RemoteError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gql_error(message: &str, error_type: Option<&str>, path: Vec<Value>) -> GraphQlError {
        GraphQlError {
            message: message.to_string(),
            error_type: error_type.map(str::to_string),
            path,
        }
    }

    #[test]
    fn detects_non_nullable_field_from_path() {
        let err = gql_error(
            "Cannot return null for non-nullable type: 'Float' within parent 'Task' (/listTasks/items[3]/sortOrder)",
            None,
            vec![json!("listTasks"), json!("items"), json!(3), json!("sortOrder")],
        );
        assert_eq!(
            classify_error(RecordKind::Task, &err),
            RemoteError::SchemaMismatch {
                type_name: "Task".into(),
                field: "sortOrder".into()
            }
        );
    }

    #[test]
    fn detects_non_nullable_field_from_message_alone() {
        let err = gql_error(
            "Cannot return null for non-nullable type: 'Boolean' within parent 'List' (/listLists/items[0]/isDemo)",
            None,
            vec![],
        );
        assert_eq!(
            classify_error(RecordKind::List, &err),
            RemoteError::SchemaMismatch {
                type_name: "List".into(),
                field: "isDemo".into()
            }
        );
    }

    #[test]
    fn conditional_failure_is_structured() {
        let err = gql_error(
            "The conditional request failed",
            Some("DynamoDB:ConditionalCheckFailedException"),
            vec![],
        );
        assert!(classify_error(RecordKind::Profile, &err).is_condition_failed());
    }

    #[test]
    fn other_errors_stay_validation() {
        let err = gql_error("Variable 'input' has an invalid value", None, vec![]);
        assert_eq!(
            classify_error(RecordKind::Task, &err),
            RemoteError::Validation {
                message: "Variable 'input' has an invalid value".into()
            }
        );
    }

    #[test]
    fn condition_translates_to_backend_shape() {
        let cond = Condition::And(vec![
            Condition::lt("seedVersion", 2),
            Condition::ne("seedVersion", -1),
        ]);
        assert_eq!(
            condition_input(&cond),
            json!({ "and": [
                { "seedVersion": { "lt": 2 } },
                { "seedVersion": { "ne": -1 } }
            ] })
        );
        assert_eq!(
            condition_input(&Condition::exists("id")),
            json!({ "id": { "attributeExists": true } })
        );
    }

    #[test]
    fn list_document_selects_requested_fields() {
        let query = ListQuery::new(RecordKind::Task, &["id", "title"]);
        let (field, doc) = list_document(&query);
        assert_eq!(field, "listTasks");
        assert!(doc.contains("ModelTaskFilterInput"));
        assert!(doc.contains("items { id title } nextToken"));
    }

    #[test]
    fn update_document_carries_condition() {
        let (field, doc) = mutation_document("update", RecordKind::Profile, true, "id");
        assert_eq!(field, "updateUserProfile");
        assert!(doc.contains("$input: UpdateUserProfileInput!"));
        assert!(doc.contains("$condition: ModelUserProfileConditionInput"));
    }

    #[test]
    fn page_parsing_keeps_null_holes() {
        let page = parse_page(json!({
            "items": [{ "id": "T1" }, null],
            "nextToken": "abc"
        }));
        assert_eq!(page.items, vec![Some(json!({ "id": "T1" })), None]);
        assert_eq!(page.next_token.as_deref(), Some("abc"));
    }
}
