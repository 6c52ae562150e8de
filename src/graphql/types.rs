use serde::{Deserialize, Serialize};

/// Request body posted to a GraphQL endpoint
#[derive(Debug, Clone, Serialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl GraphQLRequest {
    /// Create a request with no variables
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    /// Set variables; an empty map is sent as no variables
    pub fn with_variables(mut self, variables: serde_json::Map<String, serde_json::Value>) -> Self {
        self.variables = if variables.is_empty() {
            None
        } else {
            Some(variables)
        };
        self
    }

    /// Add a single variable
    pub fn with_variable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    /// Set the operation name
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// Response body returned by a GraphQL endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQLErrorEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl GraphQLResponse {
    /// Whether the response carries at least one GraphQL error
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Server-reported query cost from `extensions.complexity`, when present
    pub fn reported_complexity(&self) -> Option<u64> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("complexity"))
            .and_then(|c| c.as_u64().or_else(|| c.get("score").and_then(|s| s.as_u64())))
    }
}

/// One entry of a GraphQL `errors` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLErrorEntry {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ErrorLocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl GraphQLErrorEntry {
    /// Create an error entry with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }
}

/// Source location of a GraphQL error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_skips_empty_fields() {
        let request = GraphQLRequest::new("query { viewer { login } }");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"query": "query { viewer { login } }"}));
    }

    #[test]
    fn test_request_serialization_with_operation() {
        let request = GraphQLRequest::new("query User($id: ID!) { user(id: $id) { id } }")
            .with_variable("id", json!("42"))
            .with_operation_name("User");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["operationName"], "User");
        assert_eq!(value["variables"]["id"], "42");
    }

    #[test]
    fn test_empty_variables_are_omitted() {
        let request = GraphQLRequest::new("{ a }").with_variables(serde_json::Map::new());
        assert!(request.variables.is_none());
    }

    #[test]
    fn test_response_with_errors() {
        let response: GraphQLResponse = serde_json::from_value(json!({
            "data": null,
            "errors": [{
                "message": "Field 'x' doesn't exist",
                "locations": [{"line": 1, "column": 9}],
                "path": ["user", "x"]
            }]
        }))
        .unwrap();
        assert!(response.has_errors());
        let errors = response.errors.unwrap();
        assert_eq!(errors[0].locations.as_ref().unwrap()[0].column, 9);
        assert_eq!(errors[0].path.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_response_empty_errors_is_success() {
        let response: GraphQLResponse =
            serde_json::from_value(json!({"data": {"a": 1}, "errors": []})).unwrap();
        assert!(!response.has_errors());
    }

    #[test]
    fn test_reported_complexity() {
        let response: GraphQLResponse = serde_json::from_value(json!({
            "data": {},
            "extensions": {"complexity": 42}
        }))
        .unwrap();
        assert_eq!(response.reported_complexity(), Some(42));

        let nested: GraphQLResponse = serde_json::from_value(json!({
            "extensions": {"complexity": {"score": 7}}
        }))
        .unwrap();
        assert_eq!(nested.reported_complexity(), Some(7));
    }
}
