//! MCP Tool definitions and handlers
//!
//! The tool set is closed: [`ToolName`] enumerates it, [`ToolRegistry`]
//! holds the advertised descriptors and [`ToolDispatcher`] routes calls to the
//! mail data service.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::error::{McpError, Result, ValidationError};
use crate::gmail::service::MailService;
use crate::gmail::types::ToolPayload;
use crate::mcp::types::{CallToolResult, ToolDescriptor};

/// The tools this server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    GetRecentEmails,
    GetUnreadEmails,
    SearchEmails,
    GetEmailDetails,
}

impl ToolName {
    /// Every tool, in advertisement order
    pub const ALL: [ToolName; 4] = [
        ToolName::GetRecentEmails,
        ToolName::GetUnreadEmails,
        ToolName::SearchEmails,
        ToolName::GetEmailDetails,
    ];

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::GetRecentEmails => "get_recent_emails",
            ToolName::GetUnreadEmails => "get_unread_emails",
            ToolName::SearchEmails => "search_emails",
            ToolName::GetEmailDetails => "get_email_details",
        }
    }

    fn description(self) -> &'static str {
        match self {
            ToolName::GetRecentEmails => "Fetches the most recent emails in the mailbox",
            ToolName::GetUnreadEmails => "Fetches unread emails",
            ToolName::SearchEmails => "Searches emails using Gmail search syntax",
            ToolName::GetEmailDetails => "Fetches the full details of a single email",
        }
    }

    fn input_schema(self) -> Value {
        match self {
            ToolName::GetRecentEmails => schema_of::<RecentEmailsArgs>(),
            ToolName::GetUnreadEmails => schema_of::<UnreadEmailsArgs>(),
            ToolName::SearchEmails => schema_of::<SearchEmailsArgs>(),
            ToolName::GetEmailDetails => schema_of::<EmailDetailsArgs>(),
        }
    }

    fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = McpError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| McpError::ToolNotFound {
                name: s.to_string(),
            })
    }
}

// ==================== Arguments ====================
// `count` is capped at 500, the Gmail API limit for `maxResults`.

fn default_recent_count() -> u32 {
    5
}

fn default_count() -> u32 {
    10
}

/// Arguments of `get_recent_emails`
#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct RecentEmailsArgs {
    /// Number of emails to fetch (default: 5)
    #[serde(default = "default_recent_count")]
    #[validate(range(max = 500))]
    pub count: u32,
}

/// Arguments of `get_unread_emails`
#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct UnreadEmailsArgs {
    /// Maximum number of unread emails (default: 10)
    #[serde(default = "default_count")]
    #[validate(range(max = 500))]
    pub count: u32,
}

/// Arguments of `search_emails`
#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct SearchEmailsArgs {
    /// Gmail search query (e.g. 'from:someone@example.com', 'subject:meeting')
    pub query: String,

    /// Maximum number of emails to return (default: 10)
    #[serde(default = "default_count")]
    #[validate(range(max = 500))]
    pub count: u32,
}

/// Arguments of `get_email_details`
#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct EmailDetailsArgs {
    /// Gmail message ID
    #[validate(length(min = 1))]
    pub message_id: String,
}

fn schema_of<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| json!({"type": "object", "properties": {}}));
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

fn parse_args<T: DeserializeOwned + Validate>(tool: ToolName, args: Value) -> Result<T> {
    let invalid = |message: String| ValidationError::InvalidArguments {
        tool: tool.to_string(),
        message,
    };
    let args: T = serde_json::from_value(args).map_err(|e| invalid(e.to_string()))?;
    args.validate().map_err(|e| invalid(e.to_string()))?;
    Ok(args)
}

/// A decoded call, ready to run against the mail service
#[derive(Debug)]
enum ToolCall {
    Recent(RecentEmailsArgs),
    Unread(UnreadEmailsArgs),
    Search(SearchEmailsArgs),
    Details(EmailDetailsArgs),
}

impl ToolCall {
    fn parse(tool: ToolName, args: Value) -> Result<Self> {
        // Missing arguments behave like an empty object
        let args = if args.is_null() { json!({}) } else { args };
        Ok(match tool {
            ToolName::GetRecentEmails => ToolCall::Recent(parse_args(tool, args)?),
            ToolName::GetUnreadEmails => ToolCall::Unread(parse_args(tool, args)?),
            ToolName::SearchEmails => ToolCall::Search(parse_args(tool, args)?),
            ToolName::GetEmailDetails => ToolCall::Details(parse_args(tool, args)?),
        })
    }

    async fn execute(self, service: &MailService) -> Result<ToolPayload> {
        match self {
            ToolCall::Recent(a) => Ok(ToolPayload::EmailList(service.get_recent_emails(a.count).await?)),
            ToolCall::Unread(a) => Ok(ToolPayload::EmailList(service.get_unread_emails(a.count).await?)),
            ToolCall::Search(a) => Ok(ToolPayload::EmailList(
                service.search_emails(&a.query, a.count).await?,
            )),
            ToolCall::Details(a) => service.get_email_details(&a.message_id).await,
        }
    }
}

// ==================== Registry ====================

/// Descriptors of the registered tools, in registration order
pub struct ToolRegistry {
    tools: Vec<(ToolName, ToolDescriptor)>,
}

impl ToolRegistry {
    /// Register every tool exactly once
    pub fn new() -> std::result::Result<Self, McpError> {
        let mut registry = Self { tools: Vec::new() };
        for tool in ToolName::ALL {
            registry.register(tool)?;
        }
        registry.check_complete()?;
        Ok(registry)
    }

    fn register(&mut self, tool: ToolName) -> std::result::Result<(), McpError> {
        if self.tools.iter().any(|(t, _)| *t == tool) {
            return Err(McpError::Registration {
                message: format!("tool registered twice: {}", tool),
            });
        }
        self.tools.push((tool, tool.descriptor()));
        Ok(())
    }

    fn check_complete(&self) -> std::result::Result<(), McpError> {
        match ToolName::ALL
            .into_iter()
            .find(|tool| !self.tools.iter().any(|(t, _)| t == tool))
        {
            Some(missing) => Err(McpError::Registration {
                message: format!("tool not registered: {}", missing),
            }),
            None => Ok(()),
        }
    }

    /// All descriptors, verbatim
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|(_, d)| d.clone()).collect()
    }

    /// Resolve a wire name to a registered tool
    pub fn lookup(&self, name: &str) -> Option<ToolName> {
        self.tools
            .iter()
            .find(|(_, d)| d.name == name)
            .map(|(t, _)| *t)
    }
}

// ==================== Dispatcher ====================

/// Routes tool calls to the mail service, always producing a result envelope
pub struct ToolDispatcher {
    registry: ToolRegistry,
    service: Arc<MailService>,
}

impl ToolDispatcher {
    /// Create a dispatcher over the given service
    pub fn new(service: Arc<MailService>) -> std::result::Result<Self, McpError> {
        Ok(Self {
            registry: ToolRegistry::new()?,
            service,
        })
    }

    /// Advertised tools
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.list_tools()
    }

    /// Call a tool by name
    ///
    /// Never fails: unknown tools, bad arguments, authentication problems and
    /// handler failures (including panics) all come back as `{error}`
    /// payloads.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> CallToolResult {
        let Some(tool) = self.registry.lookup(name) else {
            tracing::warn!("Call to unknown tool {}", name);
            return CallToolResult::error(
                McpError::ToolNotFound {
                    name: name.to_string(),
                }
                .to_string(),
            );
        };

        let call = match ToolCall::parse(tool, arguments) {
            Ok(call) => call,
            Err(e) => return CallToolResult::error(e.to_string()),
        };

        tracing::debug!("Dispatching {}", tool);

        if let Err(e) = self.service.ensure_authenticated().await {
            tracing::error!("Gmail initialization failed: {}", e);
            return CallToolResult::error(remote_failure(tool, e.to_string()));
        }

        let service = Arc::clone(&self.service);
        let handle = tokio::spawn(async move { call.execute(&service).await });

        match handle.await {
            Ok(Ok(payload)) => CallToolResult::from_payload(&payload),
            Ok(Err(e)) => {
                tracing::warn!("{} failed: {}", tool, e);
                CallToolResult::error(remote_failure(tool, e.to_string()))
            }
            Err(e) => {
                tracing::error!("{} handler aborted: {}", tool, e);
                CallToolResult::error(remote_failure(tool, format!("handler aborted: {}", e)))
            }
        }
    }
}

fn remote_failure(tool: ToolName, message: String) -> String {
    McpError::RemoteExecution {
        tool: tool.to_string(),
        message,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn dispatcher() -> (tempfile::TempDir, ToolDispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(MailService::new(Config::with_dir(dir.path())));
        (dir, ToolDispatcher::new(service).unwrap())
    }

    fn error_of(result: &CallToolResult) -> String {
        let payload: ToolPayload = serde_json::from_str(result.first_text().unwrap()).unwrap();
        payload.error_message().unwrap().to_string()
    }

    #[test]
    fn test_tool_names_roundtrip() {
        for tool in ToolName::ALL {
            assert_eq!(tool.as_str().parse::<ToolName>().unwrap(), tool);
        }
        assert!(matches!(
            "send_email".parse::<ToolName>(),
            Err(McpError::ToolNotFound { .. })
        ));
    }

    #[test]
    fn test_registry_order_and_names() {
        let registry = ToolRegistry::new().unwrap();
        let names: Vec<_> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["get_recent_emails", "get_unread_emails", "search_emails", "get_email_details"]
        );
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new().unwrap();
        let err = registry.register(ToolName::SearchEmails).unwrap_err();
        assert!(matches!(err, McpError::Registration { .. }));
    }

    #[test]
    fn test_incomplete_registry_rejected() {
        let mut registry = ToolRegistry { tools: Vec::new() };
        registry.register(ToolName::GetRecentEmails).unwrap();
        assert!(registry.check_complete().is_err());
    }

    #[test]
    fn test_schema_defaults_and_required() {
        let registry = ToolRegistry::new().unwrap();
        let tools = registry.list_tools();

        let recent = &tools[0].input_schema;
        assert_eq!(recent["type"], "object");
        assert_eq!(recent["properties"]["count"]["type"], "integer");
        assert_eq!(recent["properties"]["count"]["default"], 5);

        let unread = &tools[1].input_schema;
        assert_eq!(unread["properties"]["count"]["default"], 10);

        let search = &tools[2].input_schema;
        assert_eq!(search["properties"]["query"]["type"], "string");
        assert_eq!(search["required"], json!(["query"]));

        let details = &tools[3].input_schema;
        assert_eq!(details["required"], json!(["message_id"]));
    }

    #[test]
    fn test_argument_defaults() {
        let call = ToolCall::parse(ToolName::GetRecentEmails, Value::Null).unwrap();
        assert!(matches!(call, ToolCall::Recent(RecentEmailsArgs { count: 5 })));

        let call = ToolCall::parse(ToolName::SearchEmails, json!({"query": ""})).unwrap();
        assert!(matches!(call, ToolCall::Search(ref a) if a.query.is_empty() && a.count == 10));
    }

    #[test]
    fn test_argument_validation() {
        assert!(ToolCall::parse(ToolName::SearchEmails, json!({})).is_err());
        assert!(ToolCall::parse(ToolName::GetUnreadEmails, json!({"count": 501})).is_err());
        assert!(ToolCall::parse(ToolName::GetUnreadEmails, json!({"count": -1})).is_err());
        assert!(ToolCall::parse(ToolName::GetEmailDetails, json!({"message_id": ""})).is_err());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let (_dir, dispatcher) = dispatcher();
        let result = dispatcher.dispatch("send_email", json!({})).await;
        assert!(result.is_error);
        assert_eq!(error_of(&result), "unknown tool: send_email");
    }

    #[tokio::test]
    async fn test_dispatch_invalid_arguments() {
        let (_dir, dispatcher) = dispatcher();
        let result = dispatcher.dispatch("get_email_details", json!({})).await;
        assert!(result.is_error);
        assert!(error_of(&result).contains("invalid arguments for get_email_details"));
    }

    #[tokio::test]
    async fn test_dispatch_without_credentials_reports_tool() {
        let (_dir, dispatcher) = dispatcher();
        let result = dispatcher.dispatch("get_recent_emails", json!({"count": 1})).await;
        assert!(result.is_error);
        let message = error_of(&result);
        assert!(message.starts_with("error executing get_recent_emails:"));
        assert!(message.contains("interactive authorization is disabled"));
    }
}
