//! Tool Gateway: one request/response call per business capability.
//!
//! Nothing here retries. Callers decide what a failure means for the call.

pub mod business;
pub mod local;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use callquote_core::config::ToolsConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;

pub use business::{BusinessTools, QuoteOutcome};

pub const PROPERTY_SERVER: &str = "property";
pub const BUSINESS_SERVER: &str = "business";
pub const CALENDAR_SERVER: &str = "calendar";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool `{server}.{tool}` failed: {message}")]
    Failed { server: String, tool: String, message: String },
    #[error("tool `{server}.{tool}` timed out after {timeout:?}")]
    Timeout { server: String, tool: String, timeout: Duration },
    #[error("tool `{server}.{tool}` returned an unexpected shape: {message}")]
    Malformed { server: String, tool: String, message: String },
}

impl ToolError {
    pub fn failed(server: &str, tool: &str, message: impl Into<String>) -> Self {
        Self::Failed { server: server.to_string(), tool: tool.to_string(), message: message.into() }
    }

    pub fn malformed(server: &str, tool: &str, message: impl Into<String>) -> Self {
        Self::Malformed {
            server: server.to_string(),
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ToolGateway: Send + Sync {
    async fn call(&self, server: &str, tool: &str, args: Value) -> Result<Value, ToolError>;
}

/// A tool served in-process.
#[async_trait]
pub trait Tool: Send + Sync {
    fn server(&self) -> &'static str;
    fn name(&self) -> &'static str;
    async fn execute(&self, input: Value) -> Result<Value>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(format!("{}.{}", tool.server(), tool.name()), Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolGateway for ToolRegistry {
    async fn call(&self, server: &str, tool: &str, args: Value) -> Result<Value, ToolError> {
        let registered = self
            .tools
            .get(&format!("{server}.{tool}"))
            .ok_or_else(|| ToolError::failed(server, tool, "tool is not registered"))?;
        registered.execute(args).await.map_err(|error| ToolError::failed(server, tool, error.to_string()))
    }
}

/// Calls remote tool servers at `POST {base_url}/{server}/tools/{tool}`.
pub struct HttpToolGateway {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpToolGateway {
    pub fn from_config(config: &ToolsConfig) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ToolError::failed("gateway", "client", error.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self, server: &str, tool: &str) -> String {
        format!("{}/{server}/tools/{tool}", self.base_url)
    }
}

#[async_trait]
impl ToolGateway for HttpToolGateway {
    async fn call(&self, server: &str, tool: &str, args: Value) -> Result<Value, ToolError> {
        let mut request = self.client.post(self.endpoint(server, tool)).json(&args);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| ToolError::failed(server, tool, error.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolError::failed(
                server,
                tool,
                format!("tool server returned {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| ToolError::malformed(server, tool, error.to_string()))?;
        if let Some(message) = body.get("error").filter(|error| !error.is_null()) {
            return Err(ToolError::failed(server, tool, message.to_string()));
        }
        Ok(body)
    }
}
