//! MCP server implementation using rmcp.
//!
//! Exposes the orchestrator as a single `run` tool. Request validation and
//! the language allow-list live here, ahead of any sandbox work.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{error, info};

use crate::backend::IsolationBackend;
use crate::orchestrator::{ExecutionRequest, Orchestrator};
use crate::pipeline::Language;
use crate::sandbox::{RandomTokens, TokenSource};

/// MCP server for sandboxed code execution.
pub struct SandboxServer<B, T = RandomTokens> {
    orchestrator: Arc<Orchestrator<B, T>>,
    tool_router: ToolRouter<Self>,
}

impl<B: IsolationBackend + 'static, T: TokenSource + 'static> Clone for SandboxServer<B, T> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            tool_router: self.tool_router.clone(),
        }
    }
}

/// Parameters for the run tool.
///
/// Both fields are optional in the schema so that a missing field is reported
/// as a validation error rather than a decode failure.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunParams {
    /// Language tag of the submitted code (e.g., "py", "c", "java").
    #[schemars(description = "Language tag: js, py, c, cpp, java, bash, rust, php, ruby, go, scala, perl, golfscript, fish")]
    pub lang: Option<String>,

    /// Source code to compile or interpret.
    #[schemars(description = "The source code to run")]
    pub code: Option<String>,
}

fn language_tags() -> Vec<&'static str> {
    Language::ALL.iter().map(|l| l.tag()).collect()
}

#[tool_router]
impl<B: IsolationBackend + 'static, T: TokenSource + 'static> SandboxServer<B, T> {
    /// Create a new sandbox server.
    pub fn new(orchestrator: Orchestrator<B, T>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            tool_router: Self::tool_router(),
        }
    }

    /// Compile or interpret code in a fresh sandbox and return its output.
    #[tool(description = "Run code in a disposable, network-isolated sandbox and return its stdout and stderr")]
    async fn run(
        &self,
        Parameters(params): Parameters<RunParams>,
    ) -> Result<CallToolResult, McpError> {
        let result = match ExecutionRequest::from_parts(
            params.lang.as_deref(),
            params.code.as_deref(),
        ) {
            Ok(request) => self.orchestrator.execute(&request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => {
                let body = serde_json::to_string(&output)
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?;
                Ok(CallToolResult::success(vec![Content::text(body)]))
            }
            // Bad requests are the caller's fault and never reach a sandbox
            Err(e) if e.is_rejection() => Err(McpError::invalid_params(e.to_string(), None)),
            Err(e) => {
                error!(error = %e, "Execution failed");
                Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
            }
        }
    }
}

#[tool_handler]
impl<B: IsolationBackend + 'static, T: TokenSource + 'static> ServerHandler
    for SandboxServer<B, T>
{
    fn get_info(&self) -> ServerInfo {
        let langs = language_tags();

        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "Compile or interpret code in a disposable sandbox without network access.\n\
                 Runs are killed after {}s.\n\
                 \n\
                 Use the 'run' tool with:\n\
                 - lang: one of {langs:?}\n\
                 - code: the program source",
                self.orchestrator.deadline().as_secs()
            )),
        }
    }
}

/// Serve the sandbox server over stdio.
pub async fn serve_stdio<B, T>(orchestrator: Orchestrator<B, T>) -> anyhow::Result<()>
where
    B: IsolationBackend + 'static,
    T: TokenSource + 'static,
{
    let server = SandboxServer::new(orchestrator);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}
