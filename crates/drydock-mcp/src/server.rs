//! DrydockServer - MCP server that exposes Python execution and code
//! directory operations as tools.
//!
//! ServerHandler is implemented by hand. Every tool answers with a single
//! text content; failures are reported as `Error: ...` text rather than
//! protocol errors, so agents can read and react to them.

use crate::config::{ConfigError, DrydockConfig, MAX_INPUT_SIZE_BYTES};
use crate::types::*;

use drydock_core::{
    format_size, ContainerRuntime, CoreError, ExecutionRequest, Orchestrator, Pool, SandboxFs,
    ShutdownCoordinator, ShutdownReport,
};
use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData,
};
use schemars::schema_for;
use serde::de::DeserializeOwned;
use std::fmt::Write as _;
use std::sync::Arc;

/// MCP server for Drydock code execution.
#[derive(Clone)]
pub struct DrydockServer {
    orchestrator: Arc<Orchestrator>,
    pool: Arc<Pool>,
    files: Arc<SandboxFs>,
    coordinator: Arc<ShutdownCoordinator>,
    config: DrydockConfig,
}

impl DrydockServer {
    /// Create a server whose units are provided by `runtime`.
    ///
    /// Creates the code directory if needed. No unit is created until the
    /// first execution.
    pub fn new(
        config: DrydockConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, ConfigError> {
        let files = SandboxFs::new(&config.code_dir)?;

        // Bind mounts need the resolved absolute path.
        let mut engine = config.to_engine_config()?;
        engine.sandbox_root = files.root().to_path_buf();

        let pool = Arc::new(Pool::new(runtime, &engine));
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&pool), &engine));
        let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&pool)));

        tracing::info!(
            code_dir = %files.root().display(),
            image = %engine.image,
            max_units = engine.max_units,
            "Drydock server configured"
        );

        Ok(Self {
            orchestrator,
            pool,
            files: Arc::new(files),
            coordinator,
            config,
        })
    }

    /// Start background maintenance (the idle reaper).
    pub async fn start(&self) {
        self.coordinator
            .start_reaper(self.config.reap_interval)
            .await;
    }

    /// Stop background maintenance and destroy every unit.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.coordinator.shutdown().await
    }

    /// Get a reference to the unit pool.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Get a reference to the code directory.
    pub fn files(&self) -> &SandboxFs {
        &self.files
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &DrydockConfig {
        &self.config
    }

    /// Truncate sensitive content for logging.
    fn truncate_for_log(s: &str, max_len: usize) -> String {
        if s.len() <= max_len {
            return s.to_string();
        }
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... ({} bytes total)", &s[..end], s.len())
    }

    /// Validate input size.
    fn validate_size(content: &str, max_bytes: usize, field_name: &str) -> Result<(), String> {
        if content.len() > max_bytes {
            Err(format!(
                "{} exceeds maximum size ({} bytes > {} bytes)",
                field_name,
                content.len(),
                max_bytes
            ))
        } else {
            Ok(())
        }
    }

    /// Deserialize tool arguments; absent arguments count as `{}`.
    fn parse_args<T: DeserializeOwned>(
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<T, String> {
        serde_json::from_value(serde_json::Value::Object(args.unwrap_or_default()))
            .map_err(|e| format!("Invalid parameters: {e}"))
    }

    /// Helper to create a plain text result
    fn text_result(text: impl Into<String>) -> CallToolResult {
        CallToolResult::success(vec![Content::text(text.into())])
    }

    /// Helper to create an error result
    ///
    /// Errors travel as ordinary text so the calling agent sees the message.
    fn error_result(message: impl std::fmt::Display) -> CallToolResult {
        Self::text_result(format!("Error: {message}"))
    }

    /// Helper to create success result with JSON content
    fn json_result<T: serde::Serialize>(data: &T) -> CallToolResult {
        match serde_json::to_string_pretty(data) {
            Ok(json) => Self::text_result(json),
            Err(e) => Self::error_result(format!("JSON serialization error: {e}")),
        }
    }

    /// Convert schemars RootSchema to rmcp JsonObject
    fn schema_to_json_object<T: schemars::JsonSchema>(
    ) -> Arc<serde_json::Map<String, serde_json::Value>> {
        let schema = schema_for!(T);
        let json = serde_json::to_value(&schema.schema).unwrap_or_else(|_| serde_json::json!({}));
        match json {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        }
    }

    /// Create an empty schema for tools with no parameters
    fn empty_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
        let mut map = serde_json::Map::new();
        map.insert("type".into(), serde_json::json!("object"));
        map.insert("properties".into(), serde_json::json!({}));
        Arc::new(map)
    }

    /// Run a blocking file operation off the async workers.
    async fn with_files<T, F>(&self, op: F) -> drydock_core::Result<T>
    where
        F: FnOnce(&SandboxFs) -> drydock_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let files = Arc::clone(&self.files);
        match tokio::task::spawn_blocking(move || op(&files)).await {
            Ok(result) => result,
            Err(e) => Err(CoreError::Io(std::io::Error::other(format!(
                "file task failed: {e}"
            )))),
        }
    }

    fn display_path(relative: &str) -> &str {
        match relative.trim() {
            "" => ".",
            other => other,
        }
    }

    // ========================================================================
    // Tool Implementations
    // ========================================================================

    async fn handle_execute_python(
        &self,
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> CallToolResult {
        let params: ExecuteParams = match Self::parse_args(args) {
            Ok(p) => p,
            Err(e) => return Self::error_result(e),
        };

        if let Err(e) = Self::validate_size(&params.code, MAX_INPUT_SIZE_BYTES, "code") {
            return Self::error_result(e);
        }

        tracing::info!(
            code = %Self::truncate_for_log(&params.code, 100),
            "Executing Python code"
        );

        let result = self
            .orchestrator
            .run(ExecutionRequest::from_host_env(params.code))
            .await;
        Self::text_result(result.to_string())
    }

    async fn handle_list_directory(
        &self,
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> CallToolResult {
        let params: PathParams = match Self::parse_args(args) {
            Ok(p) => p,
            Err(e) => return Self::error_result(e),
        };

        let rel = params.relative_path.clone();
        let entries = match self.with_files(move |fs| fs.list(&rel)).await {
            Ok(entries) => entries,
            Err(e) => return Self::error_result(e),
        };

        let shown = Self::display_path(&params.relative_path);
        if entries.is_empty() {
            return Self::text_result(format!("Directory is empty: {shown}"));
        }

        let mut out = format!("Contents of {shown} (total: {}):\n", entries.len());
        for entry in &entries {
            if entry.is_dir {
                let _ = writeln!(out, "📁 {}/", entry.name);
            } else {
                let _ = writeln!(out, "📄 {} ({})", entry.name, format_size(entry.size));
            }
        }
        Self::text_result(out)
    }

    async fn handle_read_file(
        &self,
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> CallToolResult {
        let params: PathParams = match Self::parse_args(args) {
            Ok(p) => p,
            Err(e) => return Self::error_result(e),
        };

        let rel = params.relative_path.clone();
        match self.with_files(move |fs| fs.read(&rel)).await {
            Ok(content) => Self::text_result(format!(
                "Contents of {}:\n\n{content}",
                params.relative_path
            )),
            Err(e) => Self::error_result(e),
        }
    }

    async fn handle_write_file(
        &self,
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> CallToolResult {
        let params: WriteFileParams = match Self::parse_args(args) {
            Ok(p) => p,
            Err(e) => return Self::error_result(e),
        };

        if let Err(e) = Self::validate_size(&params.content, MAX_INPUT_SIZE_BYTES, "content") {
            return Self::error_result(e);
        }

        tracing::info!(
            path = %params.relative_path,
            bytes = params.content.len(),
            "Writing file"
        );

        let rel = params.relative_path.clone();
        match self
            .with_files(move |fs| fs.write(&rel, &params.content))
            .await
        {
            Ok(written) => Self::text_result(format!(
                "Successfully wrote {written} bytes to {}",
                params.relative_path
            )),
            Err(e) => Self::error_result(e),
        }
    }

    async fn handle_delete_file(
        &self,
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> CallToolResult {
        let params: PathParams = match Self::parse_args(args) {
            Ok(p) => p,
            Err(e) => return Self::error_result(e),
        };

        tracing::info!(path = %params.relative_path, "Deleting file");

        let rel = params.relative_path.clone();
        match self.with_files(move |fs| fs.delete(&rel)).await {
            Ok(()) => Self::text_result(format!(
                "Successfully deleted file: {}",
                params.relative_path
            )),
            Err(e) => Self::error_result(e),
        }
    }

    async fn handle_directory_tree(
        &self,
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> CallToolResult {
        let params: PathParams = match Self::parse_args(args) {
            Ok(p) => p,
            Err(e) => return Self::error_result(e),
        };

        match self
            .with_files(move |fs| fs.tree(&params.relative_path))
            .await
        {
            Ok(tree) => Self::text_result(tree),
            Err(e) => Self::error_result(e),
        }
    }

    async fn handle_cleanup(&self) -> CallToolResult {
        match self.with_files(|fs| fs.cleanup()).await {
            Ok(removed) => {
                tracing::info!(removed, "Code directory cleaned up");
                Self::text_result(format!(
                    "Successfully cleaned up code directory: {}",
                    self.files.root().display()
                ))
            }
            Err(e) => Self::error_result(format!("failed to clean up code directory: {e}")),
        }
    }

    fn handle_pool_status(&self) -> CallToolResult {
        Self::json_result(&self.pool.status())
    }

    /// Build the list of available tools
    fn build_tools_list() -> Vec<Tool> {
        vec![
            Tool::new(
                "execute_python",
                "Execute Python code in an isolated, network-less container. \
                 Returns combined stdout and stderr.",
                Self::schema_to_json_object::<ExecuteParams>(),
            ),
            Tool::new(
                "list_directory",
                "List files and directories in the code directory.",
                Self::schema_to_json_object::<PathParams>(),
            ),
            Tool::new(
                "read_file",
                "Read a text file from the code directory.",
                Self::schema_to_json_object::<PathParams>(),
            ),
            Tool::new(
                "write_file",
                "Write a file to the code directory, creating parent directories.",
                Self::schema_to_json_object::<WriteFileParams>(),
            ),
            Tool::new(
                "delete_file",
                "Delete a file from the code directory.",
                Self::schema_to_json_object::<PathParams>(),
            ),
            Tool::new(
                "get_directory_tree",
                "Show the code directory (or a subdirectory) as a tree.",
                Self::schema_to_json_object::<PathParams>(),
            ),
            Tool::new(
                "cleanup_code_directory",
                "Remove every file and directory from the code directory.",
                Self::empty_schema(),
            ),
            Tool::new(
                "pool_status",
                "Report execution unit occupancy and lifetime counters as JSON.",
                Self::empty_schema(),
            ),
        ]
    }

    /// Dispatch one tool call by name.
    pub(crate) async fn dispatch(
        &self,
        name: &str,
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> CallToolResult {
        match name {
            "execute_python" => self.handle_execute_python(args).await,
            "list_directory" => self.handle_list_directory(args).await,
            "read_file" => self.handle_read_file(args).await,
            "write_file" => self.handle_write_file(args).await,
            "delete_file" => self.handle_delete_file(args).await,
            "get_directory_tree" => self.handle_directory_tree(args).await,
            "cleanup_code_directory" => self.handle_cleanup().await,
            "pool_status" => self.handle_pool_status(),
            _ => Self::error_result(format!("Unknown tool: {name}")),
        }
    }
}

// ============================================================================
// ServerHandler Implementation
// ============================================================================

impl ServerHandler for DrydockServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Drydock MCP Server - Run Python code in pooled, isolated containers. \
                 Use execute_python to run code; files written with write_file are \
                 visible to executed code under /code. Use list_directory, read_file, \
                 delete_file and get_directory_tree to inspect results, and \
                 cleanup_code_directory to start fresh."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: Self::build_tools_list(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        tracing::debug!(tool = %request.name, "Tool call");
        Ok(self.dispatch(request.name.as_ref(), request.arguments).await)
    }
}
