//! Custom Resource Definitions for the MCP operator
//!
//! This module contains the MCPServer CRD and the condition types its status uses.

mod mcp_server;
mod types;

pub use mcp_server::{
    HttpTransport, HttpTransportTls, InitContainerConfig, McpServer, McpServerDeployment,
    McpServerSpec, McpServerStatus, ServiceAccountConfig, StdioTransport,
};
pub use types::{Condition, ConditionStatus, TransportType};
