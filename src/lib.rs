//! Tool-calling agent that researches, drafts and publishes social-media
//! content by driving an LLM against MCP tool providers.

pub mod agent;
pub mod config;
pub mod error;
pub mod images;
pub mod llm;
pub mod mcp;
