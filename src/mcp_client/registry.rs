//! Tool registry: aggregates tool definitions across all connected servers.
//!
//! Provides:
//! - The flat catalog sent to the model, in pool order then server order
//! - Collision detection when two servers expose the same tool name
//! - Resolution of a model-issued tool name back to its owning connection
//!
//! Tool names are not prefixed with the server name; the model sees exactly
//! what each server advertised.

use std::collections::HashMap;

use super::errors::McpError;
use super::pool::ServerPool;
use super::types::McpToolDefinition;
use crate::inference::types::ToolDefinition;

// ─── Resolution ──────────────────────────────────────────────────────────────

/// A connection that exposes a given tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOwner {
    /// Index into the pool's connections.
    pub index: usize,
    pub server_name: String,
}

/// Result of resolving a tool name against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResolution {
    /// Exactly one connection exposes the tool.
    Unique(ToolOwner),

    /// Several connections expose the tool. The first in pool order wins;
    /// the rest are listed in pool order.
    Collision {
        winner: ToolOwner,
        shadowed: Vec<ToolOwner>,
    },

    /// No connection exposes the tool.
    NotFound { name: String },
}

impl ToolResolution {
    /// The connection a call should be dispatched to, if any.
    pub fn owner(&self) -> Option<&ToolOwner> {
        match self {
            Self::Unique(owner) => Some(owner),
            Self::Collision { winner, .. } => Some(winner),
            Self::NotFound { .. } => None,
        }
    }

    /// Convert into the dispatch target, or an `UnknownTool` error.
    pub fn into_owner(self) -> Result<ToolOwner, McpError> {
        match self {
            Self::Unique(owner) => Ok(owner),
            Self::Collision { winner, .. } => Ok(winner),
            Self::NotFound { name } => Err(McpError::UnknownTool { name }),
        }
    }
}

/// A tool name exposed by more than one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCollision {
    pub tool_name: String,
    /// Servers exposing the tool, in pool order. The first one wins.
    pub servers: Vec<String>,
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Catalog and routing table for one pool.
///
/// Built once after the pool settles; the pool is not mutated afterwards, so
/// neither is the registry.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    catalog: Vec<ToolDefinition>,
    /// `tool_name → owners in pool order`.
    owners: HashMap<String, Vec<ToolOwner>>,
    collisions: Vec<ToolCollision>,
}

impl ToolRegistry {
    /// Build the registry from every connection in `pool`.
    pub fn new(pool: &ServerPool) -> Self {
        Self::from_servers(
            pool.connections()
                .iter()
                .map(|c| (c.server_name(), c.tools())),
        )
    }

    /// Build the registry from `(server_name, tools)` pairs in pool order.
    pub fn from_servers<'a, I>(servers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [McpToolDefinition])>,
    {
        let mut catalog = Vec::new();
        let mut owners: HashMap<String, Vec<ToolOwner>> = HashMap::new();
        let mut first_seen: Vec<String> = Vec::new();

        for (index, (server_name, tools)) in servers.into_iter().enumerate() {
            for tool in tools {
                catalog.push(ToolDefinition::function(
                    &tool.name,
                    tool.description.clone(),
                    tool.input_schema.clone(),
                ));

                let entry = owners.entry(tool.name.clone()).or_default();
                if entry.is_empty() {
                    first_seen.push(tool.name.clone());
                }
                // A server listing the same name twice is still one owner.
                if entry.last().map(|o| o.index) != Some(index) {
                    entry.push(ToolOwner {
                        index,
                        server_name: server_name.to_string(),
                    });
                }
            }
        }

        let collisions: Vec<ToolCollision> = first_seen
            .iter()
            .filter_map(|name| {
                let list = owners.get(name)?;
                (list.len() > 1).then(|| ToolCollision {
                    tool_name: name.clone(),
                    servers: list.iter().map(|o| o.server_name.clone()).collect(),
                })
            })
            .collect();

        for collision in &collisions {
            tracing::warn!(
                tool = %collision.tool_name,
                servers = ?collision.servers,
                winner = %collision.servers[0],
                "tool name exposed by multiple servers; first server wins"
            );
        }

        tracing::debug!(
            tools = catalog.len(),
            distinct = owners.len(),
            collisions = collisions.len(),
            "tool catalog built"
        );

        Self {
            catalog,
            owners,
            collisions,
        }
    }

    /// Tool schemas for the completion request, in pool order.
    pub fn catalog(&self) -> &[ToolDefinition] {
        &self.catalog
    }

    /// Every tool name exposed by more than one server.
    pub fn collisions(&self) -> &[ToolCollision] {
        &self.collisions
    }

    /// Whether any tool name is exposed by more than one server.
    pub fn has_collisions(&self) -> bool {
        !self.collisions.is_empty()
    }

    /// Map a tool name to the connection that should run it.
    pub fn resolve(&self, tool_name: &str) -> ToolResolution {
        match self.owners.get(tool_name).map(Vec::as_slice) {
            None | Some([]) => ToolResolution::NotFound {
                name: tool_name.to_string(),
            },
            Some([only]) => ToolResolution::Unique(only.clone()),
            Some([winner, rest @ ..]) => ToolResolution::Collision {
                winner: winner.clone(),
                shadowed: rest.to_vec(),
            },
        }
    }

    /// Number of catalog entries.
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
