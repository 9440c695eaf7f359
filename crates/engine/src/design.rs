//! The design graph: blocks, agents, and connections (spec §3).

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Sequential,
    Parallel,
    Hierarchical,
    Debate,
    Routing,
    Reflection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Worker,
    Manager,
    Specialist,
    Moderator,
    Router,
    Reflector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub role: AgentRole,
    pub system_prompt: String,
    #[serde(default)]
    pub use_tools: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Block,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub source_block: String,
    pub target_block: String,
    #[serde(default)]
    pub source_agent: Option<String>,
    #[serde(default)]
    pub target_agent: Option<String>,
    pub kind: ConnectionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub agents: Vec<AgentSpec>,
    pub task: String,
    #[serde(default)]
    pub git_repo: Option<String>,
    #[serde(default)]
    pub isolate_agent_workspaces: bool,
    #[serde(default)]
    pub rounds: Option<u32>,
    /// Name of the aggregator agent for `parallel` blocks, if any.
    #[serde(default)]
    pub aggregator: Option<String>,
}

impl Block {
    pub fn agent(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn agents_with_role(&self, role: AgentRole) -> Vec<&AgentSpec> {
        self.agents.iter().filter(|a| a.role == role).collect()
    }

    fn validate(&self) -> EngineResult<()> {
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name.as_str()) {
                return Err(EngineError::InvalidDesign(format!(
                    "block {}: duplicate agent name {}",
                    self.id, agent.name
                )));
            }
        }

        match self.block_type {
            BlockType::Hierarchical => {
                let managers = self.agents_with_role(AgentRole::Manager).len();
                if managers != 1 {
                    return Err(EngineError::InvalidDesign(format!(
                        "block {}: hierarchical requires exactly one manager, found {}",
                        self.id, managers
                    )));
                }
            }
            BlockType::Routing => {
                let routers = self.agents_with_role(AgentRole::Router).len();
                let specialists = self.agents_with_role(AgentRole::Specialist).len();
                if routers != 1 {
                    return Err(EngineError::InvalidDesign(format!(
                        "block {}: routing requires exactly one router, found {}",
                        self.id, routers
                    )));
                }
                if specialists == 0 {
                    return Err(EngineError::InvalidDesign(format!(
                        "block {}: routing requires at least one specialist",
                        self.id
                    )));
                }
            }
            BlockType::Debate => {
                if self.agents.len() < 2 {
                    return Err(EngineError::InvalidDesign(format!(
                        "block {}: debate requires at least two participants",
                        self.id
                    )));
                }
            }
            BlockType::Sequential | BlockType::Parallel | BlockType::Reflection => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Design {
    pub id: String,
    pub blocks: Vec<Block>,
    pub connections: Vec<Connection>,
}

impl Design {
    /// Validate the invariants of spec §3: unique agent names per block,
    /// no self-loops, connections form a DAG, agent-connection endpoints
    /// exist, and per-type role_map cardinality.
    pub fn validate(&self) -> EngineResult<()> {
        let mut block_ids = HashSet::new();
        let blocks_by_id: HashMap<&str, &Block> = self
            .blocks
            .iter()
            .map(|b| (b.id.as_str(), b))
            .collect();

        for block in &self.blocks {
            if !block_ids.insert(block.id.as_str()) {
                return Err(EngineError::InvalidDesign(format!(
                    "duplicate block id {}",
                    block.id
                )));
            }
            block.validate()?;
        }

        for conn in &self.connections {
            if conn.source_block == conn.target_block {
                return Err(EngineError::InvalidDesign(format!(
                    "self-loop on block {}",
                    conn.source_block
                )));
            }
            let source = blocks_by_id.get(conn.source_block.as_str()).ok_or_else(|| {
                EngineError::InvalidDesign(format!("unknown source block {}", conn.source_block))
            })?;
            let target = blocks_by_id.get(conn.target_block.as_str()).ok_or_else(|| {
                EngineError::InvalidDesign(format!("unknown target block {}", conn.target_block))
            })?;

            if conn.kind == ConnectionKind::Agent {
                if let Some(name) = &conn.source_agent {
                    if source.agent(name).is_none() {
                        return Err(EngineError::InvalidDesign(format!(
                            "source agent {} not found in block {}",
                            name, source.id
                        )));
                    }
                }
                if let Some(name) = &conn.target_agent {
                    if target.agent(name).is_none() {
                        return Err(EngineError::InvalidDesign(format!(
                            "target agent {} not found in block {}",
                            name, target.id
                        )));
                    }
                }
            }
        }

        self.topological_order()?;
        Ok(())
    }

    /// Stable topological order (ties broken by block id), rejecting cycles.
    pub fn topological_order(&self) -> EngineResult<Vec<String>> {
        let mut indegree: HashMap<&str, usize> =
            self.blocks.iter().map(|b| (b.id.as_str(), 0)).collect();
        let mut edges: HashMap<&str, Vec<&str>> =
            self.blocks.iter().map(|b| (b.id.as_str(), Vec::new())).collect();

        for conn in &self.connections {
            edges
                .entry(conn.source_block.as_str())
                .or_default()
                .push(conn.target_block.as_str());
            *indegree.entry(conn.target_block.as_str()).or_insert(0) += 1;
        }

        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable();

        let mut order = Vec::with_capacity(self.blocks.len());
        let mut indegree = indegree;
        while let Some(next) = ready.pop() {
            order.push(next.to_string());
            let mut newly_ready = Vec::new();
            for &dep in edges.get(next).into_iter().flatten() {
                let entry = indegree.get_mut(dep).expect("edge target must exist");
                *entry -= 1;
                if *entry == 0 {
                    newly_ready.push(dep);
                }
            }
            newly_ready.sort_unstable();
            ready.extend(newly_ready);
            ready.sort_unstable();
        }

        if order.len() != self.blocks.len() {
            return Err(EngineError::InvalidDesign(
                "design contains a cycle among blocks".to_string(),
            ));
        }
        Ok(order)
    }

    /// Same Kahn's-algorithm traversal as `topological_order`, but grouped
    /// by round: every block in one level has no edge to another block in
    /// that level, so a scheduler may run a level's blocks concurrently.
    /// Levels and the blocks within them are each sorted by id for a
    /// deterministic, reproducible ordering.
    pub fn topological_levels(&self) -> EngineResult<Vec<Vec<String>>> {
        let mut indegree: HashMap<&str, usize> =
            self.blocks.iter().map(|b| (b.id.as_str(), 0)).collect();
        let mut edges: HashMap<&str, Vec<&str>> =
            self.blocks.iter().map(|b| (b.id.as_str(), Vec::new())).collect();

        for conn in &self.connections {
            edges
                .entry(conn.source_block.as_str())
                .or_default()
                .push(conn.target_block.as_str());
            *indegree.entry(conn.target_block.as_str()).or_insert(0) += 1;
        }

        let mut current: Vec<&str> = indegree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| *id).collect();
        current.sort_unstable();

        let mut levels = Vec::new();
        let mut scheduled = 0;
        while !current.is_empty() {
            scheduled += current.len();
            levels.push(current.iter().map(|id| id.to_string()).collect::<Vec<_>>());

            let mut next = Vec::new();
            for &id in &current {
                for &dep in edges.get(id).into_iter().flatten() {
                    let entry = indegree.get_mut(dep).expect("edge target must exist");
                    *entry -= 1;
                    if *entry == 0 {
                        next.push(dep);
                    }
                }
            }
            next.sort_unstable();
            next.dedup();
            current = next;
        }

        if scheduled != self.blocks.len() {
            return Err(EngineError::InvalidDesign(
                "design contains a cycle among blocks".to_string(),
            ));
        }
        Ok(levels)
    }
}
