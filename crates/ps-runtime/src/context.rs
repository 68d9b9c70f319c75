//! Per-run shared state: project root, tool registry, memory store,
//! logger, the policy stack, and detector/prompter seams.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use ps_core::{BudgetConfig, Policy};
use ps_llm::{ContextFormat, LlmConfig};
use ps_memory::MemoryStore;
use ps_session::RunLogger;
use ps_tools::ToolRegistry;
use serde_json::Value as Json;

use crate::loopdetect::{LoopConfig, LoopDetector};
use crate::prompter::{TtyPrompter, UserPrompter};

/// Maximum sub-workflow nesting.
pub const MAX_SUBFLOW_DEPTH: u32 = 8;

/// Knobs for one run, resolved by the caller (CLI flags over `ps.toml`
/// over defaults).
pub struct RunOptions {
    pub policy: Policy,
    pub budget: BudgetConfig,
    pub llm: LlmConfig,
    pub context_format: ContextFormat,
    pub halt_on_loop: bool,
    pub loop_config: LoopConfig,
    pub prompter: Option<Rc<dyn UserPrompter>>,
    /// Pre-bound globals, used by sub-workflow `opts.args` and the CLI.
    pub args: Vec<(String, Json)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            budget: BudgetConfig::default(),
            llm: LlmConfig::default(),
            context_format: ContextFormat::default(),
            halt_on_loop: false,
            loop_config: LoopConfig::default(),
            prompter: None,
            args: Vec::new(),
        }
    }
}

pub struct RunContext {
    pub project_root: PathBuf,
    pub registry: ToolRegistry,
    pub memory: Rc<RefCell<MemoryStore>>,
    pub logger: RunLogger,
    pub context_format: ContextFormat,
    pub default_llm: LlmConfig,
    pub prompter: Rc<dyn UserPrompter>,
    pub detector: LoopDetector,
    pub halt_on_loop: bool,
    pub loop_config: LoopConfig,
    pub depth: u32,
    policy_stack: Vec<Policy>,
}

impl RunContext {
    pub fn new(project_root: PathBuf, logger: RunLogger, options: &RunOptions) -> Self {
        Self {
            registry: ToolRegistry::new(&project_root),
            memory: Rc::new(RefCell::new(MemoryStore::new(&project_root))),
            logger,
            context_format: options.context_format,
            default_llm: options.llm.clone(),
            prompter: options
                .prompter
                .clone()
                .unwrap_or_else(|| Rc::new(TtyPrompter)),
            detector: LoopDetector::new(options.loop_config.clone()),
            halt_on_loop: options.halt_on_loop,
            loop_config: options.loop_config.clone(),
            depth: 0,
            policy_stack: vec![options.policy.clone()],
            project_root,
        }
    }

    /// Context for a sub-workflow: fresh logger, detector, and policy
    /// stack; shared prompter and (optionally) memory.
    pub fn child(
        &self,
        logger: RunLogger,
        policy: Policy,
        memory: Rc<RefCell<MemoryStore>>,
    ) -> Self {
        Self {
            project_root: self.project_root.clone(),
            registry: self.registry.clone(),
            memory,
            logger,
            context_format: self.context_format,
            default_llm: self.default_llm.clone(),
            prompter: self.prompter.clone(),
            detector: LoopDetector::new(self.loop_config.clone()),
            halt_on_loop: self.halt_on_loop,
            loop_config: self.loop_config.clone(),
            depth: self.depth + 1,
            policy_stack: vec![policy],
        }
    }

    /// The currently active policy (top of the `with policy` stack).
    pub fn policy(&self) -> &Policy {
        self.policy_stack.last().expect("policy stack never empty")
    }

    pub fn push_policy(&mut self, policy: Policy) {
        self.policy_stack.push(policy);
    }

    pub fn pop_policy(&mut self) {
        if self.policy_stack.len() > 1 {
            self.policy_stack.pop();
        }
    }
}
