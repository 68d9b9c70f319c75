//! In-crate test harness: a VM over a temp project root with the run
//! directory alongside.

use std::path::Path;

use ps_core::PsResult;
use ps_session::RunLogger;
use serde_json::Value as Json;

use crate::context::{RunContext, RunOptions};
use crate::value::Value;
use crate::vm::Vm;

pub(crate) struct Harness {
    pub dir: tempfile::TempDir,
    pub vm: Vm,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(RunOptions::default())
    }

    pub fn with_options(options: RunOptions) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = RunLogger::new(dir.path(), options.budget).expect("run logger");
        let ctx = RunContext::new(dir.path().to_path_buf(), logger, &options);
        let mut vm = Vm::new(ctx);
        for (name, json) in &options.args {
            vm.bind_global(name.clone(), Value::from_json(json));
        }
        Self { dir, vm }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub async fn exec(&mut self, source: &str) -> PsResult<Option<Value>> {
        let program = ps_lang::parse_source(source)?;
        self.vm.run_program(&program).await
    }

    pub fn global(&self, name: &str) -> Value {
        self.vm
            .get_global(name)
            .unwrap_or_else(|| panic!("global '{name}' not set"))
    }

    pub fn events(&self) -> Vec<Json> {
        let path = self.vm.ctx.logger.dir().join("events.jsonl");
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).expect("valid event line"))
            .collect()
    }

    pub fn events_of(&self, event_type: &str) -> Vec<Json> {
        self.events()
            .into_iter()
            .filter(|event| event["type"] == event_type)
            .collect()
    }
}
