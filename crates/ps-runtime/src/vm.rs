//! Statement and expression evaluation.
//!
//! Control flow is threaded through [`Flow`] rather than unwinding:
//! `return` and `break` are ordinary values the block executor inspects.
//! Every statement tick increments the step counter, checks budgets, and
//! emits a `stmt` event.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use ps_core::{Action, EventKind, Policy, PsError, PsResult};
use ps_lang::{AssignTarget, BinOp, Expr, ExprKind, Stmt, StmtKind};
use ps_llm::adapter::{LlmAdapter, LlmOutcome, LlmRequest};
use serde_json::{Value as Json, json};

use crate::context::RunContext;
use crate::value::{ClassDef, FunctionDef, Instance, LlmClientHandle, Value};

#[derive(Debug)]
pub enum Flow {
    Normal,
    Return(Value),
    Break,
}

pub struct Vm {
    pub ctx: RunContext,
    globals: HashMap<String, Value>,
    frames: Vec<HashMap<String, Value>>,
}

impl Vm {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            globals: HashMap::new(),
            frames: Vec::new(),
        }
    }

    pub fn bind_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// Execute a whole program. A top-level `return` becomes the script
    /// result (sub-workflows surface it to their parent).
    pub async fn run_program(&mut self, program: &[Stmt]) -> PsResult<Option<Value>> {
        match self.exec_block(program).await? {
            Flow::Return(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    pub(crate) fn exec_block<'a>(
        &'a mut self,
        stmts: &'a [Stmt],
    ) -> LocalBoxFuture<'a, PsResult<Flow>> {
        Box::pin(async move {
            for stmt in stmts {
                match self.exec_stmt(stmt).await? {
                    Flow::Normal => {}
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        })
    }

    async fn exec_stmt(&mut self, stmt: &Stmt) -> PsResult<Flow> {
        // Yield once per statement so `timeout` races stay responsive
        // even over compute-only blocks.
        tokio::task::yield_now().await;

        self.ctx.logger.budget_mut().add_step();
        self.ctx.logger.budget().check()?;
        self.ctx.logger.emit(EventKind::Stmt {
            node: stmt.kind.node_name().into(),
        });

        match &stmt.kind {
            StmtKind::Assign { target, value } => {
                let value = self.eval(value).await?;
                self.assign(target, value).await?;
                Ok(Flow::Normal)
            }
            StmtKind::ExprStmt(expr) => {
                self.eval(expr).await?;
                Ok(Flow::Normal)
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr).await?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                if self.eval(cond).await?.truthy() {
                    self.exec_block(then_body).await
                } else if !else_body.is_empty() {
                    self.exec_block(else_body).await
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond).await?.truthy() {
                    match self.exec_block(body).await? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For { var, iter, body } => {
                let items = match self.eval(iter).await? {
                    Value::Array(items) => items.borrow().clone(),
                    other => {
                        return Err(PsError::Runtime(format!(
                            "for expects an array, got {}",
                            other.type_name()
                        )));
                    }
                };
                for item in items {
                    self.assign_var(var, item);
                    match self.exec_block(body).await? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::FuncDef { name, params, body } => {
                let function = Value::Function(Rc::new(FunctionDef {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                }));
                self.assign_var(name, function);
                Ok(Flow::Normal)
            }
            StmtKind::ClassDef { name, body } => {
                let mut methods = HashMap::new();
                let mut init_body = Vec::new();
                for member in body {
                    match &member.kind {
                        StmtKind::FuncDef {
                            name: method_name,
                            params,
                            body: method_body,
                        } => {
                            methods.insert(
                                method_name.clone(),
                                Rc::new(FunctionDef {
                                    name: format!("{name}.{method_name}"),
                                    params: params.clone(),
                                    body: method_body.clone(),
                                }),
                            );
                        }
                        _ => init_body.push(member.clone()),
                    }
                }
                let class = Value::Class(Rc::new(ClassDef {
                    name: name.clone(),
                    methods,
                    init_body,
                }));
                self.assign_var(name, class);
                Ok(Flow::Normal)
            }
            StmtKind::WithPolicy { policy, body } => {
                let overlay = self.eval(policy).await?.to_json()?;
                let scoped = apply_policy_overlay(self.ctx.policy().clone(), &overlay)?;
                self.ctx.push_policy(scoped);
                let result = self.exec_block(body).await;
                // Restore on every exit path: success, error, return, break.
                self.ctx.pop_policy();
                result
            }
            StmtKind::Retry {
                attempts,
                backoff_ms,
                body,
            } => {
                let attempts = self.eval_int(attempts, "retry attempts").await?.max(1);
                let backoff = self.eval_int(backoff_ms, "retry backoff").await? as u64;
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    match self.exec_block(body).await {
                        Ok(flow) => return Ok(flow),
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(err) => {
                            if attempt >= attempts {
                                return Err(err);
                            }
                            tracing::debug!(attempt, error = %err, "retry block failed, backing off");
                            tokio::time::sleep(Duration::from_millis(backoff)).await;
                        }
                    }
                }
            }
            StmtKind::Timeout { ms, body } => {
                let ms = self.eval_int(ms, "timeout").await? as u64;
                tokio::select! {
                    result = self.exec_block(body) => result,
                    () = tokio::time::sleep(Duration::from_millis(ms)) => {
                        Err(PsError::Timeout(format!("operation exceeded {ms}ms")))
                    }
                }
            }
            StmtKind::Guard(cond) => {
                if self.eval(cond).await?.truthy() {
                    Ok(Flow::Normal)
                } else {
                    Err(PsError::Guard(cond.to_string()))
                }
            }
        }
    }

    async fn eval_int(&mut self, expr: &Expr, what: &str) -> PsResult<i64> {
        match self.eval(expr).await? {
            Value::Int(n) => Ok(n),
            other => Err(PsError::Runtime(format!(
                "{what} must be an integer, got {}",
                other.type_name()
            ))),
        }
    }

    async fn assign(&mut self, target: &AssignTarget, value: Value) -> PsResult<()> {
        match target {
            AssignTarget::Var(name) => {
                self.assign_var(name, value);
                Ok(())
            }
            AssignTarget::Member { object, field } => {
                let object = self.eval(object).await?;
                object.set_member(field, value)
            }
            AssignTarget::Index { object, index } => {
                let object = self.eval(object).await?;
                let index = self.eval(index).await?;
                match (&object, &index) {
                    (Value::Array(items), Value::Int(position)) => {
                        let mut items = items.borrow_mut();
                        let position = *position;
                        if position < 0 || position as usize >= items.len() {
                            return Err(PsError::Runtime(format!(
                                "index {position} out of range for array of {}",
                                items.len()
                            )));
                        }
                        items[position as usize] = value;
                        Ok(())
                    }
                    (Value::Object(_) | Value::Instance(_), Value::Str(key)) => {
                        object.set_member(key, value)
                    }
                    _ => Err(PsError::Runtime(format!(
                        "cannot index-assign {} with {}",
                        object.type_name(),
                        index.type_name()
                    ))),
                }
            }
        }
    }

    /// Writes go to the innermost frame when one exists, otherwise to
    /// globals. Functions close over globals only.
    fn assign_var(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        } else {
            self.globals.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(frame) = self.frames.last()
            && let Some(value) = frame.get(name)
        {
            return Some(value.clone());
        }
        self.globals.get(name).cloned()
    }

    // -- expressions --------------------------------------------------------

    pub(crate) fn eval<'a>(&'a mut self, expr: &'a Expr) -> LocalBoxFuture<'a, PsResult<Value>> {
        Box::pin(self.eval_inner(expr))
    }

    async fn eval_inner(&mut self, expr: &Expr) -> PsResult<Value> {
        match &expr.kind {
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(n) => Ok(Value::Int(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Var(name) => self.lookup(name).ok_or_else(|| {
                PsError::Runtime(format!("undefined variable '{name}' at line {}", expr.line))
            }),
            ExprKind::Object(fields) => {
                let mut out = Vec::with_capacity(fields.len());
                for (key, value_expr) in fields {
                    out.push((key.clone(), self.eval(value_expr).await?));
                }
                Ok(Value::object(out))
            }
            ExprKind::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item).await?);
                }
                Ok(Value::array(out))
            }
            ExprKind::Not(inner) => Ok(Value::Bool(!self.eval(inner).await?.truthy())),
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs).await,
            ExprKind::Member { object, field } => Ok(self.eval(object).await?.get_member(field)),
            ExprKind::Index { object, index } => {
                let object = self.eval(object).await?;
                let index = self.eval(index).await?;
                Ok(index_value(&object, &index))
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, expr.line).await,
        }
    }

    async fn eval_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> PsResult<Value> {
        // Short-circuit forms first.
        match op {
            BinOp::And => {
                let left = self.eval(lhs).await?;
                if !left.truthy() {
                    return Ok(left);
                }
                return self.eval(rhs).await;
            }
            BinOp::Or => {
                let left = self.eval(lhs).await?;
                if left.truthy() {
                    return Ok(left);
                }
                return self.eval(rhs).await;
            }
            _ => {}
        }

        let left = self.eval(lhs).await?;
        let right = self.eval(rhs).await?;
        match op {
            BinOp::Add => add_values(&left, &right),
            BinOp::Eq => Ok(Value::Bool(left.deep_eq(&right))),
            BinOp::Ne => Ok(Value::Bool(!left.deep_eq(&right))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare_values(op, &left, &right),
            BinOp::In => contains_value(&left, &right),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    async fn eval_call(&mut self, callee: &Expr, args: &[Expr], line: usize) -> PsResult<Value> {
        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push(self.eval(arg).await?);
        }

        match &callee.kind {
            // Built-ins resolve first; user definitions are the fallback.
            ExprKind::Var(name) => {
                if crate::builtins::is_builtin(name) {
                    return self.call_builtin(name, evaluated).await;
                }
                let value = self.lookup(name).ok_or_else(|| {
                    PsError::Runtime(format!("undefined function '{name}' at line {line}"))
                })?;
                self.call_value(value, evaluated, name).await
            }
            ExprKind::Member { object, field } => {
                let receiver = self.eval(object).await?;
                self.call_method(receiver, field, evaluated, line).await
            }
            _ => {
                let value = self.eval(callee).await?;
                self.call_value(value, evaluated, "<expression>").await
            }
        }
    }

    pub(crate) async fn call_value(
        &mut self,
        value: Value,
        args: Vec<Value>,
        name: &str,
    ) -> PsResult<Value> {
        match value {
            Value::Function(def) => self.call_function(&def, args, None).await,
            Value::Class(class) => self.construct(&class, args).await,
            Value::LlmClient(handle) => self.call_client(&handle, args).await,
            other => Err(PsError::Runtime(format!(
                "'{name}' is not callable (it is {})",
                other.type_name()
            ))),
        }
    }

    async fn call_method(
        &mut self,
        receiver: Value,
        method: &str,
        args: Vec<Value>,
        line: usize,
    ) -> PsResult<Value> {
        match &receiver {
            Value::Instance(instance) => {
                if let Some(def) = instance.class.methods.get(method).cloned() {
                    return self.call_function(&def, args, Some(receiver.clone())).await;
                }
                let field = receiver.get_member(method);
                if !matches!(field, Value::Null) {
                    return self.call_value(field, args, method).await;
                }
                Err(PsError::Runtime(format!(
                    "no method '{method}' on {} instance at line {line}",
                    instance.class.name
                )))
            }
            Value::Object(_) => {
                let field = receiver.get_member(method);
                self.call_value(field, args, method).await
            }
            other => Err(PsError::Runtime(format!(
                "cannot call '{method}' on {} at line {line}",
                other.type_name()
            ))),
        }
    }

    pub(crate) async fn call_function(
        &mut self,
        def: &Rc<FunctionDef>,
        args: Vec<Value>,
        self_value: Option<Value>,
    ) -> PsResult<Value> {
        let mut locals = HashMap::new();
        let mut params = def.params.as_slice();
        if let Some(receiver) = self_value {
            if params.first().map(String::as_str) == Some("self") {
                params = &params[1..];
            }
            locals.insert("self".to_string(), receiver);
        }
        if params.len() != args.len() {
            return Err(PsError::Runtime(format!(
                "function '{}' expects {} argument(s), got {}",
                def.name,
                params.len(),
                args.len()
            )));
        }
        for (param, arg) in params.iter().zip(args) {
            locals.insert(param.clone(), arg);
        }

        self.frames.push(locals);
        let result = self.exec_block(&def.body).await;
        self.frames.pop();

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }

    async fn construct(&mut self, class: &Rc<ClassDef>, args: Vec<Value>) -> PsResult<Value> {
        let instance = Value::Instance(Rc::new(Instance {
            class: class.clone(),
            fields: Rc::new(std::cell::RefCell::new(Vec::new())),
        }));

        if !class.init_body.is_empty() {
            let mut locals = HashMap::new();
            locals.insert("self".to_string(), instance.clone());
            self.frames.push(locals);
            let result = self.exec_block(&class.init_body).await;
            self.frames.pop();
            result?;
        }

        if let Some(init) = class.methods.get("init").cloned() {
            self.call_function(&init, args, Some(instance.clone())).await?;
        } else if !args.is_empty() {
            return Err(PsError::Runtime(format!(
                "class '{}' has no init method but was given {} argument(s)",
                class.name,
                args.len()
            )));
        }
        Ok(instance)
    }

    async fn call_client(
        &mut self,
        handle: &Rc<LlmClientHandle>,
        args: Vec<Value>,
    ) -> PsResult<Value> {
        let mut args = args.into_iter();
        let prompt = match args.next() {
            Some(Value::Str(prompt)) => prompt,
            _ => {
                return Err(PsError::Runtime(
                    "an LLM client takes a prompt string".into(),
                ));
            }
        };
        let options = args.next().map(|opts| opts.to_json()).transpose()?;

        let mut request = LlmRequest::user_prompt(prompt);
        if let Some(options) = &options {
            if let Some(system) = options.get("system").and_then(Json::as_str) {
                request.system = Some(system.to_string());
            }
            if let Some(context) = options.get("context") {
                request.context = Some(context.clone());
            }
            if let Some(memory_key) = options.get("memory_key").and_then(Json::as_str) {
                request.memory_context = self.ctx.memory.borrow().memory_context(memory_key);
            }
        }

        let outcome = self.llm_call(&handle.adapter, &request).await?;
        Ok(Value::from_json(&outcome.plan.to_json()))
    }

    // -- the tool funnel ----------------------------------------------------

    /// Every tool dispatch goes through here: budget, policy, approval,
    /// execution, `tool` event.
    pub(crate) async fn run_tool_action(&mut self, action: &Action) -> PsResult<Json> {
        self.ctx.logger.budget_mut().add_tool_call();
        self.ctx.logger.budget().check()?;

        let policy = self.ctx.policy().clone();
        if !policy.allows_tool(action.name()) {
            return Err(PsError::Policy(format!(
                "tool '{}' is not in allowTools",
                action.name()
            )));
        }

        if policy.require_approval {
            let summary = format!("{} {}", action.name(), action.args_json());
            self.ctx.logger.emit(EventKind::ApprovalRequest {
                action: action.name().into(),
                summary: summary.clone(),
            });
            let approved = self.ctx.prompter.confirm(&summary)?;
            self.ctx
                .logger
                .emit(EventKind::ApprovalResponse { approved });
            if !approved {
                return Err(PsError::Policy(format!(
                    "approval denied for {}",
                    action.name()
                )));
            }
        }

        let output = match action {
            Action::Report { message, .. } => {
                println!("[ps] REPORT: {message}");
                Json::String(message.clone())
            }
            Action::AskUser { question, choices } => {
                let choices = choices.clone().unwrap_or_default();
                let answer = self.ctx.prompter.ask(question, &choices)?;
                Json::String(answer)
            }
            other => self.ctx.registry.execute(other, &policy).await?,
        };

        self.ctx.logger.emit(EventKind::Tool {
            name: action.name().into(),
            input: action.args_json(),
            output: output.clone(),
        });
        Ok(output)
    }

    /// One adapter call with budget gating and an `llm` event.
    pub(crate) async fn llm_call(
        &mut self,
        adapter: &LlmAdapter,
        request: &LlmRequest,
    ) -> PsResult<LlmOutcome> {
        self.ctx.logger.budget_mut().begin_llm_call();
        self.ctx.logger.budget().check()?;

        let outcome = adapter.complete(request, self.ctx.context_format).await?;

        self.ctx
            .logger
            .budget_mut()
            .record_llm_usage(&adapter.config().model, outcome.usage);
        self.ctx.logger.budget().check()?;

        self.ctx.logger.emit(EventKind::Llm {
            input: json!({
                "user": request.user,
                "system": request.system,
                "history": request.history.len(),
                "memory": request.memory_context.is_some(),
            }),
            plan: outcome.plan.clone(),
            usage: outcome.usage,
            latency_ms: outcome.latency_ms,
            retries: outcome.retries,
        });
        Ok(outcome)
    }
}

// -- operator helpers -------------------------------------------------------

fn add_values(left: &Value, right: &Value) -> PsResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        (Value::Str(a), _) => Ok(Value::Str(format!("{a}{right}"))),
        (_, Value::Str(b)) => Ok(Value::Str(format!("{left}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.borrow().clone();
            out.extend(b.borrow().iter().cloned());
            Ok(Value::array(out))
        }
        _ => Err(PsError::Runtime(format!(
            "cannot add {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn compare_values(op: BinOp, left: &Value, right: &Value) -> PsResult<Value> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        _ => {
            return Err(PsError::Runtime(format!(
                "cannot compare {} and {} with {}",
                left.type_name(),
                right.type_name(),
                op.symbol()
            )));
        }
    };
    let result = match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Ge => ordering.is_ge(),
        _ => unreachable!("non-comparison op"),
    };
    Ok(Value::Bool(result))
}

fn contains_value(needle: &Value, haystack: &Value) -> PsResult<Value> {
    let found = match (needle, haystack) {
        (Value::Str(sub), Value::Str(text)) => text.contains(sub.as_str()),
        (_, Value::Array(items)) => items.borrow().iter().any(|item| item.deep_eq(needle)),
        (Value::Str(key), Value::Object(fields)) => {
            fields.borrow().iter().any(|(name, _)| name == key)
        }
        (Value::Str(key), Value::Instance(instance)) => instance
            .fields
            .borrow()
            .iter()
            .any(|(name, _)| name == key),
        _ => {
            return Err(PsError::Runtime(format!(
                "cannot test {} in {}",
                needle.type_name(),
                haystack.type_name()
            )));
        }
    };
    Ok(Value::Bool(found))
}

fn index_value(object: &Value, index: &Value) -> Value {
    match (object, index) {
        (Value::Array(items), Value::Int(position)) => {
            let items = items.borrow();
            if *position >= 0 {
                items.get(*position as usize).cloned().unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        }
        (Value::Str(text), Value::Int(position)) => {
            if *position >= 0 {
                text.chars()
                    .nth(*position as usize)
                    .map(|ch| Value::Str(ch.to_string()))
                    .unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        }
        (Value::Object(_) | Value::Instance(_), Value::Str(key)) => object.get_member(key),
        _ => Value::Null,
    }
}

/// Overlay a `with policy { ... }` object onto the active policy.
/// `allowActions` (or `allowTools`) replaces the tool allowlist.
pub(crate) fn apply_policy_overlay(mut policy: Policy, overlay: &Json) -> PsResult<Policy> {
    let Some(map) = overlay.as_object() else {
        return Err(PsError::Schema("with policy expects an object".into()));
    };
    for (key, value) in map {
        match key.as_str() {
            "allowActions" | "allowTools" => {
                policy.allow_tools = string_set(value, key)?;
            }
            "allowCommands" => {
                policy.allow_commands = string_set(value, key)?;
            }
            "requireApproval" => {
                policy.require_approval = value.as_bool().ok_or_else(|| {
                    PsError::Schema("requireApproval must be a boolean".into())
                })?;
            }
            "maxFileBytes" => {
                policy.max_file_bytes = value
                    .as_u64()
                    .ok_or_else(|| PsError::Schema("maxFileBytes must be a positive integer".into()))?;
            }
            other => {
                return Err(PsError::Schema(format!(
                    "unknown policy key '{other}'"
                )));
            }
        }
    }
    Ok(policy)
}

fn string_set(value: &Json, key: &str) -> PsResult<std::collections::BTreeSet<String>> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(ToString::to_string)
                        .ok_or_else(|| PsError::Schema(format!("{key} must be a string array")))
                })
                .collect()
        })
        .unwrap_or_else(|| Err(PsError::Schema(format!("{key} must be a string array"))))
}
