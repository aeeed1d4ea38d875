//! Event/step scheduler: the cooperative, single-threaded tick loop
//! a host embeds to drive running FILLY programs.
//!
//! Opcodes nested inside `If`/`For`/`While`/`DoWhile`/`Switch` run to
//! completion within the tick that reaches them; only a `Wait` at the
//! top level of a sequence's own body suspends across ticks. Real
//! FILLY programs only ever emit `Wait` there (it comes from step
//! bodies, which sit directly in a `mes` handler or at the top of a
//! function), so this keeps the interpreter a plain recursive walk
//! instead of a resumable bytecode machine.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::HostError;
use crate::host::{HostEnvironment, RuntimeValue};
use crate::opcode::{OpKind, Opcode, ParamDesc, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Time,
    MidiTime,
    MidiEnd,
    Key,
    Click,
    RbDown,
    RbDblClick,
    User,
}

impl EventKind {
    pub fn canonical_name(self) -> &'static str {
        match self {
            EventKind::Time => "TIME",
            EventKind::MidiTime => "MIDI_TIME",
            EventKind::MidiEnd => "MIDI_END",
            EventKind::Key => "KEY",
            EventKind::Click => "CLICK",
            EventKind::RbDown => "RBDOWN",
            EventKind::RbDblClick => "RBDBLCLK",
            EventKind::User => "USER",
        }
    }

    /// `TIME`/`MIDI_TIME` sequences are long-lived and advance every
    /// matching tick; the rest fire once per dispatch and then run to
    /// natural termination.
    pub fn is_continuous(self) -> bool {
        matches!(self, EventKind::Time | EventKind::MidiTime)
    }
}

struct Sequence {
    id: u64,
    body: Rc<Vec<Opcode>>,
    ip: usize,
    locals: HashMap<String, RuntimeValue>,
    step_duration: i64,
    wait_remaining: i64,
    group: u32,
    finished: bool,
    /// `Some(Time)` or `Some(MidiTime)` for the long-lived sequence a
    /// continuous handler gets at registration; `None` for a one-shot
    /// sequence spawned by `dispatch_event`. `tick()` and `midi_tick()`
    /// each advance only their own clock's sequences.
    governing_clock: Option<EventKind>,
}

struct UserFunction {
    params: Vec<ParamDesc>,
    body: Rc<Vec<Opcode>>,
}

/// Outcome of running a span of opcodes: either it ran to completion,
/// or it exited early for a reason the caller must handle.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Option<RuntimeValue>),
    Wait(i64),
}

/// Mutable state threaded through one opcode-execution call: the
/// current call's local variables, the owning sequence's step
/// duration (mutated by `SetStep`), and its termination group.
struct RunContext<'a> {
    locals: &'a mut HashMap<String, RuntimeValue>,
    step_duration: &'a mut i64,
    group: u32,
}

pub struct Scheduler {
    globals: HashMap<String, RuntimeValue>,
    functions: HashMap<String, UserFunction>,
    handlers: HashMap<String, Vec<Rc<Vec<Opcode>>>>,
    sequences: Vec<Sequence>,
    host: HostEnvironment,
    next_group: u32,
    next_seq_id: u64,
    terminated: bool,
    tick_count: u64,
}

impl Scheduler {
    pub fn new(host: HostEnvironment) -> Self {
        Self {
            globals: HashMap::new(),
            functions: HashMap::new(),
            handlers: HashMap::new(),
            sequences: Vec::new(),
            host,
            next_group: 1,
            next_seq_id: 0,
            terminated: false,
            tick_count: 0,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn global(&self, name: &str) -> Option<&RuntimeValue> {
        self.globals.get(name)
    }

    pub fn live_sequence_count(&self) -> usize {
        self.sequences.iter().filter(|s| !s.finished).count()
    }

    /// Runs top-level opcodes once, at load time: global declarations
    /// and assignments populate `globals`, `DefineFunction` populates
    /// the function table, and `RegisterEventHandler` spawns the
    /// handler's first live sequence.
    pub fn load(&mut self, opcodes: &[Opcode]) -> Result<(), HostError> {
        let mut throwaway_locals = HashMap::new();
        let mut throwaway_step = 1;
        let mut ctx = RunContext {
            locals: &mut throwaway_locals,
            step_duration: &mut throwaway_step,
            group: 0,
        };
        // Top-level assignments write straight to `globals`, not to
        // the throwaway locals frame `exec_ops` would otherwise use.
        for op in opcodes {
            match op.cmd {
                OpKind::Assign => {
                    let (name, value) = self.eval_assign(op, ctx.locals)?;
                    self.globals.insert(name, value);
                }
                _ => {
                    self.exec_op(op, &mut ctx)?;
                }
            }
        }
        Ok(())
    }

    /// Advances the `TIME` clock by one tick: every live `TIME`-governed
    /// sequence either counts down a pending `Wait` or runs until its
    /// next one. `MIDI_TIME`-governed sequences are untouched; a host
    /// driving a MIDI clock calls `midi_tick()` for those instead.
    pub fn tick(&mut self) {
        if self.terminated {
            return;
        }
        self.tick_count += 1;
        tracing::trace!(tick = self.tick_count, live = self.live_sequence_count(), "tick");
        self.advance_clock(EventKind::Time);
    }

    /// Advances the `MIDI_TIME` clock by one MIDI clock tick (external
    /// to `tick()`'s wall-clock `TIME`): every live `MIDI_TIME`-governed
    /// sequence either counts down a pending `Wait` or runs until its
    /// next one. `TIME`-governed sequences are untouched.
    pub fn midi_tick(&mut self) {
        if self.terminated {
            return;
        }
        tracing::trace!(live = self.live_sequence_count(), "midi tick");
        self.advance_clock(EventKind::MidiTime);
    }

    /// Fires a one-shot event (`KEY`, `CLICK`, `USER`, ...): spawns a
    /// fresh sequence per handler registered for `event` (matched
    /// case-insensitively) and runs each to its first `Wait` or
    /// natural end. `TIME`/`MIDI_TIME` handlers don't go through this
    /// path; they get one long-lived sequence at `load()` time and
    /// advance every `tick()`/`midi_tick()` instead.
    pub fn dispatch_event(&mut self, event: &str, group: u32) {
        if self.terminated {
            return;
        }
        let canonical = event.to_ascii_uppercase();
        let Some(bodies) = self.handlers.get(&canonical).cloned() else {
            return;
        };
        for body in bodies {
            let id = self.spawn(body, group, None);
            self.advance_one(id);
        }
    }

    fn spawn(&mut self, body: Rc<Vec<Opcode>>, group: u32, governing_clock: Option<EventKind>) -> u64 {
        let id = self.next_seq_id;
        self.next_seq_id += 1;
        self.sequences.push(Sequence {
            id,
            body,
            ip: 0,
            locals: HashMap::new(),
            step_duration: 1,
            wait_remaining: 0,
            group,
            finished: false,
            governing_clock,
        });
        id
    }

    fn allocate_group(&mut self, requested: u32) -> u32 {
        if requested == 0 {
            let g = self.next_group;
            self.next_group += 1;
            g
        } else {
            requested
        }
    }

    fn advance_clock(&mut self, clock: EventKind) {
        let ids: Vec<u64> = self
            .sequences
            .iter()
            .filter(|s| !s.finished && s.governing_clock == Some(clock))
            .map(|s| s.id)
            .collect();
        for id in ids {
            self.advance_one(id);
        }
        self.sequences.retain(|s| !s.finished);
    }

    fn advance_one(&mut self, id: u64) {
        if self.terminated {
            return;
        }
        let Some(index) = self.sequences.iter().position(|s| s.id == id) else {
            return;
        };

        if self.sequences[index].wait_remaining > 0 {
            self.sequences[index].wait_remaining -= 1;
            return;
        }

        loop {
            if self.terminated || self.sequences[index].finished {
                return;
            }
            let ip = self.sequences[index].ip;
            let body = Rc::clone(&self.sequences[index].body);
            if ip >= body.len() {
                self.sequences[index].finished = true;
                return;
            }

            let op = body[ip].clone();
            let group = self.sequences[index].group;
            let mut locals = std::mem::take(&mut self.sequences[index].locals);
            let mut step_duration = self.sequences[index].step_duration;
            let flow = {
                let mut ctx = RunContext {
                    locals: &mut locals,
                    step_duration: &mut step_duration,
                    group,
                };
                self.exec_op(&op, &mut ctx)
            };
            self.sequences[index].locals = locals;
            self.sequences[index].step_duration = step_duration;

            match flow {
                Ok(Flow::Wait(k)) => {
                    self.sequences[index].wait_remaining = k * self.sequences[index].step_duration - 1;
                    self.sequences[index].ip += 1;
                    return;
                }
                Ok(Flow::Return(_)) => {
                    // `return`/`del_me`/`del_us` at sequence scope end
                    // this sequence's life rather than its call frame.
                    tracing::debug!(sequence = id, "sequence terminated (return/del_me/del_us)");
                    self.sequences[index].finished = true;
                    return;
                }
                Ok(_) => {
                    self.sequences[index].ip += 1;
                }
                Err(e) => {
                    // A runtime error terminates the current sequence
                    // only; other sequences and the scheduler continue.
                    tracing::debug!(sequence = id, error = %e, "sequence terminated by runtime error");
                    self.sequences[index].finished = true;
                    return;
                }
            }
        }
    }

    fn eval_assign(
        &self,
        op: &Opcode,
        locals: &HashMap<String, RuntimeValue>,
    ) -> Result<(String, RuntimeValue), HostError> {
        let name = match &op.args[0] {
            Value::VarRef(name) => name.clone(),
            other => return Err(HostError::TypeMismatch(format!("expected var ref, got {:?}", other))),
        };
        let value = self.eval_value(&op.args[1], locals)?;
        Ok((name, value))
    }

    fn read_var(&self, locals: &HashMap<String, RuntimeValue>, name: &str) -> RuntimeValue {
        locals
            .get(name)
            .or_else(|| self.globals.get(name))
            .cloned()
            .unwrap_or(RuntimeValue::Int(0))
    }

    fn write_var(&mut self, locals: &mut HashMap<String, RuntimeValue>, name: &str, value: RuntimeValue) {
        if locals.contains_key(name) {
            locals.insert(name.to_string(), value);
        } else {
            self.globals.insert(name.to_string(), value);
        }
    }

    fn eval_value(&self, value: &Value, locals: &HashMap<String, RuntimeValue>) -> Result<RuntimeValue, HostError> {
        match value {
            Value::Int(i) => Ok(RuntimeValue::Int(*i)),
            Value::Float(f) => Ok(RuntimeValue::Float(*f)),
            Value::Str(s) => Ok(RuntimeValue::Str(s.clone())),
            Value::VarRef(name) => Ok(self.read_var(locals, name)),
            Value::Op(op) => self.eval_expr_opcode(op, locals),
            // An array declaration's zero-value lowers to an empty
            // `Block` (see `Compiler::zero_value`); the only context
            // in which `Block` reaches `eval_value` directly, since
            // control-flow opcodes pattern-match their block arguments
            // themselves rather than routing them through here.
            Value::Block(b) if b.is_empty() => Ok(RuntimeValue::Array(Vec::new())),
            Value::Block(_) | Value::CaseTable(_) | Value::Params(_) => {
                Err(HostError::TypeMismatch("not a value-producing argument".to_string()))
            }
        }
    }

    fn eval_expr_opcode(&self, op: &Opcode, locals: &HashMap<String, RuntimeValue>) -> Result<RuntimeValue, HostError> {
        match op.cmd {
            OpKind::BinaryOp => {
                let op_str = match &op.args[0] {
                    Value::Str(s) => s.as_str(),
                    _ => return Err(HostError::TypeMismatch("malformed binary op".to_string())),
                };
                let left = self.eval_value(&op.args[1], locals)?;
                let right = self.eval_value(&op.args[2], locals)?;
                apply_binary(op_str, left, right)
            }
            OpKind::UnaryOp => {
                let op_str = match &op.args[0] {
                    Value::Str(s) => s.as_str(),
                    _ => return Err(HostError::TypeMismatch("malformed unary op".to_string())),
                };
                let operand = self.eval_value(&op.args[1], locals)?;
                apply_unary(op_str, operand)
            }
            OpKind::Call => {
                let name = match &op.args[0] {
                    Value::Str(s) => s.clone(),
                    _ => return Err(HostError::TypeMismatch("malformed call".to_string())),
                };
                let args: Vec<RuntimeValue> = op.args[1..]
                    .iter()
                    .map(|a| self.eval_value(a, locals))
                    .collect::<Result<_, _>>()?;
                self.call_function(&name, &args)
            }
            OpKind::ArrayAccess => {
                let name = match &op.args[0] {
                    Value::VarRef(n) => n.clone(),
                    _ => return Err(HostError::TypeMismatch("malformed array access".to_string())),
                };
                let index = self.eval_value(&op.args[1], locals)?.as_int()?;
                match self.read_var(locals, &name) {
                    RuntimeValue::Array(items) => items
                        .get(index as usize)
                        .cloned()
                        .ok_or(HostError::IndexOutOfRange { index, len: items.len() }),
                    other => Err(HostError::TypeMismatch(format!("'{}' is not an array ({:?})", name, other))),
                }
            }
            _ => Err(HostError::TypeMismatch(format!("{:?} does not produce a value", op.cmd))),
        }
    }

    /// Resolves `name` as a user-defined function first (running its
    /// body synchronously to completion), falling back to a host
    /// builtin.
    fn call_function(&self, name: &str, args: &[RuntimeValue]) -> Result<RuntimeValue, HostError> {
        if let Some(function) = self.functions.get(&name.to_ascii_lowercase()) {
            return self.invoke_user_function(function, args);
        }
        self.host.call(name, args)
    }

    fn invoke_user_function(&self, function: &UserFunction, args: &[RuntimeValue]) -> Result<RuntimeValue, HostError> {
        let mut locals = HashMap::new();
        for (i, param) in function.params.iter().enumerate() {
            let value = if let Some(arg) = args.get(i) {
                arg.clone()
            } else if let Some(default) = &param.default {
                self.eval_value(default, &locals)?
            } else {
                RuntimeValue::Int(0)
            };
            locals.insert(param.name.clone(), value);
        }

        // A user function runs with its own call frame; it cannot set
        // its caller's step duration or belong to a termination group.
        let mut step_duration = 1;
        let mut ctx = RunContext {
            locals: &mut locals,
            step_duration: &mut step_duration,
            group: 0,
        };

        // `exec_op`/`exec_ops` need `&mut self` to spawn sequences from
        // a nested `RegisterEventHandler`; evaluating a function body
        // from a `&self` context only needs read access, so this walk
        // is duplicated in miniature rather than threading mutability
        // through every expression evaluation path.
        match self.exec_ops_readonly(&function.body, &mut ctx)? {
            Flow::Return(Some(value)) => Ok(value),
            _ => Ok(RuntimeValue::Int(0)),
        }
    }

    /// Same control-flow walk as `exec_ops`, but for call frames that
    /// cannot register new event handlers (function bodies evaluated
    /// purely for their return value).
    fn exec_ops_readonly(&self, ops: &[Opcode], ctx: &mut RunContext) -> Result<Flow, HostError> {
        for op in ops {
            match self.exec_op_readonly(op, ctx)? {
                Flow::Normal => continue,
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_op_readonly(&self, op: &Opcode, ctx: &mut RunContext) -> Result<Flow, HostError> {
        match op.cmd {
            OpKind::Assign => {
                let (name, value) = self.eval_assign(op, ctx.locals)?;
                ctx.locals.insert(name, value);
                Ok(Flow::Normal)
            }
            OpKind::ArrayAssign => {
                let name = match &op.args[0] {
                    Value::VarRef(n) => n.clone(),
                    _ => return Err(HostError::TypeMismatch("malformed array assign".to_string())),
                };
                let index = self.eval_value(&op.args[1], ctx.locals)?.as_int()?;
                let value = self.eval_value(&op.args[2], ctx.locals)?;
                let mut items = match ctx.locals.get(&name) {
                    Some(RuntimeValue::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                let idx = index as usize;
                if idx >= items.len() {
                    items.resize(idx + 1, RuntimeValue::Int(0));
                }
                items[idx] = value;
                ctx.locals.insert(name, RuntimeValue::Array(items));
                Ok(Flow::Normal)
            }
            OpKind::Call | OpKind::BinaryOp | OpKind::UnaryOp | OpKind::ArrayAccess => {
                if op.cmd == OpKind::Call {
                    if let Value::Str(name) = &op.args[0] {
                        if name == "return" {
                            let value = match op.args.get(1) {
                                Some(v) => Some(self.eval_value(v, ctx.locals)?),
                                None => None,
                            };
                            return Ok(Flow::Return(value));
                        }
                    }
                }
                self.eval_expr_opcode(op, ctx.locals)?;
                Ok(Flow::Normal)
            }
            OpKind::If => {
                let cond = self.eval_value(&op.args[0], ctx.locals)?;
                let branch = if cond.is_truthy() { &op.args[1] } else { &op.args[2] };
                match branch {
                    Value::Block(body) => self.exec_ops_readonly(body, ctx),
                    _ => Ok(Flow::Normal),
                }
            }
            OpKind::For => {
                let (init, cond, post, body) = four_block_args(op)?;
                self.exec_ops_readonly(init, ctx)?;
                loop {
                    if !self.eval_value(cond, ctx.locals)?.is_truthy() {
                        break;
                    }
                    match self.exec_ops_readonly(body, ctx)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        other => return Ok(other),
                    }
                    self.exec_ops_readonly(post, ctx)?;
                }
                Ok(Flow::Normal)
            }
            OpKind::While => {
                let (cond, body) = two_args_cond_block(op)?;
                loop {
                    if !self.eval_value(cond, ctx.locals)?.is_truthy() {
                        break;
                    }
                    match self.exec_ops_readonly(body, ctx)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            OpKind::DoWhile => {
                let (cond, body) = two_args_cond_block(op)?;
                loop {
                    match self.exec_ops_readonly(body, ctx)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        other => return Ok(other),
                    }
                    if !self.eval_value(cond, ctx.locals)?.is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            OpKind::Switch => {
                let value = self.eval_value(&op.args[0], ctx.locals)?;
                let cases = match &op.args[1] {
                    Value::CaseTable(cases) => cases,
                    _ => return Err(HostError::TypeMismatch("malformed switch".to_string())),
                };
                let default = match &op.args[2] {
                    Value::Block(b) => b,
                    _ => return Err(HostError::TypeMismatch("malformed switch default".to_string())),
                };
                let start = cases.iter().position(|(case_value, _)| {
                    self.eval_value(case_value, ctx.locals).ok().as_ref() == Some(&value)
                });
                match start {
                    Some(start_idx) => {
                        for (_, body) in &cases[start_idx..] {
                            match self.exec_ops_readonly(body, ctx)? {
                                Flow::Break => return Ok(Flow::Normal),
                                Flow::Normal => continue,
                                other => return Ok(other),
                            }
                        }
                        self.exec_ops_readonly(default, ctx)
                    }
                    None => self.exec_ops_readonly(default, ctx),
                }
            }
            OpKind::Break => Ok(Flow::Break),
            OpKind::Continue => Ok(Flow::Continue),
            OpKind::SetStep => {
                if let Value::Int(n) = &op.args[0] {
                    *ctx.step_duration = *n;
                }
                Ok(Flow::Normal)
            }
            OpKind::Wait => {
                let k = match &op.args[0] {
                    Value::Int(n) => *n,
                    _ => 1,
                };
                Ok(Flow::Wait(k))
            }
            OpKind::RegisterEventHandler | OpKind::DefineFunction => {
                // Function bodies are evaluated for their return value
                // only; they cannot register new handlers or define
                // further functions.
                Ok(Flow::Normal)
            }
        }
    }

    /// Full control-flow walk used for sequence bodies (can register
    /// new event handlers).
    fn exec_ops(&mut self, ops: &[Opcode], ctx: &mut RunContext) -> Result<Flow, HostError> {
        for op in ops {
            if self.terminated {
                return Ok(Flow::Normal);
            }
            match self.exec_op(op, ctx)? {
                Flow::Normal => continue,
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_op(&mut self, op: &Opcode, ctx: &mut RunContext) -> Result<Flow, HostError> {
        if self.terminated {
            return Ok(Flow::Normal);
        }
        match op.cmd {
            OpKind::RegisterEventHandler => {
                let event = match &op.args[0] {
                    Value::Str(s) => s.clone(),
                    _ => return Err(HostError::TypeMismatch("malformed event handler".to_string())),
                };
                let body = match &op.args[1] {
                    Value::Block(b) => Rc::new(b.clone()),
                    _ => return Err(HostError::TypeMismatch("malformed event handler".to_string())),
                };
                tracing::debug!(event = %event, "registering event handler");
                self.handlers.entry(event.clone()).or_default().push(Rc::clone(&body));
                let clock = if event == EventKind::Time.canonical_name() {
                    Some(EventKind::Time)
                } else if event == EventKind::MidiTime.canonical_name() {
                    Some(EventKind::MidiTime)
                } else {
                    None
                };
                if let Some(clock) = clock {
                    let group = self.allocate_group(0);
                    self.spawn(body, group, Some(clock));
                }
                Ok(Flow::Normal)
            }
            OpKind::DefineFunction => {
                let name = match &op.args[0] {
                    Value::Str(s) => s.to_ascii_lowercase(),
                    _ => return Err(HostError::TypeMismatch("malformed function def".to_string())),
                };
                let params = match &op.args[1] {
                    Value::Params(p) => p.clone(),
                    _ => return Err(HostError::TypeMismatch("malformed param list".to_string())),
                };
                let body = match &op.args[2] {
                    Value::Block(b) => Rc::new(b.clone()),
                    _ => return Err(HostError::TypeMismatch("malformed function body".to_string())),
                };
                self.functions.insert(name, UserFunction { params, body });
                Ok(Flow::Normal)
            }
            OpKind::Call if matches!(&op.args[0], Value::Str(s) if s == "del_me") => {
                Ok(Flow::Return(None)) // caller marks the sequence finished via its own end-of-body path
            }
            OpKind::Call if matches!(&op.args[0], Value::Str(s) if s == "del_us") => {
                self.terminate_group(ctx.group);
                Ok(Flow::Return(None))
            }
            OpKind::Call if matches!(&op.args[0], Value::Str(s) if s == "del_all") => {
                tracing::debug!("del_all: terminating scheduler");
                self.terminated = true;
                Ok(Flow::Normal)
            }
            OpKind::Assign => {
                let (name, value) = self.eval_assign(op, ctx.locals)?;
                self.write_var(ctx.locals, &name, value);
                Ok(Flow::Normal)
            }
            OpKind::ArrayAssign => {
                let name = match &op.args[0] {
                    Value::VarRef(n) => n.clone(),
                    _ => return Err(HostError::TypeMismatch("malformed array assign".to_string())),
                };
                let index = self.eval_value(&op.args[1], ctx.locals)?.as_int()?;
                let value = self.eval_value(&op.args[2], ctx.locals)?;
                let mut items = match self.read_var(ctx.locals, &name) {
                    RuntimeValue::Array(items) => items,
                    _ => Vec::new(),
                };
                let idx = index as usize;
                if idx >= items.len() {
                    items.resize(idx + 1, RuntimeValue::Int(0));
                }
                items[idx] = value;
                self.write_var(ctx.locals, &name, RuntimeValue::Array(items));
                Ok(Flow::Normal)
            }
            OpKind::Call => {
                let name = match &op.args[0] {
                    Value::Str(s) => s.clone(),
                    _ => return Err(HostError::TypeMismatch("malformed call".to_string())),
                };
                if name == "return" {
                    let value = match op.args.get(1) {
                        Some(v) => Some(self.eval_value(v, ctx.locals)?),
                        None => None,
                    };
                    return Ok(Flow::Return(value));
                }
                let args: Vec<RuntimeValue> = op.args[1..]
                    .iter()
                    .map(|a| self.eval_value(a, ctx.locals))
                    .collect::<Result<_, _>>()?;
                self.call_function(&name, &args)?;
                Ok(Flow::Normal)
            }
            OpKind::BinaryOp | OpKind::UnaryOp | OpKind::ArrayAccess => {
                self.eval_expr_opcode(op, ctx.locals)?;
                Ok(Flow::Normal)
            }
            OpKind::If => {
                let cond = self.eval_value(&op.args[0], ctx.locals)?;
                let branch = if cond.is_truthy() { op.args[1].clone() } else { op.args[2].clone() };
                match branch {
                    Value::Block(body) => self.exec_ops(&body, ctx),
                    _ => Ok(Flow::Normal),
                }
            }
            OpKind::For => {
                let (init, cond, post, body) = four_block_args(op)?;
                let (init, cond, post, body) = (init.clone(), cond.clone(), post.clone(), body.clone());
                self.exec_ops(&init, ctx)?;
                loop {
                    if !self.eval_value(&cond, ctx.locals)?.is_truthy() {
                        break;
                    }
                    match self.exec_ops(&body, ctx)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        Flow::Wait(k) => return Ok(Flow::Wait(k)),
                        other => return Ok(other),
                    }
                    self.exec_ops(&post, ctx)?;
                }
                Ok(Flow::Normal)
            }
            OpKind::While => {
                let (cond, body) = two_args_cond_block(op)?;
                let (cond, body) = (cond.clone(), body.clone());
                loop {
                    if !self.eval_value(&cond, ctx.locals)?.is_truthy() {
                        break;
                    }
                    match self.exec_ops(&body, ctx)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        Flow::Wait(k) => return Ok(Flow::Wait(k)),
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            OpKind::DoWhile => {
                let (cond, body) = two_args_cond_block(op)?;
                let (cond, body) = (cond.clone(), body.clone());
                loop {
                    match self.exec_ops(&body, ctx)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        Flow::Wait(k) => return Ok(Flow::Wait(k)),
                        other => return Ok(other),
                    }
                    if !self.eval_value(&cond, ctx.locals)?.is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            OpKind::Switch => {
                let value = self.eval_value(&op.args[0], ctx.locals)?;
                let cases = match &op.args[1] {
                    Value::CaseTable(cases) => cases.clone(),
                    _ => return Err(HostError::TypeMismatch("malformed switch".to_string())),
                };
                let default = match &op.args[2] {
                    Value::Block(b) => b.clone(),
                    _ => return Err(HostError::TypeMismatch("malformed switch default".to_string())),
                };
                let start = cases
                    .iter()
                    .position(|(case_value, _)| self.eval_value(case_value, ctx.locals).ok().as_ref() == Some(&value));
                match start {
                    Some(start_idx) => {
                        for (_, body) in &cases[start_idx..] {
                            match self.exec_ops(body, ctx)? {
                                Flow::Break => return Ok(Flow::Normal),
                                Flow::Normal => continue,
                                other => return Ok(other),
                            }
                        }
                        self.exec_ops(&default, ctx)
                    }
                    None => self.exec_ops(&default, ctx),
                }
            }
            OpKind::Break => Ok(Flow::Break),
            OpKind::Continue => Ok(Flow::Continue),
            OpKind::SetStep => {
                if let Value::Int(n) = &op.args[0] {
                    *ctx.step_duration = *n;
                }
                Ok(Flow::Normal)
            }
            OpKind::Wait => {
                let k = match &op.args[0] {
                    Value::Int(n) => *n,
                    _ => 1,
                };
                Ok(Flow::Wait(k))
            }
        }
    }

    fn terminate_group(&mut self, group: u32) {
        for seq in &mut self.sequences {
            if seq.group == group {
                seq.finished = true;
            }
        }
    }
}

fn four_block_args(op: &Opcode) -> Result<(&Vec<Opcode>, &Value, &Vec<Opcode>, &Vec<Opcode>), HostError> {
    let init = match &op.args[0] {
        Value::Block(b) => b,
        _ => return Err(HostError::TypeMismatch("malformed for-init".to_string())),
    };
    let cond = &op.args[1];
    let post = match &op.args[2] {
        Value::Block(b) => b,
        _ => return Err(HostError::TypeMismatch("malformed for-post".to_string())),
    };
    let body = match &op.args[3] {
        Value::Block(b) => b,
        _ => return Err(HostError::TypeMismatch("malformed for-body".to_string())),
    };
    Ok((init, cond, post, body))
}

fn two_args_cond_block(op: &Opcode) -> Result<(&Value, &Vec<Opcode>), HostError> {
    let cond = &op.args[0];
    let body = match &op.args[1] {
        Value::Block(b) => b,
        _ => return Err(HostError::TypeMismatch("malformed loop body".to_string())),
    };
    Ok((cond, body))
}

fn apply_binary(op: &str, left: RuntimeValue, right: RuntimeValue) -> Result<RuntimeValue, HostError> {
    use RuntimeValue::*;

    if op == "+" {
        if let (Str(a), Str(b)) = (&left, &right) {
            return Ok(Str(format!("{}{}", a, b)));
        }
    }

    let comparison_ops = ["==", "!=", "<", ">", "<=", ">="];
    if comparison_ops.contains(&op) {
        return compare(op, &left, &right);
    }

    match (left, right) {
        (Int(a), Int(b)) => arithmetic_int(op, a, b),
        (Float(a), Float(b)) => Ok(Float(arithmetic_float(op, a, b))),
        (Int(a), Float(b)) => Ok(Float(arithmetic_float(op, a as f64, b))),
        (Float(a), Int(b)) => Ok(Float(arithmetic_float(op, a, b as f64))),
        (a, b) => Err(HostError::TypeMismatch(format!("cannot apply '{}' to {:?} and {:?}", op, a, b))),
    }
}

fn compare(op: &str, left: &RuntimeValue, right: &RuntimeValue) -> Result<RuntimeValue, HostError> {
    use RuntimeValue::*;

    let ordering = match (left, right) {
        (Str(a), Str(b)) => a.partial_cmp(b),
        (Int(a), Int(b)) => a.partial_cmp(b),
        (Float(a), Float(b)) => a.partial_cmp(b),
        (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
        (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
        _ => {
            return Err(HostError::TypeMismatch(format!(
                "cannot compare {:?} and {:?}",
                left, right
            )))
        }
    };

    let Some(ordering) = ordering else {
        return Err(HostError::TypeMismatch(format!("cannot compare {:?} and {:?}", left, right)));
    };

    let truth = match op {
        "==" => ordering.is_eq(),
        "!=" => !ordering.is_eq(),
        "<" => ordering.is_lt(),
        ">" => ordering.is_gt(),
        "<=" => ordering.is_le(),
        ">=" => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(RuntimeValue::Int(truth as i64))
}

fn arithmetic_int(op: &str, a: i64, b: i64) -> Result<RuntimeValue, HostError> {
    match op {
        "+" => Ok(RuntimeValue::Int(a.wrapping_add(b))),
        "-" => Ok(RuntimeValue::Int(a.wrapping_sub(b))),
        "*" => Ok(RuntimeValue::Int(a.wrapping_mul(b))),
        "/" => {
            if b == 0 {
                Err(HostError::DivisionByZero)
            } else {
                Ok(RuntimeValue::Int(a / b))
            }
        }
        "%" => {
            if b == 0 {
                Err(HostError::DivisionByZero)
            } else {
                Ok(RuntimeValue::Int(a % b))
            }
        }
        "&&" => Ok(RuntimeValue::Int(((a != 0) && (b != 0)) as i64)),
        "||" => Ok(RuntimeValue::Int(((a != 0) || (b != 0)) as i64)),
        other => Err(HostError::TypeMismatch(format!("unknown binary operator '{}'", other))),
    }
}

fn arithmetic_float(op: &str, a: f64, b: f64) -> f64 {
    match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        "%" => a % b,
        _ => f64::NAN,
    }
}

fn apply_unary(op: &str, operand: RuntimeValue) -> Result<RuntimeValue, HostError> {
    match (op, operand) {
        ("-", RuntimeValue::Int(i)) => Ok(RuntimeValue::Int(-i)),
        ("-", RuntimeValue::Float(f)) => Ok(RuntimeValue::Float(-f)),
        ("!", v) => Ok(RuntimeValue::Int(!v.is_truthy() as i64)),
        (op, v) => Err(HostError::TypeMismatch(format!("cannot apply unary '{}' to {:?}", op, v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::host::ReturnKind;
    use crate::lexer::tokenize_all;
    use crate::parser::parse;

    fn scheduler_for(src: &str) -> Scheduler {
        let (tokens, _) = tokenize_all(src);
        let (program, errors) = parse(&tokens);
        assert!(errors.is_empty(), "{:?}", errors);
        let (opcodes, compile_errors) = compile(&program);
        assert!(compile_errors.is_empty(), "{:?}", compile_errors);
        let mut scheduler = Scheduler::new(HostEnvironment::new());
        scheduler.load(&opcodes).unwrap();
        scheduler
    }

    #[test]
    fn global_assignment_is_visible_after_load() {
        let scheduler = scheduler_for("int x; x = 5;");
        assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(5)));
    }

    #[test]
    fn array_declaration_zero_initializes_to_an_empty_array() {
        let scheduler = scheduler_for("int a[5];");
        assert_eq!(scheduler.global("a"), Some(&RuntimeValue::Array(vec![])));
    }

    #[test]
    fn mes_registration_spawns_one_sequence() {
        let scheduler = scheduler_for("MES(time) { int x; }");
        assert_eq!(scheduler.live_sequence_count(), 1);
    }

    #[test]
    fn non_continuous_handler_only_spawns_on_dispatch() {
        let mut scheduler = scheduler_for("MES(click) { x = 1; }");
        assert_eq!(scheduler.live_sequence_count(), 0);
        scheduler.dispatch_event("click", 0);
        assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(1)));
    }

    #[test]
    fn tick_and_midi_tick_advance_independent_clocks() {
        let mut scheduler = scheduler_for("MES(time) { x = 1; } MES(midi_time) { y = 2; }");
        assert_eq!(scheduler.global("x"), None);
        assert_eq!(scheduler.global("y"), None);

        scheduler.tick();
        assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(1)));
        assert_eq!(scheduler.global("y"), None);

        scheduler.midi_tick();
        assert_eq!(scheduler.global("y"), Some(&RuntimeValue::Int(2)));
    }

    #[test]
    fn wait_suspends_for_step_duration_ticks() {
        let mut scheduler = scheduler_for("MES(time) { step(3) { x = 1;, } }");
        scheduler.tick(); // runs Assign, hits Wait(1) -> suspends for 3 ticks
        assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(1)));
        assert_eq!(scheduler.live_sequence_count(), 1);
        scheduler.tick();
        scheduler.tick();
        assert_eq!(scheduler.live_sequence_count(), 1);
        scheduler.tick(); // wait elapsed, sequence runs off the end of its body
        assert_eq!(scheduler.live_sequence_count(), 0);
    }

    #[test]
    fn del_me_terminates_only_the_current_sequence() {
        let mut scheduler = scheduler_for("MES(time) { del_me(); }");
        scheduler.tick();
        assert_eq!(scheduler.live_sequence_count(), 0);
    }

    #[test]
    fn del_all_sets_the_terminated_flag() {
        let mut scheduler = scheduler_for("MES(time) { del_all(); }");
        scheduler.tick();
        assert!(scheduler.is_terminated());
    }

    #[test]
    fn division_by_zero_terminates_only_that_sequence() {
        let mut scheduler = scheduler_for("MES(time) { x = 1 / 0; } MES(click) { y = 1; }");
        scheduler.tick();
        assert!(!scheduler.is_terminated());
    }

    #[test]
    fn user_function_runs_synchronously_with_default_params() {
        let mut scheduler = scheduler_for("add(a,b=10){ return a+b; } MES(time) { x = add(5); }");
        scheduler.tick();
        assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(15)));
    }

    #[test]
    fn unknown_callable_terminates_sequence_but_not_scheduler() {
        let mut scheduler = scheduler_for("MES(time) { NoSuchBuiltin(); }");
        scheduler.tick();
        assert_eq!(scheduler.live_sequence_count(), 0);
        assert!(!scheduler.is_terminated());
    }

    #[test]
    fn mixed_type_comparison_is_a_runtime_error_not_silent_coercion() {
        let result = apply_binary("==", RuntimeValue::Int(1), RuntimeValue::Str("1".into()));
        assert!(result.is_err());
    }

    #[test]
    fn string_returning_builtin_participates_in_concatenation() {
        let mut host = HostEnvironment::new();
        host.register_builtin("StrUp", ReturnKind::Str, |args| {
            Ok(RuntimeValue::Str(args[0].as_str().to_ascii_uppercase()))
        });
        let (tokens, _) = tokenize_all("MES(time) { s = StrUp(\"ab\"); }");
        let (program, _) = parse(&tokens);
        let (opcodes, _) = compile(&program);
        let mut scheduler = Scheduler::new(host);
        scheduler.load(&opcodes).unwrap();
        scheduler.tick();
        assert_eq!(scheduler.global("s"), Some(&RuntimeValue::Str("AB".to_string())));
    }
}
