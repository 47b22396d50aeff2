//! The stack-based bytecode interpreter (C8, spec §4.8): the
//! fetch-decode-execute loop over a loaded module's bytecode, driving the
//! shared operand stack, the call-frame stack, and the heap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use helium_asm::{Instruction, Opcode, PanicReason};

use crate::config::VmConfig;
use crate::error::{InterpreterError, RegistryError, RuntimeError};
use crate::frame::CallFrame;
use crate::object::{self, builtin_types, Field, Method};
use crate::registry::{ModuleRegistry, Runtime};
use crate::value::{ObjectRef, Value};

/// What one dispatched instruction did to control flow. Everything except
/// a return just falls through to the next instruction; jumps mutate the
/// current frame's `ip` directly and report `Continue` like any other op.
enum Step {
    Continue,
    Returned(Option<Value>),
}

/// One execution of the Helium VM: the operand stack shared by every
/// frame, the call-frame stack, and a host-settable halt flag (spec §9:
/// "the operand stack is shared across frames, not duplicated per call";
/// spec §5: cooperative, host-driven cancellation between instructions).
pub struct Interpreter<'rt> {
    runtime: &'rt mut Runtime,
    config: VmConfig,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    halt: Arc<AtomicBool>,
}

impl<'rt> Interpreter<'rt> {
    pub fn new(runtime: &'rt mut Runtime, config: VmConfig) -> Self {
        Self {
            runtime,
            config,
            stack: Vec::new(),
            frames: Vec::new(),
            halt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle the host embedder can flip between instructions to
    /// request cooperative cancellation (spec §5).
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    /// Depth of the shared operand stack, mostly useful to tests asserting
    /// the invariants of spec §8.
    pub fn operand_stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Run the module's declared entry point with no arguments.
    pub fn run_entry(&mut self) -> Result<Option<Value>, InterpreterError> {
        let (_, method_id) = self.runtime.registry.entry_point().ok_or_else(|| InterpreterError {
            method_id: 0,
            ip: 0,
            source: RuntimeError::Registry(RegistryError::NoEntryPoint),
        })?;
        self.run(method_id, Vec::new())
    }

    /// Invoke `method_id` with `args` already in calling-convention order
    /// and run to completion, returning its `RETURN_VALUE` payload (`None`
    /// for a plain `RETURN`).
    pub fn run(&mut self, method_id: u32, args: Vec<Value>) -> Result<Option<Value>, InterpreterError> {
        let method = match self.runtime.registry.find_method_by_id(method_id) {
            Ok(m) => m.clone(),
            Err(e) => return Err(self.fault(method_id, 0, e.into())),
        };
        if let Err(e) = self.push_call(&method, None, args) {
            return Err(self.fault(method_id, 0, e));
        }
        let base_depth = self.frames.len() - 1;
        self.run_until(base_depth)
    }

    fn fault(&self, method_id: u32, ip: u32, source: RuntimeError) -> InterpreterError {
        InterpreterError { method_id, ip, source }
    }

    fn current_location(&self) -> (u32, u32) {
        match self.frames.last() {
            Some(frame) => (frame.method_id, frame.ip),
            None => (0, 0),
        }
    }

    /// The fetch-decode-execute loop. Runs until the frame stack unwinds
    /// back to `base_depth`, i.e. the method `run` pushed has returned.
    fn run_until(&mut self, base_depth: usize) -> Result<Option<Value>, InterpreterError> {
        loop {
            if self.halt.load(Ordering::Relaxed) {
                let (method_id, ip) = self.current_location();
                self.frames.truncate(base_depth);
                return Err(self.fault(method_id, ip, RuntimeError::Panic(PanicReason::Interrupted)));
            }

            let method_id = self.current_frame().method_id;
            let ip = self.current_frame().ip;

            let method = match self.runtime.registry.find_method_by_id(method_id) {
                Ok(m) => m.clone(),
                Err(e) => return Err(self.fault(method_id, ip, e.into())),
            };

            let decoded = {
                let bytecode = self.runtime.registry.method_bytecode(&method);
                if ip as usize >= bytecode.len() {
                    None
                } else {
                    Some(Instruction::decode(bytecode, ip as usize))
                }
            };
            let (instr, next_ip) = match decoded {
                None => return Err(self.fault(method_id, ip, RuntimeError::Panic(PanicReason::EndOfBytecode))),
                Some(Ok(pair)) => pair,
                Some(Err(e)) => return Err(self.fault(method_id, ip, RuntimeError::Decode(e))),
            };
            self.current_frame_mut().ip = next_ip as u32;

            match self.execute(instr, &method) {
                Ok(Step::Continue) => {}
                Ok(Step::Returned(value)) => {
                    self.frames.pop();
                    if self.frames.len() == base_depth {
                        return Ok(value);
                    }
                }
                Err(e) => {
                    self.frames.truncate(base_depth);
                    return Err(self.fault(method_id, ip, e));
                }
            }
        }
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("run_until always has an active frame")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("run_until always has an active frame")
    }

    fn push_operand(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.config.max_stack_entries {
            return Err(RuntimeError::Panic(PanicReason::StackOverflow));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop_operand(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::Panic(PanicReason::StackUnderflow))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        if self.stack.len() < n {
            return Err(RuntimeError::Panic(PanicReason::StackUnderflow));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    fn local(&self, slot: u32) -> Result<Value, RuntimeError> {
        self.current_frame()
            .locals
            .get(slot as usize)
            .copied()
            .ok_or(RuntimeError::Panic(PanicReason::InvalidOpcode))
    }

    fn set_local(&mut self, slot: u32, value: Value) -> Result<(), RuntimeError> {
        match self.current_frame_mut().locals.get_mut(slot as usize) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(RuntimeError::Panic(PanicReason::InvalidOpcode)),
        }
    }

    /// Every object reachable from a GC root: the shared operand stack,
    /// every live frame's locals and receiver, and every static field
    /// across all loaded classes (spec §4.7's root set).
    fn gather_roots(&self) -> Vec<ObjectRef> {
        let mut roots: Vec<ObjectRef> = self.stack.iter().filter_map(Value::as_object).collect();
        for frame in &self.frames {
            roots.extend(frame.locals.iter().filter_map(Value::as_object));
            if let Some(this) = frame.this {
                roots.push(this);
            }
        }
        roots.extend(self.runtime.static_field_roots());
        roots
    }

    /// A young collection once the heap crosses its watermark (spec §4.7:
    /// "exceeding `young_threshold` triggers a young collection").
    fn maybe_collect(&mut self) {
        if self.runtime.heap.should_collect() {
            let roots = self.gather_roots();
            self.runtime.heap.collect_young(&roots);
        }
    }

    fn push_call(&mut self, method: &Method, this: Option<ObjectRef>, args: Vec<Value>) -> Result<(), RuntimeError> {
        if args.len() != method.param_count() {
            return Err(RuntimeError::Panic(PanicReason::TypeMismatch));
        }
        if self.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeError::Panic(PanicReason::StackOverflow));
        }
        self.frames.push(CallFrame::new(method.method_id, method.module_id, method.local_count, this, args));
        Ok(())
    }

    /// Resolve a field by name starting at `start_type_id` and walking up
    /// the superclass chain. Used for both instance fields (receiver's
    /// runtime type) and static fields (the executing method's own type).
    fn resolve_field_in_chain(&self, start_type_id: u32, name: &str) -> Result<Field, RuntimeError> {
        let mut current = Some(start_type_id);
        while let Some(type_id) = current {
            if let Ok(field) = self.runtime.registry.find_field_in_type(type_id, name) {
                return Ok(field.clone());
            }
            current = self.runtime.registry.class(type_id).and_then(|c| c.super_type_id);
        }
        let owner = self
            .runtime
            .registry
            .class(start_type_id)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        Err(RuntimeError::Registry(RegistryError::FieldNotFoundInType {
            owner,
            name: name.to_string(),
        }))
    }

    fn value_type_id(&self, value: Value) -> u32 {
        match value {
            Value::I64(_) => builtin_types::INTEGER,
            Value::F64(_) => builtin_types::FLOAT,
            Value::Bool(_) => builtin_types::BOOLEAN,
            Value::StringRef(_) => builtin_types::STRING,
            Value::Null => builtin_types::VOID,
            Value::Object(obj) => self.runtime.heap.type_id_of(obj).unwrap_or(builtin_types::OBJECT),
        }
    }

    /// `Sys::println` is the one intrinsic a module ever calls (spec §4.4:
    /// the implicit `Sys` class); every other intrinsic flag is currently
    /// unreachable since the linker only ever prepends `Sys`.
    fn invoke_intrinsic(&mut self, method: &Method) -> Result<(), RuntimeError> {
        let args = self.pop_n(method.param_count())?;
        if method.name == "println" {
            let text = args.first().map(Value::to_string).unwrap_or_default();
            println!("{text}");
            return Ok(());
        }
        Err(RuntimeError::Panic(PanicReason::UnresolvedMethod))
    }

    /// `CALLV`/`CALLI` (spec §4.6): the receiver is on top of the operand
    /// stack (pushed last, after its arguments), so it can be popped and
    /// its runtime type resolved before the argument count -- which
    /// depends on the resolved method -- is even known. `CALLI` first
    /// confirms some implemented interface along the chain actually
    /// declares the method, then dispatches exactly like `CALLV` against
    /// the concrete override.
    fn dispatch_virtual(&mut self, module_id: u32, name_id: u32, is_interface: bool) -> Result<Step, RuntimeError> {
        let name = self
            .runtime
            .registry
            .string_of(module_id, name_id)
            .map(str::to_string)
            .ok_or(RuntimeError::Panic(PanicReason::UnresolvedMethod))?;
        let receiver = self.pop_operand()?;
        let obj = receiver.as_object().ok_or(RuntimeError::Panic(PanicReason::NullDereference))?;
        let type_id = self
            .runtime
            .heap
            .type_id_of(obj)
            .ok_or(RuntimeError::Panic(PanicReason::NullDereference))?;
        if is_interface && !interface_declares(&self.runtime.registry, type_id, &name) {
            return Err(RuntimeError::Panic(PanicReason::UnresolvedMethod));
        }
        let method = object::find_virtual_method(&self.runtime.registry, type_id, &name)
            .ok_or(RuntimeError::Panic(PanicReason::UnresolvedMethod))?
            .clone();
        let args = self.pop_n(method.param_count())?;
        self.push_call(&method, Some(obj), args)?;
        Ok(Step::Continue)
    }

    fn execute(&mut self, instr: Instruction, method: &Method) -> Result<Step, RuntimeError> {
        let operand = instr.operand();
        let module_id = method.module_id;

        match instr.opcode() {
            Opcode::Nop => Ok(Step::Continue),

            Opcode::PushConstant => {
                let entry = self
                    .runtime
                    .registry
                    .constant(module_id, operand)
                    .ok_or(RuntimeError::Panic(PanicReason::InvalidOpcode))?;
                self.push_operand(constant_to_value(entry))?;
                Ok(Step::Continue)
            }

            Opcode::Pop => {
                self.pop_operand()?;
                Ok(Step::Continue)
            }

            Opcode::Dup | Opcode::Copy => {
                let value = *self.stack.last().ok_or(RuntimeError::Panic(PanicReason::StackUnderflow))?;
                self.push_operand(value)?;
                Ok(Step::Continue)
            }

            Opcode::LoadLocal | Opcode::LoadArg => {
                let value = self.local(operand)?;
                self.push_operand(value)?;
                Ok(Step::Continue)
            }

            Opcode::StoreLocal => {
                let value = self.pop_operand()?;
                self.set_local(operand, value)?;
                Ok(Step::Continue)
            }

            Opcode::LoadStatic => {
                let name = self
                    .runtime
                    .registry
                    .string_of(module_id, operand)
                    .map(str::to_string)
                    .ok_or(RuntimeError::Panic(PanicReason::UnresolvedField))?;
                let field = self.resolve_field_in_chain(method.owner_type_id, &name)?;
                self.push_operand(self.runtime.static_field(field.field_id))?;
                Ok(Step::Continue)
            }

            Opcode::StoreStatic => {
                let name = self
                    .runtime
                    .registry
                    .string_of(module_id, operand)
                    .map(str::to_string)
                    .ok_or(RuntimeError::Panic(PanicReason::UnresolvedField))?;
                let value = self.pop_operand()?;
                let field = self.resolve_field_in_chain(method.owner_type_id, &name)?;
                self.runtime.set_static_field(field.field_id, value);
                Ok(Step::Continue)
            }

            Opcode::LoadField => {
                let name = self
                    .runtime
                    .registry
                    .string_of(module_id, operand)
                    .map(str::to_string)
                    .ok_or(RuntimeError::Panic(PanicReason::UnresolvedField))?;
                let obj = self.pop_operand()?.as_object().ok_or(RuntimeError::Panic(PanicReason::NullDereference))?;
                let type_id = self
                    .runtime
                    .heap
                    .type_id_of(obj)
                    .ok_or(RuntimeError::Panic(PanicReason::NullDereference))?;
                let field = self.resolve_field_in_chain(type_id, &name)?;
                let value = self
                    .runtime
                    .heap
                    .field(obj, field.slot)
                    .ok_or(RuntimeError::Panic(PanicReason::UnresolvedField))?;
                self.push_operand(value)?;
                Ok(Step::Continue)
            }

            Opcode::StoreField => {
                let name = self
                    .runtime
                    .registry
                    .string_of(module_id, operand)
                    .map(str::to_string)
                    .ok_or(RuntimeError::Panic(PanicReason::UnresolvedField))?;
                let obj = self.pop_operand()?.as_object().ok_or(RuntimeError::Panic(PanicReason::NullDereference))?;
                let value = self.pop_operand()?;
                let type_id = self
                    .runtime
                    .heap
                    .type_id_of(obj)
                    .ok_or(RuntimeError::Panic(PanicReason::NullDereference))?;
                let field = self.resolve_field_in_chain(type_id, &name)?;
                if !self.runtime.heap.set_field(obj, field.slot, value) {
                    return Err(RuntimeError::Panic(PanicReason::UnresolvedField));
                }
                Ok(Step::Continue)
            }

            Opcode::LoadArray => {
                let index = as_index(self.pop_operand()?)?;
                let obj = self.pop_operand()?.as_object().ok_or(RuntimeError::Panic(PanicReason::NullDereference))?;
                let value = self
                    .runtime
                    .heap
                    .field(obj, index)
                    .ok_or(RuntimeError::Panic(PanicReason::ArrayIndexOutOfBounds))?;
                self.push_operand(value)?;
                Ok(Step::Continue)
            }

            Opcode::StoreArray => {
                let index = as_index(self.pop_operand()?)?;
                let obj = self.pop_operand()?.as_object().ok_or(RuntimeError::Panic(PanicReason::NullDereference))?;
                let value = self.pop_operand()?;
                if !self.runtime.heap.set_field(obj, index, value) {
                    return Err(RuntimeError::Panic(PanicReason::ArrayIndexOutOfBounds));
                }
                Ok(Step::Continue)
            }

            Opcode::Add => self.binary_numeric(|a, b| a.wrapping_add(b), |a, b| a + b),
            Opcode::Sub => self.binary_numeric(|a, b| a.wrapping_sub(b), |a, b| a - b),
            Opcode::Mul => self.binary_numeric(|a, b| a.wrapping_mul(b), |a, b| a * b),
            Opcode::Div => self.binary_checked(
                |a, b| if b == 0 { Err(PanicReason::DivisionByZero) } else { Ok(a.wrapping_div(b)) },
                |a, b| if b == 0.0 { Err(PanicReason::DivisionByZero) } else { Ok(a / b) },
            ),
            Opcode::Mod => self.binary_checked(
                |a, b| if b == 0 { Err(PanicReason::DivisionByZero) } else { Ok(a.wrapping_rem(b)) },
                |a, b| if b == 0.0 { Err(PanicReason::DivisionByZero) } else { Ok(a % b) },
            ),

            Opcode::Neg => {
                let value = self.pop_operand()?;
                let result = match value {
                    Value::I64(v) => Value::I64(v.wrapping_neg()),
                    Value::F64(v) => Value::F64(-v),
                    _ => return Err(RuntimeError::Panic(PanicReason::TypeMismatch)),
                };
                self.push_operand(result)?;
                Ok(Step::Continue)
            }

            Opcode::Inc | Opcode::Dec => {
                let value = self.pop_operand()?;
                let delta: i64 = if matches!(instr.opcode(), Opcode::Inc) { 1 } else { -1 };
                let result = match value {
                    Value::I64(v) => Value::I64(v.wrapping_add(delta)),
                    Value::F64(v) => Value::F64(v + delta as f64),
                    _ => return Err(RuntimeError::Panic(PanicReason::TypeMismatch)),
                };
                self.push_operand(result)?;
                Ok(Step::Continue)
            }

            Opcode::Eq | Opcode::Ne => {
                let b = self.pop_operand()?;
                let a = self.pop_operand()?;
                let equal = values_equal(a, b)?;
                let result = if matches!(instr.opcode(), Opcode::Eq) { equal } else { !equal };
                self.push_operand(Value::Bool(result))?;
                Ok(Step::Continue)
            }

            Opcode::Lt => self.binary_compare(|a, b| a < b, |a, b| a < b),
            Opcode::Le => self.binary_compare(|a, b| a <= b, |a, b| a <= b),
            Opcode::Gt => self.binary_compare(|a, b| a > b, |a, b| a > b),
            Opcode::Ge => self.binary_compare(|a, b| a >= b, |a, b| a >= b),

            Opcode::And | Opcode::Or => {
                let b = self.pop_operand()?.as_bool().ok_or(RuntimeError::Panic(PanicReason::TypeMismatch))?;
                let a = self.pop_operand()?.as_bool().ok_or(RuntimeError::Panic(PanicReason::TypeMismatch))?;
                let result = if matches!(instr.opcode(), Opcode::And) { a && b } else { a || b };
                self.push_operand(Value::Bool(result))?;
                Ok(Step::Continue)
            }

            Opcode::Not => {
                let a = self.pop_operand()?.as_bool().ok_or(RuntimeError::Panic(PanicReason::TypeMismatch))?;
                self.push_operand(Value::Bool(!a))?;
                Ok(Step::Continue)
            }

            Opcode::Jmp => {
                self.current_frame_mut().ip = operand;
                Ok(Step::Continue)
            }
            Opcode::Jmpt => {
                let cond = self.pop_operand()?.as_bool().ok_or(RuntimeError::Panic(PanicReason::TypeMismatch))?;
                if cond {
                    self.current_frame_mut().ip = operand;
                }
                Ok(Step::Continue)
            }
            Opcode::Jmpf => {
                let cond = self.pop_operand()?.as_bool().ok_or(RuntimeError::Panic(PanicReason::TypeMismatch))?;
                if !cond {
                    self.current_frame_mut().ip = operand;
                }
                Ok(Step::Continue)
            }

            Opcode::Call => {
                let callee = self.runtime.registry.find_method_by_id(operand)?.clone();
                if callee.is_intrinsic() {
                    self.invoke_intrinsic(&callee)?;
                } else {
                    let args = self.pop_n(callee.param_count())?;
                    self.push_call(&callee, None, args)?;
                }
                Ok(Step::Continue)
            }
            Opcode::Callv => self.dispatch_virtual(module_id, operand, false),
            Opcode::Calli => self.dispatch_virtual(module_id, operand, true),

            Opcode::Return => Ok(Step::Returned(None)),
            Opcode::ReturnValue => {
                let value = *self.stack.last().ok_or(RuntimeError::Panic(PanicReason::StackUnderflow))?;
                Ok(Step::Returned(Some(value)))
            }

            Opcode::NewObject => {
                let type_id = operand;
                self.runtime.registry.find_class_by_id(type_id)?;
                let field_count = self.runtime.registry.instance_field_count(type_id);
                let roots = self.gather_roots();
                let obj = self.runtime.heap.allocate_object(type_id, field_count, false, &roots)?;
                self.push_operand(Value::Object(obj))?;
                self.maybe_collect();
                Ok(Step::Continue)
            }

            Opcode::NewArray => {
                let element_type_id = operand;
                let length = as_index(self.pop_operand()?)?;
                let roots = self.gather_roots();
                let obj = self.runtime.heap.allocate_object(element_type_id, length, false, &roots)?;
                self.push_operand(Value::Object(obj))?;
                self.maybe_collect();
                Ok(Step::Continue)
            }

            Opcode::IsInstanceOf => {
                let target_type_id = operand;
                let value = self.pop_operand()?;
                let result = match value.as_object() {
                    Some(obj) => {
                        let type_id = self.runtime.heap.type_id_of(obj).unwrap_or(builtin_types::OBJECT);
                        object::object_is_instance_of(&self.runtime.registry, type_id, target_type_id)
                    }
                    None => false,
                };
                self.push_operand(Value::Bool(result))?;
                Ok(Step::Continue)
            }

            Opcode::Cast => {
                let target_type_id = operand;
                let value = self.pop_operand()?;
                match value {
                    Value::Object(obj) => {
                        let type_id = self
                            .runtime
                            .heap
                            .type_id_of(obj)
                            .ok_or(RuntimeError::Panic(PanicReason::NullDereference))?;
                        if !object::object_is_instance_of(&self.runtime.registry, type_id, target_type_id) {
                            return Err(RuntimeError::Panic(PanicReason::TypeMismatch));
                        }
                        self.push_operand(value)?;
                    }
                    other => self.push_operand(other)?,
                }
                Ok(Step::Continue)
            }

            Opcode::IsNull => {
                let value = self.pop_operand()?;
                self.push_operand(Value::Bool(value.is_null()))?;
                Ok(Step::Continue)
            }
            Opcode::IsNotNull => {
                let value = self.pop_operand()?;
                self.push_operand(Value::Bool(!value.is_null()))?;
                Ok(Step::Continue)
            }

            Opcode::Box => {
                let value = self.pop_operand()?;
                let type_id = self.value_type_id(value);
                let roots = self.gather_roots();
                let obj = self.runtime.heap.allocate_object(type_id, 1, false, &roots)?;
                self.runtime.heap.set_field(obj, 0, value);
                self.push_operand(Value::Object(obj))?;
                self.maybe_collect();
                Ok(Step::Continue)
            }
            Opcode::Unbox => {
                let obj = self.pop_operand()?.as_object().ok_or(RuntimeError::Panic(PanicReason::TypeMismatch))?;
                let inner = self
                    .runtime
                    .heap
                    .field(obj, 0)
                    .ok_or(RuntimeError::Panic(PanicReason::NullDereference))?;
                self.push_operand(inner)?;
                Ok(Step::Continue)
            }
            Opcode::GetType => {
                let value = self.pop_operand()?;
                let type_id = self.value_type_id(value);
                self.push_operand(Value::I64(type_id as i64))?;
                Ok(Step::Continue)
            }

            Opcode::Halt => Err(RuntimeError::Panic(PanicReason::Interrupted)),

            #[allow(unreachable_patterns)]
            _ => Err(RuntimeError::Panic(PanicReason::InvalidOpcode)),
        }
    }

    fn binary_numeric(
        &mut self,
        on_int: impl Fn(i64, i64) -> i64,
        on_float: impl Fn(f64, f64) -> f64,
    ) -> Result<Step, RuntimeError> {
        let b = self.pop_operand()?;
        let a = self.pop_operand()?;
        let result = match (a, b) {
            (Value::I64(x), Value::I64(y)) => Value::I64(on_int(x, y)),
            (Value::F64(x), Value::F64(y)) => Value::F64(on_float(x, y)),
            _ => return Err(RuntimeError::Panic(PanicReason::TypeMismatch)),
        };
        self.push_operand(result)?;
        Ok(Step::Continue)
    }

    fn binary_checked(
        &mut self,
        on_int: impl Fn(i64, i64) -> Result<i64, PanicReason>,
        on_float: impl Fn(f64, f64) -> Result<f64, PanicReason>,
    ) -> Result<Step, RuntimeError> {
        let b = self.pop_operand()?;
        let a = self.pop_operand()?;
        let result = match (a, b) {
            (Value::I64(x), Value::I64(y)) => Value::I64(on_int(x, y).map_err(RuntimeError::Panic)?),
            (Value::F64(x), Value::F64(y)) => Value::F64(on_float(x, y).map_err(RuntimeError::Panic)?),
            _ => return Err(RuntimeError::Panic(PanicReason::TypeMismatch)),
        };
        self.push_operand(result)?;
        Ok(Step::Continue)
    }

    fn binary_compare(
        &mut self,
        on_int: impl Fn(i64, i64) -> bool,
        on_float: impl Fn(f64, f64) -> bool,
    ) -> Result<Step, RuntimeError> {
        let b = self.pop_operand()?;
        let a = self.pop_operand()?;
        let result = match (a, b) {
            (Value::I64(x), Value::I64(y)) => on_int(x, y),
            (Value::F64(x), Value::F64(y)) => on_float(x, y),
            _ => return Err(RuntimeError::Panic(PanicReason::TypeMismatch)),
        };
        self.push_operand(Value::Bool(result))?;
        Ok(Step::Continue)
    }
}

fn as_index(value: Value) -> Result<usize, RuntimeError> {
    match value {
        Value::I64(n) if n >= 0 => Ok(n as usize),
        Value::I64(_) => Err(RuntimeError::Panic(PanicReason::ArrayIndexOutOfBounds)),
        _ => Err(RuntimeError::Panic(PanicReason::TypeMismatch)),
    }
}

fn values_equal(a: Value, b: Value) -> Result<bool, RuntimeError> {
    match (a, b) {
        (Value::I64(_), Value::I64(_))
        | (Value::F64(_), Value::F64(_))
        | (Value::Bool(_), Value::Bool(_))
        | (Value::StringRef(_), Value::StringRef(_))
        | (Value::Object(_), Value::Object(_))
        | (Value::Null, Value::Null) => Ok(a == b),
        _ => Err(RuntimeError::Panic(PanicReason::TypeMismatch)),
    }
}

fn constant_to_value(entry: helium_module::ConstantEntry) -> Value {
    use helium_module::ConstantEntry;
    match entry {
        ConstantEntry::I64(v) => Value::I64(v),
        ConstantEntry::F64(v) => Value::F64(v),
        ConstantEntry::Bool(v) => Value::Bool(v),
        ConstantEntry::StringRef(id) => Value::StringRef(id),
        ConstantEntry::Null => Value::Null,
    }
}

/// Whether some class along `type_id`'s superclass chain implements an
/// interface declaring a method named `name` (spec §4.6 `CALLI`).
fn interface_declares(registry: &ModuleRegistry, type_id: u32, name: &str) -> bool {
    let mut current = Some(type_id);
    while let Some(t) = current {
        let Some(class) = registry.class(t) else {
            return false;
        };
        for interface_id in &class.interface_type_ids {
            if object::find_interface_method(registry, *interface_id, name).is_some() {
                return true;
            }
        }
        current = class.super_type_id;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use helium_module::link::{link, ModuleKind, ProjectMetadata};
    use helium_module::tables::{field_flags, method_flags, type_flags, FieldEntry, MethodEntry, StringEntry, TypeEntry, NO_SUPERTYPE};
    use helium_module::{CompiledUnit, ConstantEntry, ConstantPool};

    fn runtime_with(units: Vec<CompiledUnit>) -> Runtime {
        let metadata = ProjectMetadata {
            module_name: "test".into(),
            module_version: "0.0.0".into(),
            kind: ModuleKind::Executable,
            entry_override: None,
        };
        let image = link(units, &metadata).unwrap();
        let mut runtime = Runtime::new(&VmConfig::default());
        runtime.registry.load_module_bytes(&image).unwrap();
        runtime
    }

    /// `main(): integer { return 42; }` -- spec §8 scenario 1, straight
    /// through the interpreter this time instead of just the emitter.
    fn identity_unit() -> CompiledUnit {
        let mut constants = ConstantPool::new();
        let id = constants.intern(ConstantEntry::I64(42));
        CompiledUnit {
            strings: vec![StringEntry { bytes: b"Program".to_vec() }, StringEntry { bytes: b"main".to_vec() }],
            types: vec![TypeEntry {
                name_id: 0,
                super_type_id: NO_SUPERTYPE,
                interface_type_ids: vec![],
                field_start: 0,
                field_count: 0,
                method_start: 0,
                method_count: 1,
                flags: type_flags::CLASS,
            }],
            methods: vec![MethodEntry {
                owner_type_id: 7,
                name_id: 1,
                return_type_id: helium_ir::lower::builtin_types::INTEGER,
                param_type_ids: vec![],
                local_count: 0,
                bytecode_off: 0,
                bytecode_len: 6,
                flags: method_flags::STATIC,
            }],
            fields: vec![],
            constants,
            bytecode: vec![Opcode::PushConstant as u8, id as u8, 0, 0, 0, Opcode::ReturnValue as u8],
            method_names: vec!["Program::main".into()],
            patches: vec![],
        }
    }

    #[test]
    fn running_the_entry_point_returns_the_constant() {
        let mut runtime = runtime_with(vec![identity_unit()]);
        let mut interpreter = Interpreter::new(&mut runtime, VmConfig::default());
        let result = interpreter.run_entry().unwrap();
        assert_eq!(result, Some(Value::I64(42)));
        assert_eq!(interpreter.operand_stack_depth(), 1);
    }

    #[test]
    fn halting_between_instructions_raises_interrupted() {
        let mut runtime = runtime_with(vec![identity_unit()]);
        let mut interpreter = Interpreter::new(&mut runtime, VmConfig::default());
        interpreter.halt_flag().store(true, Ordering::Relaxed);
        let err = interpreter.run_entry().unwrap_err();
        assert_eq!(err.panic_reason(), PanicReason::Interrupted);
    }

    #[test]
    fn division_by_zero_panics() {
        let mut constants = ConstantPool::new();
        let zero = constants.intern(ConstantEntry::I64(0));
        let one = constants.intern(ConstantEntry::I64(1));
        let unit = CompiledUnit {
            strings: vec![StringEntry { bytes: b"Program".to_vec() }, StringEntry { bytes: b"main".to_vec() }],
            types: vec![TypeEntry {
                name_id: 0,
                super_type_id: NO_SUPERTYPE,
                interface_type_ids: vec![],
                field_start: 0,
                field_count: 0,
                method_start: 0,
                method_count: 1,
                flags: type_flags::CLASS,
            }],
            methods: vec![MethodEntry {
                owner_type_id: 7,
                name_id: 1,
                return_type_id: helium_ir::lower::builtin_types::INTEGER,
                param_type_ids: vec![],
                local_count: 0,
                bytecode_off: 0,
                bytecode_len: 11,
                flags: method_flags::STATIC,
            }],
            fields: vec![],
            constants,
            bytecode: vec![
                Opcode::PushConstant as u8,
                one as u8,
                0,
                0,
                0,
                Opcode::PushConstant as u8,
                zero as u8,
                0,
                0,
                0,
                Opcode::Div as u8,
            ],
            method_names: vec!["Program::main".into()],
            patches: vec![],
        };
        let mut runtime = runtime_with(vec![unit]);
        let mut interpreter = Interpreter::new(&mut runtime, VmConfig::default());
        let err = interpreter.run_entry().unwrap_err();
        assert_eq!(err.panic_reason(), PanicReason::DivisionByZero);
    }

    #[test]
    fn new_object_then_store_and_load_field_round_trips() {
        let mut constants = ConstantPool::new();
        let id = constants.intern(ConstantEntry::I64(7));
        let unit = CompiledUnit {
            strings: vec![
                StringEntry { bytes: b"Point".to_vec() },
                StringEntry { bytes: b"main".to_vec() },
                StringEntry { bytes: b"x".to_vec() },
            ],
            types: vec![TypeEntry {
                name_id: 0,
                super_type_id: NO_SUPERTYPE,
                interface_type_ids: vec![],
                field_start: 0,
                field_count: 1,
                method_start: 0,
                method_count: 1,
                flags: type_flags::CLASS,
            }],
            methods: vec![MethodEntry {
                owner_type_id: 7,
                name_id: 1,
                return_type_id: helium_ir::lower::builtin_types::INTEGER,
                param_type_ids: vec![],
                local_count: 0,
                // NEW_OBJECT 7; DUP; PUSH_CONSTANT 7; STORE_FIELD "x"; LOAD_FIELD "x"; RETURN_VALUE
                bytecode_off: 0,
                bytecode_len: 1 + 5 + 1 + 5 + 5 + 5 + 1,
                flags: method_flags::STATIC,
            }],
            fields: vec![FieldEntry {
                owner_type_id: 7,
                name_id: 2,
                type_id: helium_ir::lower::builtin_types::INTEGER,
                flags: field_flags::empty_for_test(),
            }],
            constants,
            bytecode: {
                let mut b = Vec::new();
                b.push(Opcode::NewObject as u8);
                b.extend_from_slice(&7u32.to_le_bytes());
                b.push(Opcode::Dup as u8);
                b.push(Opcode::PushConstant as u8);
                b.extend_from_slice(&(id as u32).to_le_bytes());
                b.push(Opcode::StoreField as u8);
                b.extend_from_slice(&2u32.to_le_bytes());
                b.push(Opcode::LoadField as u8);
                b.extend_from_slice(&2u32.to_le_bytes());
                b.push(Opcode::ReturnValue as u8);
                b
            },
            method_names: vec!["Point::main".into()],
            patches: vec![],
        };
        let mut runtime = runtime_with(vec![unit]);
        let mut interpreter = Interpreter::new(&mut runtime, VmConfig::default());
        let result = interpreter.run_entry().unwrap();
        assert_eq!(result, Some(Value::I64(7)));
    }

    #[test]
    fn call_to_sys_println_consumes_one_argument_and_returns_nothing() {
        let mut constants = ConstantPool::new();
        let id = constants.intern(ConstantEntry::I64(1));
        let unit = CompiledUnit {
            strings: vec![StringEntry { bytes: b"Program".to_vec() }, StringEntry { bytes: b"main".to_vec() }],
            types: vec![TypeEntry {
                name_id: 0,
                super_type_id: NO_SUPERTYPE,
                interface_type_ids: vec![],
                field_start: 0,
                field_count: 0,
                method_start: 0,
                method_count: 1,
                flags: type_flags::CLASS,
            }],
            methods: vec![MethodEntry {
                owner_type_id: 7,
                name_id: 1,
                return_type_id: helium_ir::lower::builtin_types::VOID,
                param_type_ids: vec![],
                local_count: 0,
                bytecode_off: 0,
                bytecode_len: 5 + 5 + 1,
                flags: method_flags::STATIC,
            }],
            fields: vec![],
            constants,
            bytecode: {
                let mut b = Vec::new();
                b.push(Opcode::PushConstant as u8);
                b.extend_from_slice(&(id as u32).to_le_bytes());
                // Sys::println is global method id 0, prepended before this unit's methods.
                b.push(Opcode::Call as u8);
                b.extend_from_slice(&0u32.to_le_bytes());
                b.push(Opcode::Return as u8);
                b
            },
            method_names: vec!["Program::main".into()],
            patches: vec![],
        };
        let mut runtime = runtime_with(vec![unit]);
        let mut interpreter = Interpreter::new(&mut runtime, VmConfig::default());
        let result = interpreter.run_entry().unwrap();
        assert_eq!(result, None);
        assert_eq!(interpreter.operand_stack_depth(), 0);
    }
}
