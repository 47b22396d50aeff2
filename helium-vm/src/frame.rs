//! One call frame's worth of interpreter state (spec §4.8).
//!
//! The operand stack is shared across every frame (spec §9 design note),
//! so a frame only tracks what is genuinely per-call: its bytecode
//! cursor, its local slots, and its receiver if it was invoked as an
//! instance method.

use crate::value::{ObjectRef, Value};

/// One entry in the interpreter's call stack.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub method_id: u32,
    pub module_id: u32,
    pub ip: u32,
    pub locals: Vec<Value>,
    pub this: Option<ObjectRef>,
}

impl CallFrame {
    /// Build a frame with `local_count` slots, the first `params.len()`
    /// of them seeded from `params` (spec §4.8: "the callee's initial
    /// local slots are its parameters, in declaration order").
    pub fn new(
        method_id: u32,
        module_id: u32,
        local_count: u32,
        this: Option<ObjectRef>,
        params: Vec<Value>,
    ) -> Self {
        let mut locals = vec![Value::Null; local_count as usize];
        for (slot, value) in params.into_iter().enumerate() {
            if let Some(cell) = locals.get_mut(slot) {
                *cell = value;
            }
        }
        Self {
            method_id,
            module_id,
            ip: 0,
            locals,
            this,
        }
    }
}
