//! The in-memory control-flow-graph IR (C1 of the design).
//!
//! Functions own their blocks; blocks own their instructions. Both blocks
//! and temp results are referenced by small integer ids rather than
//! pointers, so the whole function is one arena and nothing here needs
//! cross-owner reference counting (§9's "cyclic graphs" design note).

use std::collections::BTreeSet;
use std::fmt;

/// Identifies a basic block within its owning [`Function`].
pub type BlockId = u32;

/// Identifies a temporary value produced by some prior instruction.
pub type TempId = u32;

/// A compile-side type id; see `helium-ir::lower::BUILTIN_TYPES` for the
/// reserved built-ins (`INTEGER = 1` .. `VOID = 6`).
pub type TypeId = u32;

/// Best-effort source position. The lexer/parser collaborator is out of
/// scope for this crate; this is the minimal shape the translator needs
/// to annotate instructions with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// 1-based line number, or 0 if unknown.
    pub line: u32,
    /// 1-based column number, or 0 if unknown.
    pub col: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// IR-level opcode taxonomy (spec §4.1). The bytecode emitter maps every
/// variant here onto a published [`helium_asm::Opcode`]; `lower` never
/// emits [`IrOp::Phi`] because the block-structured control-flow lowering
/// of §4.2 does not need SSA join nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
pub enum IrOp {
    // Load
    LoadConst,
    LoadLocal,
    LoadArg,
    LoadField,
    LoadStatic,
    LoadArray,
    // Store
    StoreLocal,
    StoreField,
    StoreStatic,
    StoreArray,
    // Arith
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Inc,
    Dec,
    // Compare
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logic
    And,
    Or,
    Not,
    // Branch
    Jmp,
    Jmpt,
    Jmpf,
    // Call/Return
    Call,
    Callv,
    Calli,
    Return,
    ReturnVal,
    // Objects
    New,
    NewArray,
    Cast,
    Instanceof,
    IsNull,
    IsNotNull,
    // Misc
    Box,
    Unbox,
    GetType,
    Nop,
    Copy,
    Phi,
}

/// A tagged-union operand or instruction result. Immutable once
/// constructed (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I64(i64),
    F64(f64),
    Bool(bool),
    StringId(u32),
    ObjectRef(u64),
    Null,
    Temp(TempId),
}

impl Value {
    /// Short name of the value's kind, useful for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::I64(_) => "I64",
            Value::F64(_) => "F64",
            Value::Bool(_) => "BOOL",
            Value::StringId(_) => "STRING_ID",
            Value::ObjectRef(_) => "OBJECT_REF",
            Value::Null => "NULL",
            Value::Temp(_) => "TEMP_ID",
        }
    }
}

/// One IR instruction: an opcode, its ordered operands, an optional
/// result (always a fresh [`Value::Temp`]), an optional jump target, and
/// the source location it was lowered from.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: IrOp,
    pub operands: Vec<Value>,
    pub result: Option<Value>,
    pub jump_target: Option<BlockId>,
    pub location: SourceLocation,
}

impl Instruction {
    /// Whether this instruction terminates its block (unconditional or
    /// conditional jump, or a return).
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.opcode,
            IrOp::Jmp | IrOp::Jmpt | IrOp::Jmpf | IrOp::Return | IrOp::ReturnVal
        )
    }
}

/// Per-block structural flags. A small hand-rolled bitset rather than a
/// `bitflags!` struct: only three booleans, not worth pulling in the
/// macro for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFlags(u8);

/// A single structural flag bit, used with [`BlockFlags::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFlag {
    Entry,
    Exit,
    Reachable,
}

impl BlockFlags {
    const fn bit(flag: BlockFlag) -> u8 {
        match flag {
            BlockFlag::Entry => 0b001,
            BlockFlag::Exit => 0b010,
            BlockFlag::Reachable => 0b100,
        }
    }

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, flag: BlockFlag) {
        self.0 |= Self::bit(flag);
    }

    pub fn contains(&self, flag: BlockFlag) -> bool {
        self.0 & Self::bit(flag) != 0
    }
}

/// A maximal straight-line instruction sequence with one entry and one
/// exit (see GLOSSARY). Owns its instructions; referenced by other
/// blocks only through [`BlockId`].
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: Option<String>,
    pub instructions: Vec<Instruction>,
    pub predecessors: BTreeSet<BlockId>,
    pub successors: BTreeSet<BlockId>,
    pub flags: BlockFlags,
}

impl BasicBlock {
    fn new(id: BlockId, label: Option<String>) -> Self {
        Self {
            id,
            label,
            instructions: Vec::new(),
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
            flags: BlockFlags::empty(),
        }
    }

    /// The block's terminator, if its last instruction is one.
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }
}

/// A function's signature, blocks, and locals (spec §3.1). Functions own
/// their blocks.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub signature_hash: u64,
    pub return_type: TypeId,
    pub param_types: Vec<TypeId>,
    pub local_count: u32,
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_async: bool,
}

impl Function {
    /// Look up a block by id. Panics if the id was never allocated by
    /// this function's builder -- a bug in the translator, not user
    /// input, so a panic is appropriate here.
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks
            .iter()
            .find(|b| b.id == id)
            .unwrap_or_else(|| panic!("block {id} does not belong to function {}", self.name))
    }

    fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        self.blocks
            .iter_mut()
            .find(|b| b.id == id)
            .unwrap_or_else(|| panic!("block {id} does not belong to this function"))
    }

    /// Structural verification pass: every non-trailing block is
    /// terminated, every successor belongs to this function, and exactly
    /// one entry block exists. Grounded in spec §8's IR invariants.
    pub fn verify(&self) -> Result<(), IrVerifyError> {
        if self.blocks.is_empty() {
            return Err(IrVerifyError::NoEntryBlock { function: self.name.clone() });
        }
        if !self.blocks.iter().any(|b| b.id == self.entry) {
            return Err(IrVerifyError::NoEntryBlock { function: self.name.clone() });
        }
        let known_ids: BTreeSet<BlockId> = self.blocks.iter().map(|b| b.id).collect();
        let last_id = self.blocks.last().map(|b| b.id);
        for block in &self.blocks {
            let is_trailing = Some(block.id) == last_id;
            if !is_trailing && block.terminator().is_none() {
                return Err(IrVerifyError::UnterminatedBlock {
                    function: self.name.clone(),
                    block: block.id,
                });
            }
            for succ in &block.successors {
                if !known_ids.contains(succ) {
                    return Err(IrVerifyError::DanglingSuccessor {
                        function: self.name.clone(),
                        block: block.id,
                        successor: *succ,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Errors raised by [`Function::verify`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrVerifyError {
    #[error("function `{function}` has no blocks or an unknown entry block")]
    NoEntryBlock { function: String },
    #[error("function `{function}` block {block} is not terminated and is not the trailing block")]
    UnterminatedBlock { function: String, block: BlockId },
    #[error("function `{function}` block {block} has a successor {successor} outside the function")]
    DanglingSuccessor {
        function: String,
        block: BlockId,
        successor: BlockId,
    },
}

/// A compilation unit's worth of lowered functions, plus the raw string
/// literals and symbolic names (field/method/type names) the lowering
/// pass referenced. `helium-module`'s emitter re-interns these into the
/// final module string table; they are already deduplicated here so
/// that pass is a straight copy.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub strings: Vec<String>,
}

/// Structural error raised by the builder itself (not a translation
/// error -- those are [`crate::lower::TranslateError`]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuilderError {
    #[error("no current function is set")]
    NoCurrentFunction,
    #[error("no current block is set")]
    NoCurrentBlock,
    #[error("cannot emit into block {block}: it is already terminated")]
    BlockAlreadyTerminated { block: BlockId },
}

/// Builder state for constructing IR: the current function, current
/// block, and the monotonically increasing id counters (spec §4.1).
pub struct IrBuilder {
    module: Module,
    current_function: Option<usize>,
    current_block: Option<BlockId>,
    next_temp: TempId,
    next_block: BlockId,
    string_index: std::collections::HashMap<String, u32>,
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IrBuilder {
    pub fn new() -> Self {
        Self {
            module: Module::default(),
            current_function: None,
            current_block: None,
            next_temp: 0,
            next_block: 0,
            string_index: std::collections::HashMap::new(),
        }
    }

    /// Intern a raw name (string literal text, or a field/method/class
    /// name) into the module's deduplicated string table, returning its
    /// id. Idempotent: interning the same text twice returns the same
    /// id (spec §8's `intern(s)` round-trip law).
    pub fn intern_name(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.string_index.get(name) {
            return id;
        }
        let id = self.module.strings.len() as u32;
        self.module.strings.push(name.to_string());
        self.string_index.insert(name.to_string(), id);
        id
    }

    /// Start a new function and make it current. Resets the temp/block
    /// id counters, which are scoped to a single function.
    pub fn new_function(
        &mut self,
        name: impl Into<String>,
        return_type: TypeId,
    ) -> usize {
        let function = Function {
            name: name.into(),
            signature_hash: 0,
            return_type,
            param_types: Vec::new(),
            local_count: 0,
            blocks: Vec::new(),
            entry: 0,
            is_static: false,
            is_virtual: false,
            is_async: false,
        };
        self.module.functions.push(function);
        let index = self.module.functions.len() - 1;
        self.current_function = Some(index);
        self.current_block = None;
        self.next_temp = 0;
        self.next_block = 0;
        index
    }

    fn function_mut(&mut self) -> Result<&mut Function, BuilderError> {
        let index = self.current_function.ok_or(BuilderError::NoCurrentFunction)?;
        Ok(&mut self.module.functions[index])
    }

    /// Create a new block in the current function. The first block ever
    /// created in a function implicitly becomes its entry.
    pub fn new_block(&mut self, label: Option<String>) -> Result<BlockId, BuilderError> {
        let id = self.next_block;
        self.next_block += 1;
        let is_first = {
            let function = self.function_mut()?;
            let is_first = function.blocks.is_empty();
            let mut block = BasicBlock::new(id, label);
            if is_first {
                block.flags.insert(BlockFlag::Entry);
                function.entry = id;
            }
            block.flags.insert(BlockFlag::Reachable);
            function.blocks.push(block);
            is_first
        };
        let _ = is_first;
        Ok(id)
    }

    /// Set the block subsequent `emit*` calls append to.
    pub fn set_current_block(&mut self, block: BlockId) {
        self.current_block = Some(block);
    }

    /// The block currently receiving instructions, if any.
    pub fn current_block_id(&self) -> Option<BlockId> {
        self.current_block
    }

    /// Whether the current block is still open for `emit`/`emit_jump`
    /// (i.e. has no terminator yet). `false` once a nested statement
    /// lowering (e.g. an early `return`) has closed it.
    pub fn current_block_is_open(&self) -> bool {
        let Some(block_id) = self.current_block else {
            return false;
        };
        let Some(index) = self.current_function else {
            return false;
        };
        self.module.functions[index]
            .block(block_id)
            .terminator()
            .is_none()
    }

    fn current_block_mut(&mut self) -> Result<&mut BasicBlock, BuilderError> {
        let block_id = self.current_block.ok_or(BuilderError::NoCurrentBlock)?;
        let function = self.function_mut()?;
        if let Some(term) = function.block(block_id).terminator() {
            let _ = term;
            return Err(BuilderError::BlockAlreadyTerminated { block: block_id });
        }
        Ok(function.block_mut(block_id))
    }

    /// Append an instruction with no result to the current block.
    pub fn emit(
        &mut self,
        opcode: IrOp,
        operands: Vec<Value>,
        location: SourceLocation,
    ) -> Result<(), BuilderError> {
        let block = self.current_block_mut()?;
        block.instructions.push(Instruction {
            opcode,
            operands,
            result: None,
            jump_target: None,
            location,
        });
        Ok(())
    }

    /// Append an instruction and allocate a fresh temp id for its
    /// result, returning that result as a [`Value::Temp`].
    pub fn emit_with_result(
        &mut self,
        opcode: IrOp,
        operands: Vec<Value>,
        location: SourceLocation,
    ) -> Result<Value, BuilderError> {
        let temp = self.next_temp;
        self.next_temp += 1;
        let result = Value::Temp(temp);
        let block = self.current_block_mut()?;
        block.instructions.push(Instruction {
            opcode,
            operands,
            result: Some(result),
            jump_target: None,
            location,
        });
        Ok(result)
    }

    /// Append a jump instruction (`JMP`/`JMPT`/`JMPF`) targeting
    /// `target`, wiring up the successor/predecessor sets on both
    /// blocks.
    pub fn emit_jump(
        &mut self,
        opcode: IrOp,
        operands: Vec<Value>,
        target: BlockId,
        location: SourceLocation,
    ) -> Result<(), BuilderError> {
        debug_assert!(matches!(opcode, IrOp::Jmp | IrOp::Jmpt | IrOp::Jmpf));
        let source = self.current_block.ok_or(BuilderError::NoCurrentBlock)?;
        {
            let block = self.current_block_mut()?;
            block.instructions.push(Instruction {
                opcode,
                operands,
                result: None,
                jump_target: Some(target),
                location,
            });
            block.successors.insert(target);
        }
        let function = self.function_mut()?;
        function.block_mut(target).predecessors.insert(source);
        Ok(())
    }

    /// Link `from` to `to` as a fall-through successor without emitting
    /// an instruction (used for the implicit fall-through at the end of
    /// an `if`'s `then` arm into `merge`, mirrored by a trailing `JMP`
    /// for non-adjacent blocks).
    pub fn link_fallthrough(&mut self, from: BlockId, to: BlockId) -> Result<(), BuilderError> {
        let function = self.function_mut()?;
        function.block_mut(from).successors.insert(to);
        function.block_mut(to).predecessors.insert(from);
        Ok(())
    }

    /// Finish building and hand back the accumulated module. Consumes
    /// the builder.
    pub fn finish(self) -> Module {
        self.module
    }

    /// Set the current function's `{static, virtual, async}` flags
    /// (spec §3.1).
    pub fn set_function_flags(
        &mut self,
        is_static: bool,
        is_virtual: bool,
        is_async: bool,
    ) -> Result<(), BuilderError> {
        let function = self.function_mut()?;
        function.is_static = is_static;
        function.is_virtual = is_virtual;
        function.is_async = is_async;
        Ok(())
    }

    /// Set the current function's parameter types, extending
    /// `local_count` to cover them (slots `[0, param_count)`).
    pub fn set_params(&mut self, param_types: Vec<TypeId>) -> Result<(), BuilderError> {
        let function = self.function_mut()?;
        function.local_count = function.local_count.max(param_types.len() as u32);
        function.param_types = param_types;
        Ok(())
    }

    /// Reserve the next local slot, growing `local_count`, and return
    /// its index.
    pub fn declare_local(&mut self) -> Result<u32, BuilderError> {
        let function = self.function_mut()?;
        let slot = function.local_count;
        function.local_count += 1;
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation { line: 1, col: 1 }
    }

    #[test]
    fn identity_function_builds_and_verifies() {
        // main(): integer { return 42; } -- spec §8 scenario 1.
        let mut b = IrBuilder::new();
        b.new_function("main", 1);
        let entry = b.new_block(None).unwrap();
        b.set_current_block(entry);
        let v = b
            .emit_with_result(IrOp::LoadConst, vec![Value::I64(42)], loc())
            .unwrap();
        b.emit(IrOp::ReturnVal, vec![v], loc()).unwrap();
        let module = b.finish();
        let function = &module.functions[0];
        assert_eq!(function.blocks.len(), 1);
        function.verify().unwrap();
    }

    #[test]
    fn unterminated_non_trailing_block_fails_verify() {
        let mut b = IrBuilder::new();
        b.new_function("f", 6);
        let entry = b.new_block(None).unwrap();
        let _next = b.new_block(None).unwrap();
        b.set_current_block(entry);
        b.emit(IrOp::Nop, vec![], loc()).unwrap();
        let module = b.finish();
        let err = module.functions[0].verify().unwrap_err();
        assert!(matches!(err, IrVerifyError::UnterminatedBlock { .. }));
    }

    #[test]
    fn emitting_after_terminator_is_rejected() {
        let mut b = IrBuilder::new();
        b.new_function("f", 6);
        let entry = b.new_block(None).unwrap();
        b.set_current_block(entry);
        b.emit(IrOp::Return, vec![], loc()).unwrap();
        let err = b.emit(IrOp::Nop, vec![], loc()).unwrap_err();
        assert!(matches!(err, BuilderError::BlockAlreadyTerminated { .. }));
    }

    #[test]
    fn jump_wires_predecessor_and_successor() {
        let mut b = IrBuilder::new();
        b.new_function("f", 6);
        let entry = b.new_block(None).unwrap();
        let exit = b.new_block(None).unwrap();
        b.set_current_block(entry);
        b.emit_jump(IrOp::Jmp, vec![], exit, loc()).unwrap();
        b.set_current_block(exit);
        b.emit(IrOp::Return, vec![], loc()).unwrap();
        let module = b.finish();
        let function = &module.functions[0];
        assert!(function.block(entry).successors.contains(&exit));
        assert!(function.block(exit).predecessors.contains(&entry));
        function.verify().unwrap();
    }
}
