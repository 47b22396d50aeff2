//! Bytecode emitter (C3, spec §4.3): lowers one compilation unit's IR
//! into a per-unit bytecode buffer plus string/type/method/field tables
//! and a constant pool, ready for `crate::link` to merge into a module
//! image.

use std::collections::HashMap;

use helium_asm::Opcode;
use helium_ir::lower::builtin_types;
use helium_ir::{self as ir, BlockId, IrOp, TypeTable, Value};

use crate::constants::{ConstantEntry, ConstantPool};
use crate::error::EmitError;
use crate::ir_opcode;
use crate::tables::{method_flags, FieldEntry, MethodEntry, StringEntry, TypeEntry, NO_SUPERTYPE};

/// How an instruction's 4-byte operand must be rewritten when this unit
/// is merged into a module image by `crate::link` (spec §4.4: "per-unit
/// references embedded in bytecode are rewritten").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchKind {
    /// The operand is a per-unit constant-pool index.
    ConstantId,
    /// The operand is a per-unit string-table id.
    StringId,
    /// The operand is a per-unit type id. Builtins (`<= 6`) are never
    /// shifted; declared (class) type ids are.
    TypeId,
    /// The operand names a callee by its qualified name, not yet an id
    /// at all; resolved once every unit (and the implicit `Sys` class)
    /// is known.
    CallTarget { callee_name: String },
}

/// One rewrite site: the 4 little-endian operand bytes starting at
/// `byte_offset` within the method at `method_index`'s bytecode region
/// (method-local, i.e. relative to that method's own `bytecode_off`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub method_index: u32,
    pub byte_offset: u32,
    pub kind: PatchKind,
}

/// Everything the emitter produced for one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct CompiledUnit {
    pub strings: Vec<StringEntry>,
    pub types: Vec<TypeEntry>,
    pub methods: Vec<MethodEntry>,
    pub fields: Vec<FieldEntry>,
    pub constants: ConstantPool,
    pub bytecode: Vec<u8>,
    /// Qualified name of each method, in method-table order (parallel to
    /// `methods`); the linker builds its global name -> id map from this.
    pub method_names: Vec<String>,
    pub patches: Vec<Patch>,
}

/// Idempotent string interner seeded from the IR module's own
/// deduplicated string list, so `Value::StringId` ids already assigned
/// during lowering are reused verbatim rather than renumbered.
#[derive(Debug, Default)]
struct StringInterner {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl StringInterner {
    fn seeded(existing: &[String]) -> Self {
        let mut index = HashMap::with_capacity(existing.len());
        for (i, s) in existing.iter().enumerate() {
            index.entry(s.clone()).or_insert(i as u32);
        }
        Self {
            strings: existing.to_vec(),
            index,
        }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), id);
        id
    }

    fn into_entries(self) -> Vec<StringEntry> {
        self.strings
            .into_iter()
            .map(|s| StringEntry { bytes: s.into_bytes() })
            .collect()
    }
}

/// Resolves each basic block's method-local byte offset before any
/// jump operand is encoded, per §9's mandated linearisation pass.
struct BlockLayout {
    offsets: HashMap<BlockId, u32>,
}

impl BlockLayout {
    fn build(function: &ir::Function) -> Result<Self, EmitError> {
        let mut offsets = HashMap::with_capacity(function.blocks.len());
        let mut cursor: u32 = 0;
        for block in &function.blocks {
            offsets.insert(block.id, cursor);
            for instr in &block.instructions {
                let opcode = ir_opcode::map(instr.opcode).ok_or_else(|| EmitError::UnknownIrOpcode {
                    function: function.name.clone(),
                    op: ir_op_name(instr.opcode),
                })?;
                cursor += 1 + opcode.operand_width() as u32 * helium_asm::OPERAND_WIDTH as u32;
            }
        }
        Ok(Self { offsets })
    }
}

/// Emits a single compilation unit's functions into one bytecode buffer
/// and table set. Construct one `Emitter` per unit.
pub struct Emitter<'a> {
    types: &'a TypeTable,
    strings: StringInterner,
    constants: ConstantPool,
    methods: Vec<MethodEntry>,
    method_names: Vec<String>,
    fields: Vec<FieldEntry>,
    bytecode: Vec<u8>,
    patches: Vec<Patch>,
}

impl<'a> Emitter<'a> {
    pub fn new(types: &'a TypeTable, seed_strings: &[String]) -> Self {
        Self {
            types,
            strings: StringInterner::seeded(seed_strings),
            constants: ConstantPool::new(),
            methods: Vec::new(),
            method_names: Vec::new(),
            fields: Vec::new(),
            bytecode: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Emit one IR function's bytecode and append its `MethodEntry`.
    /// Returns the method's index within this unit's method table.
    pub fn emit_function(&mut self, function: &ir::Function) -> Result<u32, EmitError> {
        function.verify().map_err(|source| EmitError::Malformed {
            function: function.name.clone(),
            source,
        })?;
        let layout = BlockLayout::build(function)?;
        let method_index = self.methods.len() as u32;
        let bytecode_off = self.bytecode.len() as u32;

        for block in &function.blocks {
            for instr in &block.instructions {
                let opcode = ir_opcode::map(instr.opcode).ok_or_else(|| EmitError::UnknownIrOpcode {
                    function: function.name.clone(),
                    op: ir_op_name(instr.opcode),
                })?;
                self.bytecode.push(opcode as u8);
                if opcode.operand_width() == 1 {
                    let operand_offset = (self.bytecode.len() as u32) - bytecode_off;
                    let operand = if let Some(target) = instr.jump_target {
                        *layout.offsets.get(&target).ok_or_else(|| EmitError::UnresolvedBlock {
                            function: function.name.clone(),
                            block: target,
                        })?
                    } else {
                        self.encode_operand(function, instr, method_index, operand_offset)?
                    };
                    self.bytecode.extend_from_slice(&operand.to_le_bytes());
                }
            }
        }

        let bytecode_len = (self.bytecode.len() as u32) - bytecode_off;
        let mut flags = 0;
        if function.is_static {
            flags |= method_flags::STATIC;
        }
        if function.is_virtual {
            flags |= method_flags::VIRTUAL;
        }
        if function.is_async {
            flags |= method_flags::ASYNC;
        }

        self.methods.push(MethodEntry {
            owner_type_id: owning_type_id(self.types, &function.name),
            name_id: self.strings.intern(&function.name),
            return_type_id: function.return_type,
            param_type_ids: function.param_types.clone(),
            local_count: function.local_count,
            bytecode_off,
            bytecode_len,
            flags,
        });
        self.method_names.push(function.name.clone());
        Ok(method_index)
    }

    fn encode_operand(
        &mut self,
        function: &ir::Function,
        instr: &ir::Instruction,
        method_index: u32,
        byte_offset: u32,
    ) -> Result<u32, EmitError> {
        let malformed = || EmitError::MalformedOperand {
            function: function.name.clone(),
            op: ir_op_name(instr.opcode),
        };
        match instr.opcode {
            IrOp::LoadConst => {
                let value = *instr.operands.first().ok_or_else(malformed)?;
                let entry = constant_entry(value).ok_or_else(malformed)?;
                let id = self.constants.intern(entry);
                self.patches.push(Patch {
                    method_index,
                    byte_offset,
                    kind: PatchKind::ConstantId,
                });
                Ok(id)
            }
            IrOp::LoadLocal | IrOp::LoadArg => slot_id(instr.operands.first()).ok_or_else(malformed),
            IrOp::StoreLocal => slot_id(instr.operands.last()).ok_or_else(malformed),
            IrOp::LoadField | IrOp::LoadStatic | IrOp::StoreField | IrOp::StoreStatic => {
                let name_id = string_id(instr.operands.last()).ok_or_else(malformed)?;
                self.patches.push(Patch {
                    method_index,
                    byte_offset,
                    kind: PatchKind::StringId,
                });
                Ok(name_id)
            }
            IrOp::Call => {
                let name_id = string_id(instr.operands.last()).ok_or_else(malformed)?;
                let callee_name = self
                    .strings
                    .strings
                    .get(name_id as usize)
                    .cloned()
                    .ok_or_else(malformed)?;
                self.patches.push(Patch {
                    method_index,
                    byte_offset,
                    kind: PatchKind::CallTarget { callee_name },
                });
                Ok(0)
            }
            IrOp::Callv | IrOp::Calli => {
                let name_id = string_id(instr.operands.last()).ok_or_else(malformed)?;
                self.patches.push(Patch {
                    method_index,
                    byte_offset,
                    kind: PatchKind::StringId,
                });
                Ok(name_id)
            }
            IrOp::New | IrOp::NewArray | IrOp::Cast | IrOp::Instanceof => {
                let type_id = match instr.operands.last() {
                    Some(Value::I64(v)) => *v as u32,
                    _ => return Err(malformed()),
                };
                self.patches.push(Patch {
                    method_index,
                    byte_offset,
                    kind: PatchKind::TypeId,
                });
                Ok(type_id)
            }
            other => Err(EmitError::UnknownIrOpcode {
                function: function.name.clone(),
                op: ir_op_name(other),
            }),
        }
    }

    /// Consume the emitter, producing the finished per-unit bundle.
    pub fn finish(mut self) -> CompiledUnit {
        let declared: Vec<_> = self.types.entries().to_vec();
        let mut type_entries = Vec::with_capacity(declared.len());
        for entry in declared {
            if entry.type_id <= builtin_types::VOID {
                continue;
            }
            let name_id = self.strings.intern(&entry.name);
            let method_indices: Vec<usize> = self
                .methods
                .iter()
                .enumerate()
                .filter(|(_, m)| m.owner_type_id == entry.type_id)
                .map(|(i, _)| i)
                .collect();
            let method_start = method_indices.first().copied().unwrap_or(0) as u32;
            let method_count = method_indices.len() as u32;
            type_entries.push(TypeEntry {
                name_id,
                super_type_id: NO_SUPERTYPE,
                interface_type_ids: Vec::new(),
                field_start: 0,
                field_count: 0,
                method_start,
                method_count,
                flags: crate::tables::type_flags::CLASS,
            });
        }

        CompiledUnit {
            strings: self.strings.into_entries(),
            types: type_entries,
            methods: self.methods,
            fields: self.fields,
            constants: self.constants,
            bytecode: self.bytecode,
            method_names: self.method_names,
            patches: self.patches,
        }
    }
}

/// Emit every function of one lowered IR module, in declaration order.
/// Convenience wrapper around [`Emitter`] for the common "one unit at a
/// time" packaging flow.
pub fn emit_module(module: &ir::Module, types: &TypeTable) -> Result<CompiledUnit, EmitError> {
    let mut emitter = Emitter::new(types, &module.strings);
    for function in &module.functions {
        emitter.emit_function(function)?;
    }
    Ok(emitter.finish())
}

fn constant_entry(value: Value) -> Option<ConstantEntry> {
    Some(match value {
        Value::I64(v) => ConstantEntry::I64(v),
        Value::F64(v) => ConstantEntry::F64(v),
        Value::Bool(v) => ConstantEntry::Bool(v),
        Value::StringId(id) => ConstantEntry::StringRef(id),
        Value::Null => ConstantEntry::Null,
        Value::ObjectRef(_) | Value::Temp(_) => return None,
    })
}

fn slot_id(value: Option<&Value>) -> Option<u32> {
    match value {
        Some(Value::I64(v)) => Some(*v as u32),
        _ => None,
    }
}

fn string_id(value: Option<&Value>) -> Option<u32> {
    match value {
        Some(Value::StringId(id)) => Some(*id),
        _ => None,
    }
}

fn owning_type_id(types: &TypeTable, qualified_name: &str) -> u32 {
    let class_name = qualified_name.split("::").next().unwrap_or(qualified_name);
    types
        .entries()
        .iter()
        .find(|e| e.name == class_name)
        .map(|e| e.type_id)
        .unwrap_or(0)
}

fn ir_op_name(op: IrOp) -> &'static str {
    match op {
        IrOp::LoadConst => "LOAD_CONST",
        IrOp::LoadLocal => "LOAD_LOCAL",
        IrOp::LoadArg => "LOAD_ARG",
        IrOp::LoadField => "LOAD_FIELD",
        IrOp::LoadStatic => "LOAD_STATIC",
        IrOp::LoadArray => "LOAD_ARRAY",
        IrOp::StoreLocal => "STORE_LOCAL",
        IrOp::StoreField => "STORE_FIELD",
        IrOp::StoreStatic => "STORE_STATIC",
        IrOp::StoreArray => "STORE_ARRAY",
        IrOp::Add => "ADD",
        IrOp::Sub => "SUB",
        IrOp::Mul => "MUL",
        IrOp::Div => "DIV",
        IrOp::Mod => "MOD",
        IrOp::Neg => "NEG",
        IrOp::Inc => "INC",
        IrOp::Dec => "DEC",
        IrOp::Eq => "EQ",
        IrOp::Ne => "NE",
        IrOp::Lt => "LT",
        IrOp::Le => "LE",
        IrOp::Gt => "GT",
        IrOp::Ge => "GE",
        IrOp::And => "AND",
        IrOp::Or => "OR",
        IrOp::Not => "NOT",
        IrOp::Jmp => "JMP",
        IrOp::Jmpt => "JMPT",
        IrOp::Jmpf => "JMPF",
        IrOp::Call => "CALL",
        IrOp::Callv => "CALLV",
        IrOp::Calli => "CALLI",
        IrOp::Return => "RETURN",
        IrOp::ReturnVal => "RETURN_VAL",
        IrOp::New => "NEW",
        IrOp::NewArray => "NEW_ARRAY",
        IrOp::Cast => "CAST",
        IrOp::Instanceof => "INSTANCEOF",
        IrOp::IsNull => "IS_NULL",
        IrOp::IsNotNull => "IS_NOT_NULL",
        IrOp::Box => "BOX",
        IrOp::Unbox => "UNBOX",
        IrOp::GetType => "GET_TYPE",
        IrOp::Nop => "NOP",
        IrOp::Copy => "COPY",
        IrOp::Phi => "PHI",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helium_ir::ast::*;
    use helium_ir::translate_compilation_unit;

    fn unit_main_returns(expr: Expr) -> CompilationUnit {
        CompilationUnit {
            classes: vec![ClassDecl {
                name: "Program".into(),
                methods: vec![MethodDecl {
                    name: "main".into(),
                    params: vec![],
                    return_type: TypeName::Integer,
                    is_static: true,
                    body: vec![Stmt {
                        kind: StmtKind::Return(Some(expr)),
                        line: 1,
                        col: 1,
                    }],
                }],
            }],
        }
    }

    fn e(kind: ExprKind) -> Expr {
        Expr { kind, line: 1, col: 1 }
    }

    #[test]
    fn identity_function_emits_push_constant_then_return_value() {
        // main(): integer { return 42; } -- spec §8 scenario 1, resolved
        // through the constant-pool variant of PUSH_CONSTANT.
        let unit = unit_main_returns(e(ExprKind::IntLiteral(42)));
        let outcome = translate_compilation_unit(&unit);
        assert!(outcome.is_ok());
        let compiled = emit_module(&outcome.module, &outcome.types).unwrap();

        assert_eq!(compiled.methods.len(), 1);
        assert_eq!(compiled.methods[0].bytecode_len, 6);
        assert_eq!(
            compiled.bytecode,
            vec![
                Opcode::PushConstant as u8,
                0,
                0,
                0,
                0,
                Opcode::ReturnValue as u8,
            ]
        );
        assert_eq!(compiled.constants.get(0), Some(&ConstantEntry::I64(42)));
    }

    #[test]
    fn local_variable_round_trip_matches_scenario_3() {
        // var x: integer = 7; return x; -- spec §8 scenario 3.
        let unit = CompilationUnit {
            classes: vec![ClassDecl {
                name: "Program".into(),
                methods: vec![MethodDecl {
                    name: "main".into(),
                    params: vec![],
                    return_type: TypeName::Integer,
                    is_static: true,
                    body: vec![
                        Stmt {
                            kind: StmtKind::VarDecl {
                                name: "x".into(),
                                ty: TypeName::Integer,
                                init: Some(e(ExprKind::IntLiteral(7))),
                            },
                            line: 1,
                            col: 1,
                        },
                        Stmt {
                            kind: StmtKind::Return(Some(e(ExprKind::Identifier("x".into())))),
                            line: 2,
                            col: 1,
                        },
                    ],
                }],
            }],
        };
        let outcome = translate_compilation_unit(&unit);
        let compiled = emit_module(&outcome.module, &outcome.types).unwrap();

        assert_eq!(
            compiled.bytecode,
            vec![
                Opcode::PushConstant as u8,
                0,
                0,
                0,
                0,
                Opcode::StoreLocal as u8,
                0,
                0,
                0,
                0,
                Opcode::LoadLocal as u8,
                0,
                0,
                0,
                0,
                Opcode::ReturnValue as u8,
            ]
        );
    }

    #[test]
    fn total_bytes_equal_sum_of_opcode_plus_operand_widths() {
        // spec §8: "for every IR function, the total bytes emitted
        // equals Σ (1 + operand_width(op))".
        let mul = e(ExprKind::Binary {
            op: BinOp::Mul,
            left: Box::new(e(ExprKind::IntLiteral(3))),
            right: Box::new(e(ExprKind::IntLiteral(4))),
        });
        let add = e(ExprKind::Binary {
            op: BinOp::Add,
            left: Box::new(e(ExprKind::IntLiteral(2))),
            right: Box::new(mul),
        });
        let unit = unit_main_returns(add);
        let outcome = translate_compilation_unit(&unit);
        let function = &outcome.module.functions[0];
        let expected: usize = function
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .map(|i| 1 + ir_opcode::map(i.opcode).unwrap().operand_width() * 4)
            .sum();
        let compiled = emit_module(&outcome.module, &outcome.types).unwrap();
        assert_eq!(compiled.bytecode.len(), expected);
    }

    #[test]
    fn unresolved_call_is_recorded_as_a_patch_not_resolved_locally() {
        let unit = unit_main_returns(e(ExprKind::Call {
            callee: "println".into(),
            args: vec![e(ExprKind::IntLiteral(1))],
        }));
        let outcome = translate_compilation_unit(&unit);
        let compiled = emit_module(&outcome.module, &outcome.types).unwrap();
        let call_patch = compiled
            .patches
            .iter()
            .find(|p| matches!(p.kind, PatchKind::CallTarget { .. }));
        assert!(call_patch.is_some());
    }

    #[test]
    fn unknown_ir_opcode_is_rejected() {
        use helium_ir::ir::{BlockFlag, BlockFlags};
        use helium_ir::{BasicBlock, Function, Instruction, SourceLocation};
        let function = Function {
            name: "Bad::phi".into(),
            signature_hash: 0,
            return_type: builtin_types::VOID,
            param_types: vec![],
            local_count: 0,
            blocks: vec![{
                let mut block = BasicBlock {
                    id: 0,
                    label: None,
                    instructions: vec![Instruction {
                        opcode: IrOp::Phi,
                        operands: vec![],
                        result: None,
                        jump_target: None,
                        location: SourceLocation::default(),
                    }],
                    predecessors: Default::default(),
                    successors: Default::default(),
                    flags: BlockFlags::empty(),
                };
                block.flags.insert(BlockFlag::Entry);
                block.flags.insert(BlockFlag::Reachable);
                block
            }],
            entry: 0,
            is_static: true,
            is_virtual: false,
            is_async: false,
        };
        let types = TypeTable::new();
        let mut emitter = Emitter::new(&types, &[]);
        let err = emitter.emit_function(&function).unwrap_err();
        assert!(matches!(err, EmitError::UnknownIrOpcode { .. }));
    }
}
