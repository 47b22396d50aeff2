//! The IR-op → bytecode-opcode mapping, authoritative per spec §6.3.
//!
//! Published here (not duplicated in `helium-vm`) because only the emitter
//! needs the IR side of the mapping; the interpreter only ever sees
//! [`helium_asm::Opcode`] bytes. Keeping the map in one function next to
//! the emitter that is its only caller satisfies §9's "opcode numbering
//! must be published in a single header table" without forcing the
//! interpreter to depend on `helium-ir`.

use helium_asm::Opcode;
use helium_ir::IrOp;

/// Map one `IrOp` onto its published bytecode `Opcode`, or `None` if the
/// IR provides no direct counterpart (`Phi`, which `helium-ir::lower`
/// never emits, and is rejected by the emitter as `UnknownIrOpcode` if it
/// ever appears).
pub fn map(op: IrOp) -> Option<Opcode> {
    Some(match op {
        IrOp::LoadConst => Opcode::PushConstant,
        IrOp::LoadLocal => Opcode::LoadLocal,
        IrOp::LoadArg => Opcode::LoadArg,
        IrOp::LoadField => Opcode::LoadField,
        IrOp::LoadStatic => Opcode::LoadStatic,
        IrOp::LoadArray => Opcode::LoadArray,
        IrOp::StoreLocal => Opcode::StoreLocal,
        IrOp::StoreField => Opcode::StoreField,
        IrOp::StoreStatic => Opcode::StoreStatic,
        IrOp::StoreArray => Opcode::StoreArray,
        IrOp::Add => Opcode::Add,
        IrOp::Sub => Opcode::Sub,
        IrOp::Mul => Opcode::Mul,
        IrOp::Div => Opcode::Div,
        IrOp::Mod => Opcode::Mod,
        IrOp::Neg => Opcode::Neg,
        IrOp::Inc => Opcode::Inc,
        IrOp::Dec => Opcode::Dec,
        IrOp::Eq => Opcode::Eq,
        IrOp::Ne => Opcode::Ne,
        IrOp::Lt => Opcode::Lt,
        IrOp::Le => Opcode::Le,
        IrOp::Gt => Opcode::Gt,
        IrOp::Ge => Opcode::Ge,
        IrOp::And => Opcode::And,
        IrOp::Or => Opcode::Or,
        IrOp::Not => Opcode::Not,
        IrOp::Jmp => Opcode::Jmp,
        IrOp::Jmpt => Opcode::Jmpt,
        IrOp::Jmpf => Opcode::Jmpf,
        IrOp::Call => Opcode::Call,
        IrOp::Callv => Opcode::Callv,
        IrOp::Calli => Opcode::Calli,
        IrOp::Return => Opcode::Return,
        IrOp::ReturnVal => Opcode::ReturnValue,
        IrOp::New => Opcode::NewObject,
        IrOp::NewArray => Opcode::NewArray,
        IrOp::Instanceof => Opcode::IsInstanceOf,
        IrOp::Cast => Opcode::Cast,
        IrOp::IsNull => Opcode::IsNull,
        IrOp::IsNotNull => Opcode::IsNotNull,
        IrOp::Box => Opcode::Box,
        IrOp::Unbox => Opcode::Unbox,
        IrOp::GetType => Opcode::GetType,
        IrOp::Nop => Opcode::Nop,
        IrOp::Copy => Opcode::Copy,
        IrOp::Phi => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_ir_op_but_phi_maps_to_an_opcode() {
        for op in IrOp::iter() {
            if matches!(op, IrOp::Phi) {
                assert!(map(op).is_none());
            } else {
                assert!(map(op).is_some(), "{op:?} has no opcode mapping");
            }
        }
    }
}
