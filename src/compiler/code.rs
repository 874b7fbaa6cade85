//! Instruction emission and jump-patch lists (spec §4.3.5).

use super::errors::CompileError;
use crate::vm::opcode::Instruction;

#[derive(Default)]
pub struct CodeBuffer {
    pub instructions: Vec<Instruction>,
    pub lines: Vec<u32>,
}

impl CodeBuffer {
    pub fn pc(&self) -> usize {
        self.instructions.len()
    }

    pub fn emit(&mut self, instr: Instruction, line: u32) -> usize {
        let pc = self.instructions.len();
        self.instructions.push(instr);
        self.lines.push(line);
        pc
    }

    pub fn patch(&mut self, pc: usize, instr: Instruction) {
        self.instructions[pc] = instr;
    }

    /// Rewrite a jump-family instruction's sBx field so it targets
    /// `target_pc` (offsets are relative to the instruction *after* the
    /// jump, per §4.3.5 `target - patch_pc - 1`).
    pub fn patch_jump(&mut self, jump_pc: usize, target_pc: usize, line_for_err: u32) -> Result<(), CompileError> {
        let offset = target_pc as i64 - jump_pc as i64 - 1;
        if offset.abs() >= (1 << 17) {
            return Err(CompileError::JumpOffsetOverflow { line: line_for_err });
        }
        let old = self.instructions[jump_pc];
        let (op, a, _) = old.decode_asbx();
        self.instructions[jump_pc] = Instruction::encode_asbx(op, a, offset as i32);
        Ok(())
    }

    pub fn patch_list(&mut self, list: &[usize], target_pc: usize, line_for_err: u32) -> Result<(), CompileError> {
        for &pc in list {
            self.patch_jump(pc, target_pc, line_for_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::opcode::OpCode;

    #[test]
    fn emit_returns_sequential_program_counters() {
        let mut code = CodeBuffer::default();
        let p0 = code.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), 1);
        let p1 = code.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), 2);
        assert_eq!((p0, p1), (0, 1));
        assert_eq!(code.pc(), 2);
    }

    #[test]
    fn patch_jump_targets_the_instruction_after_itself_on_a_forward_jump() {
        let mut code = CodeBuffer::default();
        let jmp = code.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), 1);
        code.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), 2); // filler
        let target = code.pc();
        code.patch_jump(jmp, target, 1).unwrap();
        let (_, _, sbx) = code.instructions[jmp].decode_asbx();
        assert_eq!(sbx, (target as i64 - jmp as i64 - 1) as i32);
    }

    #[test]
    fn patch_jump_handles_a_backward_jump() {
        let mut code = CodeBuffer::default();
        let loop_top = code.pc();
        code.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), 1); // filler
        let jmp = code.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), 2);
        code.patch_jump(jmp, loop_top, 2).unwrap();
        let (_, _, sbx) = code.instructions[jmp].decode_asbx();
        assert_eq!(sbx, (loop_top as i64 - jmp as i64 - 1) as i32);
    }

    #[test]
    fn patch_list_patches_every_entry_to_the_same_target() {
        let mut code = CodeBuffer::default();
        let a = code.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), 1);
        let b = code.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), 2);
        let target = code.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), 3);
        code.patch_list(&[a, b], target, 1).unwrap();
        assert_eq!(code.instructions[a].decode_asbx().2, target as i32 - a as i32 - 1);
        assert_eq!(code.instructions[b].decode_asbx().2, target as i32 - b as i32 - 1);
    }

    #[test]
    fn patch_jump_rejects_an_offset_too_large_to_encode() {
        let mut code = CodeBuffer::default();
        let jmp = code.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), 1);
        let far = (1usize << 18) + jmp;
        assert!(code.patch_jump(jmp, far, 1).is_err());
    }
}
