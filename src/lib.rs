#![crate_name = "gruesome"]
#![allow(dead_code)]

pub mod config;
pub mod dictionary;
pub mod display_headless;
pub mod display_trait;
pub mod header;
pub mod instruction;
pub mod interpreter;
pub mod opcode_tables;
pub mod quetzal;
pub mod text;
pub mod undo;
pub mod vm;
pub mod zrand;

#[cfg(test)]
mod tests {
    use crate::instruction::Instruction;
    use crate::interpreter::{ExecutionResult, Interpreter};
    use crate::vm::{Game, VM};
    use crate::zrand::ZRand;
    use test_log::test;

    fn blank_v3_memory() -> Vec<u8> {
        let mut memory = vec![0u8; 0x10000];
        memory[0x00] = 3; // version
        memory[0x04] = 0x10; // high memory base
        memory[0x05] = 0x00;
        memory[0x06] = 0x50; // initial PC
        memory[0x07] = 0x00;
        memory[0x0c] = 0x01; // global variables table
        memory[0x0d] = 0x00;
        memory[0x0e] = 0x02; // static memory base
        memory[0x0f] = 0x00;
        memory
    }

    fn interpreter_for(memory: Vec<u8>) -> Interpreter {
        let game = Game::from_memory(memory).unwrap();
        let vm = VM::new(game, 1024, 256, ZRand::new_predictable(42));
        Interpreter::new(vm)
    }

    #[test]
    fn runs_print_num_newline_quit() {
        let mut memory = blank_v3_memory();
        let pc = 0x5000;
        memory[pc] = 0xE6; // VAR print_num
        memory[pc + 1] = 0x7F; // small constant, then omitted x3
        memory[pc + 2] = 42;
        memory[pc + 3] = 0xBB; // new_line
        memory[pc + 4] = 0xBA; // quit

        let mut interpreter = interpreter_for(memory);
        interpreter.run().unwrap();
    }

    #[test]
    fn decodes_instructions_from_a_fresh_vm() {
        let memory = blank_v3_memory();
        let interpreter = interpreter_for(memory);
        let inst =
            Instruction::decode(&interpreter.vm.game.memory, interpreter.vm.pc as usize, 3)
                .unwrap();
        assert!(inst.size > 0);
    }

    #[test]
    fn run_with_limit_stops_on_quit() {
        let mut memory = blank_v3_memory();
        let pc = 0x5000;
        memory[pc] = 0xBA; // quit
        let mut interpreter = interpreter_for(memory);
        let result = interpreter.run_with_limit(Some(10));
        assert!(result.is_ok());
    }

    #[test]
    fn execute_instruction_reports_quit() {
        let mut memory = blank_v3_memory();
        memory[0x5000] = 0xBA; // quit
        let mut interpreter = interpreter_for(memory);
        let inst = Instruction::decode(&interpreter.vm.game.memory, 0x5000, 3).unwrap();
        let result = interpreter.execute_instruction(&inst).unwrap();
        assert!(matches!(result, ExecutionResult::Quit));
    }
}

/*
An example memory map of a small game:

Dynamic 00000  header
        00040  abbreviation strings
        00042  abbreviation table
        00102  property defaults
        00140  objects
        002f0  object descriptions and properties
        006e3  global variables
        008c3  arrays
Static  00b48  grammar table
        010a7  actions table
        01153  preactions table
        01201  adjectives table
        0124d  dictionary
High    01a0a  Z-code
        05d56  static strings
        06ae6  end of file
*/
