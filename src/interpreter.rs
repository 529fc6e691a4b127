//! Instruction dispatch: the fetch/decode/execute loop and every opcode's
//! behavior, per §4.5 (dispatcher), §4.6 (save/restore/undo), §4.7
//! (arithmetic), and §4.8 (branches/jumps).
//!
//! Decoding itself lives in [`crate::instruction`]; this module interprets
//! a decoded [`Instruction`] against a [`VM`] and a [`ZMachineDisplay`] I/O
//! port.

use crate::config::Config;
use crate::display_headless::HeadlessDisplay;
use crate::display_trait::{DisplayError, ZMachineDisplay};
use crate::instruction::{Instruction, InstructionForm, OperandCount};
use crate::quetzal::restore::restore_game;
use crate::quetzal::save::SaveGame;
use crate::text;
use crate::undo::UndoRing;
use crate::vm::{CallFrame, ReturnTarget, VM};
use log::{debug, warn};

/// What the dispatch loop should do after one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    Continue,
    Quit,
}

/// One open `@output_stream 3` redirection: text is ZSCII-encoded into
/// memory starting two bytes past `addr` (the leading word is the length,
/// filled in when the stream closes) rather than sent to the screen.
struct MemoryStream {
    addr: usize,
    length: u16,
}

/// Owns the VM plus everything dispatch needs beyond raw memory and
/// stacks: the I/O port, startup configuration, and the undo ring.
pub struct Interpreter {
    pub vm: VM,
    display: Box<dyn ZMachineDisplay>,
    config: Config,
    undo_ring: UndoRing,
    instruction_count: u64,
    memory_streams: Vec<MemoryStream>,
}

impl Interpreter {
    /// Builds an interpreter with a headless, buffer-only I/O port and
    /// default configuration. Embedding programs that need a real terminal
    /// or custom configuration should use [`Interpreter::with_config`].
    pub fn new(vm: VM) -> Self {
        Self::with_config(
            vm,
            Box::new(HeadlessDisplay::new().expect("headless display never fails")),
            Config::default(),
        )
    }

    pub fn with_display(vm: VM, display: Box<dyn ZMachineDisplay>) -> Self {
        Self::with_config(vm, display, Config::default())
    }

    pub fn with_config(vm: VM, display: Box<dyn ZMachineDisplay>, config: Config) -> Self {
        let undo_ring = UndoRing::new(config.max_saves, !config.disable_undo_compression);
        Interpreter {
            vm,
            display,
            config,
            undo_ring,
            instruction_count: 0,
            memory_streams: Vec::new(),
        }
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Runs until `@quit` or a fatal error.
    pub fn run(&mut self) -> Result<(), String> {
        self.run_with_limit(None)
    }

    /// Runs until `@quit`, a fatal error, or `limit` instructions have
    /// executed (whichever comes first). A `None` limit runs unbounded.
    pub fn run_with_limit(&mut self, limit: Option<u64>) -> Result<(), String> {
        loop {
            if let Some(limit) = limit {
                if self.instruction_count >= limit {
                    return Ok(());
                }
            }
            let inst = self.vm.decode_instruction_at(self.vm.pc)?;
            self.vm.pc += inst.size;
            self.instruction_count += 1;

            match self.execute_instruction(&inst)? {
                ExecutionResult::Continue => {}
                ExecutionResult::Quit => return Ok(()),
            }
        }
    }

    pub fn execute_instruction(&mut self, inst: &Instruction) -> Result<ExecutionResult, String> {
        match inst.form {
            InstructionForm::Long => self.execute_2op(inst.opcode, inst),
            InstructionForm::Short => match inst.operand_count {
                OperandCount::OP0 => self.execute_0op(inst),
                OperandCount::OP1 => self.execute_1op(inst),
                _ => Err(format!(
                    "short-form instruction with unexpected operand count at {:#06x}",
                    self.vm.pc
                )),
            },
            InstructionForm::Variable => {
                if inst.operand_count == OperandCount::OP2 {
                    self.execute_2op(inst.opcode, inst)
                } else {
                    self.execute_var(inst)
                }
            }
            InstructionForm::Extended => self.execute_ext(inst),
        }
    }

    // ---- Shared helpers -----------------------------------------------------

    fn store_result(&mut self, inst: &Instruction, value: u16) -> Result<(), String> {
        if let Some(var) = inst.store_var {
            self.vm.write_variable(var, value)?;
        }
        Ok(())
    }

    /// Applies an instruction's branch tail given the opcode's boolean
    /// result. Offset 0/1 are the `rfalse`/`rtrue` sentinels (§4.8).
    fn do_branch(&mut self, inst: &Instruction, condition: bool) -> Result<ExecutionResult, String> {
        let branch = inst
            .branch
            .as_ref()
            .ok_or_else(|| "opcode has no branch tail to act on".to_string())?;
        if condition != branch.on_true {
            return Ok(ExecutionResult::Continue);
        }
        match branch.offset {
            0 => {
                self.do_return(0)?;
                Ok(ExecutionResult::Continue)
            }
            1 => {
                self.do_return(1)?;
                Ok(ExecutionResult::Continue)
            }
            offset => {
                self.vm.pc = (self.vm.pc as i64 + offset as i64 - 2) as usize;
                Ok(ExecutionResult::Continue)
            }
        }
    }

    /// Unwinds the top call frame and delivers `value` per its
    /// [`ReturnTarget`]. Errs if only the permanent dummy frame remains
    /// (returning from the top level is undefined, per §4.4).
    fn do_return(&mut self, value: u16) -> Result<(), String> {
        if self.vm.call_stack.len() <= 1 {
            return Err("return with no routine active".to_string());
        }
        let frame = self.vm.call_stack.pop().expect("checked len above");
        self.vm.stack.truncate(frame.stack_base);
        self.vm.pc = frame.return_pc;
        match frame.return_target {
            ReturnTarget::Store(var) => self.vm.write_variable(var, value)?,
            ReturnTarget::Discard => {}
            ReturnTarget::PushOnReturn => self.vm.push(value)?,
        }
        Ok(())
    }

    fn deliver(&mut self, target: ReturnTarget, value: u16) -> Result<(), String> {
        match target {
            ReturnTarget::Store(var) => self.vm.write_variable(var, value),
            ReturnTarget::Discard => Ok(()),
            ReturnTarget::PushOnReturn => self.vm.push(value),
        }
    }

    /// Calls a packed routine address with `args`, per §4.4. Calling
    /// address 0 is a no-op that delivers false without pushing a frame.
    fn do_call(&mut self, packed_addr: u16, args: &[u16], target: ReturnTarget) -> Result<(), String> {
        if packed_addr == 0 {
            return self.deliver(target, 0);
        }
        if self.vm.call_stack.len() >= self.vm.call_stack_limit() {
            return Err("call stack overflow".to_string());
        }

        let addr = self.vm.game.header.unpack_routine(packed_addr);
        let num_locals = self.vm.read_byte(addr) as usize;
        if num_locals > 15 {
            return Err(format!(
                "routine at {addr:#06x} declares {num_locals} locals (maximum 15)"
            ));
        }

        let mut locals = [0u16; 16];
        let mut entry_pc = addr + 1;
        if self.vm.game.header.version <= 4 {
            for slot in locals.iter_mut().take(num_locals) {
                *slot = self.vm.read_word(entry_pc);
                entry_pc += 2;
            }
        }
        for (slot, &arg) in locals.iter_mut().zip(args.iter()).take(num_locals) {
            *slot = arg;
        }

        let frame = CallFrame {
            return_pc: self.vm.pc,
            stack_base: self.vm.stack.len(),
            locals,
            num_locals: num_locals as u8,
            num_args: args.len().min(7) as u8,
            return_target: target,
        };
        self.vm.call_stack.push(frame);
        self.vm.pc = entry_pc;
        Ok(())
    }

    /// Calls `packed_addr` and drives the fetch/execute loop until it
    /// returns, yielding its return value. Used for timed-input interrupt
    /// routines (§4.4/§6), which must be able to run arbitrary opcodes —
    /// including further calls — rather than a hand-rolled sub-dispatch.
    ///
    /// Any output the routine produces while running goes to a throwaway
    /// display rather than the live one (see [`Self::read_line`]), so
    /// interrupt-routine output is never interleaved with the main
    /// transcript.
    fn call_routine_and_run(&mut self, packed_addr: u16, args: &[u16]) -> Result<u16, String> {
        if packed_addr == 0 {
            return Ok(0);
        }
        let target_depth = self.vm.call_stack.len();
        self.do_call(packed_addr, args, ReturnTarget::PushOnReturn)?;

        while self.vm.call_stack.len() > target_depth {
            let inst = self.vm.decode_instruction_at(self.vm.pc)?;
            self.vm.pc += inst.size;
            match self.execute_instruction(&inst)? {
                ExecutionResult::Continue => {}
                ExecutionResult::Quit => return Err("interrupt routine attempted @quit".to_string()),
            }
        }
        self.vm.pop()
    }

    /// Routes printed text to the innermost open `@output_stream 3` memory
    /// redirection if any, otherwise to the I/O port.
    fn emit(&mut self, text: &str) -> Result<(), String> {
        if let Some(stream) = self.memory_streams.last_mut() {
            for ch in text.chars() {
                self.vm
                    .write_byte(stream.addr + stream.length as usize, char_to_zscii_byte(ch))?;
                stream.length += 1;
            }
            return Ok(());
        }
        self.display.print(text).map_err(String::from)
    }

    fn alphabet_override(&self) -> Option<[[char; 26]; 3]> {
        text::alphabet_override_from_header(&self.vm.game.memory, &self.vm.game.header)
    }

    /// Re-decodes `print`/`print_ret`'s inline packed string honoring any
    /// v5+ header-extension alphabet-table override. `inst.text` is only a
    /// default-alphabet stand-in computed during decode to measure length.
    fn decode_inline_text(&self, inst: &Instruction) -> Result<String, String> {
        let Some(addr) = inst.text_addr else {
            return Ok(inst.text.clone().unwrap_or_default());
        };
        let unicode_table = self.vm.unicode_table();
        let (string, _) = text::decode_string_with_unicode_table(
            &self.vm.game.memory,
            addr,
            self.vm.game.header.abbrev_table,
            self.vm.game.header.version,
            self.alphabet_override(),
            unicode_table.as_deref(),
        )?;
        Ok(string)
    }

    fn do_save(&mut self) -> Result<bool, String> {
        let save = SaveGame::from_vm(&self.vm, !self.config.disable_undo_compression)
            .map_err(|e| format!("failed to build save data: {e}"))?;
        match self.display.save_blob_write(&save.to_bytes()) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("save failed: {e}");
                Ok(false)
            }
        }
    }

    /// On success, leaves `vm` already restored (including `pc`); the
    /// caller just continues the fetch loop from there. The variable that
    /// originally stored `@save`'s result keeps the value it had at save
    /// time rather than being rewritten to 2 for the resumed continuation —
    /// a simplification recorded in the design notes.
    fn do_restore(&mut self) -> Result<bool, String> {
        let bytes = match self.display.save_blob_read() {
            Ok(b) => b,
            Err(e) => {
                warn!("restore failed: no save data available ({e})");
                return Ok(false);
            }
        };
        match restore_game(&mut self.vm, &bytes) {
            Ok(effects) => {
                self.vm.game.reapply_capability_flags(&self.config);
                if effects.close_upper_window {
                    let _ = self.display.split_window(0);
                }
                Ok(true)
            }
            Err(e) => {
                warn!("restore failed: {e}");
                Ok(false)
            }
        }
    }

    fn show_status(&mut self) -> Result<(), String> {
        let location_obj = self.vm.read_global(16)?;
        let location = self.vm.get_object_name(location_obj)?;
        let g1 = self.vm.read_global(17)? as i16;
        let g2 = self.vm.read_global(18)?;
        self.display
            .show_status(&location, g1, g2)
            .map_err(String::from)
    }

    fn verify_checksum(&self) -> bool {
        let header = &self.vm.game.header;
        let end = header.file_length.min(self.vm.game.memory.len());
        if end <= 0x40 {
            return false;
        }
        let sum = self.vm.game.memory[0x40..end]
            .iter()
            .fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
        sum == header.checksum_file
    }

    /// Reads a line of input for `sread`/`aread`, driving an optional timer
    /// routine through [`Self::call_routine_and_run`]. Swaps the I/O port
    /// out for the duration of the call so the nested dispatch loop (which
    /// may run the timer routine) can still borrow `self` freely.
    fn read_line(
        &mut self,
        max_len: usize,
        timeout_tenths: u16,
        timer_routine: u16,
    ) -> Result<crate::display_trait::LineInput, String> {
        let mut display = std::mem::replace(
            &mut self.display,
            Box::new(HeadlessDisplay::new().expect("headless display never fails")),
        );
        let mut timer = || -> Result<bool, DisplayError> {
            self.call_routine_and_run(timer_routine, &[])
                .map(|v| v != 0)
                .map_err(DisplayError::new)
        };
        let result = display
            .get_line(max_len, timeout_tenths, &mut timer)
            .map_err(String::from);
        self.display = display;
        result
    }

    fn read_char(
        &mut self,
        timeout_tenths: u16,
        timer_routine: u16,
    ) -> Result<crate::display_trait::CharInput, String> {
        let mut display = std::mem::replace(
            &mut self.display,
            Box::new(HeadlessDisplay::new().expect("headless display never fails")),
        );
        let mut timer = || -> Result<bool, DisplayError> {
            self.call_routine_and_run(timer_routine, &[])
                .map(|v| v != 0)
                .map_err(DisplayError::new)
        };
        let result = display
            .get_char(timeout_tenths, &mut timer)
            .map_err(String::from);
        self.display = display;
        result
    }

    // ---- 2OP (Long form, or Variable form with two operands) ----------------

    fn execute_2op(&mut self, opcode: u8, inst: &Instruction) -> Result<ExecutionResult, String> {
        let ops = &inst.operands;
        match opcode {
            0x01 => {
                // je: operand 0 compared against up to three others.
                let found = ops.len() > 1 && ops[1..].iter().any(|&o| o == ops[0]);
                self.do_branch(inst, found)
            }
            0x02 => self.do_branch(inst, (ops[0] as i16) < (ops[1] as i16)),
            0x03 => self.do_branch(inst, (ops[0] as i16) > (ops[1] as i16)),
            0x04 => {
                // dec_chk: decrement indirect variable, branch if now < value.
                let var = ops[0] as u8;
                let new = (self.vm.read_variable(var)? as i16).wrapping_sub(1);
                self.vm.write_variable(var, new as u16)?;
                self.do_branch(inst, new < ops[1] as i16)
            }
            0x05 => {
                let var = ops[0] as u8;
                let new = (self.vm.read_variable(var)? as i16).wrapping_add(1);
                self.vm.write_variable(var, new as u16)?;
                self.do_branch(inst, new > ops[1] as i16)
            }
            0x06 => {
                let parent = self.vm.get_parent(ops[0])?;
                self.do_branch(inst, parent == ops[1])
            }
            0x07 => self.do_branch(inst, ops[0] & ops[1] == ops[1]),
            0x08 => {
                self.store_result(inst, ops[0] | ops[1])?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                self.store_result(inst, ops[0] & ops[1])?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                let attr = self.vm.test_attribute(ops[0], ops[1] as u8)?;
                self.do_branch(inst, attr)
            }
            0x0B => {
                self.vm.set_attribute(ops[0], ops[1] as u8)?;
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                self.vm.clear_attribute(ops[0], ops[1] as u8)?;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                self.vm.write_variable(ops[0] as u8, ops[1])?;
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                self.vm.insert_object(ops[0], ops[1])?;
                Ok(ExecutionResult::Continue)
            }
            0x0F => {
                let addr = ops[0] as usize + 2 * ops[1] as usize;
                self.store_result(inst, self.vm.read_word(addr))?;
                Ok(ExecutionResult::Continue)
            }
            0x10 => {
                let addr = ops[0] as usize + ops[1] as usize;
                self.store_result(inst, self.vm.read_byte(addr) as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x11 => {
                let value = self.vm.get_property(ops[0], ops[1] as u8)?;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x12 => {
                let addr = self.vm.get_property_addr(ops[0], ops[1] as u8)?;
                self.store_result(inst, addr as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x13 => {
                let next = self.vm.get_next_property(ops[0], ops[1] as u8)?;
                self.store_result(inst, next as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x14 => {
                self.store_result(inst, ops[0].wrapping_add(ops[1]))?;
                Ok(ExecutionResult::Continue)
            }
            0x15 => {
                self.store_result(inst, ops[0].wrapping_sub(ops[1]))?;
                Ok(ExecutionResult::Continue)
            }
            0x16 => {
                self.store_result(inst, ops[0].wrapping_mul(ops[1]))?;
                Ok(ExecutionResult::Continue)
            }
            0x17 => {
                let divisor = ops[1] as i16;
                if divisor == 0 {
                    return Err("division by zero".to_string());
                }
                let quotient = (ops[0] as i16).wrapping_div(divisor);
                self.store_result(inst, quotient as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x18 => {
                let divisor = ops[1] as i16;
                if divisor == 0 {
                    return Err("modulo by zero".to_string());
                }
                let remainder = (ops[0] as i16).wrapping_rem(divisor);
                self.store_result(inst, remainder as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x19 => {
                let args: Vec<u16> = ops[1..].to_vec();
                let target = ReturnTarget::Store(inst.store_var.unwrap_or(0));
                self.do_call(ops[0], &args, target)?;
                Ok(ExecutionResult::Continue)
            }
            0x1A => {
                let args: Vec<u16> = ops[1..].to_vec();
                self.do_call(ops[0], &args, ReturnTarget::Discard)?;
                Ok(ExecutionResult::Continue)
            }
            0x1B => {
                let _ = self.display.set_colour(ops[0] as i16, ops[1] as i16);
                Ok(ExecutionResult::Continue)
            }
            0x1C => {
                self.execute_throw(ops[0], ops[1])?;
                Ok(ExecutionResult::Continue)
            }
            _ => Err(format!("unimplemented 2OP opcode {opcode:#04x}")),
        }
    }

    /// `@throw`: unwinds to the frame active when the matching `@catch` ran
    /// and returns `value` from it, per §4.4.
    fn execute_throw(&mut self, value: u16, catch_token: u16) -> Result<(), String> {
        let target_depth = catch_token as usize;
        if target_depth == 0 || target_depth > self.vm.call_stack.len() {
            return Err(format!("throw to invalid call depth {target_depth}"));
        }
        self.vm.call_stack.truncate(target_depth);
        self.do_return(value)
    }

    // ---- 1OP -----------------------------------------------------------------

    fn execute_1op(&mut self, inst: &Instruction) -> Result<ExecutionResult, String> {
        let op = inst.operands[0];
        let version = self.vm.game.header.version;
        match inst.opcode {
            0x00 => self.do_branch(inst, op == 0),
            0x01 => {
                let sibling = self.vm.get_sibling(op)?;
                self.store_result(inst, sibling)?;
                self.do_branch(inst, sibling != 0)
            }
            0x02 => {
                let child = self.vm.get_child(op)?;
                self.store_result(inst, child)?;
                self.do_branch(inst, child != 0)
            }
            0x03 => {
                let parent = self.vm.get_parent(op)?;
                self.store_result(inst, parent)?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                let len = self.vm.get_property_len(op as usize);
                self.store_result(inst, len)?;
                Ok(ExecutionResult::Continue)
            }
            0x05 => {
                let var = op as u8;
                let new = (self.vm.read_variable(var)? as i16).wrapping_add(1);
                self.vm.write_variable(var, new as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x06 => {
                let var = op as u8;
                let new = (self.vm.read_variable(var)? as i16).wrapping_sub(1);
                self.vm.write_variable(var, new as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x07 => {
                let unicode_table = self.vm.unicode_table();
                let (string, _) = text::decode_string_with_unicode_table(
                    &self.vm.game.memory,
                    op as usize,
                    self.vm.game.header.abbrev_table,
                    version,
                    self.alphabet_override(),
                    unicode_table.as_deref(),
                )?;
                self.emit(&string)?;
                Ok(ExecutionResult::Continue)
            }
            0x08 => {
                let target = ReturnTarget::Store(inst.store_var.unwrap_or(0));
                self.do_call(op, &[], target)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                self.vm.remove_object(op)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                let name = self.vm.get_object_name(op)?;
                self.emit(&name)?;
                Ok(ExecutionResult::Continue)
            }
            0x0B => {
                self.do_return(op)?;
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                self.vm.pc = (self.vm.pc as i64 + (op as i16) as i64 - 2) as usize;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                let unicode_table = self.vm.unicode_table();
                let string = text::decode_string_at_packed_addr(
                    &self.vm.game.memory,
                    op,
                    &self.vm.game.header,
                    unicode_table.as_deref(),
                )?;
                self.emit(&string)?;
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                let value = self.vm.read_variable(op as u8)?;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x0F => {
                if version >= 5 {
                    // call_1n: discards its result.
                    self.do_call(op, &[], ReturnTarget::Discard)?;
                    Ok(ExecutionResult::Continue)
                } else {
                    self.store_result(inst, !op)?;
                    Ok(ExecutionResult::Continue)
                }
            }
            _ => Err(format!("unimplemented 1OP opcode {:#04x}", inst.opcode)),
        }
    }

    // ---- 0OP -------------------------------------------------------------------

    fn execute_0op(&mut self, inst: &Instruction) -> Result<ExecutionResult, String> {
        let version = self.vm.game.header.version;
        match inst.opcode {
            0x00 => {
                self.do_return(1)?;
                Ok(ExecutionResult::Continue)
            }
            0x01 => {
                self.do_return(0)?;
                Ok(ExecutionResult::Continue)
            }
            0x02 => {
                let text = self.decode_inline_text(inst)?;
                self.emit(&text)?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                let text = self.decode_inline_text(inst)?;
                self.emit(&text)?;
                self.emit("\n")?;
                self.do_return(1)?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => Ok(ExecutionResult::Continue),
            0x05 => {
                let ok = self.do_save()?;
                if version <= 3 {
                    self.do_branch(inst, ok)
                } else {
                    self.store_result(inst, ok as u16)?;
                    Ok(ExecutionResult::Continue)
                }
            }
            0x06 => {
                let ok = self.do_restore()?;
                if ok {
                    return Ok(ExecutionResult::Continue);
                }
                if version <= 3 {
                    self.do_branch(inst, false)
                } else {
                    self.store_result(inst, 0)?;
                    Ok(ExecutionResult::Continue)
                }
            }
            0x07 => {
                self.vm.reset();
                self.vm.game.reapply_capability_flags(&self.config);
                Ok(ExecutionResult::Continue)
            }
            0x08 => {
                let value = self.vm.pop()?;
                self.do_return(value)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                if version >= 5 {
                    // catch: records a token identifying this call frame for
                    // a later @throw to unwind to.
                    let depth = self.vm.call_stack.len() as u16;
                    self.store_result(inst, depth)?;
                } else {
                    self.vm.pop()?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x0A => Ok(ExecutionResult::Quit),
            0x0B => {
                self.emit("\n")?;
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                self.show_status()?;
                Ok(ExecutionResult::Continue)
            }
            0x0D => self.do_branch(inst, self.verify_checksum()),
            0x0E => Err("extended opcode form requires version 5 or later".to_string()),
            0x0F => self.do_branch(inst, true),
            _ => Err(format!("unimplemented 0OP opcode {:#04x}", inst.opcode)),
        }
    }

    // ---- VAR -------------------------------------------------------------------

    fn execute_var(&mut self, inst: &Instruction) -> Result<ExecutionResult, String> {
        let ops = &inst.operands;
        let version = self.vm.game.header.version;
        match inst.opcode {
            0x00 => {
                let target = ReturnTarget::Store(inst.store_var.unwrap_or(0));
                self.do_call(ops[0], &ops[1..], target)?;
                Ok(ExecutionResult::Continue)
            }
            0x01 => {
                let addr = ops[0] as usize + 2 * ops[1] as usize;
                let transcript_change = self.vm.user_store_word(addr, ops[2])?;
                self.sync_transcript(transcript_change)?;
                Ok(ExecutionResult::Continue)
            }
            0x02 => {
                let addr = ops[0] as usize + ops[1] as usize;
                let transcript_change = self.vm.user_store_byte(addr, ops[2] as u8)?;
                self.sync_transcript(transcript_change)?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                self.vm.put_property(ops[0], ops[1] as u8, ops[2])?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                let max_len = self.vm.read_byte(ops[0] as usize) as usize;
                let timeout = ops.get(2).copied().unwrap_or(0);
                let timer_routine = ops.get(3).copied().unwrap_or(0);
                let line = self.read_line(max_len, timeout, timer_routine)?;
                let text_start = if version >= 5 {
                    self.vm.write_byte(ops[0] as usize + 1, line.text.len() as u8)?;
                    2
                } else {
                    1
                };
                for (i, ch) in line.text.chars().enumerate() {
                    self.vm.write_byte(
                        ops[0] as usize + text_start + i,
                        char_to_zscii_byte(ch.to_ascii_lowercase()),
                    )?;
                }
                if version < 5 {
                    self.vm.write_byte(
                        ops[0] as usize + text_start + line.text.chars().count(),
                        0,
                    )?;
                }
                if let Some(&parse_buffer) = ops.get(1) {
                    if parse_buffer != 0 {
                        self.vm.parse_text(ops[0] as usize, parse_buffer as usize)?;
                    }
                }
                if version >= 5 {
                    self.store_result(inst, line.terminator as u16)?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x05 => {
                let unicode_table = self.vm.unicode_table();
                let ch = text::zscii_to_unicode(ops[0], unicode_table.as_deref());
                self.emit(&ch.to_string())?;
                Ok(ExecutionResult::Continue)
            }
            0x06 => {
                self.emit(&(ops[0] as i16).to_string())?;
                Ok(ExecutionResult::Continue)
            }
            0x07 => {
                let range = ops[0] as i16;
                let result = if range > 0 {
                    self.vm.rand.gen_in_range(range as u16)
                } else if range == 0 {
                    self.vm.rand.reseed_random();
                    0
                } else {
                    self.vm.rand.reseed_predictable((-range) as u64);
                    0
                };
                self.store_result(inst, result)?;
                Ok(ExecutionResult::Continue)
            }
            0x08 => {
                self.vm.push(ops[0])?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                let value = self.vm.pop()?;
                self.vm.write_variable(ops[0] as u8, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                self.display.split_window(ops[0]).map_err(String::from)?;
                Ok(ExecutionResult::Continue)
            }
            0x0B => {
                self.display.set_window(ops[0] as u8).map_err(String::from)?;
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                let target = ReturnTarget::Store(inst.store_var.unwrap_or(0));
                self.do_call(ops[0], &ops[1..], target)?;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                self.display.erase_window(ops[0] as i16).map_err(String::from)?;
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                self.display.erase_line().map_err(String::from)?;
                Ok(ExecutionResult::Continue)
            }
            0x0F => {
                self.display.set_cursor(ops[0], ops[1]).map_err(String::from)?;
                Ok(ExecutionResult::Continue)
            }
            0x10 => {
                let (line, col) = self.display.get_cursor().map_err(String::from)?;
                self.vm.write_word(ops[0] as usize, line)?;
                self.vm.write_word(ops[0] as usize + 2, col)?;
                Ok(ExecutionResult::Continue)
            }
            0x11 => {
                self.display.set_text_style(ops[0]).map_err(String::from)?;
                Ok(ExecutionResult::Continue)
            }
            0x12 => {
                self.display.set_buffer_mode(ops[0] != 0).map_err(String::from)?;
                Ok(ExecutionResult::Continue)
            }
            0x13 => {
                let stream = ops[0] as i16;
                let table_addr = ops.get(1).copied();
                self.apply_output_stream(stream, table_addr)?;
                Ok(ExecutionResult::Continue)
            }
            0x14 => {
                self.display.input_stream(ops[0]).map_err(String::from)?;
                Ok(ExecutionResult::Continue)
            }
            0x15 => {
                let number = ops[0];
                let effect = ops.get(1).copied().unwrap_or(0);
                let volume_repeats = ops.get(2).copied().unwrap_or(0);
                let routine = ops.get(3).copied().unwrap_or(0);
                let _ = self
                    .display
                    .sound_effect(number, effect, volume_repeats, routine);
                Ok(ExecutionResult::Continue)
            }
            0x16 => {
                let timeout = ops.get(1).copied().unwrap_or(0);
                let timer_routine = ops.get(2).copied().unwrap_or(0);
                let result = self.read_char(timeout, timer_routine)?;
                self.store_result(inst, result.zscii)?;
                Ok(ExecutionResult::Continue)
            }
            0x17 => self.execute_scan_table(inst),
            0x18 => {
                self.store_result(inst, !ops[0])?;
                Ok(ExecutionResult::Continue)
            }
            0x19 => {
                self.do_call(ops[0], &ops[1..], ReturnTarget::Discard)?;
                Ok(ExecutionResult::Continue)
            }
            0x1A => {
                self.do_call(ops[0], &ops[1..], ReturnTarget::Discard)?;
                Ok(ExecutionResult::Continue)
            }
            0x1B => {
                if ops.len() >= 2 {
                    self.vm.parse_text(ops[0] as usize, ops[1] as usize)?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x1C => self.execute_encode_text(inst),
            0x1D => self.execute_copy_table(inst),
            0x1E => self.execute_print_table(inst),
            0x1F => {
                let count = self.vm.call_stack.last().map(|f| f.num_args).unwrap_or(0);
                self.do_branch(inst, ops[0] as u8 <= count)
            }
            _ => Err(format!("unimplemented VAR opcode {:#04x}", inst.opcode)),
        }
    }

    fn sync_transcript(&mut self, change: Option<bool>) -> Result<(), String> {
        if let Some(active) = change {
            let stream = if active { 2 } else { -2 };
            let _ = self.display.output_stream(stream, None);
        }
        Ok(())
    }

    fn apply_output_stream(&mut self, stream: i16, table_addr: Option<u16>) -> Result<(), String> {
        match stream {
            3 => {
                let addr = table_addr.ok_or("output_stream 3 requires a table address")? as usize;
                self.memory_streams.push(MemoryStream {
                    addr: addr + 2,
                    length: 0,
                });
            }
            -3 => {
                if let Some(closed) = self.memory_streams.pop() {
                    self.vm.write_word(closed.addr - 2, closed.length)?;
                }
            }
            _ => {}
        }
        let _ = self.display.output_stream(stream, table_addr);
        Ok(())
    }

    fn execute_scan_table(&mut self, inst: &Instruction) -> Result<ExecutionResult, String> {
        let ops = &inst.operands;
        let value = ops[0];
        let table = ops[1] as usize;
        let entries = ops[2];
        let form = ops.get(3).copied().unwrap_or(0x82);
        let is_word = form & 0x80 != 0;
        let field_len = (form & 0x7F).max(1) as usize;

        let mut found_addr = 0u16;
        for i in 0..entries {
            let addr = table + i as usize * field_len;
            let entry = if is_word {
                self.vm.read_word(addr)
            } else {
                self.vm.read_byte(addr) as u16
            };
            if entry == value {
                found_addr = addr as u16;
                break;
            }
        }
        self.store_result(inst, found_addr)?;
        self.do_branch(inst, found_addr != 0)
    }

    fn execute_copy_table(&mut self, inst: &Instruction) -> Result<ExecutionResult, String> {
        let ops = &inst.operands;
        let first = ops[0] as usize;
        let second = ops[1] as usize;
        let size = ops[2] as i16;
        let len = size.unsigned_abs() as usize;

        if second == 0 {
            for i in 0..len {
                self.vm.write_byte(first + i, 0)?;
            }
        } else {
            // Copy via an intermediate buffer so overlapping source/dest
            // regions are always handled safely, regardless of the sign of
            // `size` (which the Standard uses only to pick a direction for
            // an in-place copy).
            let staged: Vec<u8> = (0..len).map(|i| self.vm.read_byte(first + i)).collect();
            for (i, byte) in staged.into_iter().enumerate() {
                self.vm.write_byte(second + i, byte)?;
            }
        }
        Ok(ExecutionResult::Continue)
    }

    fn execute_print_table(&mut self, inst: &Instruction) -> Result<ExecutionResult, String> {
        let ops = &inst.operands;
        let table = ops[0] as usize;
        let width = ops[1] as usize;
        let height = ops.get(2).copied().unwrap_or(1) as usize;
        let skip = ops.get(3).copied().unwrap_or(0) as usize;

        let (start_line, start_col) = self.display.get_cursor().map_err(String::from)?;
        for row in 0..height {
            self.display
                .set_cursor(start_line + row as u16, start_col)
                .map_err(String::from)?;
            let row_addr = table + row * (width + skip);
            let line: String = (0..width)
                .map(|col| self.vm.read_byte(row_addr + col) as char)
                .collect();
            self.emit(&line)?;
        }
        Ok(ExecutionResult::Continue)
    }

    fn execute_encode_text(&mut self, inst: &Instruction) -> Result<ExecutionResult, String> {
        let ops = &inst.operands;
        let version = self.vm.game.header.version;
        let text_buf = ops[0] as usize;
        let length = ops[1] as usize;
        let from = ops[2] as usize;
        let coded_buf = ops[3] as usize;

        let word: String = (0..length)
            .map(|i| self.vm.read_byte(text_buf + from + i) as char)
            .collect();
        let words = text::encode_string(&word, version, self.alphabet_override());
        for (i, w) in words.iter().enumerate() {
            self.vm.write_word(coded_buf + i * 2, *w)?;
        }
        Ok(ExecutionResult::Continue)
    }

    // ---- Extended (v5+) ---------------------------------------------------------

    fn execute_ext(&mut self, inst: &Instruction) -> Result<ExecutionResult, String> {
        let ops = &inst.operands;
        let ext_opcode = inst.ext_opcode.ok_or("extended instruction missing ext opcode")?;
        match ext_opcode {
            0x00 => {
                let ok = self.do_save()?;
                self.store_result(inst, ok as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x01 => {
                let ok = self.do_restore()?;
                if !ok {
                    self.store_result(inst, 0)?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x02 => {
                let value = ops[0];
                let places = ops[1] as i16;
                self.store_result(inst, logical_shift(value, places))?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                let value = ops[0] as i16;
                let places = ops[1] as i16;
                self.store_result(inst, arithmetic_shift(value, places) as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                // save_undo: stores 1 immediately, *then* snapshots, so the
                // restored continuation observes the value this call
                // stored (see `do_restore`'s note for the same caveat).
                if let Some(var) = inst.store_var {
                    self.vm.write_variable(var, 1)?;
                }
                self.undo_ring.push(&self.vm);
                Ok(ExecutionResult::Continue)
            }
            0x0A => match self.undo_ring.pop_restore(&mut self.vm) {
                Ok(()) => {
                    self.vm.game.reapply_capability_flags(&self.config);
                    Ok(ExecutionResult::Continue)
                }
                Err(e) => {
                    debug!("restore_undo: {e}");
                    self.store_result(inst, 0)?;
                    Ok(ExecutionResult::Continue)
                }
            },
            0x0B => {
                if let Some(ch) = char::from_u32(ops[0] as u32) {
                    let _ = self.display.put_unicode(ch);
                }
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                let printable = char::from_u32(ops[0] as u32).is_some();
                self.store_result(inst, if printable { 3 } else { 0 })?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                // set_font: this crate has no alternate fonts to offer, so it
                // always reports "no font change made" rather than faking a
                // previous-font id. Valid in v5+ generally, not just v6.
                self.store_result(inst, 0)?;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                // set_true_colour: delegate to the I/O port's colour support
                // if any; a terminal/display with no true-colour capability
                // is free to no-op this.
                let fg = ops[0] as i16;
                let bg = ops.get(1).copied().unwrap_or(1) as i16;
                let _ = self.display.set_colour(fg, bg);
                Ok(ExecutionResult::Continue)
            }
            0x05..=0x08 | 0x10..=0x1C => Err(format!(
                "extended opcode {ext_opcode:#04x} is v6 windowing/graphics, out of scope"
            )),
            _ => Err(format!("unimplemented extended opcode {ext_opcode:#04x}")),
        }
    }
}

fn char_to_zscii_byte(ch: char) -> u8 {
    let code = ch as u32;
    if code < 256 {
        code as u8
    } else {
        b'?'
    }
}

/// `@log_shift`: unsigned shift, positive places left, negative right,
/// magnitudes beyond 16 bits clamped rather than relying on native
/// shift-overflow behavior (§4.7).
fn logical_shift(value: u16, places: i16) -> u16 {
    if places >= 0 {
        let shift = places.min(16) as u32;
        if shift >= 16 {
            0
        } else {
            value << shift
        }
    } else {
        let shift = (-places).min(16) as u32;
        if shift >= 16 {
            0
        } else {
            value >> shift
        }
    }
}

/// `@art_shift`: signed shift; right shifts sign-extend via explicit
/// complement rather than relying on a native arithmetic shift (§4.7).
fn arithmetic_shift(value: i16, places: i16) -> i16 {
    if places >= 0 {
        let shift = places.min(16) as u32;
        if shift >= 16 {
            0
        } else {
            value.wrapping_shl(shift)
        }
    } else {
        let shift = (-places).min(16) as u32;
        if shift >= 16 {
            if value < 0 {
                -1
            } else {
                0
            }
        } else {
            let sign = value < 0;
            let mut result = (value as u16) >> shift;
            if sign {
                result |= !0u16 << (16 - shift);
            }
            result as i16
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display_trait::{CharInput, LineInput, TimerCallback};
    use crate::vm::tests::create_test_vm;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Minimal recording I/O port for tests that need to inspect output
    /// without depending on `HeadlessDisplay`'s own buffer layout.
    #[derive(Clone)]
    struct RecordingDisplay {
        output: Rc<RefCell<String>>,
        saved_blob: Rc<RefCell<Option<Vec<u8>>>>,
        next_line: Rc<RefCell<String>>,
    }

    impl RecordingDisplay {
        fn new() -> Self {
            RecordingDisplay {
                output: Rc::new(RefCell::new(String::new())),
                saved_blob: Rc::new(RefCell::new(None)),
                next_line: Rc::new(RefCell::new(String::new())),
            }
        }

        fn output(&self) -> String {
            self.output.borrow().clone()
        }

        /// Scripts the text the next `get_line` call returns.
        fn queue_line(&self, text: impl Into<String>) {
            *self.next_line.borrow_mut() = text.into();
        }
    }

    impl ZMachineDisplay for RecordingDisplay {
        fn clear_screen(&mut self) -> Result<(), DisplayError> {
            Ok(())
        }
        fn split_window(&mut self, _lines: u16) -> Result<(), DisplayError> {
            Ok(())
        }
        fn set_window(&mut self, _window: u8) -> Result<(), DisplayError> {
            Ok(())
        }
        fn set_cursor(&mut self, _line: u16, _column: u16) -> Result<(), DisplayError> {
            Ok(())
        }
        fn print(&mut self, text: &str) -> Result<(), DisplayError> {
            self.output.borrow_mut().push_str(text);
            Ok(())
        }
        fn print_char(&mut self, ch: char) -> Result<(), DisplayError> {
            self.output.borrow_mut().push(ch);
            Ok(())
        }
        fn erase_window(&mut self, _window: i16) -> Result<(), DisplayError> {
            Ok(())
        }
        fn handle_resize(&mut self, _width: u16, _height: u16) {}
        fn show_status(&mut self, _location: &str, _score: i16, _moves: u16) -> Result<(), DisplayError> {
            Ok(())
        }
        fn erase_line(&mut self) -> Result<(), DisplayError> {
            Ok(())
        }
        fn get_cursor(&mut self) -> Result<(u16, u16), DisplayError> {
            Ok((1, 1))
        }
        fn set_buffer_mode(&mut self, _buffered: bool) -> Result<(), DisplayError> {
            Ok(())
        }
        fn set_text_style(&mut self, _style: u16) -> Result<(), DisplayError> {
            Ok(())
        }
        fn get_line(
            &mut self,
            _max_len: usize,
            _timeout_tenths: u16,
            _timer: &mut TimerCallback,
        ) -> Result<LineInput, DisplayError> {
            Ok(LineInput {
                text: self.next_line.borrow_mut().split_off(0),
                terminator: 13,
                timed_out: false,
            })
        }
        fn get_char(
            &mut self,
            _timeout_tenths: u16,
            _timer: &mut TimerCallback,
        ) -> Result<CharInput, DisplayError> {
            Ok(CharInput {
                zscii: 0,
                timed_out: false,
            })
        }
        fn output_stream(&mut self, _stream: i16, _table_addr: Option<u16>) -> Result<(), DisplayError> {
            Ok(())
        }
        fn input_stream(&mut self, _stream: u16) -> Result<(), DisplayError> {
            Ok(())
        }
        fn save_blob_write(&mut self, bytes: &[u8]) -> Result<(), DisplayError> {
            *self.saved_blob.borrow_mut() = Some(bytes.to_vec());
            Ok(())
        }
        fn save_blob_read(&mut self) -> Result<Vec<u8>, DisplayError> {
            self.saved_blob
                .borrow()
                .clone()
                .ok_or_else(|| DisplayError::new("no save available"))
        }
        fn get_terminal_size(&self) -> (u16, u16) {
            (80, 24)
        }
        fn force_refresh(&mut self) -> Result<(), DisplayError> {
            Ok(())
        }
    }

    fn interpreter_with_recording() -> (Interpreter, RecordingDisplay) {
        let vm = create_test_vm();
        let display = RecordingDisplay::new();
        let interpreter = Interpreter::with_display(vm, Box::new(display.clone()));
        (interpreter, display)
    }

    #[test]
    fn print_num_writes_signed_decimal() {
        let (mut interpreter, display) = interpreter_with_recording();
        let pc = interpreter.vm.pc;
        {
            let mem = &mut interpreter.vm.game.memory;
            mem[pc] = 0xE6; // VAR print_num
            mem[pc + 1] = 0x7F; // small constant, rest omitted
            mem[pc + 2] = (-5i16 as u16 & 0xFF) as u8;
        }

        let inst =
            Instruction::decode(&interpreter.vm.game.memory, pc, interpreter.vm.game.header.version)
                .unwrap();
        interpreter.vm.pc += inst.size;
        interpreter.execute_instruction(&inst).unwrap();

        assert_eq!(display.output(), "-5");
    }

    #[test]
    fn arithmetic_wraps_around_on_overflow() {
        let (mut interpreter, _display) = interpreter_with_recording();
        let pc = interpreter.vm.pc;
        {
            let mem = &mut interpreter.vm.game.memory;
            mem[pc] = 0xD4; // VAR-form 2OP add (0x20 | 0x14)
            mem[pc + 1] = 0x0F; // two large constants, rest omitted
            mem[pc + 2] = 0xFF;
            mem[pc + 3] = 0xFF;
            mem[pc + 4] = 0x00;
            mem[pc + 5] = 0x01;
            mem[pc + 6] = 0x00; // store to stack
        }
        let inst =
            Instruction::decode(&interpreter.vm.game.memory, pc, interpreter.vm.game.header.version)
                .unwrap();
        interpreter.vm.pc += inst.size;
        interpreter.execute_instruction(&inst).unwrap();
        assert_eq!(interpreter.vm.peek().unwrap(), 0);
    }

    #[test]
    fn call_and_return_round_trip_locals_and_stack() {
        let (mut interpreter, _display) = interpreter_with_recording();
        // Routine at 0x6000: 1 local, initial value 0, overwritten by the
        // call argument; body is `ret` of that local.
        {
            let mem = &mut interpreter.vm.game.memory;
            mem[0x6000] = 1;
            mem[0x6001] = 0x00;
            mem[0x6002] = 0x00;
            mem[0x6003] = 0x8B; // short form, 1OP, variable operand, ret
            mem[0x6004] = 0x01; // local 1
        }

        let pc = interpreter.vm.pc;
        {
            let mem = &mut interpreter.vm.game.memory;
            mem[pc] = 0xE0; // VAR call
            mem[pc + 1] = 0x0F; // large const routine addr, small const arg
            mem[pc + 2] = ((0x6000u16 / 2) >> 8) as u8;
            mem[pc + 3] = (0x6000u16 / 2) as u8;
            mem[pc + 4] = 0x2A;
            mem[pc + 5] = 0x00; // store to stack
        }

        let inst =
            Instruction::decode(&interpreter.vm.game.memory, pc, interpreter.vm.game.header.version)
                .unwrap();
        interpreter.vm.pc += inst.size;
        interpreter.execute_instruction(&inst).unwrap();
        assert_eq!(interpreter.vm.call_stack.len(), 2);

        let ret_pc = interpreter.vm.pc;
        let ret_inst =
            Instruction::decode(&interpreter.vm.game.memory, ret_pc, interpreter.vm.game.header.version)
                .unwrap();
        interpreter.vm.pc += ret_inst.size;
        interpreter.execute_instruction(&ret_inst).unwrap();

        assert_eq!(interpreter.vm.call_stack.len(), 1);
        assert_eq!(interpreter.vm.peek().unwrap(), 0x2A);
    }

    #[test]
    fn catch_and_throw_unwind_to_the_catching_frame() {
        let (mut interpreter, _display) = interpreter_with_recording();
        interpreter.vm.game.header.version = 5;
        let depth_before = interpreter.vm.call_stack.len() as u16;
        interpreter.vm.call_stack.push(CallFrame {
            return_pc: 0x6000,
            stack_base: interpreter.vm.stack.len(),
            locals: [0; 16],
            num_locals: 0,
            num_args: 0,
            return_target: ReturnTarget::Store(0x10),
        });
        let catch_token = interpreter.vm.call_stack.len() as u16;
        interpreter.vm.call_stack.push(CallFrame {
            return_pc: 0x7000,
            stack_base: interpreter.vm.stack.len(),
            locals: [0; 16],
            num_locals: 0,
            num_args: 0,
            return_target: ReturnTarget::Discard,
        });

        interpreter.execute_throw(99, catch_token).unwrap();

        assert_eq!(interpreter.vm.call_stack.len() as u16, depth_before + 1);
        assert_eq!(interpreter.vm.read_global(0x10).unwrap(), 99);
        assert_eq!(interpreter.vm.pc, 0x6000);
    }

    #[test]
    fn save_undo_then_restore_undo_round_trips() {
        let (mut interpreter, _display) = interpreter_with_recording();
        interpreter.vm.write_global(0x10, 7).unwrap();

        interpreter.undo_ring.push(&interpreter.vm);
        interpreter.vm.write_global(0x10, 9).unwrap();
        assert_eq!(interpreter.vm.read_global(0x10).unwrap(), 9);

        interpreter.undo_ring.pop_restore(&mut interpreter.vm).unwrap();
        assert_eq!(interpreter.vm.read_global(0x10).unwrap(), 7);
    }

    #[test]
    fn logical_and_arithmetic_shift_clamp_large_magnitudes() {
        assert_eq!(logical_shift(0x0001, 20), 0);
        assert_eq!(logical_shift(0x8000, -20), 0);
        assert_eq!(arithmetic_shift(-1, -20), -1);
        assert_eq!(arithmetic_shift(-8, -1), -4);
    }

    #[test]
    fn division_truncates_toward_zero_and_mod_takes_dividend_sign() {
        assert_eq!((-7i16).wrapping_div(2), -3);
        assert_eq!((-7i16).wrapping_rem(2), -1);
    }

    #[test]
    fn quit_stops_the_loop() {
        let mut memory = vec![0u8; 0x10000];
        memory[0x00] = 3;
        memory[0x04] = 0x10;
        memory[0x06] = 0x50;
        memory[0x0c] = 0x01;
        memory[0x0e] = 0x02;
        memory[0x5000] = 0xBA; // quit
        let game = crate::vm::Game::from_memory(memory).unwrap();
        let vm = VM::new(game, 1024, 256, crate::zrand::ZRand::new_predictable(1));
        let mut interpreter = Interpreter::new(vm);
        interpreter.run().unwrap();
        assert_eq!(interpreter.instruction_count(), 1);
    }

    #[test]
    fn set_font_and_set_true_colour_are_not_v6_exclusive() {
        let (mut interpreter, _display) = interpreter_with_recording();
        interpreter.vm.game.header.version = 5;

        let pc = interpreter.vm.pc;
        {
            let mem = &mut interpreter.vm.game.memory;
            mem[pc] = 0xBE; // extended form
            mem[pc + 1] = 0x04; // set_font
            mem[pc + 2] = 0x7F; // one small-constant operand, rest omitted
            mem[pc + 3] = 0x02; // font 2
            mem[pc + 4] = 0x00; // store to stack
        }
        let inst =
            Instruction::decode(&interpreter.vm.game.memory, pc, interpreter.vm.game.header.version)
                .unwrap();
        interpreter.vm.pc += inst.size;
        interpreter.execute_instruction(&inst).unwrap();
        assert_eq!(interpreter.vm.peek().unwrap(), 0);

        let pc = interpreter.vm.pc;
        {
            let mem = &mut interpreter.vm.game.memory;
            mem[pc] = 0xBE;
            mem[pc + 1] = 0x0D; // set_true_colour
            mem[pc + 2] = 0x5F; // two small-constant operands
            mem[pc + 3] = 0x01; // foreground
            mem[pc + 4] = 0x02; // background
        }
        let inst =
            Instruction::decode(&interpreter.vm.game.memory, pc, interpreter.vm.game.header.version)
                .unwrap();
        interpreter.vm.pc += inst.size;
        // Must not be rejected as out-of-scope v6 windowing.
        interpreter.execute_instruction(&inst).unwrap();
    }

    #[test]
    fn sread_v3_zero_terminates_shorter_input_after_a_longer_one() {
        let (mut interpreter, display) = interpreter_with_recording();
        let buffer = 0x0060usize;
        interpreter.vm.write_byte(buffer, 20).unwrap(); // max length

        display.queue_line("examine mailbox");
        let inst = sread_instruction(&mut interpreter, buffer);
        interpreter.execute_instruction(&inst).unwrap();
        assert_eq!(interpreter.vm.read_byte(buffer + 1), b'e');

        display.queue_line("go");
        let inst = sread_instruction(&mut interpreter, buffer);
        interpreter.execute_instruction(&inst).unwrap();
        let text: Vec<u8> = (0..3).map(|i| interpreter.vm.read_byte(buffer + 1 + i)).collect();
        assert_eq!(
            text,
            vec![b'g', b'o', 0],
            "v<5 text buffer must be 0-terminated right after the typed text, \
             not left with a stale byte from the previous (longer) input"
        );
    }

    /// Builds (and decodes) a VAR:4 `sread buffer 0` instruction at the
    /// interpreter's current PC, advancing the PC past it.
    fn sread_instruction(interpreter: &mut Interpreter, buffer: usize) -> Instruction {
        let pc = interpreter.vm.pc;
        {
            let mem = &mut interpreter.vm.game.memory;
            mem[pc] = 0xE4; // VAR form, opcode 0x04 (sread)
            mem[pc + 1] = 0x3F; // large constant (buffer), omitted x3
            mem[pc + 2..pc + 4].copy_from_slice(&(buffer as u16).to_be_bytes());
        }
        let inst =
            Instruction::decode(&interpreter.vm.game.memory, pc, interpreter.vm.game.header.version)
                .unwrap();
        interpreter.vm.pc += inst.size;
        inst
    }

    #[test]
    fn print_honors_a_custom_alphabet_table_override() {
        let (mut interpreter, display) = interpreter_with_recording();
        interpreter.vm.game.header.version = 5;

        // Header byte 0x34 holds the custom alphabet table address directly.
        let alpha_addr = 0x0400usize;
        {
            let mem = &mut interpreter.vm.game.memory;
            mem[0x34] = (alpha_addr >> 8) as u8;
            mem[0x35] = alpha_addr as u8;

            // Custom A0: every slot maps to 'Z', so decoding will print "ZZZ".
            for i in 0..78 {
                mem[alpha_addr + i] = b'Z';
            }
        }
        interpreter.vm.game.header.alphabet_table = alpha_addr;

        let pc = interpreter.vm.pc;
        let text_addr = pc + 1;
        {
            let mem = &mut interpreter.vm.game.memory;
            mem[pc] = 0xB2; // short form, 0OP, print
            // One z-word: three z-chars of value 6 (alphabet slot 0), end bit set.
            // 1_00110_00110_00110 = 0x98C6.
            mem[text_addr] = 0x98;
            mem[text_addr + 1] = 0xC6;
        }

        let inst =
            Instruction::decode(&interpreter.vm.game.memory, pc, interpreter.vm.game.header.version)
                .unwrap();
        interpreter.vm.pc += inst.size;
        interpreter.execute_instruction(&inst).unwrap();
        assert_eq!(display.output(), "ZZZ");
    }
}
