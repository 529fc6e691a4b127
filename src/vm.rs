use crate::header::Header;
use crate::zrand::ZRand;
use log::{debug, warn};
use std::fmt;

/// Maximum number of local variables per routine.
const MAX_LOCALS: usize = 16;

/// Where a call frame's return value goes when the routine returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnTarget {
    /// Store the return value in this variable number.
    Store(u8),
    /// `call_*n` family: throw the return value away.
    Discard,
    /// Direct-call re-entry (timed-input/sound interrupt routines): push the
    /// return value on the stack instead of storing it in a variable.
    PushOnReturn,
}

/// A record on the call-frame stack.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Byte address to resume at when this routine returns.
    pub return_pc: usize,
    /// Evaluation-stack length at the moment of the call; this frame owns
    /// everything pushed above it.
    pub stack_base: usize,
    pub locals: [u16; MAX_LOCALS],
    pub num_locals: u8,
    /// Number of arguments actually supplied by the caller (capped at 7),
    /// as opposed to the number of locals the routine declares.
    pub num_args: u8,
    pub return_target: ReturnTarget,
}

impl CallFrame {
    fn dummy() -> CallFrame {
        CallFrame {
            return_pc: 0,
            stack_base: 0,
            locals: [0; MAX_LOCALS],
            num_locals: 0,
            num_args: 0,
            return_target: ReturnTarget::Discard,
        }
    }
}

/// A loaded story file: owned memory plus the header parsed from it.
pub struct Game {
    pub memory: Vec<u8>,
    pub header: Header,
    /// Snapshot of dynamic memory taken at load time. Used for restart,
    /// Quetzal CMem diffing, and undo compression. Read-only thereafter.
    pub original_memory: Vec<u8>,
}

impl Game {
    /// Loads a story and rewrites its Rst header fields from `config` before
    /// taking the initial-dynamic snapshot, so restart/undo/Quetzal diffing
    /// all see the capability bits the embedding program asked for.
    pub fn from_memory_with_config(
        mut memory: Vec<u8>,
        config: &crate::config::Config,
    ) -> Result<Self, String> {
        let header = Header::new(&memory)?;
        header.apply_capability_flags(&mut memory, config);
        Self::from_memory(memory)
    }

    /// Re-rewrites the Rst header fields after a successful restore or
    /// undo-restore, per §4.6 ("Rewrite all Rst header fields after a
    /// successful restore").
    pub fn reapply_capability_flags(&mut self, config: &crate::config::Config) {
        self.header.apply_capability_flags(&mut self.memory, config);
    }

    pub fn from_memory(memory: Vec<u8>) -> Result<Self, String> {
        let header = Header::new(&memory)?;
        let static_end = header.static_end(memory.len());
        if header.base_static_mem > static_end {
            return Err(format!(
                "static memory base 0x{:04x} exceeds static memory end 0x{:04x}",
                header.base_static_mem, static_end
            ));
        }
        let original_memory = memory[..header.base_static_mem].to_vec();

        Ok(Game {
            memory,
            header,
            original_memory,
        })
    }
}

/// The Z-machine virtual machine state: memory, stacks, and variable access.
///
/// Opcode dispatch and decoding live in [`crate::interpreter`]; this type
/// owns only the state the Standard calls the "memory and stack" half of
/// the machine.
pub struct VM {
    pub game: Game,
    pub pc: usize,
    pub stack: Vec<u16>,
    pub call_stack: Vec<CallFrame>,
    pub rand: ZRand,
    globals_addr: usize,
    stack_limit: usize,
    call_stack_limit: usize,
}

impl VM {
    pub fn new(game: Game, stack_limit: usize, call_stack_limit: usize, rand: ZRand) -> Self {
        let initial_pc = game.header.initial_pc;
        let globals_addr = game.header.global_variables;

        let mut vm = VM {
            game,
            pc: initial_pc,
            stack: Vec::with_capacity(stack_limit),
            call_stack: Vec::new(),
            rand,
            globals_addr,
            stack_limit,
            call_stack_limit,
        };

        // A permanent dummy frame sits at the bottom in non-v6 stories so
        // Quetzal's frame count matches what the Standard requires, and so
        // `return`/`catch`/`throw` at top level have a frame to act on.
        if vm.game.header.version != 6 {
            vm.call_stack.push(CallFrame::dummy());
        }

        vm
    }

    pub fn reset(&mut self) {
        self.pc = self.game.header.initial_pc;
        self.stack.clear();
        self.call_stack.clear();
        self.game.memory[..self.game.original_memory.len()]
            .copy_from_slice(&self.game.original_memory);
        if self.game.header.version != 6 {
            self.call_stack.push(CallFrame::dummy());
        }
    }

    pub fn decode_instruction_at(
        &self,
        pc: usize,
    ) -> Result<crate::instruction::Instruction, String> {
        crate::instruction::Instruction::decode(&self.game.memory, pc, self.game.header.version)
            .map_err(|e| format!("decode error at PC {pc:#06x}: {e}"))
    }

    pub fn call_stack_limit(&self) -> usize {
        self.call_stack_limit
    }

    // ---- Evaluation stack -------------------------------------------------

    pub fn push(&mut self, value: u16) -> Result<(), String> {
        if self.stack.len() >= self.stack_limit {
            return Err("evaluation stack overflow".to_string());
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u16, String> {
        let base = self.call_stack.last().map(|f| f.stack_base).unwrap_or(0);
        if self.stack.len() <= base {
            return Err("evaluation stack underflow below current frame".to_string());
        }
        Ok(self.stack.pop().unwrap())
    }

    pub fn peek(&self) -> Result<u16, String> {
        self.stack
            .last()
            .copied()
            .ok_or_else(|| "evaluation stack is empty".to_string())
    }

    // ---- Memory: interpreter accessors (unchecked within dynamic memory) -

    pub fn read_byte(&self, addr: usize) -> u8 {
        *self.game.memory.get(addr).unwrap_or(&0)
    }

    pub fn read_word(&self, addr: usize) -> u16 {
        ((self.read_byte(addr) as u16) << 8) | self.read_byte(addr + 1) as u16
    }

    /// Interpreter write: used by opcode handlers for globals, objects, and
    /// other structures the program itself never writes directly. Bounds
    /// checked but not restricted to dynamic memory, since some of these
    /// touch the object tree in dynamic memory regardless.
    pub fn write_byte(&mut self, addr: usize, value: u8) -> Result<(), String> {
        if addr >= self.game.memory.len() {
            return Err(format!("memory address out of bounds: {addr:#06x}"));
        }
        self.game.memory[addr] = value;
        Ok(())
    }

    pub fn write_word(&mut self, addr: usize, value: u16) -> Result<(), String> {
        self.write_byte(addr, (value >> 8) as u8)?;
        self.write_byte(addr + 1, (value & 0xFF) as u8)?;
        Ok(())
    }

    /// User write (`@storeb`/`@storew`): restricted to dynamic memory, with
    /// the two header-byte exceptions from §4.1. Returns whether the
    /// transcript-stream bit in Flags 2 changed, so the interpreter loop can
    /// synchronize the transcript stream with the I/O port.
    pub fn user_store_byte(&mut self, addr: usize, value: u8) -> Result<Option<bool>, String> {
        if addr == 0x01 {
            // Flags 1: only bits the program is allowed to toggle are honored;
            // the rest (Rst bits owned by the interpreter) are preserved.
            let current = self.read_byte(0x01);
            let writable_mask: u8 = if self.game.header.version <= 3 {
                0b0000_1111 // status-line type, screen-split, variable font, ignored-in-v3
            } else {
                0b0000_0011
            };
            let merged = (current & !writable_mask) | (value & writable_mask);
            return self.write_byte(0x01, merged).map(|_| None);
        }
        if addr == 0x11 {
            // Flags 2 low byte: transcript bit (0) and fixed-font bit (1) are
            // program-writable; others preserved.
            let current = self.read_byte(0x11);
            let writable_mask: u8 = 0b0000_0011;
            let merged = (current & !writable_mask) | (value & writable_mask);
            let transcript_before = current & 0x01 != 0;
            let transcript_after = merged & 0x01 != 0;
            self.write_byte(0x11, merged)?;
            if transcript_before != transcript_after {
                return Ok(Some(transcript_after));
            }
            return Ok(None);
        }

        if addr < 0x40 || addr >= self.game.header.base_static_mem {
            return Err(format!(
                "user write to read-only memory at {addr:#06x} (dynamic memory is [0x40, {:#06x}))",
                self.game.header.base_static_mem
            ));
        }
        self.write_byte(addr, value)?;
        Ok(None)
    }

    pub fn user_store_word(&mut self, addr: usize, value: u16) -> Result<Option<bool>, String> {
        let hi = self.user_store_byte(addr, (value >> 8) as u8)?;
        let lo = self.user_store_byte(addr + 1, (value & 0xFF) as u8)?;
        Ok(hi.or(lo))
    }

    // ---- Variables ---------------------------------------------------------

    pub fn read_global(&self, var: u8) -> Result<u16, String> {
        if var < 0x10 {
            return Err(format!("not a global variable number: {var:#04x}"));
        }
        let addr = self.globals_addr + (var - 0x10) as usize * 2;
        Ok(self.read_word(addr))
    }

    pub fn write_global(&mut self, var: u8, value: u16) -> Result<(), String> {
        if var < 0x10 {
            return Err(format!("not a global variable number: {var:#04x}"));
        }
        let addr = self.globals_addr + (var - 0x10) as usize * 2;
        self.write_word(addr, value)
    }

    /// Indirect variable access (peek/poke-in-place): used by opcodes whose
    /// operand *names* a variable rather than supplying its value directly
    /// (`@inc`, `@dec`, `@inc_chk`, `@dec_chk`, `@load`, `@pull` target,
    /// `@store`). Per the §1.1 erratum, variable 0 here means "the top of
    /// stack in place", not "pop"/"push".
    pub fn read_variable(&self, var: u8) -> Result<u16, String> {
        match var {
            0x00 => self.peek(),
            0x01..=0x0F => {
                let frame = self
                    .call_stack
                    .last()
                    .ok_or("no active routine for local variable access")?;
                let index = (var - 1) as usize;
                if index >= frame.num_locals as usize {
                    return Err(format!(
                        "local variable {} referenced but routine has {} locals",
                        var, frame.num_locals
                    ));
                }
                Ok(frame.locals[index])
            }
            _ => self.read_global(var),
        }
    }

    pub fn write_variable(&mut self, var: u8, value: u16) -> Result<(), String> {
        match var {
            0x00 => {
                if let Some(top) = self.stack.last_mut() {
                    let base = self.call_stack.last().map(|f| f.stack_base).unwrap_or(0);
                    if self.stack.len() > base {
                        *top = value;
                        return Ok(());
                    }
                }
                self.push(value)
            }
            0x01..=0x0F => {
                let frame = self
                    .call_stack
                    .last_mut()
                    .ok_or("no active routine for local variable access")?;
                let index = (var - 1) as usize;
                if index >= frame.num_locals as usize {
                    return Err(format!(
                        "local variable {} referenced but routine has {} locals",
                        var, frame.num_locals
                    ));
                }
                frame.locals[index] = value;
                Ok(())
            }
            _ => self.write_global(var, value),
        }
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    // ---- Object database ---------------------------------------------------

    fn max_object_number(&self) -> u16 {
        if self.game.header.version <= 3 {
            255
        } else {
            65535
        }
    }

    fn max_attribute(&self) -> u8 {
        if self.game.header.version <= 3 {
            31
        } else {
            47
        }
    }

    fn check_object(&self, obj_num: u16) -> Result<(), String> {
        if obj_num == 0 || obj_num > self.max_object_number() {
            return Err(format!("invalid object number: {obj_num}"));
        }
        Ok(())
    }

    fn get_object_addr(&self, obj_num: u16) -> Result<usize, String> {
        self.check_object(obj_num)?;
        let defaults = if self.game.header.version <= 3 { 31 } else { 63 };
        let entry_size = if self.game.header.version <= 3 { 9 } else { 14 };
        let tree_base = self.game.header.object_table_addr + defaults * 2;
        Ok(tree_base + (obj_num - 1) as usize * entry_size)
    }

    fn property_table_addr(&self, obj_num: u16) -> Result<usize, String> {
        let obj_addr = self.get_object_addr(obj_num)?;
        let offset = if self.game.header.version <= 3 { 7 } else { 12 };
        Ok(self.read_word(obj_addr + offset) as usize)
    }

    /// Returns (property number, data size in bytes, size-header length in bytes).
    fn property_info(&self, prop_addr: usize) -> (u8, usize, usize) {
        let size_byte = self.game.memory[prop_addr];
        if self.game.header.version <= 3 {
            let prop_num = size_byte & 0x1F;
            let size = ((size_byte >> 5) & 0x07) as usize + 1;
            (prop_num, size, 1)
        } else if size_byte & 0x80 != 0 {
            let prop_num = size_byte & 0x3F;
            let second = self.game.memory[prop_addr + 1];
            let size = match second & 0x3F {
                0 => 64,
                n => n as usize,
            };
            (prop_num, size, 2)
        } else {
            let prop_num = size_byte & 0x3F;
            let size = if size_byte & 0x40 != 0 { 2 } else { 1 };
            (prop_num, size, 1)
        }
    }

    fn first_property_addr(&self, obj_num: u16) -> Result<usize, String> {
        let prop_table = self.property_table_addr(obj_num)?;
        let name_words = self.game.memory[prop_table] as usize;
        Ok(prop_table + 1 + name_words * 2)
    }

    /// Finds a property, returning (data_addr, data_size) if present.
    fn find_property(&self, obj_num: u16, prop_num: u8) -> Result<Option<(usize, usize)>, String> {
        let mut addr = self.first_property_addr(obj_num)?;
        loop {
            let size_byte = self.game.memory[addr];
            if size_byte == 0 {
                return Ok(None);
            }
            let (id, size, header_len) = self.property_info(addr);
            if id == prop_num {
                return Ok(Some((addr + header_len, size)));
            }
            if id < prop_num {
                // Properties are stored in descending order of number.
                return Ok(None);
            }
            addr += header_len + size;
        }
    }

    pub fn get_property(&self, obj_num: u16, prop_num: u8) -> Result<u16, String> {
        if obj_num == 0 {
            return Ok(0);
        }
        self.check_object(obj_num)?;

        if let Some((data_addr, size)) = self.find_property(obj_num, prop_num)? {
            return Ok(match size {
                1 => self.read_byte(data_addr) as u16,
                // Properties wider than 2 bytes are not Standard; historical
                // interpreters read the leading word, so we do too.
                _ => self.read_word(data_addr),
            });
        }

        let max_defaults = if self.game.header.version <= 3 { 31 } else { 63 };
        if prop_num == 0 || prop_num as usize > max_defaults {
            return Ok(0);
        }
        let default_addr = self.game.header.object_table_addr + (prop_num - 1) as usize * 2;
        Ok(self.read_word(default_addr))
    }

    pub fn get_property_addr(&self, obj_num: u16, prop_num: u8) -> Result<usize, String> {
        if obj_num == 0 {
            return Ok(0);
        }
        self.check_object(obj_num)?;
        Ok(self
            .find_property(obj_num, prop_num)?
            .map(|(addr, _)| addr)
            .unwrap_or(0))
    }

    /// `get_prop_len(0)` must return 0; otherwise reads the size header that
    /// immediately precedes `prop_data_addr`.
    pub fn get_property_len(&self, prop_data_addr: usize) -> u16 {
        if prop_data_addr == 0 {
            return 0;
        }
        if self.game.header.version <= 3 {
            let size_byte = self.game.memory[prop_data_addr - 1];
            (((size_byte >> 5) & 0x07) + 1) as u16
        } else {
            let size_byte = self.game.memory[prop_data_addr - 1];
            if size_byte & 0x80 != 0 {
                let prev = self.game.memory[prop_data_addr - 2];
                match prev & 0x3F {
                    0 => 64,
                    n => n as u16,
                }
            } else if size_byte & 0x40 != 0 {
                2
            } else {
                1
            }
        }
    }

    pub fn put_property(&mut self, obj_num: u16, prop_num: u8, value: u16) -> Result<(), String> {
        self.check_object(obj_num)?;
        let (data_addr, size) = self
            .find_property(obj_num, prop_num)?
            .ok_or_else(|| format!("object {obj_num} has no property {prop_num}"))?;

        match size {
            1 => self.write_byte(data_addr, value as u8),
            2 => self.write_word(data_addr, value),
            _ => {
                // Bug-compatibility concession (see Photograph in the wild):
                // tolerate an oversized property by writing a word anyway.
                warn!(
                    "put_prop on object {obj_num} property {prop_num} has size {size} (>2); \
                     writing a word anyway for compatibility"
                );
                self.write_word(data_addr, value)
            }
        }
    }

    pub fn get_next_property(&self, obj_num: u16, prop_num: u8) -> Result<u8, String> {
        if obj_num == 0 {
            return Ok(0);
        }
        self.check_object(obj_num)?;
        let mut addr = self.first_property_addr(obj_num)?;

        if prop_num == 0 {
            let size_byte = self.game.memory[addr];
            if size_byte == 0 {
                return Ok(0);
            }
            return Ok(self.property_info(addr).0);
        }

        loop {
            let size_byte = self.game.memory[addr];
            if size_byte == 0 {
                return Err(format!("property {prop_num} not found on object {obj_num}"));
            }
            let (id, size, header_len) = self.property_info(addr);
            if id == prop_num {
                let next_addr = addr + header_len + size;
                let next_size_byte = self.game.memory[next_addr];
                if next_size_byte == 0 {
                    return Ok(0);
                }
                return Ok(self.property_info(next_addr).0);
            }
            addr += header_len + size;
        }
    }

    pub fn test_attribute(&self, obj_num: u16, attr_num: u8) -> Result<bool, String> {
        if obj_num == 0 {
            return Ok(false);
        }
        if attr_num > self.max_attribute() {
            return Err(format!("invalid attribute: {attr_num}"));
        }
        let obj_addr = self.get_object_addr(obj_num)?;
        let byte = self.game.memory[obj_addr + (attr_num / 8) as usize];
        Ok(byte & (0x80 >> (attr_num % 8)) != 0)
    }

    fn set_attribute_bit(&mut self, obj_num: u16, attr_num: u8, value: bool) -> Result<(), String> {
        if obj_num == 0 {
            return Ok(());
        }
        if attr_num > self.max_attribute() {
            return Err(format!("invalid attribute: {attr_num}"));
        }
        let obj_addr = self.get_object_addr(obj_num)?;
        let byte_addr = obj_addr + (attr_num / 8) as usize;
        let mask = 0x80 >> (attr_num % 8);
        let current = self.game.memory[byte_addr];
        self.game.memory[byte_addr] = if value {
            current | mask
        } else {
            current & !mask
        };
        Ok(())
    }

    pub fn set_attribute(&mut self, obj_num: u16, attr_num: u8) -> Result<(), String> {
        self.set_attribute_bit(obj_num, attr_num, true)
    }

    pub fn clear_attribute(&mut self, obj_num: u16, attr_num: u8) -> Result<(), String> {
        self.set_attribute_bit(obj_num, attr_num, false)
    }

    fn relation_offset(&self, which: Relation) -> usize {
        let v3 = self.game.header.version <= 3;
        match which {
            Relation::Parent => {
                if v3 {
                    4
                } else {
                    6
                }
            }
            Relation::Sibling => {
                if v3 {
                    5
                } else {
                    8
                }
            }
            Relation::Child => {
                if v3 {
                    6
                } else {
                    10
                }
            }
        }
    }

    fn read_relation(&self, obj_num: u16, which: Relation) -> Result<u16, String> {
        if obj_num == 0 {
            return Ok(0);
        }
        let obj_addr = self.get_object_addr(obj_num)?;
        let offset = self.relation_offset(which);
        if self.game.header.version <= 3 {
            Ok(self.game.memory[obj_addr + offset] as u16)
        } else {
            Ok(self.read_word(obj_addr + offset))
        }
    }

    fn write_relation(&mut self, obj_num: u16, which: Relation, value: u16) -> Result<(), String> {
        let obj_addr = self.get_object_addr(obj_num)?;
        let offset = self.relation_offset(which);
        if self.game.header.version <= 3 {
            self.game.memory[obj_addr + offset] = value as u8;
        } else {
            self.write_word(obj_addr + offset, value)?;
        }
        Ok(())
    }

    pub fn get_parent(&self, obj_num: u16) -> Result<u16, String> {
        self.read_relation(obj_num, Relation::Parent)
    }

    pub fn get_sibling(&self, obj_num: u16) -> Result<u16, String> {
        self.read_relation(obj_num, Relation::Sibling)
    }

    pub fn get_child(&self, obj_num: u16) -> Result<u16, String> {
        self.read_relation(obj_num, Relation::Child)
    }

    /// Unlinks `obj_num` from its parent's child chain and zeroes its
    /// parent/sibling fields. Detects a corrupt chain (the object never
    /// found while walking) rather than looping forever.
    pub fn remove_object(&mut self, obj_num: u16) -> Result<(), String> {
        if obj_num == 0 {
            return Ok(());
        }
        let parent = self.get_parent(obj_num)?;
        if parent == 0 {
            return Ok(());
        }

        let first_child = self.get_child(parent)?;
        if first_child == obj_num {
            let next_sibling = self.get_sibling(obj_num)?;
            self.write_relation(parent, Relation::Child, next_sibling)?;
        } else {
            let mut current = first_child;
            let mut steps = 0usize;
            loop {
                if current == 0 {
                    return Err(format!(
                        "corrupt object tree: object {obj_num} not found in parent {parent}'s child chain"
                    ));
                }
                steps += 1;
                if steps > self.max_object_number() as usize {
                    return Err("corrupt object tree: child chain does not terminate".to_string());
                }
                let next = self.get_sibling(current)?;
                if next == obj_num {
                    let obj_sibling = self.get_sibling(obj_num)?;
                    self.write_relation(current, Relation::Sibling, obj_sibling)?;
                    break;
                }
                current = next;
            }
        }

        self.write_relation(obj_num, Relation::Parent, 0)?;
        self.write_relation(obj_num, Relation::Sibling, 0)?;
        Ok(())
    }

    /// Unlinks `obj_num`, then makes it the new first child of `dest_num`.
    pub fn insert_object(&mut self, obj_num: u16, dest_num: u16) -> Result<(), String> {
        self.check_object(obj_num)?;
        self.check_object(dest_num)?;

        self.remove_object(obj_num)?;

        let old_child = self.get_child(dest_num)?;
        self.write_relation(obj_num, Relation::Sibling, old_child)?;
        self.write_relation(dest_num, Relation::Child, obj_num)?;
        self.write_relation(obj_num, Relation::Parent, dest_num)?;
        Ok(())
    }

    pub fn get_object_name(&self, obj_num: u16) -> Result<String, String> {
        if obj_num == 0 {
            return Ok(String::new());
        }
        self.check_object(obj_num)?;
        let prop_table = self.property_table_addr(obj_num)?;
        let name_words = self.game.memory[prop_table] as usize;
        if name_words == 0 {
            return Ok(String::new());
        }
        let unicode_table = self.unicode_table();
        let (name, _) = crate::text::decode_string_with_unicode_table(
            &self.game.memory,
            prop_table + 1,
            self.game.header.abbrev_table,
            self.game.header.version,
            self.alphabet_override(),
            unicode_table.as_deref(),
        )?;
        Ok(name)
    }

    fn alphabet_override(&self) -> Option<[[char; 26]; 3]> {
        crate::text::alphabet_override_from_header(&self.game.memory, &self.game.header)
    }

    pub fn unicode_table(&self) -> Option<Vec<char>> {
        crate::text::unicode_table_from_header(&self.game.memory, &self.game.header)
    }
}

#[derive(Clone, Copy)]
enum Relation {
    Parent,
    Sibling,
    Child,
}

impl fmt::Display for VM {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VM state:")?;
        writeln!(f, "  PC: {:#06x}", self.pc)?;
        writeln!(f, "  stack depth: {}", self.stack.len())?;
        writeln!(f, "  call depth: {}", self.call_stack.len())?;
        if let Some(top) = self.stack.last() {
            writeln!(f, "  stack top: {top:#06x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn create_test_vm() -> VM {
        let mut memory = vec![0u8; 0x10000];
        memory[0x00] = 3; // version 3
        memory[0x04] = 0x10;
        memory[0x05] = 0x00; // high mem 0x1000
        memory[0x06] = 0x50;
        memory[0x07] = 0x00; // initial pc 0x5000
        memory[0x0c] = 0x01;
        memory[0x0d] = 0x00; // globals at 0x0100
        memory[0x0e] = 0x02;
        memory[0x0f] = 0x00; // static mem base 0x0200

        let game = Game::from_memory(memory).unwrap();
        VM::new(game, 1024, 256, ZRand::new_predictable(1))
    }

    #[test]
    fn dummy_frame_present_at_creation() {
        let vm = create_test_vm();
        assert_eq!(vm.pc, 0x5000);
        assert!(vm.stack.is_empty());
        assert_eq!(vm.call_stack.len(), 1);
        assert_eq!(vm.call_stack[0].num_locals, 0);
        assert_eq!(vm.call_stack[0].stack_base, 0);
    }

    #[test]
    fn stack_push_pop_peek() {
        let mut vm = create_test_vm();
        vm.push(0x1234).unwrap();
        assert_eq!(vm.peek().unwrap(), 0x1234);
        assert_eq!(vm.pop().unwrap(), 0x1234);
        assert!(vm.pop().is_err());
    }

    #[test]
    fn pop_rejects_underflow_below_frame_base() {
        let mut vm = create_test_vm();
        vm.call_stack.push(CallFrame {
            return_pc: 0x10,
            stack_base: 0,
            locals: [0; MAX_LOCALS],
            num_locals: 0,
            num_args: 0,
            return_target: ReturnTarget::Discard,
        });
        assert!(vm.pop().is_err());
    }

    #[test]
    fn memory_read_write_roundtrip() {
        let mut vm = create_test_vm();
        vm.write_byte(0x100, 0xAB).unwrap();
        assert_eq!(vm.read_byte(0x100), 0xAB);
        vm.write_word(0x100, 0xCDEF).unwrap();
        assert_eq!(vm.read_word(0x100), 0xCDEF);
    }

    #[test]
    fn user_store_rejects_static_memory() {
        let mut vm = create_test_vm();
        assert!(vm.user_store_byte(0x300, 0xFF).is_err());
        assert!(vm.user_store_byte(0x100, 0xFF).is_ok());
    }

    #[test]
    fn user_store_masks_flags1_rst_bits() {
        let mut vm = create_test_vm();
        vm.write_byte(0x01, 0b0101_0101).unwrap();
        vm.user_store_byte(0x01, 0xFF).unwrap();
        // Only the low 4 bits are program-writable for v3; the rest preserved.
        assert_eq!(vm.read_byte(0x01), 0b0101_1111);
    }

    #[test]
    fn global_variables_roundtrip() {
        let mut vm = create_test_vm();
        vm.write_global(0x10, 0xABCD).unwrap();
        assert_eq!(vm.read_global(0x10).unwrap(), 0xABCD);
        assert!(vm.read_global(0x0F).is_err());
    }

    #[test]
    fn indirect_variable_zero_peeks_not_pops() {
        let mut vm = create_test_vm();
        vm.push(0x1234).unwrap();
        assert_eq!(vm.read_variable(0x00).unwrap(), 0x1234);
        assert_eq!(vm.stack.len(), 1);
        vm.write_variable(0x00, 0x5678).unwrap();
        assert_eq!(vm.stack.len(), 1);
        assert_eq!(vm.peek().unwrap(), 0x5678);
    }

    #[test]
    fn object_tree_insert_and_remove() {
        let mut vm = create_test_vm();
        vm.game.header.object_table_addr = 0x0300;
        // Lay out five v3 objects (1..=5) as children of object 0 initially,
        // chained 1 -> 2 -> 3 -> 4 -> 5 via sibling pointers.
        let base = 0x0300 + 31 * 2;
        for i in 0..5u16 {
            let addr = base + i as usize * 9;
            vm.write_byte(addr + 4, 0).unwrap(); // parent
            let sibling = if i < 4 { i as u8 + 2 } else { 0 };
            vm.write_byte(addr + 5, sibling).unwrap();
            vm.write_byte(addr + 6, 0).unwrap(); // child
            vm.write_word(addr + 7, 0).unwrap(); // property table addr (unused here)
        }

        vm.insert_object(3, 1).unwrap();
        assert_eq!(vm.get_parent(3).unwrap(), 1);
        assert_eq!(vm.get_child(1).unwrap(), 3);

        vm.remove_object(3).unwrap();
        assert_eq!(vm.get_parent(3).unwrap(), 0);
        assert_eq!(vm.get_sibling(3).unwrap(), 0);
        assert_eq!(vm.get_child(1).unwrap(), 0);
    }

    #[test]
    fn loading_with_config_rewrites_capability_bits() {
        let mut memory = vec![0u8; 0x10000];
        memory[0x00] = 5; // version 5
        memory[0x0e] = 0x02;
        memory[0x0f] = 0x00; // static mem base 0x0200

        let mut config = crate::config::Config::default();
        config.disable_color = true;
        let game = Game::from_memory_with_config(memory, &config).unwrap();
        assert_eq!(game.memory[0x01] & 0x01, 0);
    }

    #[test]
    fn invalid_object_number_is_fatal() {
        let vm = create_test_vm();
        assert!(vm.get_parent(99999).is_err() || 99999 <= vm.max_object_number());
        assert!(vm.test_attribute(256, 0).is_err());
    }
}
