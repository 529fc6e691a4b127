//! In-memory undo ring for `@save_undo`/`@restore_undo`, per §4.6.
//!
//! A bounded stack of up to `capacity` entries: `push` drops the oldest
//! entry once full, `pop_restore` removes and restores the most recently
//! pushed one. Entries are immutable once created and this ring is never
//! written to disk — it's purely a cooperative convenience the Standard
//! asks for alongside real save/restore.

use crate::quetzal::compressed_memory::{compress_memory, decompress_memory};
use crate::vm::{CallFrame, VM};

enum DynamicSnapshot {
    Compressed(Vec<u8>),
    Raw(Vec<u8>),
}

/// One undo slot: dynamic memory, the full call/evaluation stack, and the PC
/// at the moment of `@save_undo`.
struct UndoState {
    pc: usize,
    dynamic_memory: DynamicSnapshot,
    stack: Vec<u16>,
    call_stack: Vec<CallFrame>,
}

pub struct UndoRing {
    capacity: usize,
    compress: bool,
    entries: Vec<UndoState>,
}

impl UndoRing {
    pub fn new(capacity: usize, compress: bool) -> Self {
        UndoRing {
            capacity: capacity.max(1),
            compress,
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Snapshots `vm`'s current state, dropping the oldest entry if the ring
    /// is already at capacity.
    pub fn push(&mut self, vm: &VM) {
        let dynamic_end = vm.game.original_memory.len();
        let current = &vm.game.memory[..dynamic_end];
        let dynamic_memory = if self.compress {
            DynamicSnapshot::Compressed(compress_memory(current, &vm.game.original_memory))
        } else {
            DynamicSnapshot::Raw(current.to_vec())
        };

        self.entries.push(UndoState {
            pc: vm.pc,
            dynamic_memory,
            stack: vm.stack.clone(),
            call_stack: vm.call_stack.clone(),
        });

        if self.entries.len() > self.capacity {
            self.entries.remove(0);
        }
    }

    /// Pops the most recent entry and applies it to `vm`. Leaves `vm`
    /// untouched and the ring unchanged if it's empty or the snapshot is
    /// corrupt, so a failed `@restore_undo` can cleanly fall through to its
    /// own store(0)/branch(false) rather than leaving the VM half-restored.
    pub fn pop_restore(&mut self, vm: &mut VM) -> Result<(), String> {
        let dynamic_end = vm.game.original_memory.len();
        let state = self
            .entries
            .last()
            .ok_or_else(|| "undo ring is empty".to_string())?;

        let restored = match &state.dynamic_memory {
            DynamicSnapshot::Compressed(bytes) => {
                decompress_memory(bytes, &vm.game.original_memory)?
            }
            DynamicSnapshot::Raw(bytes) => bytes.clone(),
        };
        if restored.len() != dynamic_end {
            return Err("undo snapshot size does not match dynamic memory".to_string());
        }

        let state = self.entries.pop().expect("checked non-empty above");
        vm.game.memory[..dynamic_end].copy_from_slice(&restored);
        vm.stack = state.stack;
        vm.call_stack = state.call_stack;
        vm.pc = state.pc;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::create_test_vm;

    #[test]
    fn restore_fails_cleanly_when_empty() {
        let mut vm = create_test_vm();
        let mut ring = UndoRing::new(3, true);
        assert!(ring.pop_restore(&mut vm).is_err());
    }

    #[test]
    fn push_then_restore_round_trips_state() {
        let mut vm = create_test_vm();
        vm.write_byte(0x100, 0xAB).unwrap();
        let mut ring = UndoRing::new(3, true);
        ring.push(&vm);

        vm.write_byte(0x100, 0xCD).unwrap();
        vm.push(0x4242).unwrap();

        ring.pop_restore(&mut vm).unwrap();
        assert_eq!(vm.read_byte(0x100), 0xAB);
        assert!(ring.is_empty());
    }

    #[test]
    fn overflow_drops_oldest_entry() {
        let mut vm = create_test_vm();
        let mut ring = UndoRing::new(2, false);

        vm.write_byte(0x100, 1).unwrap();
        ring.push(&vm);
        vm.write_byte(0x100, 2).unwrap();
        ring.push(&vm);
        vm.write_byte(0x100, 3).unwrap();
        ring.push(&vm);
        assert_eq!(ring.len(), 2);

        vm.write_byte(0x100, 99).unwrap();
        ring.pop_restore(&mut vm).unwrap();
        assert_eq!(vm.read_byte(0x100), 3);
        ring.pop_restore(&mut vm).unwrap();
        assert_eq!(vm.read_byte(0x100), 2);
        assert!(ring.pop_restore(&mut vm).is_err());
    }

    #[test]
    fn raw_mode_round_trips_too() {
        let mut vm = create_test_vm();
        vm.write_byte(0x100, 7).unwrap();
        let mut ring = UndoRing::new(2, false);
        ring.push(&vm);
        vm.write_byte(0x100, 8).unwrap();
        ring.pop_restore(&mut vm).unwrap();
        assert_eq!(vm.read_byte(0x100), 7);
    }
}
