//! Quetzal chunk definitions, per §4.6.

use crate::vm::{CallFrame, ReturnTarget, VM};

/// IFhd chunk - Interface Header. Identifies the story file a save belongs
/// to and the PC to resume at.
pub struct IFhdChunk {
    pub release: u16,
    pub serial: [u8; 6],
    pub checksum: u16,
    /// Byte address (not packed) the interpreter was at when the save
    /// happened: the instruction immediately following `save`/`save_undo`.
    pub initial_pc: u32,
}

impl IFhdChunk {
    pub fn from_vm(vm: &VM) -> Self {
        let header = &vm.game.header;
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&vm.game.memory[0x12..0x18]);

        IFhdChunk {
            release: header.release,
            serial,
            checksum: header.checksum_file,
            initial_pc: vm.pc as u32,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(13);
        bytes.extend_from_slice(&self.release.to_be_bytes());
        bytes.extend_from_slice(&self.serial);
        bytes.extend_from_slice(&self.checksum.to_be_bytes());
        let pc_bytes = self.initial_pc.to_be_bytes();
        bytes.push(pc_bytes[1]);
        bytes.push(pc_bytes[2]);
        bytes.push(pc_bytes[3]);
        bytes
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, String> {
        if data.len() < 13 {
            return Err("IFhd chunk too small".to_string());
        }

        let release = u16::from_be_bytes([data[0], data[1]]);
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&data[2..8]);
        let checksum = u16::from_be_bytes([data[8], data[9]]);
        let initial_pc =
            ((data[10] as u32) << 16) | ((data[11] as u32) << 8) | data[12] as u32;

        Ok(IFhdChunk {
            release,
            serial,
            checksum,
            initial_pc,
        })
    }
}

/// Stks chunk - call frames and evaluation stack, in the on-wire format
/// from §4.6: per frame, a 3-byte return PC, a flags byte, the store
/// variable (if any), the supplied argument count, eval-stack-size word,
/// locals, and that frame's slice of the evaluation stack.
pub struct StksChunk {
    pub data: Vec<u8>,
}

impl StksChunk {
    pub fn from_vm(vm: &VM) -> Self {
        let mut data = Vec::new();

        for (frame_idx, frame) in vm.call_stack.iter().enumerate() {
            let pc_bytes = (frame.return_pc as u32).to_be_bytes();
            data.push(pc_bytes[1]);
            data.push(pc_bytes[2]);
            data.push(pc_bytes[3]);

            // Flags byte: bits 0-3 local count, bit 4 = discard return value,
            // bits 5-6 unused by this interpreter (reserved).
            let mut flags = frame.num_locals & 0x0F;
            let discards = matches!(frame.return_target, ReturnTarget::Discard);
            if discards {
                flags |= 0x10;
            }
            data.push(flags);

            let store_var = match frame.return_target {
                ReturnTarget::Store(v) => v,
                ReturnTarget::Discard | ReturnTarget::PushOnReturn => 0,
            };
            data.push(store_var);

            // Supplied-argument bitmap: one bit per argument actually passed.
            let arg_bits: u8 = if frame.num_args == 0 {
                0
            } else {
                (0xFF_u16 >> (8 - frame.num_args.min(8))) as u8
            };
            data.push(arg_bits);

            let next_frame_idx = frame_idx + 1;
            let stack_end = if next_frame_idx < vm.call_stack.len() {
                vm.call_stack[next_frame_idx].stack_base
            } else {
                vm.stack.len()
            };
            let stack_size = stack_end.saturating_sub(frame.stack_base);
            data.extend_from_slice(&(stack_size as u16).to_be_bytes());

            for i in 0..frame.num_locals as usize {
                data.extend_from_slice(&frame.locals[i].to_be_bytes());
            }

            for i in frame.stack_base..stack_end {
                data.extend_from_slice(&vm.stack[i].to_be_bytes());
            }
        }

        StksChunk { data }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Rebuilds the VM's call stack and evaluation stack from wire bytes.
    /// Leaves `vm` untouched on error so the caller can roll back to a
    /// pre-restore snapshot.
    pub fn restore_to_vm(&self, vm: &mut VM) -> Result<(), String> {
        let mut call_stack = Vec::new();
        let mut eval_stack = Vec::new();

        let mut offset = 0;
        let data = &self.data;

        while offset < data.len() {
            if offset + 3 > data.len() {
                return Err("incomplete Stks frame: truncated return PC".to_string());
            }
            let return_pc = ((data[offset] as usize) << 16)
                | ((data[offset + 1] as usize) << 8)
                | data[offset + 2] as usize;
            offset += 3;

            if offset + 3 > data.len() {
                return Err("incomplete Stks frame: truncated flags/store/args".to_string());
            }
            let flags = data[offset];
            let store_var = data[offset + 1];
            let arg_bits = data[offset + 2];
            offset += 3;

            let local_count = (flags & 0x0F) as usize;
            let discards = flags & 0x10 != 0;
            let num_args = arg_bits.count_ones() as u8;
            let return_target = if discards {
                ReturnTarget::Discard
            } else {
                ReturnTarget::Store(store_var)
            };

            if offset + 2 > data.len() {
                return Err("incomplete Stks frame: truncated stack count".to_string());
            }
            let stack_count = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
            offset += 2;

            let mut locals = [0u16; 16];
            if offset + local_count * 2 > data.len() {
                return Err("incomplete Stks frame: truncated locals".to_string());
            }
            for local in locals.iter_mut().take(local_count) {
                *local = u16::from_be_bytes([data[offset], data[offset + 1]]);
                offset += 2;
            }

            let stack_base = eval_stack.len();
            if offset + stack_count * 2 > data.len() {
                return Err("incomplete Stks frame: truncated stack values".to_string());
            }
            for _ in 0..stack_count {
                eval_stack.push(u16::from_be_bytes([data[offset], data[offset + 1]]));
                offset += 2;
            }

            call_stack.push(CallFrame {
                return_pc,
                stack_base,
                locals,
                num_locals: local_count as u8,
                num_args,
                return_target,
            });
        }

        vm.call_stack = call_stack;
        vm.stack = eval_stack;
        Ok(())
    }
}

/// IntD chunk - optional interpreter-specific data. Written but ignored on
/// restore; carried only so saves round-trip through other interpreters.
pub struct IntDChunk {
    pub interpreter_id: [u8; 4],
    pub data: Vec<u8>,
}

impl Default for IntDChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl IntDChunk {
    pub fn new() -> Self {
        IntDChunk {
            interpreter_id: *b"RUST",
            data: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.interpreter_id);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::create_test_vm;

    #[test]
    fn ifhd_round_trips_full_pc() {
        let vm = create_test_vm();
        let ifhd = IFhdChunk::from_vm(&vm);
        let bytes = ifhd.to_bytes();
        let parsed = IFhdChunk::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.initial_pc, vm.pc as u32);
        assert_eq!(parsed.release, vm.game.header.release);
    }

    #[test]
    fn stks_round_trips_frames_and_stack() {
        let mut vm = create_test_vm();
        vm.push(0x1111).unwrap();
        vm.call_stack.push(CallFrame {
            return_pc: 0x4000,
            stack_base: vm.stack.len(),
            locals: [7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            num_locals: 1,
            num_args: 1,
            return_target: ReturnTarget::Store(5),
        });
        vm.push(0x2222).unwrap();

        let stks = StksChunk::from_vm(&vm);
        let mut restored = create_test_vm();
        stks.restore_to_vm(&mut restored).unwrap();

        assert_eq!(restored.call_stack.len(), vm.call_stack.len());
        let last = restored.call_stack.last().unwrap();
        assert_eq!(last.return_pc, 0x4000);
        assert_eq!(last.locals[0], 7);
        assert_eq!(last.return_target, ReturnTarget::Store(5));
        assert_eq!(restored.stack, vm.stack);
    }
}
