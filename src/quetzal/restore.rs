//! Restore game functionality for Quetzal format.

use crate::quetzal::chunks::{IFhdChunk, StksChunk};
use crate::quetzal::compressed_memory::decompress_memory;
use crate::quetzal::iff::IffFile;
use crate::vm::VM;
use log::{debug, info, warn};

/// RestoreGame holds a parsed Quetzal save, validated against a target VM.
pub struct RestoreGame {
    iff: IffFile,
}

/// Outcome of a successful restore the caller must act on: per §6, restoring
/// in a v3 story closes the upper window as if `split_window(0)` had run.
pub struct RestoreEffects {
    pub close_upper_window: bool,
}

impl RestoreGame {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let iff = IffFile::from_bytes(bytes)?;

        if &iff.form_type != b"IFZS" {
            return Err(format!(
                "not a Quetzal save file (found form type {:?})",
                std::str::from_utf8(&iff.form_type).unwrap_or("<invalid>")
            ));
        }
        if iff.find_chunk(b"IFhd").is_none() {
            return Err("save data missing required IFhd chunk".to_string());
        }
        if iff.find_chunk(b"CMem").is_none() && iff.find_chunk(b"UMem").is_none() {
            return Err("save data missing memory chunk (CMem or UMem)".to_string());
        }
        if iff.find_chunk(b"Stks").is_none() {
            return Err("save data missing required Stks chunk".to_string());
        }

        Ok(RestoreGame { iff })
    }

    /// Restores `vm` in place. On any error, `vm` is left exactly as it was
    /// before the call: state is staged in locals and only swapped in after
    /// every fallible step succeeds.
    pub fn restore_to_vm(&self, vm: &mut VM) -> Result<RestoreEffects, String> {
        let ifhd_chunk = self.iff.find_chunk(b"IFhd").ok_or("missing IFhd chunk")?;
        let ifhd = IFhdChunk::from_bytes(&ifhd_chunk.data)?;

        if ifhd.release != vm.game.header.release {
            return Err(format!(
                "save is for release {}, loaded story is release {}",
                ifhd.release, vm.game.header.release
            ));
        }
        let mut game_serial = [0u8; 6];
        game_serial.copy_from_slice(&vm.game.memory[0x12..0x18]);
        if ifhd.serial != game_serial {
            return Err("save serial number does not match the loaded story".to_string());
        }
        if ifhd.checksum != vm.game.header.checksum_file {
            return Err("save checksum does not match the loaded story".to_string());
        }

        let dynamic_size = vm.game.header.base_static_mem;
        let restored_memory = if let Some(cmem_chunk) = self.iff.find_chunk(b"CMem") {
            debug!("restoring from CMem chunk");
            let original_dynamic = &vm.game.original_memory[..dynamic_size];
            decompress_memory(&cmem_chunk.data, original_dynamic)?
        } else if let Some(umem_chunk) = self.iff.find_chunk(b"UMem") {
            debug!("restoring from UMem chunk");
            if umem_chunk.data.len() != dynamic_size {
                return Err(format!(
                    "UMem size {} does not match dynamic memory size {dynamic_size}",
                    umem_chunk.data.len()
                ));
            }
            umem_chunk.data.clone()
        } else {
            return Err("missing memory chunk (CMem or UMem)".to_string());
        };

        let stks_chunk = self.iff.find_chunk(b"Stks").ok_or("missing Stks chunk")?;
        let stks = StksChunk {
            data: stks_chunk.data.clone(),
        };

        // Stage everything before mutating vm, so a Stks parse failure after
        // a successful memory decode can't leave the VM half-restored.
        let mut staged = vm_snapshot(vm);
        staged.memory[..dynamic_size].copy_from_slice(&restored_memory);
        // Flags 2 and the interpreter-identification bytes belong to this
        // session, not the save; keep what's currently live rather than
        // whatever was in dynamic memory at save time.
        staged.memory[0x10] = vm.game.memory[0x10];
        staged.memory[0x11] = vm.game.memory[0x11];
        staged.memory[0x1E] = vm.game.memory[0x1E];
        staged.memory[0x1F] = vm.game.memory[0x1F];

        let previous_memory = std::mem::replace(&mut vm.game.memory, staged.memory);
        if let Err(e) = stks.restore_to_vm(vm) {
            vm.game.memory = previous_memory;
            return Err(format!("corrupt Stks chunk, restore aborted: {e}"));
        }

        vm.pc = ifhd.initial_pc as usize;

        info!("game restored ({} call frames)", vm.call_stack.len());
        Ok(RestoreEffects {
            close_upper_window: vm.game.header.version == 3,
        })
    }
}

struct Staged {
    memory: Vec<u8>,
}

fn vm_snapshot(vm: &VM) -> Staged {
    Staged {
        memory: vm.game.memory.clone(),
    }
}

/// Deserializes and applies a Quetzal save image in one step.
pub fn restore_game(vm: &mut VM, save_bytes: &[u8]) -> Result<RestoreEffects, String> {
    let restore = RestoreGame::from_bytes(save_bytes)?;
    restore.restore_to_vm(vm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quetzal::save::SaveGame;
    use crate::vm::tests::create_test_vm;

    #[test]
    fn round_trips_through_save_and_restore() {
        let mut vm = create_test_vm();
        vm.write_global(0x10, 42).unwrap();
        vm.push(0xBEEF).unwrap();

        let save = SaveGame::from_vm(&vm, true).unwrap();
        let bytes = save.to_bytes();

        let mut fresh = create_test_vm();
        let effects = restore_game(&mut fresh, &bytes).unwrap();
        assert!(effects.close_upper_window);
        assert_eq!(fresh.read_global(0x10).unwrap(), 42);
        assert_eq!(fresh.peek().unwrap(), 0xBEEF);
    }

    #[test]
    fn rejects_mismatched_checksum() {
        let vm = create_test_vm();
        let save = SaveGame::from_vm(&vm, true).unwrap();
        let bytes = save.to_bytes();

        let mut other = create_test_vm();
        other.game.header.checksum_file = vm.game.header.checksum_file.wrapping_add(1);
        assert!(restore_game(&mut other, &bytes).is_err());
    }

    #[test]
    fn leaves_vm_untouched_on_corrupt_stks() {
        let vm = create_test_vm();
        let save = SaveGame::from_vm(&vm, true).unwrap();
        let mut bytes = save.to_bytes();
        // Corrupt the tail of the Stks chunk payload.
        let len = bytes.len();
        bytes[len - 1] = 0xFF;
        bytes[len - 2] = 0xFF;

        let mut target = create_test_vm();
        let before_pc = target.pc;
        let _ = restore_game(&mut target, &bytes);
        assert_eq!(target.pc, before_pc);
    }
}
