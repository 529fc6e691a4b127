//! Save game functionality for Quetzal format

use crate::quetzal::chunks::{IFhdChunk, IntDChunk, StksChunk};
use crate::quetzal::compressed_memory::{CMemChunk, UMemChunk};
use crate::quetzal::iff::IffFile;
use crate::vm::VM;
use log::debug;

/// SaveGame builds an in-memory Quetzal byte stream from VM state.
pub struct SaveGame {
    iff: IffFile,
}

impl SaveGame {
    /// Build a Quetzal save image from the current VM state.
    ///
    /// `compress`: use CMem (XOR-RLE) when true, UMem (raw copy) when false.
    pub fn from_vm(vm: &VM, compress: bool) -> Result<Self, String> {
        let mut iff = IffFile::new();

        let ifhd = IFhdChunk::from_vm(vm);
        iff.add_chunk(*b"IFhd", ifhd.to_bytes());
        debug!("Added IFhd chunk");

        let dynamic_size = vm.game.header.base_static_mem;
        let current_dynamic = &vm.game.memory[..dynamic_size];

        if compress {
            let original_dynamic = &vm.game.original_memory[..dynamic_size];
            let cmem = CMemChunk::from_memory(current_dynamic, original_dynamic);
            let bytes = cmem.to_bytes();
            debug!("Added CMem chunk ({} bytes compressed)", bytes.len());
            iff.add_chunk(*b"CMem", bytes);
        } else {
            let umem = UMemChunk {
                data: current_dynamic.to_vec(),
            };
            debug!("Added UMem chunk ({} bytes)", umem.data.len());
            iff.add_chunk(*b"UMem", umem.data);
        }

        let stks = StksChunk::from_vm(vm);
        iff.add_chunk(*b"Stks", stks.to_bytes());
        debug!("Added Stks chunk ({} bytes)", stks.to_bytes().len());

        let intd = IntDChunk::new();
        iff.add_chunk(*b"IntD", intd.to_bytes());

        Ok(SaveGame { iff })
    }

    /// Serialize the save image to bytes, ready for the I/O port's save blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.iff.to_bytes()
    }
}
