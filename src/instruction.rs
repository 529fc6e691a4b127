//! Instruction decoding: form/operand-count classification, operand and
//! store/branch/text tail parsing, per §4.5.

use crate::header::Header;
use std::fmt::Write;

/// Operand types, encoded as 2-bit fields in the opcode or type bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    LargeConstant,
    SmallConstant,
    Variable,
    Omitted,
}

impl OperandType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0b00 => OperandType::LargeConstant,
            0b01 => OperandType::SmallConstant,
            0b10 => OperandType::Variable,
            _ => OperandType::Omitted,
        }
    }
}

/// Instruction forms, determined by the top bits of the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionForm {
    Long,
    Short,
    Extended,
    Variable,
}

/// Operand count categories (distinct from the actual number of operands
/// present, which the VAR form makes variable within a category).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandCount {
    OP0,
    OP1,
    OP2,
    VAR,
}

#[derive(Debug, Clone)]
pub struct BranchInfo {
    pub on_true: bool,
    pub offset: i16,
}

/// A decoded instruction: opcode identity plus whatever operand/store/
/// branch/text tail that opcode's form requires.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: u8,
    pub ext_opcode: Option<u8>,
    pub form: InstructionForm,
    pub operand_count: OperandCount,
    pub operand_types: Vec<OperandType>,
    pub operands: Vec<u16>,
    pub store_var: Option<u8>,
    pub branch: Option<BranchInfo>,
    pub text: Option<String>,
    /// Byte address of an inline packed string (`print`/`print_ret`), if any.
    /// `text` above was decoded with the *default* alphabet tables purely to
    /// measure its length for `size`; callers that need to honor a v5+
    /// header-extension alphabet-table override (`crate::vm::VM` does, via
    /// [`crate::text::alphabet_override_from_header`]) should re-decode from
    /// this address rather than trust `text`.
    pub text_addr: Option<usize>,
    pub size: usize,
}

impl Instruction {
    pub fn decode(memory: &[u8], addr: usize, version: u8) -> Result<Self, String> {
        if addr >= memory.len() {
            return Err(format!("instruction address {addr:#06x} out of bounds"));
        }

        let mut offset = addr;
        let opcode_byte = memory[offset];
        offset += 1;

        // 0xBE's top two bits ("10") otherwise read as Short form, so the
        // extended-form carve-out has to be checked before the general
        // top-bits classification, not as its fallback arm.
        let form = if opcode_byte == 0xBE && version >= 5 {
            InstructionForm::Extended
        } else {
            match opcode_byte >> 6 {
                0b11 => InstructionForm::Variable,
                0b10 => InstructionForm::Short,
                _ => InstructionForm::Long,
            }
        };

        let (opcode, ext_opcode, operand_count) = match form {
            InstructionForm::Long => {
                let opcode = opcode_byte & 0x1F;
                if opcode == 0x00 {
                    return Err(format!(
                        "invalid Long form opcode 0x00 at address {addr:#06x}"
                    ));
                }
                (opcode, None, OperandCount::OP2)
            }
            InstructionForm::Short => {
                let op_count = if (opcode_byte >> 4) & 0x03 == 0x03 {
                    OperandCount::OP0
                } else {
                    OperandCount::OP1
                };
                (opcode_byte & 0x0F, None, op_count)
            }
            InstructionForm::Variable => {
                let op_count = if opcode_byte & 0x20 == 0 {
                    OperandCount::OP2
                } else {
                    OperandCount::VAR
                };
                (opcode_byte & 0x1F, None, op_count)
            }
            InstructionForm::Extended => {
                if offset >= memory.len() {
                    return Err("extended opcode byte out of bounds".to_string());
                }
                let ext_op = memory[offset];
                offset += 1;
                (opcode_byte, Some(ext_op), OperandCount::VAR)
            }
        };

        let mut operand_types = Vec::new();
        match form {
            InstructionForm::Long => {
                operand_types.push(if opcode_byte & 0x40 != 0 {
                    OperandType::Variable
                } else {
                    OperandType::SmallConstant
                });
                operand_types.push(if opcode_byte & 0x20 != 0 {
                    OperandType::Variable
                } else {
                    OperandType::SmallConstant
                });
            }
            InstructionForm::Short => {
                if operand_count != OperandCount::OP0 {
                    let op_type = OperandType::from_bits((opcode_byte >> 4) & 0x03);
                    if op_type != OperandType::Omitted {
                        operand_types.push(op_type);
                    }
                }
            }
            InstructionForm::Variable | InstructionForm::Extended => {
                if offset >= memory.len() {
                    return Err("operand type byte out of bounds".to_string());
                }
                let mut type_bytes = vec![memory[offset]];
                offset += 1;

                if operand_count == OperandCount::VAR && (opcode == 0x0C || opcode == 0x1A) {
                    // call_vs2 (VAR 0x0C / 0xEC) and call_vn2 (VAR 0x1A / 0xFA)
                    // take up to 8 operands and so always need a second type byte,
                    // regardless of how many operands the first type byte marks present.
                    if offset >= memory.len() {
                        return Err("second operand type byte out of bounds".to_string());
                    }
                    type_bytes.push(memory[offset]);
                    offset += 1;
                }

                for type_byte in type_bytes {
                    for i in 0..4 {
                        let op_type = OperandType::from_bits(type_byte >> (6 - i * 2));
                        if op_type == OperandType::Omitted {
                            break;
                        }
                        operand_types.push(op_type);
                    }
                }
            }
        };

        let expected_count = crate::opcode_tables::get_expected_operand_count(
            opcode,
            ext_opcode,
            form,
            operand_count,
            version,
        );
        let operand_limit = expected_count.map_or(operand_types.len(), |c| operand_types.len().min(c));

        let mut operands = Vec::new();
        for (i, op_type) in operand_types.iter().enumerate() {
            if i >= operand_limit {
                break;
            }
            match op_type {
                OperandType::LargeConstant => {
                    if offset + 1 >= memory.len() {
                        return Err("large constant operand out of bounds".to_string());
                    }
                    operands.push(((memory[offset] as u16) << 8) | memory[offset + 1] as u16);
                    offset += 2;
                }
                OperandType::SmallConstant | OperandType::Variable => {
                    if offset >= memory.len() {
                        return Err("operand out of bounds".to_string());
                    }
                    operands.push(memory[offset] as u16);
                    offset += 1;
                }
                OperandType::Omitted => break,
            }
        }

        let store_var = if crate::opcode_tables::stores_result(opcode, ext_opcode, form, operand_count, version)
        {
            if offset >= memory.len() {
                return Err("store variable byte out of bounds".to_string());
            }
            let var = memory[offset];
            offset += 1;
            Some(var)
        } else {
            None
        };

        let branch = if crate::opcode_tables::has_branch(opcode, ext_opcode, form, operand_count, version)
        {
            if offset >= memory.len() {
                return Err("branch byte out of bounds".to_string());
            }
            let first_byte = memory[offset];
            offset += 1;

            let on_true = first_byte & 0x80 != 0;
            let offset_val = if first_byte & 0x40 != 0 {
                (first_byte & 0x3F) as i16
            } else {
                if offset >= memory.len() {
                    return Err("branch second byte out of bounds".to_string());
                }
                let second_byte = memory[offset];
                offset += 1;
                let val = (((first_byte & 0x3F) as i16) << 8) | second_byte as i16;
                if val & 0x2000 != 0 {
                    val | (0xC000u16 as i16)
                } else {
                    val
                }
            };

            Some(BranchInfo {
                on_true,
                offset: offset_val,
            })
        } else {
            None
        };

        let (text, text_addr) =
            if crate::opcode_tables::has_text(opcode, ext_opcode, form, operand_count, version) {
                let abbrev_addr = if memory.len() >= 0x1A {
                    ((memory[0x18] as usize) << 8) | memory[0x19] as usize
                } else {
                    0
                };
                let start = offset;
                let (string, len) =
                    crate::text::decode_string(memory, offset, abbrev_addr, version, None)
                        .map_err(|e| format!("failed to decode inline text at {offset:#06x}: {e}"))?;
                offset += len;
                (Some(string), Some(start))
            } else {
                (None, None)
            };

        let size = offset - addr;
        operand_types.truncate(operands.len());

        Ok(Instruction {
            opcode,
            ext_opcode,
            form,
            operand_count,
            operand_types,
            operands,
            store_var,
            branch,
            text,
            text_addr,
            size,
        })
    }

    pub fn name(&self, version: u8) -> &'static str {
        crate::opcode_tables::get_instruction_name(
            self.opcode,
            self.ext_opcode,
            self.form,
            self.operand_count,
            version,
        )
    }

    pub fn format_with_version(&self, version: u8) -> String {
        let mut result = String::from(self.name(version));

        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                result.push(' ');
            } else {
                result.push_str(", ");
            }
            match self.operand_types[i] {
                OperandType::Variable => write!(result, "V{op:02x}").unwrap(),
                _ => write!(result, "#{op:04x}").unwrap(),
            }
        }

        if let Some(var) = self.store_var {
            write!(result, " -> V{var:02x}").unwrap();
        }

        if let Some(ref branch) = self.branch {
            write!(
                result,
                " [{}{}]",
                if branch.on_true { "TRUE" } else { "FALSE" },
                match branch.offset {
                    0 => " RFALSE".to_string(),
                    1 => " RTRUE".to_string(),
                    n => format!(" {n:+}"),
                }
            )
            .unwrap();
        }

        result
    }
}

/// Reads the abbreviation table address and version straight from a
/// header, for callers decoding instructions without a live `VM`.
pub fn decode_at(memory: &[u8], addr: usize, header: &Header) -> Result<Instruction, String> {
    Instruction::decode(memory, addr, header.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_type_from_bits() {
        assert_eq!(OperandType::from_bits(0b00), OperandType::LargeConstant);
        assert_eq!(OperandType::from_bits(0b01), OperandType::SmallConstant);
        assert_eq!(OperandType::from_bits(0b10), OperandType::Variable);
        assert_eq!(OperandType::from_bits(0b11), OperandType::Omitted);
    }

    #[test]
    fn decodes_long_form_je() {
        let memory = vec![0x41, 0x34, 0x78, 0x80, 0x00, 0x00];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.form, InstructionForm::Long);
        assert_eq!(inst.opcode, 0x01);
        assert_eq!(inst.operands, vec![0x34, 0x78]);
        assert!(inst.branch.is_some());
    }

    #[test]
    fn decodes_short_form_jump() {
        let memory = vec![0x9C, 0x34, 0x00, 0x00];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.form, InstructionForm::Short);
        assert_eq!(inst.opcode, 0x0C);
        assert_eq!(inst.operands, vec![0x34]);
    }

    #[test]
    fn decodes_variable_form_call() {
        let memory = vec![0xE0, 0x2A, 0x12, 0x34, 0x01, 0x02, 0x03, 0x00, 0x00, 0x00];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.form, InstructionForm::Variable);
        assert_eq!(inst.operands, vec![0x1234, 0x01, 0x02, 0x03]);
        assert_eq!(inst.store_var, Some(0x00));
    }

    #[test]
    fn decodes_call_vs2_with_second_type_byte_regardless_of_first() {
        // call_vs2 (VAR 0x0C / wire 0xEC) with 5 operands: the first type
        // byte marks 4 operands present (not 0xFF), but the opcode still
        // mandates a second type byte for operands 5-8.
        let memory = vec![
            0xEC, // VAR form, opcode 0x0C (call_vs2)
            0x55, // four small constants (01 01 01 01)
            0x7F, // fifth small constant, rest omitted (01 11 11 11)
            0x01, 0x02, 0x03, 0x04, 0x05, // operand bytes
            0x00, // store variable
        ];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.operands, vec![0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(inst.store_var, Some(0x00));
    }

    #[test]
    fn rejects_invalid_long_form_zero_opcode() {
        let memory = vec![0x00, 0x00, 0x00];
        assert!(Instruction::decode(&memory, 0, 3).is_err());
    }
}
