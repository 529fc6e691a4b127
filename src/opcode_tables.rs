//! Opcode name/shape tables: given an opcode plus the story version, what is
//! it called, and does it store a result / branch / carry inline text?
//!
//! A handful of opcodes change identity across versions while keeping the
//! same numeric slot (1OP:15, 0OP:9, VAR:4) — those are the places `version`
//! actually matters here; everywhere else it's accepted for a uniform
//! signature and ignored.

use crate::instruction::{InstructionForm, OperandCount};

pub fn get_instruction_name(
    opcode: u8,
    ext_opcode: Option<u8>,
    form: InstructionForm,
    operand_count: OperandCount,
    version: u8,
) -> &'static str {
    match form {
        InstructionForm::Extended => get_extended_opcode_name(ext_opcode.unwrap_or(0)),
        InstructionForm::Variable => get_variable_opcode_name(opcode, operand_count, version),
        InstructionForm::Short => match operand_count {
            OperandCount::OP0 => get_0op_opcode_name(opcode, version),
            OperandCount::OP1 => get_1op_opcode_name(opcode, version),
            _ => "unknown",
        },
        InstructionForm::Long => get_2op_opcode_name(opcode),
    }
}

fn get_2op_opcode_name(opcode: u8) -> &'static str {
    match opcode {
        0x01 => "je",
        0x02 => "jl",
        0x03 => "jg",
        0x04 => "dec_chk",
        0x05 => "inc_chk",
        0x06 => "jin",
        0x07 => "test",
        0x08 => "or",
        0x09 => "and",
        0x0A => "test_attr",
        0x0B => "set_attr",
        0x0C => "clear_attr",
        0x0D => "store",
        0x0E => "insert_obj",
        0x0F => "loadw",
        0x10 => "loadb",
        0x11 => "get_prop",
        0x12 => "get_prop_addr",
        0x13 => "get_next_prop",
        0x14 => "add",
        0x15 => "sub",
        0x16 => "mul",
        0x17 => "div",
        0x18 => "mod",
        0x19 => "call_2s",
        0x1A => "call_2n",
        0x1B => "set_colour",
        0x1C => "throw",
        _ => "unknown_2op",
    }
}

fn get_1op_opcode_name(opcode: u8, version: u8) -> &'static str {
    match opcode {
        0x00 => "jz",
        0x01 => "get_sibling",
        0x02 => "get_child",
        0x03 => "get_parent",
        0x04 => "get_prop_len",
        0x05 => "inc",
        0x06 => "dec",
        0x07 => "print_addr",
        0x08 => "call_1s",
        0x09 => "remove_obj",
        0x0A => "print_obj",
        0x0B => "ret",
        0x0C => "jump",
        0x0D => "print_paddr",
        0x0E => "load",
        0x0F => {
            if version >= 5 {
                "call_1n"
            } else {
                "not"
            }
        }
        _ => "unknown_1op",
    }
}

fn get_0op_opcode_name(opcode: u8, version: u8) -> &'static str {
    match opcode {
        0x00 => "rtrue",
        0x01 => "rfalse",
        0x02 => "print",
        0x03 => "print_ret",
        0x04 => "nop",
        0x05 => "save",
        0x06 => "restore",
        0x07 => "restart",
        0x08 => "ret_popped",
        0x09 => {
            if version >= 5 {
                "catch"
            } else {
                "pop"
            }
        }
        0x0A => "quit",
        0x0B => "new_line",
        0x0C => "show_status",
        0x0D => "verify",
        0x0E => "extended",
        0x0F => "piracy",
        _ => "unknown_0op",
    }
}

fn get_variable_opcode_name(opcode: u8, operand_count: OperandCount, version: u8) -> &'static str {
    if opcode >= 0x20 {
        return get_2op_opcode_name(opcode - 0x20);
    }
    if operand_count == OperandCount::OP2 {
        return get_2op_opcode_name(opcode);
    }

    match opcode {
        0x00 => "call",
        0x01 => "storew",
        0x02 => "storeb",
        0x03 => "put_prop",
        0x04 => {
            if version >= 5 {
                "aread"
            } else {
                "sread"
            }
        }
        0x05 => "print_char",
        0x06 => "print_num",
        0x07 => "random",
        0x08 => "push",
        0x09 => "pull",
        0x0A => "split_window",
        0x0B => "set_window",
        0x0C => "call_vs2",
        0x0D => "erase_window",
        0x0E => "erase_line",
        0x0F => "set_cursor",
        0x10 => "get_cursor",
        0x11 => "set_text_style",
        0x12 => "buffer_mode",
        0x13 => "output_stream",
        0x14 => "input_stream",
        0x15 => "sound_effect",
        0x16 => "read_char",
        0x17 => "scan_table",
        0x18 => "not",
        0x19 => "call_vn",
        0x1A => "call_vn2",
        0x1B => "tokenise",
        0x1C => "encode_text",
        0x1D => "copy_table",
        0x1E => "print_table",
        0x1F => "check_arg_count",
        _ => "unknown_var",
    }
}

fn get_extended_opcode_name(ext_opcode: u8) -> &'static str {
    match ext_opcode {
        0x00 => "save",
        0x01 => "restore",
        0x02 => "log_shift",
        0x03 => "art_shift",
        0x04 => "set_font",
        0x05 => "draw_picture",
        0x06 => "picture_data",
        0x07 => "erase_picture",
        0x08 => "set_margins",
        0x09 => "save_undo",
        0x0A => "restore_undo",
        0x0B => "print_unicode",
        0x0C => "check_unicode",
        0x10 => "move_window",
        0x11 => "window_size",
        0x12 => "window_style",
        0x13 => "get_wind_prop",
        0x14 => "scroll_window",
        0x15 => "pop_stack",
        0x16 => "read_mouse",
        0x17 => "mouse_window",
        0x18 => "push_stack",
        0x19 => "put_wind_prop",
        0x1A => "print_form",
        0x1B => "make_menu",
        0x1C => "picture_table",
        _ => "unknown_ext",
    }
}

pub fn stores_result(
    opcode: u8,
    ext_opcode: Option<u8>,
    form: InstructionForm,
    operand_count: OperandCount,
    version: u8,
) -> bool {
    match form {
        // print_unicode (0x0B) is output-only and never stores, unlike its
        // neighbors save_undo/restore_undo/check_unicode.
        InstructionForm::Extended => {
            matches!(ext_opcode, Some(0x00..=0x04) | Some(0x09) | Some(0x0A) | Some(0x0C))
        }
        InstructionForm::Variable => {
            if opcode >= 0x20 {
                stores_result_2op(opcode - 0x20)
            } else if operand_count == OperandCount::OP2 {
                stores_result_2op(opcode)
            } else {
                matches!(opcode, 0x00 | 0x07 | 0x0C | 0x16 | 0x17 | 0x18)
            }
        }
        InstructionForm::Short => match operand_count {
            // save/restore are branch-form in v1-3, store-form in v4; in v5+
            // they move to the extended opcode table entirely.
            OperandCount::OP0 => match opcode {
                0x05 | 0x06 => version == 4,
                0x09 => version >= 5, // catch
                _ => false,
            },
            OperandCount::OP1 => match opcode {
                0x01..=0x04 | 0x08 | 0x0E => true,
                0x0F => version < 5, // "not" stores, "call_1n" discards
                _ => false,
            },
            _ => false,
        },
        InstructionForm::Long => stores_result_2op(opcode),
    }
}

fn stores_result_2op(opcode: u8) -> bool {
    matches!(opcode, 0x08 | 0x09 | 0x0F..=0x19)
}

pub fn has_branch(
    opcode: u8,
    _ext_opcode: Option<u8>,
    form: InstructionForm,
    operand_count: OperandCount,
    version: u8,
) -> bool {
    match form {
        InstructionForm::Extended => false,
        InstructionForm::Variable => {
            if opcode >= 0x20 {
                has_branch_2op(opcode - 0x20)
            } else if operand_count == OperandCount::OP2 {
                has_branch_2op(opcode)
            } else {
                opcode == 0x17 // scan_table
            }
        }
        InstructionForm::Short => match operand_count {
            // save/restore branch in v1-3 only; v4 makes them store-form
            // (see `stores_result`) and v5+ moves them to extended opcodes.
            OperandCount::OP0 => match opcode {
                0x05 | 0x06 => version <= 3,
                0x0D | 0x0F => true,
                _ => false,
            },
            OperandCount::OP1 => matches!(opcode, 0x00..=0x02),
            _ => false,
        },
        InstructionForm::Long => has_branch_2op(opcode),
    }
}

fn has_branch_2op(opcode: u8) -> bool {
    matches!(opcode, 0x01..=0x07 | 0x0A)
}

pub fn has_text(
    _opcode: u8,
    _ext_opcode: Option<u8>,
    form: InstructionForm,
    operand_count: OperandCount,
    _version: u8,
) -> bool {
    matches!(
        (form, operand_count, _opcode),
        (InstructionForm::Short, OperandCount::OP0, 0x02 | 0x03)
    )
}

/// Expected operand count for opcodes whose type byte can encode more
/// operands than the opcode actually uses. `None` means "use everything the
/// type byte specifies" (true variadic opcodes like `call`).
pub fn get_expected_operand_count(
    opcode: u8,
    _ext_opcode: Option<u8>,
    form: InstructionForm,
    operand_count: OperandCount,
    version: u8,
) -> Option<usize> {
    if form != InstructionForm::Variable {
        return None;
    }
    if opcode >= 0x20 || operand_count == OperandCount::OP2 {
        return Some(2);
    }

    match opcode {
        0x00 => None,    // call family - variadic
        0x01 => Some(3), // storew
        0x02 => Some(3), // storeb
        0x03 => Some(3), // put_prop
        0x04 => None,    // sread/aread - variadic
        0x05 => Some(1), // print_char
        0x06 => Some(1), // print_num
        0x07 => Some(1), // random
        0x08 => Some(1), // push
        0x09 => {
            if version <= 5 {
                Some(1) // pull
            } else {
                None // v6 pull takes an optional user-stack operand
            }
        }
        0x0A => Some(1), // split_window
        0x0B => Some(1), // set_window
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_1op_15_is_version_gated() {
        assert_eq!(
            get_instruction_name(0x0F, None, InstructionForm::Short, OperandCount::OP1, 3),
            "not"
        );
        assert_eq!(
            get_instruction_name(0x0F, None, InstructionForm::Short, OperandCount::OP1, 5),
            "call_1n"
        );
    }

    #[test]
    fn slot_0op_9_is_version_gated() {
        assert_eq!(
            get_instruction_name(0x09, None, InstructionForm::Short, OperandCount::OP0, 3),
            "pop"
        );
        assert_eq!(
            get_instruction_name(0x09, None, InstructionForm::Short, OperandCount::OP0, 5),
            "catch"
        );
    }

    #[test]
    fn slot_var_4_is_version_gated() {
        assert_eq!(
            get_instruction_name(0x04, None, InstructionForm::Variable, OperandCount::VAR, 3),
            "sread"
        );
        assert_eq!(
            get_instruction_name(0x04, None, InstructionForm::Variable, OperandCount::VAR, 5),
            "aread"
        );
    }

    #[test]
    fn not_vs_call_1n_store_semantics_differ() {
        assert!(stores_result(
            0x0F,
            None,
            InstructionForm::Short,
            OperandCount::OP1,
            3
        ));
        assert!(!stores_result(
            0x0F,
            None,
            InstructionForm::Short,
            OperandCount::OP1,
            5
        ));
    }

    #[test]
    fn catch_stores_only_in_v5_plus() {
        assert!(!stores_result(
            0x09,
            None,
            InstructionForm::Short,
            OperandCount::OP0,
            3
        ));
        assert!(stores_result(
            0x09,
            None,
            InstructionForm::Short,
            OperandCount::OP0,
            5
        ));
    }
}
