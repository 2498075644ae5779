//! Stack frames and offset tables
//!
//! Every local and temporary occupies one 8-byte slot at a negative offset
//! from `%rbp` in declaration order (-8, -16, ...). Parameters live above
//! the saved base pointer and return address, at +16, +24, ... in
//! declaration order: internal calls push all arguments on the stack.
//! Struct fields are flattened at 8 bytes apiece regardless of type.

use crate::ast::StructDef;
use crate::lir::LirFunction;
use std::collections::HashMap;

/// Per-function slot assignment.
pub(super) struct Frame {
    offsets: HashMap<String, i64>,
    size: i64,
}

impl Frame {
    pub fn new(func: &LirFunction) -> Frame {
        let mut offsets = HashMap::new();
        let mut param_offset = 16;
        for param in &func.params {
            offsets.insert(param.name.clone(), param_offset);
            param_offset += 8;
        }
        let mut local_offset = -8;
        for local in &func.locals {
            offsets.insert(local.name.clone(), local_offset);
            local_offset -= 8;
        }
        Frame {
            offsets,
            size: round_up_to_16(func.locals.len() as i64 * 8),
        }
    }

    /// `%rbp`-relative offset for a parameter, local, or temporary.
    pub fn offset(&self, name: &str) -> Option<i64> {
        self.offsets.get(name).copied()
    }

    /// Frame size to subtract from `%rsp`, already 16-byte aligned.
    pub fn size(&self) -> i64 {
        self.size
    }
}

fn round_up_to_16(bytes: i64) -> i64 {
    if bytes % 16 != 0 { bytes + 8 } else { bytes }
}

/// Flat field -> offset tables, 8 bytes per field in declared order.
pub(super) fn field_offsets(structs: &[StructDef]) -> HashMap<String, HashMap<String, i64>> {
    let mut table = HashMap::new();
    for s in structs {
        let mut fields = HashMap::new();
        let mut offset = 0;
        for field in &s.fields {
            fields.insert(field.name.clone(), offset);
            offset += 8;
        }
        table.insert(s.name.clone(), fields);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Decl;
    use crate::types::Type;
    use std::collections::BTreeMap;

    fn func_with(params: &[&str], locals: &[&str]) -> LirFunction {
        LirFunction {
            name: "f".into(),
            params: params.iter().map(|p| Decl::new(*p, Type::Int)).collect(),
            rettyp: None,
            locals: locals.iter().map(|l| Decl::new(*l, Type::Int)).collect(),
            body: BTreeMap::new(),
        }
    }

    #[test]
    fn test_param_and_local_offsets() {
        let frame = Frame::new(&func_with(&["a", "b"], &["x", "y", "_t1"]));
        assert_eq!(frame.offset("a"), Some(16));
        assert_eq!(frame.offset("b"), Some(24));
        assert_eq!(frame.offset("x"), Some(-8));
        assert_eq!(frame.offset("y"), Some(-16));
        assert_eq!(frame.offset("_t1"), Some(-24));
        assert_eq!(frame.offset("g"), None);
    }

    #[test]
    fn test_frame_size_rounds_to_16() {
        assert_eq!(Frame::new(&func_with(&[], &[])).size(), 0);
        assert_eq!(Frame::new(&func_with(&[], &["x"])).size(), 16);
        assert_eq!(Frame::new(&func_with(&[], &["x", "y"])).size(), 16);
        assert_eq!(Frame::new(&func_with(&[], &["x", "y", "z"])).size(), 32);
    }

    #[test]
    fn test_field_offsets_are_8_bytes_each() {
        let structs = vec![StructDef {
            name: "S".into(),
            fields: vec![
                Decl::new("x", Type::Int),
                Decl::new("y", Type::Int),
                Decl::new("next", Type::ptr(Type::Struct("S".into()))),
            ],
        }];
        let table = field_offsets(&structs);
        assert_eq!(table["S"]["x"], 0);
        assert_eq!(table["S"]["y"], 8);
        assert_eq!(table["S"]["next"], 16);
    }
}
