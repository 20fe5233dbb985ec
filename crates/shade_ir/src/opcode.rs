/// Operation family a specialized opcode belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpFamily {
    LoadAttr,
    StoreAttr,
    LoadMethod,
    LoadGlobal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop,
    PopTop,
    DupTop,
    RotTwo,
    LoadConst,
    LoadFast,
    StoreFast,
    LoadGlobal,
    StoreGlobal,
    LoadAttr,
    StoreAttr,
    LoadMethod,
    CallMethod,
    CallFunction,
    ReturnValue,
    ExtendedArg,
    ShadowNop,

    LoadGlobalCached,

    LoadAttrSplitDict,
    LoadAttrDict,
    LoadAttrDataDescr,
    LoadAttrSlot,
    LoadAttrDescrOrClassVar,
    LoadAttrType,
    LoadAttrPolymorphic,
    LoadAttrUncachable,

    StoreAttrSplitDict,
    StoreAttrDict,
    StoreAttrDescr,
    StoreAttrSlot,
    StoreAttrUncachable,

    LoadMethodCached,
    LoadMethodUncachable,
}

impl Opcode {
    /// True for opcodes whose argument indexes the per-unit entry table.
    #[inline]
    pub fn is_cache_opcode(self) -> bool {
        matches!(
            self,
            Opcode::LoadAttrSplitDict
                | Opcode::LoadAttrDict
                | Opcode::LoadAttrDataDescr
                | Opcode::LoadAttrSlot
                | Opcode::LoadAttrDescrOrClassVar
                | Opcode::LoadAttrType
                | Opcode::StoreAttrSplitDict
                | Opcode::StoreAttrDict
                | Opcode::StoreAttrDescr
                | Opcode::StoreAttrSlot
                | Opcode::LoadMethodCached
        )
    }

    pub fn family(self) -> Option<OpFamily> {
        use Opcode::*;
        match self {
            LoadAttr | LoadAttrSplitDict | LoadAttrDict | LoadAttrDataDescr | LoadAttrSlot
            | LoadAttrDescrOrClassVar | LoadAttrType | LoadAttrPolymorphic | LoadAttrUncachable => {
                Some(OpFamily::LoadAttr)
            }
            StoreAttr | StoreAttrSplitDict | StoreAttrDict | StoreAttrDescr | StoreAttrSlot
            | StoreAttrUncachable => Some(OpFamily::StoreAttr),
            LoadMethod | LoadMethodCached | LoadMethodUncachable => Some(OpFamily::LoadMethod),
            LoadGlobal | LoadGlobalCached => Some(OpFamily::LoadGlobal),
            _ => None,
        }
    }

    /// True when the argument names an entry in the code object's name table.
    #[inline]
    pub fn has_name_arg(self) -> bool {
        matches!(
            self,
            Opcode::LoadGlobal
                | Opcode::StoreGlobal
                | Opcode::LoadAttr
                | Opcode::StoreAttr
                | Opcode::LoadMethod
        )
    }
}
