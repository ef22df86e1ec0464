// Upvalue cells. Open cells alias a live register slot of some frame;
// closed cells own their value. The open -> closed transition is monotonic.

use std::cell::RefCell;

use super::LuaValue;

#[derive(Debug)]
pub enum UpvalueState {
    Open { frame: u64, register: u32 },
    Closed(LuaValue),
}

#[derive(Debug)]
pub struct LuaUpvalue {
    pub state: RefCell<UpvalueState>,
}

impl LuaUpvalue {
    pub fn open(frame: u64, register: u32) -> Self {
        LuaUpvalue {
            state: RefCell::new(UpvalueState::Open { frame, register }),
        }
    }

    pub fn closed(value: LuaValue) -> Self {
        LuaUpvalue {
            state: RefCell::new(UpvalueState::Closed(value)),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.state.borrow(), UpvalueState::Open { .. })
    }

    /// Copy the register's current value into the cell, ending aliasing.
    pub fn close(&self, value: LuaValue) {
        *self.state.borrow_mut() = UpvalueState::Closed(value);
    }
}
