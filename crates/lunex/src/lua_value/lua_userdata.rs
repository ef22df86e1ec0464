// Full userdata: opaque host data plus an optional metatable.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use super::LuaTable;

pub struct LuaUserdata {
    data: Box<dyn Any>,
    metatable: Option<Rc<RefCell<LuaTable>>>,
}

impl LuaUserdata {
    pub fn new<T: Any>(data: T) -> Self {
        LuaUserdata {
            data: Box::new(data),
            metatable: None,
        }
    }

    pub fn with_metatable<T: Any>(data: T, metatable: Rc<RefCell<LuaTable>>) -> Self {
        LuaUserdata {
            data: Box::new(data),
            metatable: Some(metatable),
        }
    }

    pub fn metatable(&self) -> Option<Rc<RefCell<LuaTable>>> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, mt: Option<Rc<RefCell<LuaTable>>>) {
        self.metatable = mt;
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut::<T>()
    }
}
