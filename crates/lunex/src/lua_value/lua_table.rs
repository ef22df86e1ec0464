// Hybrid table storage: a dense 1-based array part plus an insertion-ordered
// hash part. The hash part keeps a slot vector so `next` can resume after a
// key in O(1) even across mutations.

use ahash::AHashMap;
use std::cell::RefCell;
use std::rc::Rc;

use super::LuaValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKeyError {
    NilKey,
    NanKey,
}

impl TableKeyError {
    pub fn message(self) -> &'static str {
        match self {
            TableKeyError::NilKey => "table index is nil",
            TableKeyError::NanKey => "table index is NaN",
        }
    }
}

pub struct LuaTable {
    /// dense array part, 1-based from the Lua side
    array: Vec<LuaValue>,
    /// key -> slot in `entries`
    index: AHashMap<LuaValue, usize>,
    /// slot storage in insertion order; a Nil key marks a dead slot
    entries: Vec<(LuaValue, LuaValue)>,
    dead: usize,
    metatable: Option<Rc<RefCell<LuaTable>>>,
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable {
            array: Vec::new(),
            index: AHashMap::new(),
            entries: Vec::new(),
            dead: 0,
            metatable: None,
        }
    }

    pub fn with_capacity(narray: usize, nhash: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(narray),
            index: AHashMap::with_capacity(nhash),
            entries: Vec::with_capacity(nhash),
            dead: 0,
            metatable: None,
        }
    }

    pub fn metatable(&self) -> Option<Rc<RefCell<LuaTable>>> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, mt: Option<Rc<RefCell<LuaTable>>>) {
        self.metatable = mt;
    }

    /// Raw read, no metamethods. Missing keys read as nil.
    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        let key = key.clone().normalize_key();
        if let LuaValue::Integer(i) = key {
            if i >= 1 && (i as u64) <= self.array.len() as u64 {
                return self.array[(i - 1) as usize].clone();
            }
        }
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot].1.clone(),
            None => LuaValue::Nil,
        }
    }

    pub fn raw_get_int(&self, i: i64) -> LuaValue {
        if i >= 1 && (i as u64) <= self.array.len() as u64 {
            return self.array[(i - 1) as usize].clone();
        }
        match self.index.get(&LuaValue::Integer(i)) {
            Some(&slot) => self.entries[slot].1.clone(),
            None => LuaValue::Nil,
        }
    }

    pub fn raw_get_str(&self, key: &str) -> LuaValue {
        // allocation-free lookup would need a borrowed key type; tables are
        // keyed by LuaValue so build one here
        self.raw_get(&LuaValue::string(key))
    }

    /// Raw write, no metamethods. Rejects nil and NaN keys; a nil value
    /// erases the entry.
    pub fn raw_set(&mut self, key: LuaValue, value: LuaValue) -> Result<(), TableKeyError> {
        let key = key.normalize_key();
        match &key {
            LuaValue::Nil => return Err(TableKeyError::NilKey),
            LuaValue::Float(f) if f.is_nan() => return Err(TableKeyError::NanKey),
            _ => {}
        }
        if let LuaValue::Integer(i) = key {
            self.raw_set_int(i, value);
            return Ok(());
        }
        self.hash_set(key, value);
        Ok(())
    }

    pub fn raw_set_int(&mut self, i: i64, value: LuaValue) {
        let len = self.array.len() as i64;
        if i >= 1 && i <= len {
            self.array[(i - 1) as usize] = value;
            if i == len {
                // drop trailing holes so the array end stays a border
                while matches!(self.array.last(), Some(LuaValue::Nil)) {
                    self.array.pop();
                }
            }
            return;
        }
        if i == len + 1 && !value.is_nil() {
            self.array.push(value);
            self.migrate_from_hash();
            return;
        }
        self.hash_set(LuaValue::Integer(i), value);
    }

    /// Append keys that became contiguous with the array part.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = LuaValue::Integer(self.array.len() as i64 + 1);
            match self.index.remove(&next) {
                Some(slot) => {
                    let (_, v) = std::mem::replace(&mut self.entries[slot], (LuaValue::Nil, LuaValue::Nil));
                    self.dead += 1;
                    self.array.push(v);
                }
                None => break,
            }
        }
        self.maybe_compact();
    }

    fn hash_set(&mut self, key: LuaValue, value: LuaValue) {
        if value.is_nil() {
            if let Some(slot) = self.index.remove(&key) {
                self.entries[slot] = (LuaValue::Nil, LuaValue::Nil);
                self.dead += 1;
                self.maybe_compact();
            }
            return;
        }
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot].1 = value,
            None => {
                let slot = self.entries.len();
                self.entries.push((key.clone(), value));
                self.index.insert(key, slot);
            }
        }
    }

    fn maybe_compact(&mut self) {
        if self.dead > 8 && self.dead * 2 > self.entries.len() {
            let old = std::mem::take(&mut self.entries);
            self.index.clear();
            self.dead = 0;
            for (k, v) in old {
                if !k.is_nil() {
                    let slot = self.entries.len();
                    self.index.insert(k.clone(), slot);
                    self.entries.push((k, v));
                }
            }
        }
    }

    /// `#t`: some border of the table.
    pub fn length(&self) -> i64 {
        if let Some(last) = self.array.last() {
            if !last.is_nil() {
                let n = self.array.len() as i64;
                if self.index.is_empty() || self.raw_get_int(n + 1).is_nil() {
                    return n;
                }
                return self.unbound_search(n);
            }
            // trailing hole: binary search for a border inside the array
            let mut lo: usize = 0;
            let mut hi: usize = self.array.len();
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if self.array[mid - 1].is_nil() {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo as i64;
        }
        if self.raw_get_int(1).is_nil() {
            return 0;
        }
        self.unbound_search(1)
    }

    /// Doubling probe followed by a binary search, for borders that extend
    /// into the hash part.
    fn unbound_search(&self, start: i64) -> i64 {
        let mut i = start;
        let mut j = start.saturating_mul(2).max(start + 1);
        while !self.raw_get_int(j).is_nil() {
            i = j;
            if j > i64::MAX / 2 {
                // pathological: fall back to a linear scan
                let mut k = i + 1;
                while !self.raw_get_int(k).is_nil() {
                    k += 1;
                }
                return k - 1;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = i + (j - i) / 2;
            if self.raw_get_int(m).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    /// Stateless iteration protocol behind `next`. `None` key starts the
    /// traversal; returns `Err(())` for a key that is not present.
    pub fn next(&self, key: Option<&LuaValue>) -> Result<Option<(LuaValue, LuaValue)>, ()> {
        let start = match key {
            None => 0,
            Some(k) => {
                let k = k.clone().normalize_key();
                if let LuaValue::Integer(i) = k {
                    if i >= 1 && (i as u64) <= self.array.len() as u64 {
                        return Ok(self.next_from_array(i as usize));
                    }
                }
                match self.index.get(&k) {
                    Some(&slot) => return Ok(self.next_from_entries(slot + 1)),
                    None => return Err(()),
                }
            }
        };
        Ok(self.next_from_array(start))
    }

    fn next_from_array(&self, start: usize) -> Option<(LuaValue, LuaValue)> {
        for (offset, v) in self.array[start.min(self.array.len())..].iter().enumerate() {
            if !v.is_nil() {
                return Some((LuaValue::Integer((start + offset + 1) as i64), v.clone()));
            }
        }
        self.next_from_entries(0)
    }

    fn next_from_entries(&self, start: usize) -> Option<(LuaValue, LuaValue)> {
        for (k, v) in self.entries[start.min(self.entries.len())..].iter() {
            if !k.is_nil() {
                return Some((k.clone(), v.clone()));
            }
        }
        None
    }

    /// Number of live entries across both parts (used by table.pack-style
    /// helpers and diagnostics, not by `#`).
    pub fn count(&self) -> usize {
        self.array.iter().filter(|v| !v.is_nil()).count() + self.entries.len() - self.dead
    }

    pub fn array_part(&self) -> &[LuaValue] {
        &self.array
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        LuaTable::new()
    }
}
