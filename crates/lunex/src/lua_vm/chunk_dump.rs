// Binary chunk serialization (string.dump / binary load). The layout is
// private to this implementation: a signature, a version byte, then
// length-prefixed little-endian records. Upvalue values are not part of a
// dump; they reload as nil.

use smol_str::SmolStr;
use std::rc::Rc;

use super::opcode::{Instruction, OpCode};
use crate::lua_value::{LocalVar, LuaString, LuaValue, Proto, UpvalDesc};

/// ESC "Lua", shared with the reference format so text/binary detection
/// works on the first byte.
pub const DUMP_SIGNATURE: &[u8; 4] = b"\x1bLua";

const DUMP_VERSION: u8 = 0x54;

pub fn dump_proto(proto: &Proto) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(DUMP_SIGNATURE);
    out.push(DUMP_VERSION);
    write_proto(&mut out, proto);
    out
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn write_proto(out: &mut Vec<u8>, proto: &Proto) {
    write_bytes(out, proto.source.as_bytes());
    write_u32(out, proto.line_defined);
    write_u32(out, proto.last_line_defined);
    out.push(proto.num_params);
    out.push(proto.is_vararg as u8);
    write_u32(out, proto.max_stack_size);

    write_u32(out, proto.code.len() as u32);
    for ins in &proto.code {
        out.push(ins.op as u8);
        write_u32(out, ins.a);
        write_i32(out, ins.b);
        write_i32(out, ins.c);
    }

    write_u32(out, proto.constants.len() as u32);
    for k in &proto.constants {
        match k {
            LuaValue::Nil => out.push(0),
            LuaValue::Boolean(false) => out.push(1),
            LuaValue::Boolean(true) => out.push(2),
            LuaValue::Integer(i) => {
                out.push(3);
                out.extend_from_slice(&i.to_le_bytes());
            }
            LuaValue::Float(f) => {
                out.push(4);
                out.extend_from_slice(&f.to_bits().to_le_bytes());
            }
            LuaValue::String(s) => {
                out.push(5);
                write_bytes(out, s.as_bytes());
            }
            // reference constants never appear in a constant pool
            _ => out.push(0),
        }
    }

    write_u32(out, proto.upvalues.len() as u32);
    for u in &proto.upvalues {
        write_bytes(out, u.name.as_bytes());
        out.push(u.in_stack as u8);
        out.push(u.index);
    }

    write_u32(out, proto.protos.len() as u32);
    for p in &proto.protos {
        write_proto(out, p);
    }

    write_u32(out, proto.locals.len() as u32);
    for l in &proto.locals {
        write_bytes(out, l.name.as_bytes());
        write_u32(out, l.start_pc);
        write_u32(out, l.end_pc);
        write_u32(out, l.register);
    }

    write_u32(out, proto.line_info.len() as u32);
    for line in &proto.line_info {
        write_u32(out, *line);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.pos + n > self.bytes.len() {
            return Err("truncated binary chunk".to_string());
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, String> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, String> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn str_bytes(&mut self) -> Result<Vec<u8>, String> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

/// Parse a binary chunk produced by `dump_proto`.
pub fn load_proto(bytes: &[u8]) -> Result<Proto, String> {
    if bytes.len() < 5 || &bytes[..4] != DUMP_SIGNATURE {
        return Err("bad binary format (missing signature)".to_string());
    }
    if bytes[4] != DUMP_VERSION {
        return Err("bad binary format (version mismatch)".to_string());
    }
    let mut reader = Reader { bytes, pos: 5 };
    let proto = read_proto(&mut reader)?;
    Ok(proto)
}

fn read_proto(r: &mut Reader<'_>) -> Result<Proto, String> {
    let source = String::from_utf8_lossy(&r.str_bytes()?).into_owned();
    let line_defined = r.u32()?;
    let last_line_defined = r.u32()?;
    let num_params = r.u8()?;
    let is_vararg = r.u8()? != 0;
    let max_stack_size = r.u32()?;

    let ncode = r.u32()? as usize;
    let mut code = Vec::with_capacity(ncode.min(1 << 20));
    for _ in 0..ncode {
        let op = OpCode::from_u8(r.u8()?).ok_or_else(|| "bad opcode in chunk".to_string())?;
        let a = r.u32()?;
        let b = r.i32()?;
        let c = r.i32()?;
        code.push(Instruction { op, a, b, c });
    }

    let nconsts = r.u32()? as usize;
    let mut constants = Vec::with_capacity(nconsts.min(1 << 20));
    for _ in 0..nconsts {
        let value = match r.u8()? {
            0 => LuaValue::Nil,
            1 => LuaValue::Boolean(false),
            2 => LuaValue::Boolean(true),
            3 => LuaValue::Integer(r.u64()? as i64),
            4 => LuaValue::Float(f64::from_bits(r.u64()?)),
            5 => LuaValue::String(Rc::new(LuaString::from_bytes(r.str_bytes()?))),
            _ => return Err("bad constant tag in chunk".to_string()),
        };
        constants.push(value);
    }

    let nupvals = r.u32()? as usize;
    let mut upvalues = Vec::with_capacity(nupvals.min(1 << 16));
    for _ in 0..nupvals {
        let name = SmolStr::new(String::from_utf8_lossy(&r.str_bytes()?));
        let in_stack = r.u8()? != 0;
        let index = r.u8()?;
        upvalues.push(UpvalDesc {
            name,
            in_stack,
            index,
        });
    }

    let nprotos = r.u32()? as usize;
    let mut protos = Vec::with_capacity(nprotos.min(1 << 16));
    for _ in 0..nprotos {
        protos.push(Rc::new(read_proto(r)?));
    }

    let nlocals = r.u32()? as usize;
    let mut locals = Vec::with_capacity(nlocals.min(1 << 16));
    for _ in 0..nlocals {
        let name = SmolStr::new(String::from_utf8_lossy(&r.str_bytes()?));
        let start_pc = r.u32()?;
        let end_pc = r.u32()?;
        let register = r.u32()?;
        locals.push(LocalVar {
            name,
            start_pc,
            end_pc,
            register,
        });
    }

    let nlines = r.u32()? as usize;
    let mut line_info = Vec::with_capacity(nlines.min(1 << 20));
    for _ in 0..nlines {
        line_info.push(r.u32()?);
    }

    Ok(Proto {
        code,
        constants,
        protos,
        upvalues,
        locals,
        line_info,
        source,
        num_params,
        is_vararg,
        max_stack_size,
        line_defined,
        last_line_defined,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_minimal() {
        let proto = Proto {
            code: vec![Instruction::abc(OpCode::Return, 0, 1, 0)],
            constants: vec![LuaValue::Integer(7), LuaValue::string("hi")],
            protos: Vec::new(),
            upvalues: vec![UpvalDesc {
                name: SmolStr::new("_ENV"),
                in_stack: false,
                index: 0,
            }],
            locals: Vec::new(),
            line_info: vec![1],
            source: "test".to_string(),
            num_params: 0,
            is_vararg: true,
            max_stack_size: 2,
            line_defined: 0,
            last_line_defined: 1,
        };
        let bytes = dump_proto(&proto);
        assert_eq!(&bytes[..4], DUMP_SIGNATURE);
        let back = load_proto(&bytes).expect("round trip");
        assert_eq!(back.code.len(), 1);
        assert_eq!(back.constants.len(), 2);
        assert!(back.is_vararg);
        assert_eq!(back.upvalues[0].name, "_ENV");
    }

    #[test]
    fn test_reject_garbage() {
        assert!(load_proto(b"not a chunk").is_err());
        assert!(load_proto(b"\x1bLua").is_err());
    }
}
