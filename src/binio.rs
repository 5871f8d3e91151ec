//! Tiny little-endian cursor helpers shared by every binary `Cachable`
//! encoding. All integers in this crate's wire formats are little-endian.

pub fn write_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn read_u8(cursor: &mut &[u8]) -> Option<u8> {
    let (&v, rest) = cursor.split_first()?;
    *cursor = rest;
    Some(v)
}

pub fn read_u16(cursor: &mut &[u8]) -> Option<u16> {
    let head = cursor.get(..2)?;
    let value = u16::from_le_bytes(head.try_into().ok()?);
    *cursor = &cursor[2..];
    Some(value)
}

pub fn read_u32(cursor: &mut &[u8]) -> Option<u32> {
    let head = cursor.get(..4)?;
    let value = u32::from_le_bytes(head.try_into().ok()?);
    *cursor = &cursor[4..];
    Some(value)
}

pub fn read_u64(cursor: &mut &[u8]) -> Option<u64> {
    let head = cursor.get(..8)?;
    let value = u64::from_le_bytes(head.try_into().ok()?);
    *cursor = &cursor[8..];
    Some(value)
}

pub fn read_bytes<'a>(cursor: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    let head = cursor.get(..n)?;
    *cursor = &cursor[n..];
    Some(head)
}
