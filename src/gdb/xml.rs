//! Target-description and memory-map blobs served over `qXfer`.
//!
//! Clients may read these in chunks of any size; reassembly across chunk
//! boundaries is byte-exact.

use super::{parse_hex, HexError};

pub const TARGET_XML: &str = "<?xml version=\"1.0\"?>\n\
<!DOCTYPE target SYSTEM \"gdb-target.dtd\">\n\
<target version=\"1.0\">\n\
\x20 <feature name=\"org.n8machine.cpu\">\n\
\x20   <reg name=\"a\"     bitsize=\"8\"  type=\"uint8\"    regnum=\"0\"/>\n\
\x20   <reg name=\"x\"     bitsize=\"8\"  type=\"uint8\"    regnum=\"1\"/>\n\
\x20   <reg name=\"y\"     bitsize=\"8\"  type=\"uint8\"    regnum=\"2\"/>\n\
\x20   <reg name=\"sp\"    bitsize=\"8\"  type=\"uint8\"    regnum=\"3\"/>\n\
\x20   <reg name=\"pc\"    bitsize=\"16\" type=\"code_ptr\"  regnum=\"4\"/>\n\
\x20   <reg name=\"flags\" bitsize=\"8\"  type=\"uint8\"    regnum=\"5\"/>\n\
\x20 </feature>\n\
</target>\n";

pub const MEMORY_MAP_XML: &str = "<?xml version=\"1.0\"?>\n\
<!DOCTYPE memory-map SYSTEM \"gdb-memory-map.dtd\">\n\
<memory-map>\n\
\x20 <memory type=\"ram\"  start=\"0x0000\" length=\"0xC000\"/>\n\
\x20 <memory type=\"ram\"  start=\"0xC000\" length=\"0x0100\"/>\n\
\x20 <memory type=\"ram\"  start=\"0xC100\" length=\"0x0010\"/>\n\
\x20 <memory type=\"ram\"  start=\"0xC110\" length=\"0x0EF0\"/>\n\
\x20 <memory type=\"rom\"  start=\"0xD000\" length=\"0x3000\"/>\n\
</memory-map>\n";

/// Serve one `qXfer ... read` chunk. `params` is `offset,length` in hex. The
/// reply is prefixed `m` when more data follows, `l` on the final chunk, and
/// a bare `l` once the offset is at or past the end.
pub fn qxfer_chunk(blob: &str, params: &str) -> String {
    let Some((offset_field, length_field)) = params.split_once(',') else {
        return "E03".to_string();
    };
    let (offset, length) = match (
        parse_hex(offset_field, u32::MAX),
        parse_hex(length_field, u32::MAX),
    ) {
        (Ok(offset), Ok(length)) => (offset as usize, length as usize),
        (Err(HexError::Malformed), _) | (_, Err(HexError::Malformed)) => {
            return "E03".to_string()
        }
        _ => return "E01".to_string(),
    };

    if offset >= blob.len() {
        return "l".to_string();
    }
    let remaining = blob.len() - offset;
    if length >= remaining {
        format!("l{}", &blob[offset..])
    } else {
        format!("m{}", &blob[offset..offset + length])
    }
}
