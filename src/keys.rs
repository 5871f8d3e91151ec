//! Key layout helpers — forward-slash-separated paths relative to the
//! dataset root, as described in §6 of the engine's specification.

/// Fixed width of a chunk's lowercase-hex name (`u64` chunk id -> 16 hex chars).
pub const CHUNK_NAME_WIDTH: usize = 16;

pub fn tensor_meta_key(tensor: &str) -> String {
    format!("{tensor}/tensor_meta.json")
}

pub fn chunk_id_encoder_key(tensor: &str) -> String {
    format!("{tensor}/chunk_id_encoder")
}

pub fn hashlist_key(tensor: &str) -> String {
    format!("{tensor}/hashlist")
}

pub fn chunks_prefix(tensor: &str) -> String {
    format!("{tensor}/chunks/")
}

pub fn chunk_key(tensor: &str, chunk_name: &str) -> String {
    format!("{tensor}/chunks/{chunk_name}")
}

/// Renders a chunk id as its on-disk name: fixed-width lowercase hex.
pub fn name_from_chunk_id(chunk_id: u64) -> String {
    format!("{chunk_id:0width$x}", width = CHUNK_NAME_WIDTH)
}
