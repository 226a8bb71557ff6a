pub mod barcode_set;
pub mod demux;
pub mod read_group;
pub mod registry;

/// Checks whether a given u8 byte is safe to use inside a file name derived from a
/// cell barcode. Alphanumerics plus the separators commonly seen in barcode naming
/// schemes (e.g. the `-1` GEM-well suffix) are allowed; anything else, path
/// separators in particular, is not.
fn byte_is_filename_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || byte == b'.' || byte == b'+'
}

/// Checks whether a barcode string is non-empty and composed entirely of bytes that
/// are safe to use in a file name.
fn barcode_is_filename_safe(barcode: &str) -> bool {
    !barcode.is_empty() && barcode.bytes().all(byte_is_filename_safe)
}
