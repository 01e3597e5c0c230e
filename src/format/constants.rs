/// Format magic bytes and constants

/// Teledisk signature, normal compression
pub const TELEDISK_SIGNATURE: &[u8] = b"TD\0";

/// Teledisk signature, advanced (LZHUF) compression
pub const TELEDISK_ADVANCED_SIGNATURE: &[u8] = b"td\0";

/// The only Teledisk format version understood by the decoder
pub const TELEDISK_VERSION: u8 = 0x15;

/// CP/M erased directory entry / unused data byte
pub const CPM_ERASED_BYTE: u8 = 0xE5;

/// CP/M text end-of-file marker
pub const CPM_EOF_BYTE: u8 = 0x1A;

/// CP/M record size in bytes
pub const CPM_RECORD_SIZE: usize = 128;

/// CP/M directory entry size in bytes
pub const CPM_DIR_ENTRY_SIZE: usize = 32;

/// Smallest sector size (size code 0)
pub const SECTOR_SIZE_BASE: usize = 128;

/// Largest size code the sector model accepts
pub const MAX_SIZE_CODE: u8 = 8;

/// Convert a size code to its byte size (`128 << code`)
#[inline]
pub fn size_code_to_bytes(size_code: u8) -> Option<usize> {
    if size_code > MAX_SIZE_CODE {
        None
    } else {
        Some(SECTOR_SIZE_BASE << size_code)
    }
}

/// Derive the size code for a sector length
///
/// Lengths up to 128 bytes map to code 0; larger lengths must be an exact
/// power-of-two multiple of 128.
#[inline]
pub fn size_code_for(len: usize) -> Option<u8> {
    if len <= SECTOR_SIZE_BASE {
        return Some(0);
    }
    let mut size = SECTOR_SIZE_BASE;
    let mut code = 0u8;
    while size < len && code < MAX_SIZE_CODE {
        size <<= 1;
        code += 1;
    }
    if size == len {
        Some(code)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_code_to_bytes() {
        assert_eq!(size_code_to_bytes(0), Some(128));
        assert_eq!(size_code_to_bytes(1), Some(256));
        assert_eq!(size_code_to_bytes(2), Some(512));
        assert_eq!(size_code_to_bytes(3), Some(1024));
        assert_eq!(size_code_to_bytes(8), Some(32768));
        assert_eq!(size_code_to_bytes(9), None);
    }

    #[test]
    fn test_size_code_for() {
        assert_eq!(size_code_for(0), Some(0));
        assert_eq!(size_code_for(100), Some(0));
        assert_eq!(size_code_for(128), Some(0));
        assert_eq!(size_code_for(512), Some(2));
        assert_eq!(size_code_for(1024), Some(3));
        assert_eq!(size_code_for(1000), None);
        assert_eq!(size_code_for(65536), None);
    }

    #[test]
    fn test_round_trip_conversion() {
        for size_code in 0..=MAX_SIZE_CODE {
            let bytes = size_code_to_bytes(size_code).unwrap();
            assert_eq!(size_code_for(bytes), Some(size_code));
        }
    }
}
