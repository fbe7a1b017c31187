//! Firmware image handling and structural validation.
//!
//! Images are raw Cortex-M0 binaries. The bootloader never checks what it is
//! given, so a bad image is only caught here:
//! - size against the model's flash ceiling (load offset included)
//! - minimum size
//! - vector table plausibility (SRAM stack pointer, Thumb bit on the first
//!   three handlers)

use std::path::Path;

use thiserror::Error;

use crate::protocol::codec::pad;
use crate::protocol::constants::{
    CHUNK_SIZE, MIN_FIRMWARE_SIZE, SRAM_END, SRAM_START, VECTOR_TABLE_PROBE_LEN,
};
use crate::registry::DeviceDescriptor;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Firmware is too large: 0x{got:X} max allowed is 0x{max_allowed:X}")]
    ImageTooLarge { got: usize, max_allowed: usize },
    #[error("Firmware is too small: {got} bytes, minimum {minimum}")]
    ImageTooSmall { got: usize, minimum: usize },
    #[error("Firmware appears to be corrupted")]
    CorruptImage { vectors: Option<VectorTable> },
}

/// Leading words of a Cortex-M vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorTable {
    pub stack_pointer: u32,
    pub reset: u32,
    pub nmi: u32,
    pub hard_fault: u32,
}

impl VectorTable {
    /// Decode the first 16 bytes of an image.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let probe = data.get(..VECTOR_TABLE_PROBE_LEN)?;
        let words = crate::protocol::codec::unpack(probe).ok()?;
        Some(Self {
            stack_pointer: words[0],
            reset: words[1],
            nmi: words[2],
            hard_fault: words[3],
        })
    }

    pub fn stack_pointer_in_sram(&self) -> bool {
        (SRAM_START..=SRAM_END).contains(&self.stack_pointer)
    }

    /// Reset, NMI and HardFault must all be Thumb addresses.
    pub fn handlers_are_thumb(&self) -> bool {
        [self.reset, self.nmi, self.hard_fault]
            .iter()
            .all(|v| v & 1 == 1)
    }

    pub fn is_plausible(&self) -> bool {
        self.stack_pointer_in_sram() && self.handlers_are_thumb()
    }
}

/// Check an image against a device's layout before anything is written.
pub fn validate_firmware(
    descriptor: &DeviceDescriptor,
    image: &[u8],
) -> Result<(), ValidationError> {
    // Deliberately the unpadded length; PREPARE later carries the padded one.
    if image.len() + descriptor.qmk_offset as usize > descriptor.size_limit as usize {
        return Err(ValidationError::ImageTooLarge {
            got: image.len(),
            max_allowed: descriptor.max_image_len() as usize,
        });
    }

    if image.len() < MIN_FIRMWARE_SIZE {
        return Err(ValidationError::ImageTooSmall {
            got: image.len(),
            minimum: MIN_FIRMWARE_SIZE,
        });
    }

    let vectors = VectorTable::from_bytes(image);
    match vectors {
        Some(v) if v.is_plausible() => Ok(()),
        _ => Err(ValidationError::CorruptImage { vectors }),
    }
}

/// An owned firmware image, padded to whole chunks on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Read a raw `.bin` from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }

    pub fn validate(&self, descriptor: &DeviceDescriptor) -> Result<(), ValidationError> {
        validate_firmware(descriptor, &self.data)
    }

    pub fn vector_table(&self) -> Option<VectorTable> {
        VectorTable::from_bytes(&self.data)
    }

    /// Copy zero-padded to a multiple of the chunk size.
    pub fn padded(&self) -> Self {
        Self {
            data: pad(&self.data, CHUNK_SIZE),
        }
    }

    /// Chunk-sized slices in byte order; the last may be short if unpadded.
    pub fn chunks(&self) -> std::slice::Chunks<'_, u8> {
        self.data.chunks(CHUNK_SIZE)
    }

    /// Get raw data.
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    /// Get total size.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for FirmwareImage {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::pack;
    use crate::registry::lookup;

    fn image_with(len: usize, vectors: [u32; 4]) -> Vec<u8> {
        let mut data = pack(&vectors);
        data.resize(len, 0xFF);
        data
    }

    fn good_image(len: usize) -> Vec<u8> {
        image_with(len, [0x2000_0400, 0x101, 0x103, 0x105])
    }

    #[test]
    fn test_size_ceiling_boundary() {
        let f268 = lookup(0x0c45, 0x7010).unwrap();
        let max = (f268.size_limit - f268.qmk_offset) as usize;

        assert!(validate_firmware(f268, &good_image(max)).is_ok());
        assert_eq!(
            validate_firmware(f268, &good_image(max + 1)),
            Err(ValidationError::ImageTooLarge {
                got: max + 1,
                max_allowed: max
            })
        );
    }

    #[test]
    fn test_too_large_message_uses_uppercase_hex() {
        let f268 = lookup(0x0c45, 0x7010).unwrap();
        let err = validate_firmware(f268, &good_image(0x7800)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Firmware is too large: 0x7800 max allowed is 0x7600"
        );
    }

    #[test]
    fn test_minimum_size_boundary() {
        let f248b = lookup(0x0c45, 0x7040).unwrap();
        assert!(validate_firmware(f248b, &good_image(256)).is_ok());
        assert!(matches!(
            validate_firmware(f248b, &good_image(255)),
            Err(ValidationError::ImageTooSmall { got: 255, .. })
        ));
        assert!(matches!(
            validate_firmware(f248b, &[]),
            Err(ValidationError::ImageTooSmall { got: 0, .. })
        ));
    }

    #[test]
    fn test_size_checked_before_structure() {
        let f248b = lookup(0x0c45, 0x7040).unwrap();
        let garbage = vec![0u8; 64 * 1024 + 1];
        assert!(matches!(
            validate_firmware(f248b, &garbage),
            Err(ValidationError::ImageTooLarge { .. })
        ));
    }

    #[test]
    fn test_stack_pointer_range() {
        let f248b = lookup(0x0c45, 0x7040).unwrap();
        for sp in [0x2000_0000, 0x2000_0800] {
            assert!(validate_firmware(f248b, &image_with(256, [sp, 1, 1, 1])).is_ok());
        }
        for sp in [0x1FFF_FFFF, 0x2000_0801] {
            assert!(matches!(
                validate_firmware(f248b, &image_with(256, [sp, 1, 1, 1])),
                Err(ValidationError::CorruptImage { .. })
            ));
        }
    }

    #[test]
    fn test_vectors_need_thumb_bit() {
        let f248b = lookup(0x0c45, 0x7040).unwrap();
        let sp = 0x2000_0400;
        for vectors in [[sp, 0x100, 1, 1], [sp, 1, 0x100, 1], [sp, 1, 1, 0x100]] {
            let err = validate_firmware(f248b, &image_with(256, vectors)).unwrap_err();
            assert_eq!(err.to_string(), "Firmware appears to be corrupted");
        }
    }

    #[test]
    fn test_vector_table_decode() {
        let image = FirmwareImage::from_bytes(good_image(300));
        let v = image.vector_table().unwrap();
        assert_eq!(v.stack_pointer, 0x2000_0400);
        assert_eq!(v.reset, 0x101);
        assert_eq!(v.nmi, 0x103);
        assert_eq!(v.hard_fault, 0x105);
        assert!(VectorTable::from_bytes(&[0u8; 15]).is_none());
    }

    #[test]
    fn test_padded_chunks() {
        let image = FirmwareImage::from_bytes(good_image(200));
        let padded = image.padded();
        assert_eq!(padded.len(), 256);
        assert_eq!(&padded.raw_data()[..200], image.raw_data());
        assert!(padded.chunks().all(|c| c.len() == CHUNK_SIZE));
        assert_eq!(padded.chunks().count(), 4);
    }
}
