//! Program image loader (`spec.md` §4.1, §6).
//!
//! ISA-4380 images are a raw little-endian byte stream: the first four
//! bytes are the entry address, and the whole file (entry bytes
//! included) is copied verbatim into memory starting at address 0.

use std::path::Path;

use crate::cache::CacheMode;
use crate::error::LoadError;
use crate::registers::{FP, HP, PC, SB, SL, SP};
use crate::vm::Vm;

const MIN_IMAGE_LEN: usize = 4;

/// Read `path`, validate it against `mem_size`, and build a [`Vm`]
/// with the image loaded and SL/SB/SP/FP/HP/PC initialized per
/// `spec.md` §4.1.
pub fn load(path: &Path, mem_size: u32, cache_mode: CacheMode) -> Result<Vm, LoadError> {
    let image = std::fs::read(path)?;
    load_image(&image, mem_size, cache_mode)
}

/// As [`load`], but takes an already-in-memory image. Exposed so
/// whole-program scenario tests can assemble a raw byte image inline
/// without touching the filesystem.
pub fn load_image(image: &[u8], mem_size: u32, cache_mode: CacheMode) -> Result<Vm, LoadError> {
    if image.len() < MIN_IMAGE_LEN || image.len() as u64 > u64::from(mem_size) {
        return Err(LoadError::InsufficientMemory {
            image_len: image.len(),
            mem_size,
        });
    }

    let entry = u32::from_le_bytes(image[0..4].try_into().unwrap());
    if entry >= mem_size {
        return Err(LoadError::BadEntry { entry, mem_size });
    }

    let mut vm = Vm::new(mem_size, cache_mode);
    vm.load_image(image);

    let file_len = image.len() as u32;
    vm.set_register(SL, file_len);
    vm.set_register(SB, mem_size);
    vm.set_register(SP, mem_size);
    vm.set_register(FP, mem_size);
    vm.set_register(HP, file_len);
    vm.set_register(PC, entry);

    Ok(vm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with_entry(entry: u32, len: usize) -> Vec<u8> {
        let mut v = vec![0u8; len];
        v[0..4].copy_from_slice(&entry.to_le_bytes());
        v
    }

    #[test]
    fn rejects_images_under_four_bytes() {
        let image = [1u8, 2, 3];
        let err = load_image(&image, 1024, CacheMode::Off).unwrap_err();
        assert!(matches!(err, LoadError::InsufficientMemory { .. }));
    }

    #[test]
    fn rejects_images_larger_than_memory() {
        let image = image_with_entry(0, 2048);
        let err = load_image(&image, 1024, CacheMode::Off).unwrap_err();
        assert!(matches!(err, LoadError::InsufficientMemory { .. }));
    }

    #[test]
    fn rejects_out_of_range_entry() {
        let image = image_with_entry(2000, 64);
        let err = load_image(&image, 1024, CacheMode::Off).unwrap_err();
        assert!(matches!(err, LoadError::BadEntry { entry: 2000, .. }));
    }

    #[test]
    fn initializes_registers_per_loader_contract() {
        let image = image_with_entry(8, 32);
        let vm = load_image(&image, 1024, CacheMode::Off).unwrap();
        assert_eq!(vm.register(PC), 8);
        assert_eq!(vm.register(SL), 32);
        assert_eq!(vm.register(SB), 1024);
        assert_eq!(vm.register(SP), 1024);
        assert_eq!(vm.register(FP), 1024);
        assert_eq!(vm.register(HP), 32);
    }

    #[test]
    fn copies_whole_image_into_memory() {
        let mut image = image_with_entry(0, 16);
        image[4] = 0xAB;
        let vm = load_image(&image, 1024, CacheMode::Off).unwrap();
        assert_eq!(vm.peek_byte(4), 0xAB);
    }
}
