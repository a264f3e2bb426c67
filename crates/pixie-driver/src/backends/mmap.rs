//! Memory-mapped PCI register window
//!
//! The Pixie-16 host registers sit behind BAR 2 of the PLX bridge. The BAR
//! is mapped through `/sys/bus/pci/devices/{addr}/resource{bar}` with
//! `rustix` and accessed with bounds-checked volatile word reads and writes.

use crate::bus::{BusType, RegisterBus};
use crate::error::{PixieError, Result};
use pixie_hw::{Address, Word};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::PathBuf;
use std::ptr::NonNull;

/// Memory-mapped PCI BAR
#[derive(Debug)]
pub struct PciBar {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    pci_address: String,
    bar_index: usize,
}

impl PciBar {
    /// Map a BAR of the device at `pci_address`
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Resource file doesn't exist
    /// - Cannot open file
    /// - mmap fails
    pub fn new(pci_address: &str, bar_index: usize) -> Result<Self> {
        let path = PathBuf::from(format!(
            "/sys/bus/pci/devices/{pci_address}/resource{bar_index}"
        ));

        tracing::debug!("Mapping PCI BAR: {}", path.display());

        if !path.exists() {
            return Err(PixieError::device_not_found(path));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let size = usize::try_from(file.metadata()?.len()).map_err(|_| {
            PixieError::invalid_configuration(format!("BAR{bar_index} too large to map"))
        })?;

        if size == 0 {
            return Err(PixieError::invalid_configuration(
                "BAR size is 0 (device not enabled?)",
            ));
        }

        // SAFETY: mmap preconditions hold:
        // - File descriptor is valid (just opened)
        // - Size is non-zero (checked above)
        // - PROT_READ|PROT_WRITE with MAP_SHARED is the mapping MMIO needs
        // - Offset 0 is the start of the BAR
        // - The file is stored in the struct so the mapping outlives no fd
        // - Drop unmaps exactly this range
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| PixieError::Io { source: e.into() })?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| PixieError::invalid_configuration("mmap returned null"))?;

        tracing::info!("Mapped BAR{bar_index} for {pci_address} ({size} bytes at {ptr:p})");

        Ok(Self {
            ptr,
            size,
            _file: file,
            pci_address: pci_address.to_string(),
            bar_index,
        })
    }

    fn check(&self, offset: usize) -> Result<()> {
        if offset % 4 != 0 || offset + 4 > self.size {
            return Err(PixieError::OutOfBounds {
                offset,
                limit: self.size,
            });
        }
        Ok(())
    }

    /// Get region size
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Get PCI address
    #[must_use]
    pub fn pci_address(&self) -> &str {
        &self.pci_address
    }

    /// Get BAR index
    #[must_use]
    pub const fn bar_index(&self) -> usize {
        self.bar_index
    }
}

impl RegisterBus for PciBar {
    fn read_word(&self, addr: Address) -> Result<Word> {
        let offset = addr as usize;
        self.check(offset)?;

        // SAFETY: Volatile read from a mapped hardware register.
        // - offset + 4 <= size and offset is word aligned (checked above)
        // - ptr is valid for the lifetime of self
        // - read_volatile keeps the compiler from merging or reordering
        //   register reads, which have side effects on the host bus
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };

        tracing::trace!("Read @ {addr:#x} = {value:#x}");
        Ok(value)
    }

    fn write_word(&self, addr: Address, value: Word) -> Result<()> {
        let offset = addr as usize;
        self.check(offset)?;

        tracing::trace!("Write @ {addr:#x} = {value:#x}");

        // SAFETY: Volatile write to a mapped hardware register.
        // - offset + 4 <= size and offset is word aligned (checked above)
        // - ptr is valid for the lifetime of self
        // - write_volatile is required, register writes trigger hardware
        //   actions and must be issued exactly as written
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }

        Ok(())
    }

    fn bus_type(&self) -> BusType {
        BusType::Pci
    }
}

impl Drop for PciBar {
    fn drop(&mut self) {
        tracing::debug!("Unmapping BAR{} for {}", self.bar_index, self.pci_address);

        // SAFETY: ptr and size are exactly what mmap returned in new(), and
        // the mapping is not used after drop.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: PciBar owns its mapping exclusively. The pointer stays valid for
// the lifetime of the value regardless of which thread holds it.
unsafe impl Send for PciBar {}

// SAFETY: All access is single word volatile reads and writes through &self.
// The hardware serialises word accesses; multi-word sequences are arbitrated
// by the module, not by the mapping. The struct has no other mutable state.
unsafe impl Sync for PciBar {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device() {
        let err = PciBar::new("ffff:ff:1f.7", 2).expect_err("no such device");
        assert!(matches!(err, PixieError::DeviceNotFound { .. }));
    }

    #[test]
    #[ignore] // Requires hardware
    fn read_csr() {
        let bar = PciBar::new("0000:05:0d.0", 2).expect("map BAR2");
        let csr = bar.read_word(pixie_hw::regs::CSR).expect("read CSR");
        println!("CSR = {csr:#010x}");
    }
}
