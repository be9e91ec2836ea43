//! RAM-backed NOR flash with NOR write semantics (writes can only clear bits).

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};

pub struct RamFlash {
    base: u32,
    data: Vec<u8>,
    pub erases: u32,
    pub writes: u32,
    pub fail_read: bool,
    pub fail_write: bool,
    /// Accept writes but keep the old contents.
    pub drop_writes: bool,
}

impl RamFlash {
    /// Erased flash covering `sectors` sectors starting at `base`.
    pub fn new(base: u32, sectors: usize) -> Self {
        Self {
            base,
            data: vec![0xFF; sectors * Self::ERASE_SIZE],
            erases: 0,
            writes: 0,
            fail_read: false,
            fail_write: false,
            drop_writes: false,
        }
    }

    /// Overwrite raw bytes, bypassing NOR semantics.
    pub fn poke(&mut self, offset: u32, bytes: &[u8]) {
        let start = (offset - self.base) as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn peek(&self, offset: u32, len: usize) -> &[u8] {
        let start = (offset - self.base) as usize;
        &self.data[start..start + len]
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, NorFlashErrorKind> {
        if offset < self.base {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        let start = (offset - self.base) as usize;
        if start + len > self.data.len() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(start..start + len)
    }
}

impl ErrorType for RamFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_read {
            return Err(NorFlashErrorKind::Other);
        }
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from % Self::ERASE_SIZE as u32 != 0 || to % Self::ERASE_SIZE as u32 != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        let range = self.range(from, (to - from) as usize)?;
        self.data[range].fill(0xFF);
        self.erases += 1;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_write {
            return Err(NorFlashErrorKind::Other);
        }
        if offset % Self::WRITE_SIZE as u32 != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        let range = self.range(offset, bytes.len())?;
        self.writes += 1;
        if self.drop_writes {
            return Ok(());
        }
        for (cell, &b) in self.data[range].iter_mut().zip(bytes) {
            *cell &= b;
        }
        Ok(())
    }
}
