//! Remote memory reads and a read-and-advance cursor.
//!
//! Addresses handed to this module belong to another process. Nothing here
//! dereferences them: every field access is an explicit, fallible copy into a
//! local buffer. A read either fills the whole buffer or fails.

/// Errors that can occur during remote memory access.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address {address:#x} is not mapped")]
    Unmapped { address: u64 },
    #[error("address {address:#x} is not readable")]
    Unreadable { address: u64 },
    #[error("read of {len} bytes at {address:#x} wraps the address space")]
    Overflow { address: u64, len: usize },
    #[error("page rights query failed at {address:#x}")]
    RightsQuery { address: u64 },
}

/// Bounded reads from a target address space.
pub trait RemoteMemory {
    /// Fill `buf` with the bytes starting at `address`.
    fn read_into(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError>;

    fn read_u8(&self, address: u64) -> Result<u8, MemoryError> {
        let mut buf = [0u8; 1];
        self.read_into(address, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u32(&self, address: u64) -> Result<u32, MemoryError> {
        let mut buf = [0u8; 4];
        self.read_into(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32(&self, address: u64) -> Result<i32, MemoryError> {
        let mut buf = [0u8; 4];
        self.read_into(address, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u64(&self, address: u64) -> Result<u64, MemoryError> {
        let mut buf = [0u8; 8];
        self.read_into(address, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read `len` bytes into a fresh buffer.
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buf = vec![0u8; len];
        self.read_into(address, &mut buf)?;
        Ok(buf)
    }
}

impl<M: RemoteMemory + ?Sized> RemoteMemory for &M {
    fn read_into(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        (**self).read_into(address, buf)
    }
}

/// Sequential field extraction over remote memory.
///
/// Each successful read advances the position by the size of the value read;
/// a failed read leaves the position untouched.
pub struct RemoteCursor<'m, M: RemoteMemory + ?Sized> {
    memory: &'m M,
    position: u64,
}

impl<'m, M: RemoteMemory + ?Sized> RemoteCursor<'m, M> {
    pub fn new(memory: &'m M, position: u64) -> Self {
        Self { memory, position }
    }

    /// Current remote address.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move forward without reading, e.g. over padding.
    pub fn skip(&mut self, len: u64) {
        self.position = self.position.wrapping_add(len);
    }

    /// Read a byte at the current position without advancing.
    pub fn peek_u8(&self) -> Result<u8, MemoryError> {
        self.memory.read_u8(self.position)
    }

    pub fn read_u8(&mut self) -> Result<u8, MemoryError> {
        let v = self.memory.read_u8(self.position)?;
        self.skip(1);
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32, MemoryError> {
        let v = self.memory.read_u32(self.position)?;
        self.skip(4);
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64, MemoryError> {
        let v = self.memory.read_u64(self.position)?;
        self.skip(8);
        Ok(v)
    }

    /// Read a pointer-sized value (4 or 8 bytes), zero-extended.
    pub fn read_pointer(&mut self, pointer_size: usize) -> Result<u64, MemoryError> {
        match pointer_size {
            4 => self.read_u32().map(u64::from),
            _ => self.read_u64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flat {
        base: u64,
        data: Vec<u8>,
    }

    impl RemoteMemory for Flat {
        fn read_into(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
            let start = address
                .checked_sub(self.base)
                .ok_or(MemoryError::Unmapped { address })? as usize;
            let end = start
                .checked_add(buf.len())
                .ok_or(MemoryError::Overflow { address, len: buf.len() })?;
            let src = self
                .data
                .get(start..end)
                .ok_or(MemoryError::Unmapped { address })?;
            buf.copy_from_slice(src);
            Ok(())
        }
    }

    #[test]
    fn cursor_reads_sequential_fields() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        data.extend_from_slice(&0xAABB_CCDDu32.to_le_bytes());
        data.push(0x7f);
        let mem = Flat { base: 0x1000, data };

        let mut cursor = RemoteCursor::new(&mem, 0x1000);
        assert_eq!(cursor.read_pointer(8).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(cursor.read_u32().unwrap(), 0xAABB_CCDD);
        assert_eq!(cursor.peek_u8().unwrap(), 0x7f);
        assert_eq!(cursor.position(), 0x100c);
        assert_eq!(cursor.read_u8().unwrap(), 0x7f);
        assert_eq!(cursor.position(), 0x100d);
    }

    #[test]
    fn failed_read_does_not_advance() {
        let mem = Flat {
            base: 0x1000,
            data: vec![1, 2, 3],
        };
        let mut cursor = RemoteCursor::new(&mem, 0x1000);
        assert!(cursor.read_u32().is_err());
        assert_eq!(cursor.position(), 0x1000);
    }

    #[test]
    fn pointer_width_four_zero_extends() {
        let mem = Flat {
            base: 0,
            data: 0xFFFF_FFFFu32.to_le_bytes().to_vec(),
        };
        let mut cursor = RemoteCursor::new(&mem, 0);
        assert_eq!(cursor.read_pointer(4).unwrap(), 0xFFFF_FFFF);
    }
}
