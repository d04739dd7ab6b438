use std::os::fd::RawFd;

/// Operation kind carried in every submission's user-data tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpKind {
    Accept = 1,
    Read = 2,
    Write = 3,
    Close = 4,
}

impl OpKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(OpKind::Accept),
            2 => Some(OpKind::Read),
            3 => Some(OpKind::Write),
            4 => Some(OpKind::Close),
            _ => None,
        }
    }
}

/// The 64-bit per-operation tag stored in a submission's user-data slot and
/// recovered bit-exact from the matching completion.
///
/// Layout (little-endian byte order):
///
/// ```text
/// bytes 0..4   client_fd:  i32
/// byte  4      op_kind:    u8
/// bytes 5..7   buffer_idx: u16
/// byte  7      reserved (zero)
/// ```
///
/// The decoded tag is the sole source of context for a completion; nothing
/// else identifies which fd or buffer slot an operation belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserData(pub u64);

impl UserData {
    /// Pack an operation context into the tag.
    pub fn encode(fd: RawFd, kind: OpKind, buffer_idx: u16) -> Self {
        let mut raw = [0u8; 8];
        raw[0..4].copy_from_slice(&fd.to_le_bytes());
        raw[4] = kind as u8;
        raw[5..7].copy_from_slice(&buffer_idx.to_le_bytes());
        UserData(u64::from_le_bytes(raw))
    }

    /// The raw value handed to the kernel.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// The tagged file descriptor (-1 for accept submissions).
    pub fn fd(self) -> RawFd {
        let raw = self.0.to_le_bytes();
        i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
    }

    /// The tagged operation kind, or `None` for a corrupt tag.
    pub fn kind(self) -> Option<OpKind> {
        OpKind::from_u8(self.0.to_le_bytes()[4])
    }

    /// The tagged buffer slot index.
    pub fn buffer_idx(self) -> u16 {
        let raw = self.0.to_le_bytes();
        u16::from_le_bytes([raw[5], raw[6]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_kinds() {
        for kind in [OpKind::Accept, OpKind::Read, OpKind::Write, OpKind::Close] {
            let ud = UserData::encode(42, kind, 1234);
            assert_eq!(ud.fd(), 42);
            assert_eq!(ud.kind(), Some(kind));
            assert_eq!(ud.buffer_idx(), 1234);
        }
    }

    #[test]
    fn roundtrip_edge_values() {
        for fd in [-1, 0, 1, i32::MAX, i32::MIN] {
            for idx in [0u16, 1, u16::MAX] {
                let ud = UserData::encode(fd, OpKind::Write, idx);
                assert_eq!(ud.fd(), fd);
                assert_eq!(ud.kind(), Some(OpKind::Write));
                assert_eq!(ud.buffer_idx(), idx);
            }
        }
    }

    #[test]
    fn layout_is_bit_exact() {
        let ud = UserData::encode(5, OpKind::Read, 7);
        let raw = ud.raw().to_le_bytes();
        assert_eq!(&raw[0..4], &5i32.to_le_bytes());
        assert_eq!(raw[4], 2);
        assert_eq!(&raw[5..7], &7u16.to_le_bytes());
        assert_eq!(raw[7], 0);
    }

    #[test]
    fn corrupt_kind_decodes_to_none() {
        let mut raw = UserData::encode(1, OpKind::Read, 0).raw().to_le_bytes();
        raw[4] = 0xff;
        assert_eq!(UserData(u64::from_le_bytes(raw)).kind(), None);
    }
}
