//! CRC8 校验
//!
//! 多项式 0x07，初值 0，无反射，无输出异或（即 CRC-8/SMBUS），
//! 覆盖帧内除校验字节外的全部字节（含帧头 0xAA）。

use crc::{CRC_8_SMBUS, Crc};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// 计算 CRC8
#[inline]
#[must_use]
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// 增量计算（边写边算的编码路径使用）
pub(crate) struct Crc8Digest {
    digest: crc::Digest<'static, u8>,
}

impl Crc8Digest {
    pub(crate) fn new() -> Self {
        Self {
            digest: CRC8.digest(),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub(crate) fn finalize(self) -> u8 {
        self.digest.finalize()
    }
}
