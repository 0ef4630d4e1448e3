//! 绑定密钥
//!
//! 双方各自生成 32 字节随机数并通过近场通道交换，按字节异或得到共享密钥。
//! 异或满足交换律，所以两端算出的结果相同。

use crate::error::{DyadError, Result};
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;

pub const SECRET_LENGTH: usize = 32;

#[derive(Clone, PartialEq, Eq)]
pub struct BondingSecret([u8; SECRET_LENGTH]);

impl BondingSecret {
    /// 生成本地的一半
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// 从对端收到的字节构造，长度必须为 32
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SECRET_LENGTH] = bytes
            .try_into()
            .map_err(|_| DyadError::InvalidSecret(bytes.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LENGTH] {
        &self.0
    }

    /// 按字节异或合并两半
    pub fn combine(&self, other: &BondingSecret) -> BondingSecret {
        let mut out = [0u8; SECRET_LENGTH];
        for (o, (a, b)) in out.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            *o = a ^ b;
        }
        BondingSecret(out)
    }

    /// 提交给服务器的编码形式
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }
}

impl From<[u8; SECRET_LENGTH]> for BondingSecret {
    fn from(bytes: [u8; SECRET_LENGTH]) -> Self {
        Self(bytes)
    }
}

// 不在日志里泄露密钥
impl std::fmt::Debug for BondingSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BondingSecret(..)")
    }
}
