//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID
//! レプリケーションの各サイクルと各転送に ULID を割り当てます。
//! ログ上でサイクルと転送を時系列に並べて追えるようにするためです。
//!
//! ## Phantom Type パターン
//! `Id<T>` で共通実装を提供し、`T` はコンパイル時だけのマーカー型です。
//! `CycleId` と `TransferId` は混同できません。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"cycle-", "xfer-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id stamped with the current wall clock.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Replication cycle のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cycle {}

impl IdMarker for Cycle {
    fn prefix() -> &'static str {
        "cycle-"
    }
}

/// Transfer session のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transfer {}

impl IdMarker for Transfer {
    fn prefix() -> &'static str {
        "xfer-"
    }
}

/// Identifier of one replication cycle (snapshot, locate, upload, log).
pub type CycleId = Id<Cycle>;

/// Identifier of one upload or download attempt.
pub type TransferId = Id<Transfer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_and_transfer_ids_are_prefixed() {
        let ulid = Ulid::from_parts(1_585_578_518_736, 7);

        assert_eq!(CycleId::from(ulid).to_string(), format!("cycle-{ulid}"));
        assert_eq!(TransferId::from(ulid).to_string(), format!("xfer-{ulid}"));
    }

    #[test]
    fn cycle_ids_order_by_timestamp() {
        let earlier = CycleId::from_ulid(Ulid::from_parts(1_585_578_518_736, u128::MAX >> 48));
        let later = CycleId::from_ulid(Ulid::from_parts(1_585_578_518_737, 0));

        assert!(earlier < later);
    }

    #[test]
    fn transfer_id_serializes_as_bare_ulid() {
        let id = TransferId::generate();

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, serde_json::to_string(&id.as_ulid()).unwrap());
        assert_eq!(serde_json::from_str::<TransferId>(&json).unwrap(), id);
    }
}
