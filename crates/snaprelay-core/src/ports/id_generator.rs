//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::CycleId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator はサイクル ID を生成（ループのタスクから呼ばれる）
pub trait IdGenerator: Send + Sync {
    fn generate_cycle_id(&self) -> CycleId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// timestamp 部分は Clock から取るので、CycleReport の started_at とほぼ揃います。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_cycle_id(&self) -> CycleId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        CycleId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    #[test]
    fn cycle_ids_carry_the_clock_timestamp() {
        let at = Utc.with_ymd_and_hms(2020, 3, 30, 14, 28, 38).unwrap();
        let ids = UlidGenerator::new(FixedClock::new(at));

        let first = ids.generate_cycle_id();
        let second = ids.generate_cycle_id();

        assert_ne!(first, second);
        assert_eq!(first.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
        assert_eq!(second.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
    }
}
