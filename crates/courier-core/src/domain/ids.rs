//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type パターンで型付けします。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **分散生成可能**: 調整なしで複数ノードで生成できる
//! - **文字列表現もソート可能**: Crockford base32 の 26 文字。`ORDER BY id` がそのまま FIFO になる
//!
//! `EventId` と `CycleId` は同じ実装を共有しつつ、コンパイル時には混同できません。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"evt-", "cycle-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// Serialize すると素の ULID 文字列になります（プレフィックスはログ表示専用）。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
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

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Canonical 26-character form used for storage and on the wire.
    pub fn to_canonical(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    /// Accepts the canonical form, with or without the display prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
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

/// Queued event のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {}

impl IdMarker for Event {
    fn prefix() -> &'static str {
        "evt-"
    }
}

/// Delivery cycle のマーカー型（ログの相関用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cycle {}

impl IdMarker for Cycle {
    fn prefix() -> &'static str {
        "cycle-"
    }
}

/// Identifier of a queued event (primary key and FIFO tie-break).
pub type EventId = Id<Event>;

/// Identifier of one scheduler delivery cycle.
pub type CycleId = Id<Cycle>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix_but_canonical_does_not() {
        let ulid = Ulid::new();
        let id = EventId::from_ulid(ulid);

        assert_eq!(id.to_string(), format!("evt-{ulid}"));
        assert_eq!(id.to_canonical(), ulid.to_string());
        assert_eq!(id.to_canonical().len(), 26);
        assert!(CycleId::from_ulid(ulid).to_string().starts_with("cycle-"));
    }

    #[test]
    fn parses_with_and_without_prefix() {
        let id = EventId::from_ulid(Ulid::new());

        let plain: EventId = id.to_canonical().parse().unwrap();
        let prefixed: EventId = id.to_string().parse().unwrap();

        assert_eq!(plain, id);
        assert_eq!(prefixed, id);
        assert!("not-a-ulid".parse::<EventId>().is_err());
    }

    #[test]
    fn serializes_as_bare_ulid_string() {
        let id = EventId::from_ulid(Ulid::new());
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_canonical()));

        let back: EventId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn string_order_matches_id_order() {
        let id1 = EventId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = EventId::from_ulid(Ulid::new());

        assert!(id1 < id2);
        assert!(id1.to_canonical() < id2.to_canonical());
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<EventId>(), size_of::<Ulid>());
        assert_eq!(size_of::<CycleId>(), 16);
    }
}
