use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::postgres::{PgHasArrayType, PgTypeInfo};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Identifier of an authenticated user, as forwarded by the upstream gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order number accepted by the ledger.
///
/// Construction through [`OrderNumber::parse`] guarantees the Luhn mod-10
/// checksum holds. On the wire it is always a JSON string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Type)]
#[sqlx(transparent)]
pub struct OrderNumber(i64);

impl OrderNumber {
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LedgerError::InvalidOrderNumber(raw.to_string()));
        }
        if !luhn_valid(raw) {
            return Err(LedgerError::InvalidOrderNumber(raw.to_string()));
        }
        let value = i64::from_str(raw)
            .map_err(|_| LedgerError::InvalidOrderNumber(raw.to_string()))?;
        Ok(Self(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
impl OrderNumber {
    /// Appends the Luhn check digit to `base`.
    pub fn with_check_digit(base: i64) -> Self {
        (0..10)
            .find_map(|check| OrderNumber::parse(&format!("{}{}", base, check)).ok())
            .expect("exactly one check digit satisfies Luhn")
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for OrderNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OrderNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        OrderNumber::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Luhn mod-10 check over a string of ASCII digits.
pub fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    let mut double = false;
    for b in digits.bytes().rev() {
        if !b.is_ascii_digit() {
            return false;
        }
        let mut d = u32::from(b - b'0');
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    !digits.is_empty() && sum % 10 == 0
}

/// Accrual status of an order.
///
/// Valid transitions:
/// - New → Processing, Processed, Invalid
/// - Processing → Processed, Invalid
/// - Processed, Invalid are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::New,
        OrderStatus::Processing,
        OrderStatus::Invalid,
        OrderStatus::Processed,
    ];

    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        match self {
            OrderStatus::New => to != OrderStatus::New,
            OrderStatus::Processing => to.is_terminal() || to == OrderStatus::Processing,
            OrderStatus::Invalid | OrderStatus::Processed => false,
        }
    }

    /// Statuses an order may be in for a write of `to` to apply.
    pub fn sources_for(to: OrderStatus) -> Vec<OrderStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(to))
            .collect()
    }
}

impl PgHasArrayType for OrderStatus {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_order_status")
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order entity
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Order {
    pub number: OrderNumber,
    pub owner: UserId,
    pub status: OrderStatus,
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

/// Withdrawal entity - immutable once committed
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Withdrawal {
    pub owner: UserId,
    pub order_number: OrderNumber,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Derived balance of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromRow)]
pub struct Balance {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

impl Balance {
    pub fn has_available(&self, required: Decimal) -> bool {
        self.current >= required
    }
}

/// Result of inserting an order into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The number was already on file under this owner.
    Existing(UserId),
}

/// Status/accrual pair the reconciler writes back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualUpdate {
    pub status: OrderStatus,
    pub accrual: Option<Decimal>,
}

impl AccrualUpdate {
    pub fn processing() -> Self {
        Self { status: OrderStatus::Processing, accrual: None }
    }

    pub fn processed(accrual: Decimal) -> Self {
        Self { status: OrderStatus::Processed, accrual: Some(accrual) }
    }

    pub fn invalid() -> Self {
        Self { status: OrderStatus::Invalid, accrual: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luhn_known_numbers() {
        assert!(luhn_valid("79927398713"));
        assert!(luhn_valid("4561261212345467"));
        assert!(luhn_valid("0"));
        assert!(!luhn_valid("1234567812345678"));
        assert!(!luhn_valid("79927398710"));
        assert!(!luhn_valid(""));
        assert!(!luhn_valid("12a4"));
    }

    #[test]
    fn test_luhn_single_digit_error_detected() {
        let valid = "79927398713";
        for pos in 0..valid.len() {
            let original = valid.as_bytes()[pos];
            let replacement = if original == b'9' { b'0' } else { original + 1 };
            let mut mutated = valid.as_bytes().to_vec();
            mutated[pos] = replacement;
            let mutated = String::from_utf8(mutated).unwrap();
            assert!(!luhn_valid(&mutated), "{} should fail", mutated);
        }
    }

    #[test]
    fn test_order_number_parse() {
        assert_eq!(OrderNumber::parse("79927398713").unwrap().value(), 79927398713);
        assert_eq!(OrderNumber::parse(" 79927398713\n").unwrap().value(), 79927398713);

        assert!(matches!(
            OrderNumber::parse("1234567812345678"),
            Err(LedgerError::InvalidOrderNumber(_))
        ));
        assert!(OrderNumber::parse("").is_err());
        assert!(OrderNumber::parse("-79927398713").is_err());
        assert!(OrderNumber::parse("7992 7398713").is_err());
        // wider than i64
        assert!(OrderNumber::parse("79927398713799273987137").is_err());
    }

    #[test]
    fn test_with_check_digit() {
        assert_eq!(OrderNumber::with_check_digit(7992739871).value(), 79927398713);
        assert_eq!(OrderNumber::with_check_digit(123456781234567).value(), 1234567812345670);
    }

    #[test]
    fn test_order_number_serde_is_string() {
        let number = OrderNumber::parse("79927398713").unwrap();
        assert_eq!(serde_json::to_string(&number).unwrap(), "\"79927398713\"");

        let back: OrderNumber = serde_json::from_str("\"79927398713\"").unwrap();
        assert_eq!(back, number);
        assert!(serde_json::from_str::<OrderNumber>("\"1234567812345678\"").is_err());
    }

    #[test]
    fn test_status_transitions() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Processed));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Invalid));
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::New));

        for terminal in [OrderStatus::Processed, OrderStatus::Invalid] {
            assert!(terminal.is_terminal());
            for to in [
                OrderStatus::New,
                OrderStatus::Processing,
                OrderStatus::Invalid,
                OrderStatus::Processed,
            ] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_sources_for_write() {
        let live = vec![OrderStatus::New, OrderStatus::Processing];
        assert_eq!(OrderStatus::sources_for(OrderStatus::Processing), live);
        assert_eq!(OrderStatus::sources_for(OrderStatus::Processed), live);
        assert_eq!(OrderStatus::sources_for(OrderStatus::Invalid), live);
        assert!(OrderStatus::sources_for(OrderStatus::New).is_empty());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&OrderStatus::Processed).unwrap(), "\"PROCESSED\"");
        let s: OrderStatus = serde_json::from_str("\"PROCESSING\"").unwrap();
        assert_eq!(s, OrderStatus::Processing);
    }
}
