//! Domain models for giftcard-service.

/// A stored enum value that does not name any known variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Database-string round-tripping for closed status enums.
///
/// Generates `as_str`, `Display`, `FromStr` and `TryFrom<String>` (the latter
/// is what `#[sqlx(try_from = "String")]` decodes through).
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Get string representation for database.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = $crate::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::models::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $ty {
            type Error = $crate::models::UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

mod gift_card;
mod payment_method;
mod personal_gift_card;
mod summary;
mod transaction;
mod wallet;

pub use gift_card::{
    BusinessGiftCard, CreateBusinessGiftCard, GiftCardFilter, GiftCardGuard, GiftCardStatus,
    GiftCardTransition, RedemptionReceipt, SaleReceipt, SentStatus, SentTransition,
};
pub use payment_method::{
    mask_last_four, DefaultMode, NewPaymentMethod, PaymentMethod, PaymentMethodDetails,
    PaymentMethodType, RemovalOutcome,
};
pub use personal_gift_card::{
    InvalidReason, PersonalGiftCard, PersonalGiftCardStatus, PersonalRedemptionReceipt,
    PersonalTransition, PurchasePersonalGiftCard, ValidationResult,
};
pub use summary::{GiftCardSummary, SummaryBucket, SweepReport};
pub use transaction::{
    Transaction, TransactionFilter, TransactionMeta, TransactionPage, TransactionStatus,
    TransactionType,
};
pub use wallet::{Wallet, WalletStatus, WalletTransition};
