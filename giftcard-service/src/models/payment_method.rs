//! Stored payment methods. Only masked card/account data is ever kept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    Card,
    BankAccount,
}

string_enum!(PaymentMethodType, "payment method type", {
    Card => "card",
    BankAccount => "bank_account",
});

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub payment_method_id: Uuid,
    pub wallet_id: Uuid,
    #[sqlx(try_from = "String")]
    pub method_type: PaymentMethodType,
    /// Opaque token the payment gateway charges against.
    pub gateway_token: String,
    pub card_brand: Option<String>,
    pub card_last_four: Option<String>,
    pub card_exp_month: Option<i16>,
    pub card_exp_year: Option<i16>,
    pub bank_name: Option<String>,
    pub account_holder: Option<String>,
    pub account_last_four: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Raw details as submitted. Full numbers are reduced to their last four
/// digits before anything is stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethodDetails {
    Card {
        number: String,
        brand: String,
        exp_month: u8,
        exp_year: u16,
        gateway_token: String,
    },
    BankAccount {
        account_number: String,
        bank_name: String,
        account_holder: String,
        gateway_token: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPaymentMethod {
    pub details: PaymentMethodDetails,
    #[serde(default)]
    pub is_default: bool,
}

/// How an inserted method interacts with the wallet's current default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultMode {
    /// Clear every other default and make this one the default.
    Replace,
    /// Become the default only if the wallet has no active default yet.
    IfNone,
}

/// Result of removing a payment method.
#[derive(Debug, Clone, PartialEq)]
pub enum RemovalOutcome {
    NotFound,
    Removed {
        removed: PaymentMethod,
        promoted: Option<PaymentMethod>,
    },
}

/// Last four digits of a card or account number, ignoring separators.
///
/// Returns `None` if the input holds anything but digits, spaces and dashes,
/// or fewer than `min_digits` digits.
pub fn mask_last_four(number: &str, min_digits: usize) -> Option<String> {
    if !number
        .chars()
        .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
    {
        return None;
    }

    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < min_digits.max(4) {
        return None;
    }

    Some(digits[digits.len() - 4..].iter().collect())
}
