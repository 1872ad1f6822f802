//! Stored payment methods of a wallet, with exactly zero or one default.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    mask_last_four, DefaultMode, NewPaymentMethod, PaymentMethod, PaymentMethodDetails,
    PaymentMethodType, RemovalOutcome, WalletStatus,
};
use crate::services::error::ServiceError;
use crate::services::metrics::record_error;
use crate::services::store::Store;

pub struct PaymentMethodRegistry {
    store: Arc<dyn Store>,
}

impl PaymentMethodRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Store a masked copy of `input`. A requested default replaces the
    /// current one; otherwise the method becomes default only if the wallet
    /// has none.
    #[instrument(skip(self, input), fields(is_default = input.is_default))]
    pub async fn add_payment_method(
        &self,
        wallet_id: Uuid,
        input: NewPaymentMethod,
    ) -> Result<PaymentMethod, ServiceError> {
        let wallet = self
            .store
            .find_wallet(wallet_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Wallet {}", wallet_id)))?;

        if wallet.status == WalletStatus::Closed {
            return Err(record_error(ServiceError::InvalidState(format!(
                "Wallet {} is closed",
                wallet_id
            ))));
        }

        let method = masked_method(wallet_id, input.details).map_err(record_error)?;
        let mode = if input.is_default {
            DefaultMode::Replace
        } else {
            DefaultMode::IfNone
        };

        let stored = self
            .store
            .insert_payment_method(&method, mode)
            .await
            .map_err(record_error)?;

        info!(
            payment_method_id = %stored.payment_method_id,
            method_type = %stored.method_type,
            is_default = stored.is_default,
            "Payment method added"
        );
        Ok(stored)
    }

    /// Active method by id.
    pub async fn get(&self, payment_method_id: Uuid) -> Result<PaymentMethod, ServiceError> {
        self.store
            .find_payment_method(payment_method_id)
            .await?
            .filter(|m| m.is_active)
            .ok_or_else(|| ServiceError::NotFound(format!("Payment method {}", payment_method_id)))
    }

    pub async fn list(&self, wallet_id: Uuid) -> Result<Vec<PaymentMethod>, ServiceError> {
        self.store.list_payment_methods(wallet_id).await
    }

    pub async fn get_default(&self, wallet_id: Uuid) -> Result<Option<PaymentMethod>, ServiceError> {
        Ok(self
            .store
            .list_payment_methods(wallet_id)
            .await?
            .into_iter()
            .find(|m| m.is_default))
    }

    #[instrument(skip(self))]
    pub async fn set_default(&self, payment_method_id: Uuid) -> Result<PaymentMethod, ServiceError> {
        let method = self.get(payment_method_id).await?;
        if method.is_default {
            return Ok(method);
        }

        if !self
            .store
            .set_default_payment_method(method.wallet_id, payment_method_id)
            .await?
        {
            // Deactivated between the read and the write.
            return Err(record_error(ServiceError::NotFound(format!(
                "Payment method {}",
                payment_method_id
            ))));
        }

        info!(wallet_id = %method.wallet_id, "Default payment method changed");
        self.get(payment_method_id).await
    }

    /// Deactivate a method. Returns the method promoted to default, if any.
    #[instrument(skip(self))]
    pub async fn remove(&self, payment_method_id: Uuid) -> Result<Option<PaymentMethod>, ServiceError> {
        let method = self.get(payment_method_id).await?;

        match self
            .store
            .remove_payment_method(method.wallet_id, payment_method_id)
            .await?
        {
            RemovalOutcome::NotFound => Err(record_error(ServiceError::NotFound(format!(
                "Payment method {}",
                payment_method_id
            )))),
            RemovalOutcome::Removed { removed, promoted } => {
                info!(
                    wallet_id = %removed.wallet_id,
                    promoted = ?promoted.as_ref().map(|m| m.payment_method_id),
                    "Payment method removed"
                );
                Ok(promoted)
            }
        }
    }
}

/// Reduce submitted details to what may be stored.
fn masked_method(
    wallet_id: Uuid,
    details: PaymentMethodDetails,
) -> Result<PaymentMethod, ServiceError> {
    let now = Utc::now();
    let mut method = PaymentMethod {
        payment_method_id: Uuid::new_v4(),
        wallet_id,
        method_type: PaymentMethodType::Card,
        gateway_token: String::new(),
        card_brand: None,
        card_last_four: None,
        card_exp_month: None,
        card_exp_year: None,
        bank_name: None,
        account_holder: None,
        account_last_four: None,
        is_default: false,
        is_active: true,
        created_utc: now,
        updated_utc: now,
    };

    match details {
        PaymentMethodDetails::Card {
            number,
            brand,
            exp_month,
            exp_year,
            gateway_token,
        } => {
            if !(1..=12).contains(&exp_month) {
                return Err(ServiceError::InvalidInput(format!(
                    "Expiry month {} is out of range",
                    exp_month
                )));
            }
            let (year, month) = (now.year(), now.month());
            if i32::from(exp_year) < year
                || (i32::from(exp_year) == year && u32::from(exp_month) < month)
            {
                return Err(ServiceError::InvalidInput("Card has expired".to_string()));
            }
            method.card_last_four = Some(mask_last_four(&number, 12).ok_or_else(|| {
                ServiceError::InvalidInput("Card number is invalid".to_string())
            })?);
            method.card_brand = Some(brand);
            method.card_exp_month = Some(i16::from(exp_month));
            method.card_exp_year = Some(i16::try_from(exp_year).map_err(|_| {
                ServiceError::InvalidInput("Expiry year is out of range".to_string())
            })?);
            method.gateway_token = gateway_token;
        }
        PaymentMethodDetails::BankAccount {
            account_number,
            bank_name,
            account_holder,
            gateway_token,
        } => {
            if bank_name.trim().is_empty() || account_holder.trim().is_empty() {
                return Err(ServiceError::InvalidInput(
                    "Bank name and account holder are required".to_string(),
                ));
            }
            method.method_type = PaymentMethodType::BankAccount;
            method.account_last_four =
                Some(mask_last_four(&account_number, 6).ok_or_else(|| {
                    ServiceError::InvalidInput("Account number is invalid".to_string())
                })?);
            method.bank_name = Some(bank_name);
            method.account_holder = Some(account_holder);
            method.gateway_token = gateway_token;
        }
    }

    if method.gateway_token.trim().is_empty() {
        return Err(ServiceError::InvalidInput(
            "Gateway token is required".to_string(),
        ));
    }

    Ok(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(number: &str, exp_year: u16) -> PaymentMethodDetails {
        PaymentMethodDetails::Card {
            number: number.to_string(),
            brand: "visa".to_string(),
            exp_month: 12,
            exp_year,
            gateway_token: "tok_visa".to_string(),
        }
    }

    #[test]
    fn only_last_four_digits_are_kept() {
        let method = masked_method(Uuid::new_v4(), card("4242 4242 4242 4242", 2099)).unwrap();
        assert_eq!(method.card_last_four.as_deref(), Some("4242"));
        assert_eq!(method.card_exp_year, Some(2099));
        assert!(!method.is_default);
    }

    #[test]
    fn expired_cards_are_rejected() {
        let err = masked_method(Uuid::new_v4(), card("4242424242424242", 2001)).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn bank_account_requires_a_token() {
        let details = PaymentMethodDetails::BankAccount {
            account_number: "000123456789".to_string(),
            bank_name: "First Bank".to_string(),
            account_holder: "Jo Doe".to_string(),
            gateway_token: " ".to_string(),
        };
        assert!(masked_method(Uuid::new_v4(), details).is_err());
    }
}
