//! Referral commission registration and lifecycle.
//!
//! A referral is born when a fulfilled invoice carries an active referral coupon. The record takes half the invoice
//! amount and becomes payable one calendar month after fulfilment. Registration is idempotent on the invoice, so the
//! fulfilment webhook can fire as often as it likes.
use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{InvoiceId, InvoiceStatus, NewReferralCommission, ReferralCommissionRecord, ReferralStatus},
    helpers::add_calendar_months,
    pipeline::{distribution::referral_commission, errors::ReferralApiError},
    traits::{CommissionDatabase, CommissionDatabaseError},
};

/// How many calendar months a referral commission is held before it matures.
pub const REFERRAL_HOLD_MONTHS: u32 = 1;

pub struct ReferralApi<B> {
    db: B,
}

impl<B: Debug> Debug for ReferralApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReferralApi ({:?})", self.db)
    }
}

impl<B> ReferralApi<B>
where B: CommissionDatabase
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Registers a referral commission for a fulfilled invoice.
    ///
    /// Returns `Ok(None)` when the invoice simply does not qualify: no coupon, an inactive coupon, a referrer with
    /// no active affiliate role, or a non-positive amount. Those are everyday outcomes, not errors. An unknown or
    /// unfulfilled invoice *is* an error, because the fulfilment trigger should never hand us one.
    ///
    /// The record is keyed on the invoice: registering the same invoice again returns the existing record
    /// untouched, flagged with `false`.
    pub async fn register_from_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<Option<(ReferralCommissionRecord, bool)>, ReferralApiError> {
        let invoice = self
            .db
            .fetch_invoice(invoice_id)
            .await?
            .ok_or_else(|| ReferralApiError::UnknownInvoice(invoice_id.clone()))?;
        if invoice.status != InvoiceStatus::Fulfilled {
            return Err(ReferralApiError::NotFulfilled(invoice_id.clone()));
        }
        let Some(fulfilled_at) = invoice.fulfilled_at else {
            return Err(ReferralApiError::NotFulfilled(invoice_id.clone()));
        };
        if !invoice.amount.is_positive() {
            debug!("🎟️ Invoice {invoice_id} has a non-positive amount. No referral to register");
            return Ok(None);
        }
        let Some(code) = invoice.coupon_code.as_deref() else {
            trace!("🎟️ Invoice {invoice_id} carries no coupon. No referral to register");
            return Ok(None);
        };
        let Some(coupon) = self.db.fetch_coupon(code).await? else {
            debug!("🎟️ Invoice {invoice_id} carries unknown coupon '{code}'. No referral to register");
            return Ok(None);
        };
        if !coupon.is_active {
            debug!("🎟️ Coupon '{code}' on invoice {invoice_id} is no longer active. No referral to register");
            return Ok(None);
        }
        if !self.db.has_active_affiliate_role(coupon.influencer_id).await? {
            debug!(
                "🎟️ Influencer {} behind coupon '{code}' holds no active affiliate role. No referral to register",
                coupon.influencer_id
            );
            return Ok(None);
        }

        let referral = NewReferralCommission {
            influencer_id: coupon.influencer_id,
            user_id: invoice.user_id,
            invoice_id: invoice.id.clone(),
            coupon_code: coupon.code.clone(),
            amount: referral_commission(invoice.amount),
            currency: invoice.currency.clone(),
            created_at: fulfilled_at,
            available_at: add_calendar_months(fulfilled_at, REFERRAL_HOLD_MONTHS),
        };
        let (record, inserted) = self.db.insert_referral_commission(referral).await?;
        if inserted {
            info!(
                "🎟️ Referral registered: influencer {} earns {} {} on invoice {invoice_id}, payable from {}",
                record.influencer_id, record.amount, record.currency, record.available_at
            );
        }
        Ok(Some((record, inserted)))
    }

    pub async fn referral(
        &self,
        referral_id: i64,
    ) -> Result<Option<ReferralCommissionRecord>, CommissionDatabaseError> {
        self.db.fetch_referral_commission(referral_id).await
    }

    /// Applies an admin status change. The transition is validated against the referral state machine; anything
    /// other than settling or cancelling a pending record is rejected.
    pub async fn update_status(
        &self,
        referral_id: i64,
        new_status: ReferralStatus,
    ) -> Result<ReferralCommissionRecord, CommissionDatabaseError> {
        let record = self.db.update_referral_status(referral_id, new_status).await?;
        info!("🎟️ Referral {referral_id} is now {new_status}");
        Ok(record)
    }
}
