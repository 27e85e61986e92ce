// Service requests and the two-stage payment flow.
//
// A product request opens with a down payment (`down_payment_percent` of the
// post price). Once the gateway reports that checkout as paid the payment is
// `initiated`, and the remaining amount can be collected to complete it.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::NewRequest;
use crate::error::{AppError, AppResult};
use crate::model::{
    InitialPayment, Notification, PaymentStatus, Post, RequestStatus, RequestWithPayments,
    Role, ServiceRequest, User, PRODUCT_REQUEST,
};
use crate::Marketplace;

const DEFAULT_PAYMENT_METHOD: &str = "gcash";

// ---------------------------------------------------------------------------
// Amounts and transitions
// ---------------------------------------------------------------------------

/// `(down, remaining)` in centavos. `down + remaining == price`.
pub fn split_amount(price: i64, down_payment_percent: u8) -> (i64, i64) {
    let down = i128::from(price) * i128::from(down_payment_percent) / 100;
    // |down| <= |price| since the percentage is at most 100.
    let down = i64::try_from(down).unwrap_or(price);
    (down, price - down)
}

pub fn can_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;
    matches!(
        (from, to),
        (Pending, Initiated) | (Initiated, Completed) | (Initiated, Refunded) | (Completed, Refunded)
    )
}

fn check_transition(from: PaymentStatus, to: PaymentStatus) -> AppResult<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "Payment cannot move from {from} to {to}."
        )))
    }
}

// ---------------------------------------------------------------------------
// Gateway seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    /// Centavos.
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub line_item: String,
    pub billing_name: String,
    pub billing_email: String,
    pub payment_methods: Vec<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLinkRequest {
    /// Centavos.
    pub amount: i64,
    pub description: String,
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLink {
    pub id: String,
    pub checkout_url: String,
}

/// Hosted-checkout provider.
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> anyhow::Result<CheckoutSession>;
    async fn create_payment_link(&self, req: &PaymentLinkRequest) -> anyhow::Result<PaymentLink>;
}

// ---------------------------------------------------------------------------
// Inputs and responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestInput {
    pub post_id: Option<i64>,
    pub target_user_id: Option<i64>,
    pub request_content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestCreated {
    pub message: &'static str,
    pub request: ServiceRequest,
    pub notification: Notification,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStarted {
    pub message: &'static str,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemainingPaymentStarted {
    pub message: &'static str,
    pub checkout_url: String,
    pub payment: InitialPayment,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl Marketplace {
    /// Validate a request body; returns the post and the target user.
    fn resolve_request(&self, input: &RequestInput) -> AppResult<(Post, User)> {
        let post = input
            .post_id
            .map(|id| self.db.get_post(id))
            .transpose()?
            .flatten()
            .ok_or_else(|| AppError::not_found("Post"))?;
        let target_id = input.target_user_id.ok_or_else(|| {
            AppError::BadRequest("Target user ID is required to create a notification.".into())
        })?;
        let target = self
            .db
            .get_user(target_id)?
            .ok_or_else(|| AppError::not_found("Target user"))?;
        Ok((post, target))
    }

    fn open_request(
        &self,
        user: &User,
        post: &Post,
        target: &User,
        input: &RequestInput,
        amount: i64,
    ) -> AppResult<(ServiceRequest, InitialPayment, Notification)> {
        let (request, payment) = self.db.insert_request_with_payment(&NewRequest {
            post_id: post.post_id,
            user_id: user.id,
            target_user_id: target.id,
            request_type: PRODUCT_REQUEST,
            request_content: input.request_content.as_deref(),
            amount,
            payment_method: DEFAULT_PAYMENT_METHOD,
            now: Utc::now(),
        })?;
        info!(
            request_id = request.request_id,
            payment_id = payment.initial_payment_id,
            amount,
            "request created"
        );
        let notification = self.notify(
            target.id,
            Some(request.request_id),
            &format!("{} has requested for your service.", user.username),
        )?;
        Ok((request, payment, notification))
    }

    /// Request a service without paying up front.
    pub fn create_request(&self, user: &User, input: &RequestInput) -> AppResult<RequestCreated> {
        let (post, target) = self.resolve_request(input)?;
        let (request, _, notification) = self.open_request(user, &post, &target, input, 0)?;
        Ok(RequestCreated {
            message: "Request created successfully.",
            request,
            notification,
        })
    }

    /// Request a product and open a gateway checkout for the down payment.
    pub async fn pay_for_product(
        &self,
        user: &User,
        input: &RequestInput,
    ) -> AppResult<CheckoutStarted> {
        let (post, target) = self.resolve_request(input)?;
        let info = self.db.get_personal_information(user.id)?.ok_or_else(|| {
            AppError::BadRequest("Personal information not found for the user.".into())
        })?;

        let payments = &self.config.payments;
        let (down, _) = split_amount(post.price, payments.down_payment_percent);
        let (_, payment, _) = self.open_request(user, &post, &target, input, down)?;

        let base = self.config.public_url.trim_end_matches('/');
        let checkout = CheckoutRequest {
            amount: down,
            currency: payments.currency.clone(),
            description: format!("Initial Payment for Post {}", post.post_id),
            line_item: format!(
                "Initial {}% Payment for Post {}",
                payments.down_payment_percent, post.post_id
            ),
            billing_name: info.full_name(),
            billing_email: user.email.clone(),
            payment_methods: payments.payment_methods.clone(),
            success_url: format!("{base}/payment/success"),
            cancel_url: format!("{base}/payment/cancel"),
        };
        let session = self
            .gateway
            .create_checkout_session(&checkout)
            .await
            .map_err(|e| {
                warn!(payment_id = payment.initial_payment_id, "checkout session failed: {e:#}");
                AppError::Gateway("Payment initiation failed".into())
            })?;

        self.db
            .set_payment_transaction(payment.initial_payment_id, &session.id, Utc::now())?;
        info!(
            payment_id = payment.initial_payment_id,
            session = %session.id,
            "checkout session created"
        );
        Ok(CheckoutStarted {
            message: "Checkout session created successfully.",
            checkout_url: session.checkout_url,
        })
    }

    /// Gateway confirmation of a paid checkout session. Returns `None` for an
    /// unknown transaction; repeated confirmations leave the payment as is.
    pub fn confirm_checkout(&self, transaction_id: &str) -> AppResult<Option<InitialPayment>> {
        let Some(payment) = self.db.find_payment_by_transaction(transaction_id)? else {
            warn!(transaction_id, "paid event for unknown transaction");
            return Ok(None);
        };
        if payment.status != PaymentStatus::Pending {
            info!(
                payment_id = payment.initial_payment_id,
                status = %payment.status,
                "duplicate paid event ignored"
            );
            return Ok(Some(payment));
        }
        let updated = self.db.update_payment(
            payment.initial_payment_id,
            PaymentStatus::Initiated,
            payment.amount,
            Utc::now(),
        )?;
        info!(payment_id = updated.initial_payment_id, "down payment confirmed");
        Ok(Some(updated))
    }

    /// Collect the remaining amount on a request whose down payment is
    /// `initiated`.
    pub async fn pay_remaining(
        &self,
        user: &User,
        request_id: i64,
    ) -> AppResult<RemainingPaymentStarted> {
        let request = self
            .db
            .get_request(request_id)?
            .ok_or_else(|| AppError::not_found("Request"))?;
        let post = self
            .db
            .get_post(request.post_id)?
            .ok_or_else(|| AppError::not_found("Post"))?;

        // The caller paid, or the caller is the target and the initiator paid.
        let payment = match self.db.find_payment(request_id, user.id)? {
            Some(p) => Some(p),
            None if request.target_user_id == user.id => {
                self.db.find_payment(request_id, request.user_id)?
            }
            None => None,
        };
        let payment = payment.ok_or_else(|| {
            AppError::BadRequest("Initial payment not initiated or not found".into())
        })?;
        if payment.status != PaymentStatus::Initiated {
            return Err(AppError::BadRequest(
                "Initial payment not yet completed or initiated".into(),
            ));
        }

        let pct = self.config.payments.down_payment_percent;
        let (_, remaining) = split_amount(post.price, pct);
        let link = self
            .gateway
            .create_payment_link(&PaymentLinkRequest {
                amount: remaining,
                description: format!("Remaining {}% Payment for Post {}", 100 - pct, post.post_id),
                remarks: format!("Request {request_id}"),
            })
            .await
            .map_err(|e| {
                warn!(request_id, "payment link failed: {e:#}");
                AppError::Gateway("Payment initiation failed".into())
            })?;

        let now = Utc::now();
        let payment = self.db.update_payment(
            payment.initial_payment_id,
            PaymentStatus::Completed,
            payment.amount.saturating_add(remaining),
            now,
        )?;
        self.db
            .set_request_status(request_id, RequestStatus::Completed, now)?;
        info!(request_id, payment_id = payment.initial_payment_id, "remaining payment opened");
        Ok(RemainingPaymentStarted {
            message: "Payment link created successfully.",
            checkout_url: link.checkout_url,
            payment,
        })
    }

    /// The target accepts or declines a pending request.
    pub fn respond_to_request(
        &self,
        user: &User,
        request_id: i64,
        accept: bool,
    ) -> AppResult<ServiceRequest> {
        let request = self
            .db
            .get_request(request_id)?
            .ok_or_else(|| AppError::not_found("Request"))?;
        if request.target_user_id != user.id {
            return Err(AppError::Forbidden(
                "Only the requested user can respond to this request.".into(),
            ));
        }
        if request.status != RequestStatus::Pending {
            return Err(AppError::BadRequest("This request has already been answered.".into()));
        }

        let (status, verb) = if accept {
            (RequestStatus::Accepted, "accepted")
        } else {
            (RequestStatus::Declined, "declined")
        };
        self.db.set_request_status(request_id, status, Utc::now())?;
        self.notify(
            request.user_id,
            Some(request_id),
            &format!("{} has {verb} your request.", user.username),
        )?;
        self.db
            .get_request(request_id)?
            .ok_or_else(|| AppError::not_found("Request"))
    }

    /// Requests where `user_id` is the initiator or the target, with their
    /// payments. Visible to that user and to admins.
    pub fn requests_with_payments(
        &self,
        viewer: &User,
        user_id: i64,
    ) -> AppResult<Vec<RequestWithPayments>> {
        if viewer.id != user_id && viewer.role != Role::Admin {
            return Err(AppError::Forbidden(
                "You can only view your own requests.".into(),
            ));
        }
        self.db
            .requests_involving(user_id)?
            .into_iter()
            .map(|request| -> AppResult<RequestWithPayments> {
                let initial_payments = self.db.payments_for_request(request.request_id)?;
                Ok(RequestWithPayments {
                    request,
                    initial_payments,
                })
            })
            .collect()
    }

    /// Admin refund of an initiated or completed payment.
    pub fn refund(&self, payment_id: i64) -> AppResult<InitialPayment> {
        let payment = self
            .db
            .get_payment(payment_id)?
            .ok_or_else(|| AppError::not_found("Payment"))?;
        check_transition(payment.status, PaymentStatus::Refunded)?;
        let refunded = self.db.update_payment(
            payment_id,
            PaymentStatus::Refunded,
            payment.amount,
            Utc::now(),
        )?;
        info!(payment_id, amount = refunded.amount, "payment refunded");
        Ok(refunded)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records gateway calls and hands out predictable ids.
    #[derive(Default)]
    pub(crate) struct FakeGateway {
        pub fail: AtomicBool,
        pub sessions: Mutex<Vec<CheckoutRequest>>,
        pub links: Mutex<Vec<PaymentLinkRequest>>,
    }

    impl FakeGateway {
        pub(crate) fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CheckoutGateway for FakeGateway {
        async fn create_checkout_session(
            &self,
            req: &CheckoutRequest,
        ) -> anyhow::Result<CheckoutSession> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("gateway unavailable");
            }
            let mut sessions = self.sessions.lock().unwrap();
            sessions.push(req.clone());
            let id = format!("cs_test_{}", sessions.len());
            Ok(CheckoutSession {
                checkout_url: format!("https://checkout.test/{id}"),
                id,
            })
        }

        async fn create_payment_link(
            &self,
            req: &PaymentLinkRequest,
        ) -> anyhow::Result<PaymentLink> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("gateway unavailable");
            }
            let mut links = self.links.lock().unwrap();
            links.push(req.clone());
            let id = format!("link_test_{}", links.len());
            Ok(PaymentLink {
                checkout_url: format!("https://pay.test/{id}"),
                id,
            })
        }
    }
}
