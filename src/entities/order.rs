use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order entity.
///
/// `payment_intent_id` is the gateway correlation id: the payment intent for
/// card sessions, the transaction reference for the redirect gateway. Empty
/// until the gateway assigns one.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub address: String,
    #[sea_orm(nullable)]
    pub phone: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub shipping_method: String,
    pub shipping_fee: i64,
    pub total: i64,
    pub payment_intent_id: String,
    pub gateway_session_id: String,
    #[sea_orm(nullable)]
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::order_interaction::Entity")]
    Interactions,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::order_interaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Interactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Fulfillment status state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "handed_to_carrier")]
    HandedToCarrier,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "received")]
    Received,
    #[sea_orm(string_value = "unreachable")]
    Unreachable,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "canceled")]
    Canceled,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refund_requested")]
    RefundRequested,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::HandedToCarrier => "handed_to_carrier",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Received => "received",
            OrderStatus::Unreachable => "unreachable",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Failed => "failed",
            OrderStatus::RefundRequested => "refund_requested",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Terminal states admit no further transitions. `received` ends
    /// fulfillment but a refund may still be requested afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Refunded
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Failed
        )
    }

    /// Whether an order may move from `self` to `next`.
    pub fn can_transition(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if *self == next {
            return false;
        }
        // A refund request is allowed from any non-terminal state.
        if next == RefundRequested {
            return !self.is_terminal() && *self != RefundRequested;
        }
        match self {
            Pending => matches!(next, Processing | Rejected | Canceled | Failed),
            Processing => matches!(next, HandedToCarrier | Rejected | Canceled),
            HandedToCarrier => matches!(next, InTransit | Unreachable),
            InTransit => matches!(next, Delivered | Received),
            Delivered => matches!(next, Received),
            RefundRequested => matches!(next, Refunded),
            Received | Unreachable | Rejected | Canceled | Failed | Refunded => false,
        }
    }
}

/// Settlement status of the order's payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "prepaid")]
    Prepaid,
    #[sea_orm(string_value = "failed")]
    Failed,
    /// COD order awaiting collection on delivery
    #[sea_orm(string_value = "unpaid")]
    Unpaid,
    /// COD payment collected by the carrier
    #[sea_orm(string_value = "received")]
    Received,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Prepaid => "prepaid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Received => "received",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// How the shopper pays. Dispatch in checkout is a match on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "cod")]
    #[serde(rename = "cod")]
    CashOnDelivery,
    #[sea_orm(string_value = "card_session")]
    #[serde(rename = "card_session")]
    CardSession,
    #[sea_orm(string_value = "redirect")]
    #[serde(rename = "redirect")]
    Redirect,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "cod",
            PaymentMethod::CardSession => "card_session",
            PaymentMethod::Redirect => "redirect",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;

    #[test]
    fn happy_path_transitions() {
        assert!(Pending.can_transition(Processing));
        assert!(Processing.can_transition(HandedToCarrier));
        assert!(HandedToCarrier.can_transition(InTransit));
        assert!(InTransit.can_transition(Delivered));
        assert!(Delivered.can_transition(Received));
    }

    #[test]
    fn customer_may_confirm_receipt_while_in_transit() {
        assert!(InTransit.can_transition(Received));
    }

    #[test]
    fn refund_request_from_any_non_terminal() {
        assert!(Pending.can_transition(RefundRequested));
        assert!(Processing.can_transition(RefundRequested));
        assert!(Delivered.can_transition(RefundRequested));
        assert!(Received.can_transition(RefundRequested));
        assert!(!Canceled.can_transition(RefundRequested));
        assert!(!Refunded.can_transition(RefundRequested));
    }

    #[test]
    fn refund_only_from_refund_requested() {
        assert!(RefundRequested.can_transition(Refunded));
        assert!(!Delivered.can_transition(Refunded));
        assert!(!Pending.can_transition(Refunded));
    }

    #[test]
    fn terminal_states_admit_nothing() {
        for terminal in [Rejected, Canceled, Failed, Refunded] {
            for next in [
                Pending,
                Processing,
                HandedToCarrier,
                InTransit,
                Delivered,
                Received,
                Refunded,
            ] {
                assert!(!terminal.can_transition(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn no_skipping_fulfillment_steps() {
        assert!(!Pending.can_transition(Delivered));
        assert!(!Pending.can_transition(InTransit));
        assert!(!Processing.can_transition(Delivered));
        assert!(!Delivered.can_transition(Processing));
    }

    #[test]
    fn self_transition_is_rejected() {
        assert!(!Processing.can_transition(Processing));
    }
}
