//! Property-based tests over random command sequences applied to an order.

use chrono::Utc;
use esim_fulfillment::domain::{EsimArtifacts, NewOrder, Order, OrderCommand, OrderStatus, PaymentStatus};
use proptest::prelude::*;

const TOTAL: i64 = 10_000;

fn fresh_order() -> Order {
    Order::with_id(
        "ord_prop",
        NewOrder {
            amount: TOTAL,
            currency: "KRW".to_string(),
            customer_name: "Choi".to_string(),
            customer_email: "choi@example.com".to_string(),
            customer_phone: None,
            product_sku: "EU-10GB-30D".to_string(),
            quantity: 1,
        },
        Utc::now(),
    )
}

fn arb_artifacts() -> impl Strategy<Value = EsimArtifacts> {
    prop_oneof![
        3 => Just(EsimArtifacts {
            iccid: "8982000000000000042".to_string(),
            activation_code: "LPA:1$smdp.example$XYZ".to_string(),
            qr_code: "qr".to_string(),
        }),
        1 => Just(EsimArtifacts {
            iccid: " ".to_string(),
            activation_code: String::new(),
            qr_code: String::new(),
        }),
    ]
}

fn arb_command() -> impl Strategy<Value = OrderCommand> {
    prop_oneof![
        Just(OrderCommand::ConfirmPayment { payment_key: "pk_prop".to_string() }),
        Just(OrderCommand::StartFulfillment),
        Just(OrderCommand::RecordSupplierOrder {
            provider_id: "P1".to_string(),
            provider_order_id: "req-1".to_string(),
        }),
        arb_artifacts().prop_map(|artifacts| OrderCommand::Complete {
            provider_id: "P1".to_string(),
            provider_order_id: None,
            artifacts,
        }),
        Just(OrderCommand::MarkDelivered),
        Just(OrderCommand::ProviderFail {
            provider_id: "P1".to_string(),
            error: "HTTP 503".to_string(),
        }),
        Just(OrderCommand::Fail {
            provider_id: None,
            error: "rejected".to_string(),
        }),
        Just(OrderCommand::RequireManualFulfillment { reason: "ops".to_string() }),
        Just(OrderCommand::AdminRetry { reason: "again".to_string() }),
        any::<bool>().prop_map(|stale| OrderCommand::SweepReset {
            reason: "stuck".to_string(),
            stale_before: if stale {
                Utc::now() + chrono::Duration::hours(1)
            } else {
                Utc::now() - chrono::Duration::hours(1)
            },
        }),
        (-100i64..=TOTAL + 100).prop_map(|amount| OrderCommand::Refund { amount }),
    ]
}

/// Commands the orchestration paths issue; none may move a refunded or
/// fulfilled order.
fn is_orchestration(command: &OrderCommand) -> bool {
    matches!(
        command,
        OrderCommand::StartFulfillment
            | OrderCommand::RecordSupplierOrder { .. }
            | OrderCommand::Complete { .. }
            | OrderCommand::ProviderFail { .. }
            | OrderCommand::Fail { .. }
            | OrderCommand::SweepReset { .. }
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Every accepted command leaves a structurally valid order; every
    /// rejected one leaves it untouched.
    #[test]
    fn prop_transitions_preserve_invariants(commands in prop::collection::vec(arb_command(), 1..40)) {
        let mut order = fresh_order();
        for command in &commands {
            let before = order.clone();
            match order.apply(command, Utc::now()) {
                Ok(()) => prop_assert!(order.check_invariants().is_ok(), "{:?} after {:?}", order.check_invariants(), command),
                Err(_) => prop_assert_eq!(&order, &before),
            }
        }
    }

    /// Refunds are terminal and fulfilled orders never regress through
    /// the orchestration commands.
    #[test]
    fn prop_terminal_states_are_sticky(commands in prop::collection::vec(arb_command(), 1..40)) {
        let mut order = fresh_order();
        for command in &commands {
            let before = order.status;
            let applied = order.apply(command, Utc::now()).is_ok();

            if before.is_refund() {
                prop_assert!(!applied, "{:?} moved a refunded order", command);
            }
            if before.is_fulfilled() && is_orchestration(command) {
                prop_assert!(!applied, "{:?} moved a fulfilled order", command);
            }
        }
    }

    /// Money moves only through payment confirmation and refunds.
    #[test]
    fn prop_payment_status_follows_money(commands in prop::collection::vec(arb_command(), 1..40)) {
        let mut order = fresh_order();
        for command in &commands {
            let _ = order.apply(command, Utc::now());
            match order.payment_status {
                PaymentStatus::Unpaid => {
                    prop_assert!(order.payment_key.is_none());
                    prop_assert!(matches!(order.status, OrderStatus::Pending));
                }
                PaymentStatus::Paid => prop_assert_eq!(order.refunded_amount, 0),
                PaymentStatus::Refunded => {
                    prop_assert_eq!(order.refunded_amount, TOTAL);
                    prop_assert_eq!(order.status, OrderStatus::Refunded);
                }
                PaymentStatus::PartiallyRefunded => {
                    prop_assert!(order.refunded_amount > 0 && order.refunded_amount < TOTAL);
                    prop_assert_eq!(order.status, OrderStatus::PartiallyRefunded);
                }
            }
        }
    }
}
