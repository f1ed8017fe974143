//! Payment domain services. Each service owns one concern and talks to the
//! others only through the store, the gateway, and the notification sink.

pub mod intent_creator;
pub mod notification;
pub mod reconciler;
pub mod webhook_ingestor;

pub use intent_creator::{IntentCreator, IntentError, IntentOutcome};
pub use notification::{LogNotificationSink, NotificationKind, NotificationSink, PaymentReceipt};
pub use reconciler::{ReconcileError, ReconcileReport, Reconciler};
pub use webhook_ingestor::{verify_signature, WebhookError, WebhookIngestor, WebhookOutcome};
