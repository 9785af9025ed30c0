//! 外部集成：HTTP 接入层与 Webhook 结果投递

pub mod http;
pub mod webhook;

pub use http::{router, HttpState};
pub use webhook::{DeliveryReport, RetryPolicy, WebhookDispatcher, WebhookPayload};
