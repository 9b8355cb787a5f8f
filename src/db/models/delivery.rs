use serde::{Deserialize, Serialize};

/// Delivery state shared by queued messages and broadcast logs.
///
/// `Sent` and `Failed` are terminal: repository updates only ever touch
/// rows that are still `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}
