//! Broker metrics.

use metriken::{metric, Counter};

#[metric(
    name = "connections_accepted",
    description = "Total connections handed to worker reactors"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_closed",
    description = "Total client disconnects observed"
)]
pub static CONNECTIONS_CLOSED: Counter = Counter::new();

#[metric(
    name = "messages_received",
    description = "Total chat messages received from clients"
)]
pub static MESSAGES_RECEIVED: Counter = Counter::new();

#[metric(name = "broadcasts", description = "Total chat fan-outs performed")]
pub static BROADCASTS: Counter = Counter::new();

#[metric(
    name = "frames_rejected",
    description = "Total frames dropped for failing validation"
)]
pub static FRAMES_REJECTED: Counter = Counter::new();
