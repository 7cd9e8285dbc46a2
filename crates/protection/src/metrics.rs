//! Prometheus instrumentation for signing decisions.

use std::sync::LazyLock;

use prometheus::{IntCounterVec, register_int_counter_vec};

static PERMITS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "slashing_protection_permits_total",
        "Signing requests permitted by the slashing protection engine",
        &["kind"]
    )
    .unwrap()
});

static REFUSALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "slashing_protection_refusals_total",
        "Signing requests refused by the slashing protection engine",
        &["kind"]
    )
    .unwrap()
});

pub(crate) const KIND_BLOCK: &str = "block";
pub(crate) const KIND_ATTESTATION: &str = "attestation";

pub(crate) fn record_decision(kind: &str, permitted: bool) {
    let counter = if permitted { &PERMITS } else { &REFUSALS };
    counter.with_label_values(&[kind]).inc();
}
