//! Pipeline metrics, recorded through the `metrics` facade. With no
//! recorder installed these are no-ops, so every stage can call them
//! unconditionally.

use metrics::{counter, gauge, histogram};

pub fn record_collect(stored: u64, duplicates: u64) {
    counter!("replyscout_posts_stored_total").increment(stored);
    counter!("replyscout_posts_duplicate_total").increment(duplicates);
}

pub fn record_judgment(label: &str) {
    counter!("replyscout_judgments_total", "label" => label.to_string()).increment(1);
}

pub fn record_score(total: f64) {
    histogram!("replyscout_score_total").record(total);
}

pub fn record_draft_created() {
    counter!("replyscout_drafts_created_total").increment(1);
}

pub fn record_send(success: bool) {
    let result = if success { "ok" } else { "failed" };
    counter!("replyscout_sends_total", "result" => result).increment(1);
}

pub fn record_llm_call(provider: &str, success: bool, latency_ms: f64) {
    let result = if success { "ok" } else { "failed" };
    counter!(
        "replyscout_llm_calls_total",
        "provider" => provider.to_string(),
        "result" => result
    )
    .increment(1);
    if success {
        histogram!("replyscout_llm_latency_ms", "provider" => provider.to_string())
            .record(latency_ms);
    }
}

pub fn record_llm_breaker_rejection(provider: &str) {
    counter!("replyscout_llm_breaker_rejections_total", "provider" => provider.to_string())
        .increment(1);
}

pub fn record_rate_limit_tokens(hourly: u32, daily: u32) {
    gauge!("replyscout_rate_tokens_hourly").set(f64::from(hourly));
    gauge!("replyscout_rate_tokens_daily").set(f64::from(daily));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_collect(3, 1);
        record_judgment("relevant");
        record_score(72.5);
        record_draft_created();
        record_send(true);
        record_llm_call("openai", true, 120.0);
        record_llm_breaker_rejection("openai");
        record_rate_limit_tokens(5, 20);
    }
}
