use std::sync::LazyLock;
use std::time::Duration;

use prometheus::*;

static METRIC_ADD_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imembed_add_count", "count of add operations by result", &["result"]).unwrap()
});

static METRIC_EMBED_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("imembed_embed_duration", "duration of the embedding call in seconds").unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("imembed_search_duration", "duration of the index search and hydration in seconds").unwrap()
});

static METRIC_CONSISTENCY_FAULT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imembed_consistency_fault",
        "count of inconsistencies found between catalog, index and blob store",
        &["kind"]
    )
    .unwrap()
});

/// 记录一次添加图片的结果
pub fn inc_add(result: &str) {
    METRIC_ADD_COUNT.with_label_values(&[result]).inc();
}

pub fn observe_embed_duration(duration: Duration) {
    METRIC_EMBED_DURATION.observe(duration.as_secs_f64());
}

pub fn observe_search_duration(duration: Duration) {
    METRIC_SEARCH_DURATION.observe(duration.as_secs_f64());
}

/// 记录一次一致性错误，例如索引中的向量在目录中不存在
pub fn inc_consistency_fault(kind: &str) {
    METRIC_CONSISTENCY_FAULT.with_label_values(&[kind]).inc();
}

pub fn consistency_faults(kind: &str) -> u64 {
    METRIC_CONSISTENCY_FAULT.with_label_values(&[kind]).get()
}

/// 以 Prometheus 文本格式导出所有指标
pub fn gather() -> String {
    TextEncoder::new().encode_to_string(&prometheus::gather()).unwrap_or_default()
}
