use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("shellgpt.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("shellgpt.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("shellgpt.client.request_duration_seconds");

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("shellgpt.stream.chunks");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("shellgpt.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("shellgpt.stream.bytes");

pub(crate) static CACHE_HITS: Counter = Counter::new("shellgpt.cache.hits");
pub(crate) static CACHE_MISSES: Counter = Counter::new("shellgpt.cache.misses");
pub(crate) static CACHE_WRITES: Counter = Counter::new("shellgpt.cache.writes");
pub(crate) static CACHE_EVICTIONS: Counter = Counter::new("shellgpt.cache.evictions");
pub(crate) static CACHE_ERRORS: Counter = Counter::new("shellgpt.cache.errors");

pub(crate) static COMPLETION_ROUNDS: Counter = Counter::new("shellgpt.completion.rounds");
pub(crate) static FUNCTION_CALLS: Counter = Counter::new("shellgpt.completion.function_calls");
pub(crate) static FUNCTION_ERRORS: Counter = Counter::new("shellgpt.completion.function_errors");
pub(crate) static FUNCTION_DURATION: Moments =
    Moments::new("shellgpt.completion.function_duration_seconds");

pub(crate) static CHAT_TRUNCATIONS: Counter = Counter::new("shellgpt.chat.truncated_messages");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);

    collector.register_counter(&CACHE_HITS);
    collector.register_counter(&CACHE_MISSES);
    collector.register_counter(&CACHE_WRITES);
    collector.register_counter(&CACHE_EVICTIONS);
    collector.register_counter(&CACHE_ERRORS);

    collector.register_counter(&COMPLETION_ROUNDS);
    collector.register_counter(&FUNCTION_CALLS);
    collector.register_counter(&FUNCTION_ERRORS);
    collector.register_moments(&FUNCTION_DURATION);

    collector.register_counter(&CHAT_TRUNCATIONS);
}
