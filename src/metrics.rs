use metrics::Counter;
use metrics_derive::Metrics;

#[derive(Metrics, Clone)]
#[metrics(scope = "statediff")]
pub(crate) struct BuilderMetrics {
    /// The number of diff builds started
    #[metrics(describe = "The number of diff builds started")]
    pub(crate) diffs_built: Counter,
    /// The number of full state trie builds started
    #[metrics(describe = "The number of full state trie builds started")]
    pub(crate) trie_objects_built: Counter,
    /// The number of state nodes pushed to sinks
    #[metrics(describe = "The number of state nodes pushed to sinks")]
    pub(crate) state_nodes_emitted: Counter,
    /// The number of storage nodes pushed to sinks
    #[metrics(describe = "The number of storage nodes pushed to sinks")]
    pub(crate) storage_nodes_emitted: Counter,
    /// The number of removed markers pushed to sinks
    #[metrics(describe = "The number of removed markers pushed to sinks")]
    pub(crate) removed_nodes_emitted: Counter,
}
