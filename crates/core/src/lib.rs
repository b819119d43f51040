pub mod collection;
pub mod config;
pub mod gaps;
pub mod metrics;
pub mod net;
pub mod orchestrator;
pub mod provider;
pub mod resolver;
pub mod retry;
pub mod sink;
pub mod testing;
pub mod throttle;
pub mod worker;

pub use collection::{
    normalize_format, resolve_media_format, CanonicalRecord, Chain, CollectionDescriptor,
    MediaSources, PageCursor, PageResult, ProviderKind,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, LogFormat,
    SanitizedConfig,
};
pub use gaps::plan_gap_fill;
pub use orchestrator::{
    FailureClass, IngestConfig, IngestionOrchestrator, OrchestratorError, ProgressSnapshot,
    RunFailure, RunHandle, RunPhase, RunReport,
};
pub use provider::{
    create_adapter, describe_collection, AlchemyBatchAdapter, AlchemyConfig,
    AlchemyContractAdapter, CollectionInfo, NftScanBatchAdapter, NftScanConfig, PaginationStyle,
    ProviderAdapter, ProviderError,
};
pub use resolver::{
    ContentAddress, HttpSourceResolver, ResolveError, ResolvedSource, ResolverConfig,
    SourceResolver,
};
pub use retry::{retry_with_policy, RetryClass, RetryPolicy, Retryable};
pub use sink::{FsSink, RunProgress, ShardProgress, SinkError};
pub use throttle::{RequestThrottle, ThrottleConfig};
pub use worker::{FetchWorker, MediaOutcome, MetadataOutcome, RecordOutcome};
