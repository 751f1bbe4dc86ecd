pub mod debounce;
pub mod feed;
pub mod pipeline;
pub mod profiles;
pub mod recommendations;
pub mod scoring;

pub use debounce::DebounceScheduler;
pub use feed::{EventFeed, FeedListener, FeedSettings};
pub use pipeline::{EventOutcome, Pipeline};
pub use profiles::{PgProfileStore, ProfileStore};
pub use recommendations::{
    rank_items, Materialize, MaterializeOutcome, Materializer, RankingLimits, RecommendationStore,
};
pub use scoring::{ScoreIncrement, ScoringPolicy, ScoringWeights};
