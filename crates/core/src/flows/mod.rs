pub mod matcher;
pub mod samples;

pub use matcher::{
    match_flow_node, FlowMatch, FlowMatcher, IntentFamily, MatchKind, MatchWeights,
    DEFAULT_WEIGHTS, INTENT_FAMILIES,
};
pub use samples::FlowTemplate;
