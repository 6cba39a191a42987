pub mod conversation;
pub mod envelope;
pub mod flow;
pub mod intent;
pub mod tenant;
pub mod training;
