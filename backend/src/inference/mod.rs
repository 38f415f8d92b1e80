pub mod labels;
pub mod model;
pub mod preprocess;
pub mod ranker;
pub mod registry;
