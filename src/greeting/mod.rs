pub mod greeting_get;
pub mod link_builder;
pub mod representation;
pub mod version;
