// Variable substrate: hierarchical data, tracking and secret references

pub mod env;
pub mod path;
pub mod secrets;
pub mod tracker;
pub mod tree;

pub use env::{CustomFunction, Env};
pub use secrets::{
    CachingSecretResolver, SecretFetcher, SecretProvider, SecretReference, SecretResolver,
};
pub use tracker::VariableTracker;
pub use tree::{build_tree, merge_trees_prefer_first};
