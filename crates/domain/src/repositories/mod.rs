pub mod user_repository;

pub use user_repository::{RelationChange, UserPatch, UserRepository};
