use std::path::PathBuf;

use crate::ids::UserId;

/// A library owner. Each root path is walked independently during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub root_paths: Vec<PathBuf>,
}
