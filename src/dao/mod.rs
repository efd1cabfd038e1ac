/// Completed game history.
pub mod history;
/// Serialized quiz catalogue entities.
pub mod models;
/// Quiz and question lookup.
pub mod question_bank;
/// Storage error types shared by the collaborators.
pub mod storage;
