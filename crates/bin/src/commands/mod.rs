pub mod db;
pub mod keys;
pub mod sign;
pub mod uri;
