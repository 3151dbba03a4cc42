pub mod index;
pub mod search;
pub mod serve;
pub mod status;
