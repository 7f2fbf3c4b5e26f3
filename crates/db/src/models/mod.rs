pub mod product;
pub mod sync_run;
pub mod user;
