pub mod audit;
pub mod candidate;
pub mod proxy;
pub mod run;
pub mod source;
