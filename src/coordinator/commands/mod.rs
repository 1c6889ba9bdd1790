pub mod health_check;
pub mod initialize;
pub mod normal_operation;
pub mod pair;
pub mod ping;
pub mod poll;
pub mod reboot;
