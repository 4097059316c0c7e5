pub mod onboard;
pub mod run;
