pub mod export;
pub mod feasibility;
pub mod init;
pub mod inspect;
pub mod simulate;
