pub mod approval;
pub mod identity;
pub mod location;
pub mod machine;
pub mod ticket;
