pub mod channel;
pub mod features;
pub mod posterior;
