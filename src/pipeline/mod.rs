pub mod intake;
pub mod recognition;
pub mod segmentation;
pub mod selection;
pub mod session;
