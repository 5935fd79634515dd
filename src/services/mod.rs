pub mod estimate;
pub mod reconciler;
pub mod replay;
pub mod submission;
