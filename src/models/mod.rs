// Data models for sources, pose estimation and backend submission

pub mod capture;
pub mod pose;
pub mod submission;
