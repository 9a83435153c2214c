// Platform collaborators: camera access, media decoding, pose estimation backends
// and process statistics

pub mod camera;
pub mod media;
pub mod pose;
pub mod process;
