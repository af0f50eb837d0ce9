pub mod errors;
pub mod video_room_service;
