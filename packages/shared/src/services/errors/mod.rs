pub mod video_room_errors;
