pub mod audio_device;
pub mod permission;
pub mod result_callback;
