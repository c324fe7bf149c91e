pub mod detection;
pub mod hls;
pub mod input;
pub mod mp4;
pub mod prebuffer;
pub mod stream_thread;
