pub mod pcm_spool;
pub mod wav_writer;
