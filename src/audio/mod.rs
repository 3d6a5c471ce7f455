pub mod cng;
pub mod codec;
pub mod recovery;
pub mod segment;
pub mod vad;
pub mod wav;
